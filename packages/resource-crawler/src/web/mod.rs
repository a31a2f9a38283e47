//! Building blocks for crawling the web.
//!
//! - [`scope`]: URL, host, path and content-type predicates
//! - [`PageFetcher`]: the HTTP contract handlers fetch through
//! - handlers: [`url_resolve_handler`], [`url_to_html_handler`],
//!   [`url_to_image_handler`] and [`html_extractor`]
//!
//! Typical registration:
//!
//! ```ignore
//! let fetcher: Arc<dyn PageFetcher> = Arc::new(MyReqwestFetcher::new());
//! registry.register([
//!     web::url_resolve_handler(fetcher.clone()),
//!     web::url_to_html_handler(fetcher.clone()),
//!     web::url_to_image_handler(fetcher),
//! ]);
//! ```

mod fetcher;
mod handlers;
pub mod scope;

pub use fetcher::{
    resolve_final_url, FetchError, FetchedBody, HeadResponse, PageFetcher, ResolvedUrl,
    MAX_REDIRECTS,
};
pub use handlers::{
    html_extractor, url_resolve_handler, url_to_html_handler, url_to_image_handler, UrlResolve,
    UrlToHtml, UrlToImage,
};
