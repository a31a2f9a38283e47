//! HTTP access contract for the web handlers.
//!
//! The crawler ships no HTTP client. Implement [`PageFetcher`] over whatever
//! client the application already uses.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Redirects followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// Response to a single HEAD request (redirects not followed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResponse {
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
}

/// Response to a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Final location of a URL after redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: Url,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("missing location header on {status} from {url}")]
    MissingLocation { url: String, status: u16 },

    #[error("max redirect count reached ({max}) at {url}")]
    TooManyRedirects { url: String, max: usize },

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    /// Issue one HEAD request without following redirects.
    async fn head(&self, url: &Url) -> Result<HeadResponse, FetchError>;

    /// GET the body, following redirects.
    async fn get(&self, url: &Url) -> Result<FetchedBody, FetchError>;
}

/// Follow redirects from `url` until a 2xx response.
///
/// Relative `Location` headers are resolved against the current URL.
pub async fn resolve_final_url(
    fetcher: &dyn PageFetcher,
    url: &str,
    max_redirects: usize,
) -> Result<ResolvedUrl, FetchError> {
    let mut current = Url::parse(url)?;
    let mut redirects = 0;

    loop {
        let response = fetcher.head(&current).await?;
        match response.status {
            200..=299 => {
                return Ok(ResolvedUrl {
                    url: current,
                    content_type: response.content_type,
                })
            }
            300..=399 => {
                let location = response.location.ok_or_else(|| FetchError::MissingLocation {
                    url: current.to_string(),
                    status: response.status,
                })?;
                if redirects >= max_redirects {
                    return Err(FetchError::TooManyRedirects {
                        url: current.to_string(),
                        max: max_redirects,
                    });
                }
                let next = current.join(&location)?;
                debug!(from = %current, to = %next, status = response.status, "following redirect");
                current = next;
                redirects += 1;
            }
            status => {
                return Err(FetchError::Status {
                    url: current.to_string(),
                    status,
                })
            }
        }
    }
}
