//! Generic web handlers: resolve URLs, fetch pages and images.
//!
//! ```text
//! url (unresolved) ─resolve─► url (resolved, contentType) ─┬─► html
//!                                                          └─► image
//! ```

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use url::Url;

use super::fetcher::{resolve_final_url, PageFetcher, MAX_REDIRECTS};
use super::scope::{content_type_of_url_matches, is_html, is_unresolved_url};
use crate::handler::{HandlerSpec, Transform, TransformOutput};
use crate::resource::{Resource, ResourceDescriptor};

lazy_static! {
    static ref HTML_CONTENT_TYPE: Regex = RegexBuilder::new(r"^text/html\b")
        .case_insensitive(true)
        .build()
        .unwrap();
    static ref IMAGE_CONTENT_TYPE: Regex = RegexBuilder::new(r"^image/(jpeg|png)\b")
        .case_insensitive(true)
        .build()
        .unwrap();
}

fn url_payload(resource: &Resource) -> anyhow::Result<&str> {
    match resource.data.as_str() {
        Some(url) => Ok(url),
        None => bail!("url resource {} has no string payload", resource.id),
    }
}

// =============================================================================
// Resolve
// =============================================================================

/// Follows redirects and records the final URL and its content type.
///
/// A 404 produces nothing, so the sentinel records the attempt and the URL is
/// not retried on later runs.
pub struct UrlResolve {
    fetcher: Arc<dyn PageFetcher>,
    max_redirects: usize,
}

#[async_trait]
impl Transform for UrlResolve {
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        let raw = url_payload(resource)?;
        let resolved = match resolve_final_url(self.fetcher.as_ref(), raw, self.max_redirects).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_not_found() => return Ok(TransformOutput::Nothing),
            Err(e) => return Err(e).context(format!("Failed to fetch URL: {raw}")),
        };

        let mut descriptor = ResourceDescriptor::url(resolved.url.to_string());
        descriptor.meta = resource.meta.clone();
        let descriptor = descriptor
            .with_meta("resolved", true)
            .with_meta("contentType", resolved.content_type.map_or(Value::Null, Value::from));
        Ok(descriptor.into())
    }
}

pub fn url_resolve_handler(fetcher: Arc<dyn PageFetcher>) -> HandlerSpec {
    HandlerSpec::new(
        "url-resolve",
        "1",
        UrlResolve {
            fetcher,
            max_redirects: MAX_REDIRECTS,
        },
    )
    .with_scope(is_unresolved_url())
}

// =============================================================================
// Fetch
// =============================================================================

/// Downloads an HTML page.
pub struct UrlToHtml {
    fetcher: Arc<dyn PageFetcher>,
}

#[async_trait]
impl Transform for UrlToHtml {
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        let raw = url_payload(resource)?;
        let url = Url::parse(raw)?;
        let response = self
            .fetcher
            .get(&url)
            .await
            .with_context(|| format!("Failed to fetch URL: {raw}"))?;

        let mut descriptor =
            ResourceDescriptor::html(String::from_utf8_lossy(&response.body).into_owned(), raw);
        let mut meta = resource.meta.clone();
        meta.extend(descriptor.meta);
        descriptor.meta = meta;
        let descriptor = descriptor
            .with_meta("status", response.status)
            .with_meta("contentType", response.content_type.map_or(Value::Null, Value::from));
        Ok(descriptor.into())
    }
}

pub fn url_to_html_handler(fetcher: Arc<dyn PageFetcher>) -> HandlerSpec {
    HandlerSpec::new("url-to-html", "1", UrlToHtml { fetcher })
        .with_scope(content_type_of_url_matches(HTML_CONTENT_TYPE.clone()))
}

/// Downloads a JPEG or PNG image.
pub struct UrlToImage {
    fetcher: Arc<dyn PageFetcher>,
}

#[async_trait]
impl Transform for UrlToImage {
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        let raw = url_payload(resource)?;
        let url = Url::parse(raw)?;
        let response = self
            .fetcher
            .get(&url)
            .await
            .with_context(|| format!("Failed to download image: {raw}"))?;

        Ok(ResourceDescriptor::image(response.body, raw)
            .with_meta("contentType", response.content_type.map_or(Value::Null, Value::from))
            .into())
    }
}

pub fn url_to_image_handler(fetcher: Arc<dyn PageFetcher>) -> HandlerSpec {
    HandlerSpec::new("url-to-image", "1", UrlToImage { fetcher })
        .with_scope(content_type_of_url_matches(IMAGE_CONTENT_TYPE.clone()))
}

// =============================================================================
// Extract
// =============================================================================

/// Turns an `html` resource into a `kind` resource via `extract`.
///
/// The result carries the page URL in `meta.url`.
pub fn html_extractor<F>(
    name: impl Into<String>,
    version: &str,
    kind: impl Into<String>,
    extract: F,
) -> HandlerSpec
where
    F: Fn(&str) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    let kind = kind.into();
    HandlerSpec::from_sync_fn(name, version, move |page| {
        let body = page.data.as_str().unwrap_or_default();
        let mut descriptor = ResourceDescriptor::of_kind(kind.clone(), extract(body)?);
        if let Some(url) = page.meta_value("url") {
            descriptor = descriptor.with_meta("url", url.clone());
        }
        Ok(descriptor.into())
    })
    .with_scope(is_html())
}
