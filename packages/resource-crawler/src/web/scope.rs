//! URL and content-type scopes for web crawls.
//!
//! A resource's URL is its payload when it is a `url` resource, otherwise its
//! `meta.url`. Resources without a parseable URL fail every URL check.

use regex::Regex;
use url::Url;

use crate::resource::{Resource, KIND_HTML, KIND_URL};
use crate::scope::{all_of, not, type_equals, Predicate};

pub fn is_url() -> Predicate {
    type_equals(KIND_URL)
}

pub fn is_html() -> Predicate {
    type_equals(KIND_HTML)
}

/// The URL a resource refers to, as raw text.
pub fn url_of(resource: &Resource) -> Option<&str> {
    if resource.kind == KIND_URL {
        resource.data.as_str()
    } else {
        resource.meta_str("url")
    }
}

/// Apply `check` to the resource's URL text.
pub fn test_by_url<F>(name: impl Into<String>, check: F) -> Predicate
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    Predicate::leaf(name, move |r| url_of(r).is_some_and(&check))
}

fn test_by_parsed_url<F>(name: String, check: F) -> Predicate
where
    F: Fn(&Url) -> bool + Send + Sync + 'static,
{
    test_by_url(name, move |raw| {
        Url::parse(raw).map(|url| check(&url)).unwrap_or(false)
    })
}

/// Host (with port, if any) equals `host`.
pub fn host_equals(host: impl Into<String>) -> Predicate {
    let host = host.into();
    test_by_parsed_url(format!("host == {host:?}"), move |url| {
        host_with_port(url).as_deref() == Some(host.as_str())
    })
}

pub fn host_matches(pattern: Regex) -> Predicate {
    test_by_parsed_url(format!("host ~ /{pattern}/"), move |url| {
        host_with_port(url).is_some_and(|h| pattern.is_match(&h))
    })
}

pub fn path_matches(pattern: Regex) -> Predicate {
    test_by_parsed_url(format!("path ~ /{pattern}/"), move |url| {
        pattern.is_match(url.path())
    })
}

/// Whole URL text matches `pattern`.
pub fn meta_url_matches(pattern: Regex) -> Predicate {
    test_by_url(format!("url ~ /{pattern}/"), move |raw| pattern.is_match(raw))
}

pub fn meta_content_type_matches(pattern: Regex) -> Predicate {
    Predicate::leaf(format!("contentType ~ /{pattern}/"), move |r| {
        r.meta_str("contentType").is_some_and(|ct| pattern.is_match(ct))
    })
}

/// An `html` resource whose source URL matches `pattern`.
pub fn url_of_page_matches(pattern: Regex) -> Predicate {
    all_of([is_html(), meta_url_matches(pattern)])
}

/// A `url` resource not yet resolved to its final location.
pub fn is_unresolved_url() -> Predicate {
    all_of([is_url(), not(resolved())])
}

pub fn is_resolved_url() -> Predicate {
    all_of([is_url(), resolved()])
}

/// A resolved `url` resource whose content type matches `pattern`.
pub fn content_type_of_url_matches(pattern: Regex) -> Predicate {
    all_of([is_resolved_url(), meta_content_type_matches(pattern)])
}

fn resolved() -> Predicate {
    crate::scope::meta_truthy("resolved")
}

fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
