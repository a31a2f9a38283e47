//! Behavior fingerprints and process-lifetime handler identities.
//!
//! A [`Fingerprint`] identifies what a handler *does*. Two handler instances
//! with the same fingerprint are interchangeable for caching purposes, across
//! processes and restarts. A [`HandlerId`] identifies a handler *instance* for
//! the lifetime of the process and is never persisted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable hash of a handler's behavior (hex-encoded SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint from a developer-assigned name and version.
    ///
    /// Bump the version whenever the transform's behavior changes; previously
    /// cached output is then ignored.
    pub fn from_version(name: &str, version: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.trim().as_bytes());
        hasher.update(b"@");
        hasher.update(version.trim().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint from the handler's source text.
    ///
    /// Comments and whitespace are ignored, so reformatting or re-commenting
    /// the source keeps the fingerprint. Typically fed with `include_str!`.
    pub fn from_source(name: &str, source: &str) -> Self {
        Self::from_version(name, &normalize_source(source))
    }

    /// Rehydrate a fingerprint read back from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip `//` and `/* */` comments and collapse whitespace runs.
///
/// Double-quoted string literals are copied verbatim, escapes included.
pub fn normalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
                while let Some(s) = chars.next() {
                    out.push(s);
                    match s {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        break;
                    }
                }
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        break;
                    }
                    prev = s;
                }
                pending_space = true;
            }
            c if c.is_whitespace() => pending_space = true,
            c => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
            }
        }
    }

    out
}

fn flush_space(out: &mut String, pending: &mut bool) {
    if *pending && !out.is_empty() {
        out.push(' ');
    }
    *pending = false;
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-lifetime identity of a registered handler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocate a fresh identity. Never repeats within a process.
    pub fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}
