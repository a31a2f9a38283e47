//! Typed errors for the resource crawler.
//!
//! Uses `thiserror` for library errors. Transforms themselves return
//! `anyhow::Result` since their failures are captured into `error` resources
//! rather than propagated.
//!
//! Failure classes:
//!
//! | Failure            | Outcome                                      |
//! |--------------------|----------------------------------------------|
//! | No handler matches | resource marked orphaned, not an error       |
//! | Transform failure  | one `error` child resource, run continues    |
//! | Store failure      | run aborts with [`CrawlerError::Store`]      |
//! | Bad configuration  | [`CrawlerError::Config`] before any dispatch |

use thiserror::Error;

use crate::resource::ResourceId;

/// Errors surfaced by a crawl run or by engine construction.
#[derive(Debug, Error)]
pub enum CrawlerError {
    /// Engine was built without a required collaborator
    #[error("config error: {reason}")]
    Config { reason: String },

    /// Store operation failed while processing a resource
    #[error("store error while processing {resource_id}: {source}")]
    Store {
        resource_id: ResourceId,
        #[source]
        source: StoreError,
    },

    /// Store operation failed outside of any single resource (seed loading, subscribe)
    #[error("store error: {0}")]
    Storage(#[from] StoreError),

    /// A dispatch task was cancelled or could not be joined
    #[error("dispatch task failed: {0}")]
    Join(String),
}

impl CrawlerError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub(crate) fn store(resource_id: ResourceId, source: StoreError) -> Self {
        Self::Store {
            resource_id,
            source,
        }
    }
}

/// Errors returned by [`ResourceStore`](crate::store::ResourceStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage backend failed
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Resource does not exist
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// Resource could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store has been closed
    #[error("store closed")]
    Closed,
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
