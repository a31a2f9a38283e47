//! Persistence contract for resources.
//!
//! The store is the only durable, shared state of a crawl. Implementations
//! must be safe under concurrent calls from many dispatch tasks.
//!
//! - [`MemoryStore`]: in-process, for tests and short-lived crawls
//! - `PostgresStore` (feature `postgres`): durable, with `LISTEN/NOTIFY` change feed

mod feed;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use feed::{ChangeFeed, StoreEvent, DEFAULT_FEED_CAPACITY};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::handler::{Fingerprint, Handler};
use crate::resource::{HandledState, Resource, ResourceDescriptor, ResourceId};

/// Shared store handle.
pub type DynResourceStore = Arc<dyn ResourceStore>;

/// Storage for crawl resources.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Resources matching `query`, oldest first.
    async fn find(&self, query: &ResourceQuery) -> StoreResult<Vec<Resource>>;

    /// Fetch a single resource.
    async fn get(&self, id: ResourceId) -> StoreResult<Option<Resource>>;

    /// Insert a depth-0 seed. Emits [`StoreEvent::Inserted`].
    async fn insert(&self, descriptor: ResourceDescriptor) -> StoreResult<Resource>;

    /// Persist a child produced by `handler` from `parent`, filling in depth
    /// and lineage. Emits [`StoreEvent::Inserted`].
    ///
    /// The returned resource carries the handler's process identity.
    async fn create(
        &self,
        descriptor: ResourceDescriptor,
        handler: &Handler,
        parent: &Resource,
    ) -> StoreResult<Resource>;

    /// Persist changes to an existing resource. Recomputes the content
    /// fingerprint and `updated_at`. Emits [`StoreEvent::Updated`].
    async fn save(&self, resource: &mut Resource) -> StoreResult<()>;

    /// Persist a state transition.
    async fn set_state(&self, resource: &mut Resource, state: HandledState) -> StoreResult<()> {
        resource.handled_state = state;
        self.save(resource).await
    }

    /// Children previously produced from `parent` by any handler sharing
    /// `handler`'s fingerprint.
    async fn find_cached(&self, handler: &Handler, parent: &Resource) -> StoreResult<Vec<Resource>> {
        let query = ResourceQuery::new()
            .with_parent(parent.id)
            .with_parent_fingerprint(handler.fingerprint().clone());
        self.find(&query).await
    }

    /// Subscribe to inserts and updates. Only events after this call are seen.
    fn subscribe(&self) -> ChangeFeed;

    /// Close the store. Open change feeds end.
    async fn close(&self) -> StoreResult<()>;
}

/// Field-equality query over resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceQuery {
    pub depth: Option<u32>,
    pub state: Option<HandledState>,
    pub kind: Option<String>,
    pub exclude_kind: Option<String>,
    pub parent: Option<ResourceId>,
    pub parent_fingerprint: Option<Fingerprint>,
    pub limit: Option<usize>,
}

impl ResourceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth-0 resources.
    pub fn seeds() -> Self {
        Self::new().with_depth(0)
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_state(mut self, state: HandledState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn without_kind(mut self, kind: impl Into<String>) -> Self {
        self.exclude_kind = Some(kind.into());
        self
    }

    pub fn with_parent(mut self, parent: ResourceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_parent_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.parent_fingerprint = Some(fingerprint);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation, ignoring `limit`.
    pub fn matches(&self, resource: &Resource) -> bool {
        self.depth.map_or(true, |d| resource.depth == d)
            && self.state.map_or(true, |s| resource.handled_state == s)
            && self.kind.as_ref().map_or(true, |k| &resource.kind == k)
            && self
                .exclude_kind
                .as_ref()
                .map_or(true, |k| &resource.kind != k)
            && self
                .parent
                .map_or(true, |p| resource.parent_resource == Some(p))
            && self
                .parent_fingerprint
                .as_ref()
                .map_or(true, |f| resource.parent_handler_fingerprint.as_ref() == Some(f))
    }
}
