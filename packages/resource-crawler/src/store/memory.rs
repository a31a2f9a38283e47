//! In-memory storage implementation for testing and development.

use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeFeed, ResourceQuery, ResourceStore, StoreEvent, DEFAULT_FEED_CAPACITY};
use crate::error::{StoreError, StoreResult};
use crate::handler::Handler;
use crate::resource::{Lineage, Resource, ResourceDescriptor, ResourceId};

/// In-memory resource store.
///
/// Keeps insertion order, so `find` returns oldest first. Not suitable for
/// production as data is lost on restart.
pub struct MemoryStore {
    resources: RwLock<IndexMap<ResourceId, Resource>>,
    sender: Mutex<Option<broadcast::Sender<StoreEvent>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            resources: RwLock::new(IndexMap::new()),
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.resources.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored resources matching `query`.
    pub fn count(&self, query: &ResourceQuery) -> usize {
        self.resources
            .read()
            .map(|r| r.values().filter(|res| query.matches(res)).count())
            .unwrap_or(0)
    }

    /// Snapshot of every stored resource, oldest first.
    pub fn all(&self) -> Vec<Resource> {
        self.resources
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    fn sender(&self) -> StoreResult<broadcast::Sender<StoreEvent>> {
        self.sender
            .lock()
            .map_err(poisoned)?
            .clone()
            .ok_or(StoreError::Closed)
    }

    fn put(&self, resource: &Resource, event: fn(Resource) -> StoreEvent) -> StoreResult<()> {
        let sender = self.sender()?;
        let mut stored = resource.clone();
        stored.lineage = Lineage::default();
        self.resources
            .write()
            .map_err(poisoned)?
            .insert(stored.id, stored.clone());
        // No subscribers is fine.
        let _ = sender.send(event(stored));
        Ok(())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::backend("memory store lock poisoned")
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn find(&self, query: &ResourceQuery) -> StoreResult<Vec<Resource>> {
        let resources = self.resources.read().map_err(poisoned)?;
        let matches = resources.values().filter(|r| query.matches(r)).cloned();
        Ok(match query.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    async fn get(&self, id: ResourceId) -> StoreResult<Option<Resource>> {
        Ok(self.resources.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn insert(&self, descriptor: ResourceDescriptor) -> StoreResult<Resource> {
        let resource = Resource::seed(descriptor);
        self.put(&resource, StoreEvent::Inserted)?;
        debug!(resource_id = %resource.id, kind = %resource.kind, "inserted seed");
        Ok(resource)
    }

    async fn create(
        &self,
        descriptor: ResourceDescriptor,
        handler: &Handler,
        parent: &Resource,
    ) -> StoreResult<Resource> {
        let resource =
            Resource::child_of(descriptor, parent, handler.fingerprint(), handler.id());
        self.put(&resource, StoreEvent::Inserted)?;
        Ok(resource)
    }

    async fn save(&self, resource: &mut Resource) -> StoreResult<()> {
        if !self.resources.read().map_err(poisoned)?.contains_key(&resource.id) {
            return Err(StoreError::NotFound(resource.id));
        }
        resource.refresh_fingerprint();
        self.put(resource, StoreEvent::Updated)
    }

    fn subscribe(&self) -> ChangeFeed {
        match self.sender.lock().ok().and_then(|s| s.clone()) {
            Some(sender) => ChangeFeed::new(sender.subscribe()),
            None => ChangeFeed::closed(),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        self.sender.lock().map_err(poisoned)?.take();
        debug!("memory store closed");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("resources", &self.len())
            .finish()
    }
}
