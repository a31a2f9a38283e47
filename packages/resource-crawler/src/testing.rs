//! Testing utilities including mock implementations.
//!
//! Useful for testing crawls without real network access or a database:
//! counting and failing transforms, a scripted [`PageFetcher`], a store
//! wrapper that injects failures, and a tap that records what it sees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::handler::{Handler, Transform, TransformOutput};
use crate::resource::{HandledState, Resource, ResourceDescriptor, ResourceId};
use crate::store::{ChangeFeed, DynResourceStore, ResourceQuery, ResourceStore};
use crate::tap::{ResourceTap, TapContext};
use crate::web::{FetchError, FetchedBody, HeadResponse, PageFetcher};

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Transforms
// =============================================================================

type Produce = dyn Fn(&Resource) -> Vec<ResourceDescriptor> + Send + Sync;

/// Transform that counts its invocations.
#[derive(Clone)]
pub struct CountingTransform {
    calls: Arc<AtomicUsize>,
    produce: Arc<Produce>,
}

impl CountingTransform {
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn(&Resource) -> Vec<ResourceDescriptor> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            produce: Arc::new(produce),
        }
    }

    /// Transform that never produces anything.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Shared invocation counter, still readable after the transform is registered.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for CountingTransform {
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransformOutput::Many((self.produce)(resource)))
    }
}

/// Transform that always returns an error.
pub struct FailingTransform {
    message: String,
}

impl FailingTransform {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Transform for FailingTransform {
    async fn transform(&self, _resource: &Resource) -> anyhow::Result<TransformOutput> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// Transform that always panics.
pub struct PanickingTransform;

#[async_trait]
impl Transform for PanickingTransform {
    async fn transform(&self, _resource: &Resource) -> anyhow::Result<TransformOutput> {
        panic!("transform exploded")
    }
}

// =============================================================================
// Fetcher
// =============================================================================

#[derive(Debug, Clone)]
enum MockRoute {
    Redirect(String),
    Page { content_type: String, body: Vec<u8> },
    Status(u16),
}

/// Record of a call made to the mock fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFetchCall {
    Head(String),
    Get(String),
}

/// Scripted [`PageFetcher`]. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockFetcher {
    routes: RwLock<HashMap<String, MockRoute>>,
    calls: RwLock<Vec<MockFetchCall>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with a 301 to `location`.
    pub fn with_redirect(self, url: &str, location: &str) -> Self {
        self.route(url, MockRoute::Redirect(location.to_string()))
    }

    pub fn with_page(self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.route(
            url,
            MockRoute::Page {
                content_type: content_type.to_string(),
                body: body.into(),
            },
        )
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.route(url, MockRoute::Status(status))
    }

    pub fn calls(&self) -> Vec<MockFetchCall> {
        self.calls.read().unwrap().clone()
    }

    fn route(self, url: &str, route: MockRoute) -> Self {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.routes.write().unwrap().insert(key, route);
        self
    }

    fn lookup(&self, url: &Url) -> Option<MockRoute> {
        self.routes.read().unwrap().get(url.as_str()).cloned()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn head(&self, url: &Url) -> Result<HeadResponse, FetchError> {
        self.calls
            .write()
            .unwrap()
            .push(MockFetchCall::Head(url.to_string()));
        Ok(match self.lookup(url) {
            Some(MockRoute::Redirect(location)) => HeadResponse {
                status: 301,
                location: Some(location),
                content_type: None,
            },
            Some(MockRoute::Page { content_type, .. }) => HeadResponse {
                status: 200,
                location: None,
                content_type: Some(content_type),
            },
            Some(MockRoute::Status(status)) => HeadResponse {
                status,
                location: None,
                content_type: None,
            },
            None => HeadResponse {
                status: 404,
                location: None,
                content_type: None,
            },
        })
    }

    async fn get(&self, url: &Url) -> Result<FetchedBody, FetchError> {
        self.calls
            .write()
            .unwrap()
            .push(MockFetchCall::Get(url.to_string()));
        match self.lookup(url) {
            Some(MockRoute::Page { content_type, body }) => Ok(FetchedBody {
                status: 200,
                content_type: Some(content_type),
                body,
            }),
            Some(MockRoute::Status(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
            Some(MockRoute::Redirect(_)) | None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Store wrapper that fails selected operations.
pub struct FailingStore {
    inner: DynResourceStore,
    fail_create_kind: Option<String>,
    fail_saves: bool,
}

impl FailingStore {
    pub fn new(inner: DynResourceStore) -> Self {
        Self {
            inner,
            fail_create_kind: None,
            fail_saves: false,
        }
    }

    /// Fail `create` for descriptors of `kind`.
    pub fn fail_creates_of_kind(mut self, kind: impl Into<String>) -> Self {
        self.fail_create_kind = Some(kind.into());
        self
    }

    /// Fail every `save` and `set_state`.
    pub fn fail_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    fn injected() -> StoreError {
        StoreError::backend("injected failure")
    }
}

#[async_trait]
impl ResourceStore for FailingStore {
    async fn find(&self, query: &ResourceQuery) -> StoreResult<Vec<Resource>> {
        self.inner.find(query).await
    }

    async fn get(&self, id: ResourceId) -> StoreResult<Option<Resource>> {
        self.inner.get(id).await
    }

    async fn insert(&self, descriptor: ResourceDescriptor) -> StoreResult<Resource> {
        self.inner.insert(descriptor).await
    }

    async fn create(
        &self,
        descriptor: ResourceDescriptor,
        handler: &Handler,
        parent: &Resource,
    ) -> StoreResult<Resource> {
        if self.fail_create_kind.as_deref() == Some(descriptor.kind.as_str()) {
            return Err(Self::injected());
        }
        self.inner.create(descriptor, handler, parent).await
    }

    async fn save(&self, resource: &mut Resource) -> StoreResult<()> {
        if self.fail_saves {
            return Err(Self::injected());
        }
        self.inner.save(resource).await
    }

    async fn set_state(&self, resource: &mut Resource, state: HandledState) -> StoreResult<()> {
        if self.fail_saves {
            return Err(Self::injected());
        }
        self.inner.set_state(resource, state).await
    }

    async fn find_cached(&self, handler: &Handler, parent: &Resource) -> StoreResult<Vec<Resource>> {
        self.inner.find_cached(handler, parent).await
    }

    fn subscribe(&self) -> ChangeFeed {
        self.inner.subscribe()
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }
}

// =============================================================================
// Tap
// =============================================================================

/// Tap that records every resource it observes.
#[derive(Clone, Default)]
pub struct RecordingTap {
    seen: Arc<Mutex<Vec<Resource>>>,
}

impl RecordingTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<Resource> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceTap for RecordingTap {
    async fn on_resource(&self, resource: &Resource, _ctx: &TapContext) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(resource.clone());
        Ok(())
    }
}
