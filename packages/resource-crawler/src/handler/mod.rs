//! Handlers: a capability scope paired with a transform.
//!
//! Developers describe a handler with a [`HandlerSpec`]. Registering the spec
//! in a [`HandlerRegistry`] finalizes it into a [`Handler`] with a
//! process-lifetime [`HandlerId`].
//!
//! # Example
//!
//! ```ignore
//! use resource_crawler::{scope, HandlerSpec, ResourceDescriptor, TransformOutput};
//!
//! let upper = HandlerSpec::from_sync_fn("upper", "1", |r| {
//!     let text = r.data.as_str().unwrap_or_default().to_uppercase();
//!     Ok(ResourceDescriptor::of_kind("shout", text).into())
//! })
//! .with_scope(scope::type_equals("text"));
//! ```

mod fingerprint;
pub mod registry;

pub use fingerprint::{normalize_source, Fingerprint, HandlerId};
pub use registry::{bind_scope, HandlerRegistry};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::resource::{Resource, ResourceDescriptor};
use crate::scope::Predicate;

// =============================================================================
// Transform
// =============================================================================

/// The work a handler performs on a matching resource.
///
/// Errors (and panics) are captured by the engine and persisted as `error`
/// resources; they never abort a crawl.
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput>;
}

/// What a transform returned.
pub enum TransformOutput {
    /// Ran, produced nothing
    Nothing,
    One(ResourceDescriptor),
    Many(Vec<ResourceDescriptor>),
    /// Lazily produced descriptors. An `Err` item ends the stream.
    Stream(BoxStream<'static, anyhow::Result<ResourceDescriptor>>),
}

impl TransformOutput {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<ResourceDescriptor>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Flatten into a list of descriptors.
    ///
    /// A failing stream keeps whatever it yielded before the failure and
    /// returns the failure alongside.
    pub async fn collect(self) -> (Vec<ResourceDescriptor>, Option<anyhow::Error>) {
        match self {
            TransformOutput::Nothing => (Vec::new(), None),
            TransformOutput::One(d) => (vec![d], None),
            TransformOutput::Many(ds) => (ds, None),
            TransformOutput::Stream(mut stream) => {
                let mut out = Vec::new();
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(d) => out.push(d),
                        Err(e) => return (out, Some(e)),
                    }
                }
                (out, None)
            }
        }
    }
}

impl fmt::Debug for TransformOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformOutput::Nothing => f.write_str("Nothing"),
            TransformOutput::One(d) => f.debug_tuple("One").field(d).finish(),
            TransformOutput::Many(ds) => f.debug_tuple("Many").field(ds).finish(),
            TransformOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<ResourceDescriptor> for TransformOutput {
    fn from(d: ResourceDescriptor) -> Self {
        TransformOutput::One(d)
    }
}

impl From<Vec<ResourceDescriptor>> for TransformOutput {
    fn from(ds: Vec<ResourceDescriptor>) -> Self {
        TransformOutput::Many(ds)
    }
}

impl From<Option<ResourceDescriptor>> for TransformOutput {
    fn from(d: Option<ResourceDescriptor>) -> Self {
        match d {
            Some(d) => TransformOutput::One(d),
            None => TransformOutput::Nothing,
        }
    }
}

/// Adapts an async closure taking an owned resource.
pub struct FnTransform<F>(F);

#[async_trait]
impl<F, Fut> Transform for FnTransform<F>
where
    F: Fn(Resource) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<TransformOutput>> + Send + 'static,
{
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        (self.0)(resource.clone()).await
    }
}

/// Adapts a synchronous closure.
pub struct SyncFnTransform<F>(F);

#[async_trait]
impl<F> Transform for SyncFnTransform<F>
where
    F: Fn(&Resource) -> anyhow::Result<TransformOutput> + Send + Sync + 'static,
{
    async fn transform(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        (self.0)(resource)
    }
}

// =============================================================================
// HandlerSpec
// =============================================================================

/// Unregistered handler description.
pub struct HandlerSpec {
    name: String,
    fingerprint: Fingerprint,
    scope: Predicate,
    transform: Arc<dyn Transform>,
    dont_cache: bool,
}

impl HandlerSpec {
    /// Describe a handler. `version` feeds the behavior fingerprint.
    pub fn new(name: impl Into<String>, version: &str, transform: impl Transform) -> Self {
        let name = name.into();
        Self {
            fingerprint: Fingerprint::from_version(&name, version),
            name,
            scope: Predicate::Always,
            transform: Arc::new(transform),
            dont_cache: false,
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, version: &str, f: F) -> Self
    where
        F: Fn(Resource) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TransformOutput>> + Send + 'static,
    {
        Self::new(name, version, FnTransform(f))
    }

    pub fn from_sync_fn<F>(name: impl Into<String>, version: &str, f: F) -> Self
    where
        F: Fn(&Resource) -> anyhow::Result<TransformOutput> + Send + Sync + 'static,
    {
        Self::new(name, version, SyncFnTransform(f))
    }

    pub fn with_scope(mut self, scope: Predicate) -> Self {
        self.scope = scope;
        self
    }

    /// Derive the fingerprint from source text instead of the version string.
    pub fn with_source_fingerprint(mut self, source: &str) -> Self {
        self.fingerprint = Fingerprint::from_source(&self.name, source);
        self
    }

    /// Always invoke the transform, never replay cached output.
    pub fn dont_cache(mut self) -> Self {
        self.dont_cache = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn scope(&self) -> &Predicate {
        &self.scope
    }

    pub(crate) fn map_scope(mut self, f: impl FnOnce(Predicate) -> Predicate) -> Self {
        self.scope = f(self.scope);
        self
    }

    pub(crate) fn finalize(self) -> Handler {
        Handler {
            id: HandlerId::next(),
            name: self.name,
            fingerprint: self.fingerprint,
            scope: self.scope,
            transform: self.transform,
            dont_cache: self.dont_cache,
        }
    }
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("scope", &self.scope)
            .field("dont_cache", &self.dont_cache)
            .finish()
    }
}

// =============================================================================
// Handler
// =============================================================================

/// A registered handler.
pub struct Handler {
    id: HandlerId,
    name: String,
    fingerprint: Fingerprint,
    scope: Predicate,
    transform: Arc<dyn Transform>,
    dont_cache: bool,
}

impl Handler {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn scope(&self) -> &Predicate {
        &self.scope
    }

    pub fn dont_cache(&self) -> bool {
        self.dont_cache
    }

    pub fn applies_to(&self, resource: &Resource) -> bool {
        self.scope.eval(resource)
    }

    pub async fn invoke(&self, resource: &Resource) -> anyhow::Result<TransformOutput> {
        self.transform.transform(resource).await
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("scope", &self.scope)
            .field("dont_cache", &self.dont_cache)
            .finish()
    }
}
