//! Generic Resource Crawler
//!
//! Ingests seed resources (URLs, events, documents), applies a registry of
//! scoped handlers to them, persists everything the handlers produce, and
//! feeds the products back in until nothing is left to do.
//!
//! # Design
//!
//! - Handlers declare *what* they apply to with a [`scope::Predicate`]
//! - Transform output is memoized per (parent resource, handler fingerprint)
//! - Fingerprints track handler *behavior*, so a restarted process reuses
//!   prior work and a changed handler invalidates it
//! - "Ran, produced nothing" is persisted as an `empty` sentinel
//! - A failing transform becomes an `error` resource, never a failed crawl
//!
//! # Usage
//!
//! ```rust,ignore
//! use resource_crawler::{scope, Engine, HandlerRegistry, HandlerSpec, MemoryStore,
//!     ResourceDescriptor, TransformOutput};
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register([HandlerSpec::from_sync_fn("shout", "1", |r| {
//!     let text = r.data.as_str().unwrap_or_default().to_uppercase();
//!     Ok(ResourceDescriptor::of_kind("shout", text).into())
//! })
//! .with_scope(scope::type_equals("text"))]);
//!
//! let engine = Engine::builder()
//!     .with_store(MemoryStore::new())
//!     .with_registry(registry)
//!     .build()?;
//!
//! engine.seed(ResourceDescriptor::of_kind("text", "hello")).await?;
//! let (resources, stats) = engine.crawl().collect().await?;
//! ```
//!
//! # Modules
//!
//! - [`resource`] - Resource model and descriptors
//! - [`scope`] - Composable capability predicates
//! - [`handler`] - Handlers, fingerprints and the registry
//! - [`store`] - Persistence contract and implementations
//! - [`cache`] - Transform memoization
//! - [`engine`] - Expansion engine and crawl handles
//! - [`tap`] - Observers of finalized resources
//! - [`web`] - URL scopes and generic fetch handlers
//! - [`config`] - Engine configuration
//! - [`testing`] - Mock implementations for testing

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod resource;
pub mod scope;
pub mod store;
pub mod tap;
pub mod testing;
pub mod web;

// Re-export core types at crate root
pub use cache::ResultCache;
pub use config::EngineConfig;
pub use engine::{CrawlHandle, CrawlStats, Engine, EngineBuilder};
pub use error::{CrawlerError, Result, StoreError, StoreResult};
pub use handler::{
    bind_scope, Fingerprint, Handler, HandlerId, HandlerRegistry, HandlerSpec, Transform,
    TransformOutput,
};
pub use resource::{
    HandledState, Resource, ResourceData, ResourceDescriptor, ResourceId, KIND_EMPTY, KIND_ERROR,
};
pub use scope::Predicate;
pub use store::{ChangeFeed, DynResourceStore, MemoryStore, ResourceQuery, ResourceStore, StoreEvent};
pub use tap::{ResourceTap, TapContext};

#[cfg(feature = "postgres")]
pub use store::PostgresStore;
