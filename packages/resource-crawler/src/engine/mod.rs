//! Expansion engine: drives resources through handlers until nothing is left.
//!
//! ```text
//! seeds → dispatch → children ─┐
//!   ↑                          │
//!   └──────── worklist ◄───────┘
//! ```
//!
//! The engine keeps an explicit worklist plus a set of in-flight dispatch
//! tasks. A run ends when both are empty, unless it watches the store for
//! new seeds, in which case it ends when the store closes. Each resource is
//! dispatched at most once per run.
//!
//! # Usage
//!
//! ```ignore
//! use resource_crawler::{Engine, EngineConfig, HandlerRegistry, MemoryStore};
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register([resolver, fetcher]);
//!
//! let engine = Engine::builder()
//!     .with_store(MemoryStore::new())
//!     .with_registry(registry)
//!     .build()?;
//!
//! engine.seed(ResourceDescriptor::url("http://example.com")).await?;
//!
//! let mut crawl = engine.crawl();
//! while let Some(resource) = crawl.next().await {
//!     println!("{} {}", resource.kind, resource.id);
//! }
//! let stats = crawl.finish().await?;
//! ```

mod dispatch;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{CrawlerError, Result};
use crate::handler::HandlerRegistry;
use crate::resource::{HandledState, Resource, ResourceDescriptor, ResourceId, KIND_EMPTY};
use crate::store::{ChangeFeed, DynResourceStore, ResourceQuery, ResourceStore, StoreEvent};
use crate::tap::{ResourceTap, TapRegistry};

use dispatch::{dispatch, DispatchOutcome, RunContext};

// =============================================================================
// Stats
// =============================================================================

/// Counters for one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    /// Resources dispatched (matched against the registry)
    pub dispatched: usize,
    pub handled: usize,
    pub orphaned: usize,
    /// Resources persisted from transform output, sentinels included
    pub created: usize,
    pub cache_hits: usize,
    pub transform_calls: usize,
    /// Transforms that returned an error or panicked
    pub failures: usize,
    pub sentinels: usize,
}

impl CrawlStats {
    pub fn merge(&mut self, other: &CrawlStats) {
        self.dispatched += other.dispatched;
        self.handled += other.handled;
        self.orphaned += other.orphaned;
        self.created += other.created;
        self.cache_hits += other.cache_hits;
        self.transform_calls += other.transform_calls;
        self.failures += other.failures;
        self.sentinels += other.sentinels;
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A configured crawl engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    store: DynResourceStore,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    taps: TapRegistry,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn store(&self) -> &DynResourceStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Insert a depth-0 seed into the store.
    pub async fn seed(&self, descriptor: ResourceDescriptor) -> Result<Resource> {
        Ok(self.store.insert(descriptor).await?)
    }

    /// Start a run from the store's seeds.
    ///
    /// The frontier is every depth-0 resource plus, when `resume_pending` is
    /// set, every resource still `pending` from an interrupted run. Seeds are
    /// walked again each run; memoized handlers make that cheap.
    pub fn crawl(&self) -> CrawlHandle {
        // Subscribe before loading seeds so nothing inserted in between is missed.
        let feed = self.config.watch_for_seeds.then(|| self.store.subscribe());
        let store = self.store.clone();
        let resume = self.config.resume_pending;
        self.spawn_run(feed, async move { load_frontier(store.as_ref(), resume).await })
    }

    /// Start a run from an explicit frontier.
    pub fn crawl_from(&self, frontier: Vec<Resource>) -> CrawlHandle {
        let feed = self.config.watch_for_seeds.then(|| self.store.subscribe());
        self.spawn_run(feed, async move { Ok(frontier) })
    }

    fn spawn_run<F>(&self, feed: Option<ChangeFeed>, frontier: F) -> CrawlHandle
    where
        F: std::future::Future<Output = Result<Vec<Resource>>> + Send + 'static,
    {
        let run_id = Uuid::now_v7();
        let (emitter, receiver) = mpsc::unbounded_channel();
        let ctx = Arc::new(RunContext {
            run_id,
            store: self.store.clone(),
            registry: self.registry.clone(),
            cache: ResultCache::new(self.store.clone()),
            taps: self.taps.clone(),
            emitter,
        });
        let max_in_flight = self.config.max_in_flight;

        let task = tokio::spawn(
            async move {
                let frontier = frontier.await?;
                info!(
                    seeds = frontier.len(),
                    handlers = ctx.registry.len(),
                    watching = feed.is_some(),
                    "crawl started"
                );
                let stats = drive(ctx, frontier, feed, max_in_flight).await?;
                info!(
                    dispatched = stats.dispatched,
                    handled = stats.handled,
                    orphaned = stats.orphaned,
                    created = stats.created,
                    cache_hits = stats.cache_hits,
                    transform_calls = stats.transform_calls,
                    failures = stats.failures,
                    "crawl finished"
                );
                Ok::<_, CrawlerError>(stats)
            }
            .instrument(info_span!("crawl", run_id = %run_id)),
        );

        CrawlHandle {
            run_id,
            receiver,
            task,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("handlers", &self.registry.len())
            .field("config", &self.config)
            .field("taps", &self.taps)
            .finish_non_exhaustive()
    }
}

async fn load_frontier(store: &dyn ResourceStore, resume_pending: bool) -> Result<Vec<Resource>> {
    let mut frontier = store
        .find(&ResourceQuery::seeds().without_kind(KIND_EMPTY))
        .await?;
    if resume_pending {
        let pending = store
            .find(
                &ResourceQuery::new()
                    .with_state(HandledState::Pending)
                    .without_kind(KIND_EMPTY),
            )
            .await?;
        let seen: HashSet<ResourceId> = frontier.iter().map(|r| r.id).collect();
        frontier.extend(pending.into_iter().filter(|r| !seen.contains(&r.id)));
    }
    Ok(frontier)
}

// =============================================================================
// Driver
// =============================================================================

async fn drive(
    ctx: Arc<RunContext>,
    frontier: Vec<Resource>,
    mut feed: Option<ChangeFeed>,
    max_in_flight: Option<usize>,
) -> Result<CrawlStats> {
    let limit = max_in_flight.unwrap_or(usize::MAX);
    let mut queue: VecDeque<Resource> = frontier.into();
    let mut visited: HashSet<ResourceId> = HashSet::new();
    let mut tasks: JoinSet<Result<DispatchOutcome>> = JoinSet::new();
    let mut stats = CrawlStats::default();

    loop {
        while tasks.len() < limit {
            let Some(resource) = queue.pop_front() else {
                break;
            };
            if resource.is_sentinel() || !visited.insert(resource.id) {
                continue;
            }
            tasks.spawn(dispatch(ctx.clone(), resource));
        }

        if tasks.is_empty() && queue.is_empty() && feed.is_none() {
            break;
        }

        tokio::select! {
            Some(joined) = tasks.join_next() => {
                let outcome = joined.map_err(|e| CrawlerError::Join(e.to_string()))??;
                stats.merge(&outcome.stats);
                queue.extend(outcome.children);
            }
            event = next_event(&mut feed), if feed.is_some() => {
                match event {
                    Some(StoreEvent::Inserted(resource)) if resource.depth == 0 => {
                        queue.push_back(resource);
                    }
                    Some(_) => {}
                    None => {
                        info!("store closed, no longer watching for seeds");
                        feed = None;
                    }
                }
            }
            else => break,
        }
    }

    Ok(stats)
}

async fn next_event(feed: &mut Option<ChangeFeed>) -> Option<StoreEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Handle
// =============================================================================

/// A running crawl.
///
/// Yields every finalized resource: each dispatched resource once its state
/// is persisted, and each `empty` sentinel once created. Dropping the handle
/// detaches the run; use [`CrawlHandle::abort`] to stop it.
pub struct CrawlHandle {
    run_id: Uuid,
    receiver: mpsc::UnboundedReceiver<Resource>,
    task: JoinHandle<Result<CrawlStats>>,
}

impl CrawlHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Next finalized resource, or `None` once the run has ended.
    pub async fn next(&mut self) -> Option<Resource> {
        self.receiver.recv().await
    }

    /// Wait for the run to end, discarding unread resources.
    pub async fn finish(self) -> Result<CrawlStats> {
        let CrawlHandle { receiver, task, .. } = self;
        drop(receiver);
        join_run(task).await
    }

    /// Drain every finalized resource, then wait for the run to end.
    pub async fn collect(mut self) -> Result<(Vec<Resource>, CrawlStats)> {
        let mut resources = Vec::new();
        while let Some(resource) = self.receiver.recv().await {
            resources.push(resource);
        }
        let stats = join_run(self.task).await?;
        Ok((resources, stats))
    }

    /// Finalized resources as a stream. A failed run ends the stream with its error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Resource>> {
        let CrawlHandle {
            mut receiver, task, ..
        } = self;
        async_stream::stream! {
            while let Some(resource) = receiver.recv().await {
                yield Ok(resource);
            }
            if let Err(e) = join_run(task).await {
                yield Err(e);
            }
        }
    }

    /// Stop the run. In-flight dispatch tasks are cancelled.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for CrawlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlHandle")
            .field("run_id", &self.run_id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

async fn join_run(task: JoinHandle<Result<CrawlStats>>) -> Result<CrawlStats> {
    task.await
        .map_err(|e| CrawlerError::Join(e.to_string()))?
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<DynResourceStore>,
    registry: Option<Arc<HandlerRegistry>>,
    config: EngineConfig,
    taps: TapRegistry,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store<S: ResourceStore>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Use a store shared with other code (e.g. to insert seeds directly).
    pub fn with_shared_store(mut self, store: DynResourceStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tap<T: ResourceTap>(mut self, tap: T) -> Self {
        self.taps.register(tap);
        self
    }

    /// Fails before any dispatch when a collaborator is missing.
    pub fn build(self) -> Result<Engine> {
        let store = self
            .store
            .ok_or_else(|| CrawlerError::config("no resource store configured"))?;
        let registry = self
            .registry
            .ok_or_else(|| CrawlerError::config("no handler registry configured"))?;
        if self.config.max_in_flight == Some(0) {
            return Err(CrawlerError::config("max_in_flight must be at least 1"));
        }

        Ok(Engine {
            store,
            registry,
            config: self.config,
            taps: self.taps,
        })
    }
}
