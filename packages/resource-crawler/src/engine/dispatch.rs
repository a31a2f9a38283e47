//! Dispatch of a single resource to its matching handlers.
//!
//! ```text
//! resource
//!  → match handlers (registration order)
//!  → persist handled / orphaned, emit
//!  → per handler, concurrently:
//!      cache hit?  → revived children
//!      otherwise   → transform → descriptors (error / empty when needed) → create
//!  → non-sentinel children back to the driver
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::CrawlStats;
use crate::cache::ResultCache;
use crate::error::{CrawlerError, Result, StoreError};
use crate::handler::{Handler, HandlerRegistry};
use crate::resource::{HandledState, Resource, ResourceDescriptor};
use crate::store::DynResourceStore;
use crate::tap::TapRegistry;

/// Everything a dispatch task needs for one run.
pub(crate) struct RunContext {
    pub run_id: Uuid,
    pub store: DynResourceStore,
    pub registry: Arc<HandlerRegistry>,
    pub cache: ResultCache,
    pub taps: TapRegistry,
    pub emitter: mpsc::UnboundedSender<Resource>,
}

impl RunContext {
    /// Publish a finalized resource to the terminal stream and taps.
    fn emit(&self, resource: &Resource) {
        // Receiver may have been dropped; the crawl continues regardless.
        let _ = self.emitter.send(resource.clone());
        self.taps.run_all(resource, self.run_id);
    }
}

/// Result of dispatching one resource.
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    pub children: Vec<Resource>,
    pub stats: CrawlStats,
}

pub(crate) async fn dispatch(ctx: Arc<RunContext>, mut resource: Resource) -> Result<DispatchOutcome> {
    let handlers = ctx.registry.matching(&resource);
    let mut outcome = DispatchOutcome {
        stats: CrawlStats {
            dispatched: 1,
            ..Default::default()
        },
        ..Default::default()
    };

    if handlers.is_empty() {
        ctx.store
            .set_state(&mut resource, HandledState::Orphaned)
            .await
            .map_err(|e| CrawlerError::store(resource.id, e))?;
        outcome.stats.orphaned += 1;
        debug!(resource_id = %resource.id, kind = %resource.kind, "orphaned resource");
        ctx.emit(&resource);
        return Ok(outcome);
    }

    ctx.store
        .set_state(&mut resource, HandledState::Handled)
        .await
        .map_err(|e| CrawlerError::store(resource.id, e))?;
    outcome.stats.handled += 1;
    debug!(
        resource_id = %resource.id,
        kind = %resource.kind,
        depth = resource.depth,
        handlers = handlers.len(),
        "dispatching resource"
    );
    ctx.emit(&resource);

    let results = join_all(
        handlers
            .iter()
            .map(|handler| run_handler(&ctx, handler, &resource)),
    )
    .await;

    for result in results {
        let (children, stats) = result?;
        outcome.children.extend(children);
        outcome.stats.merge(&stats);
    }

    Ok(outcome)
}

async fn run_handler(
    ctx: &RunContext,
    handler: &Handler,
    parent: &Resource,
) -> Result<(Vec<Resource>, CrawlStats)> {
    let store_err = |e: StoreError| CrawlerError::store(parent.id, e);
    let mut stats = CrawlStats::default();

    if let Some(cached) = ctx.cache.lookup(handler, parent).await.map_err(store_err)? {
        stats.cache_hits += 1;
        let children = cached.into_iter().filter(|c| !c.is_sentinel()).collect();
        return Ok((children, stats));
    }

    stats.transform_calls += 1;
    let descriptors = invoke(handler, parent, &mut stats).await;

    let mut children = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let child = ctx
            .store
            .create(descriptor, handler, parent)
            .await
            .map_err(store_err)?;
        stats.created += 1;
        if child.is_sentinel() {
            stats.sentinels += 1;
            ctx.emit(&child);
        } else {
            children.push(child);
        }
    }

    Ok((children, stats))
}

/// Run the transform and normalize whatever happens into descriptors.
///
/// Never empty: a transform that produced nothing yields one `empty`
/// sentinel, a failure (error or panic) yields one `error` descriptor.
async fn invoke(
    handler: &Handler,
    parent: &Resource,
    stats: &mut CrawlStats,
) -> Vec<ResourceDescriptor> {
    let started = Instant::now();
    let result = AssertUnwindSafe(async {
        let output = handler.invoke(parent).await?;
        Ok::<_, anyhow::Error>(output.collect().await)
    })
    .catch_unwind()
    .await;

    let (mut descriptors, failure) = match result {
        Ok(Ok((descriptors, failure))) => (descriptors, failure),
        Ok(Err(e)) => (Vec::new(), Some(e)),
        Err(panic) => (
            Vec::new(),
            Some(anyhow::anyhow!(
                "transform panicked: {}",
                panic_message(panic.as_ref())
            )),
        ),
    };

    if let Some(err) = failure {
        stats.failures += 1;
        warn!(
            handler = %handler.name(),
            resource_id = %parent.id,
            error = %err,
            "transform failed"
        );
        descriptors.push(error_descriptor(handler, &err));
    }

    if descriptors.is_empty() {
        descriptors.push(ResourceDescriptor::empty());
    }

    debug!(
        handler = %handler.name(),
        resource_id = %parent.id,
        produced = descriptors.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "transform finished"
    );
    descriptors
}

fn error_descriptor(handler: &Handler, err: &anyhow::Error) -> ResourceDescriptor {
    let causes = err.chain().skip(1).map(|c| c.to_string()).collect();
    ResourceDescriptor::error(err.to_string(), causes)
        .with_meta("handler", handler.name())
        .with_meta("fingerprint", handler.fingerprint().as_str())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
