//! Handler registry and pipeline helpers.

use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{Handler, HandlerSpec};
use crate::resource::Resource;
use crate::scope::{all_of, produced_by, Predicate};

/// Ordered set of registered handlers.
///
/// Shared between the engine and its dispatch tasks as `Arc<HandlerRegistry>`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalize and append handlers, returning them in the given order.
    pub fn register(&self, specs: impl IntoIterator<Item = HandlerSpec>) -> Vec<Arc<Handler>> {
        let finalized: Vec<Arc<Handler>> = specs
            .into_iter()
            .map(|spec| Arc::new(spec.finalize()))
            .collect();
        self.append(&finalized);
        finalized
    }

    pub fn register_one(&self, spec: HandlerSpec) -> Arc<Handler> {
        let handler = Arc::new(spec.finalize());
        self.append(std::slice::from_ref(&handler));
        handler
    }

    /// Register an ordered pipeline.
    ///
    /// The first stage keeps its own scope. Every later stage additionally
    /// requires that the resource was produced by the previous stage in this
    /// process, so externally inserted inputs never enter mid-pipeline.
    pub fn register_sequence(
        &self,
        specs: impl IntoIterator<Item = HandlerSpec>,
    ) -> Vec<Arc<Handler>> {
        let mut finalized: Vec<Arc<Handler>> = Vec::new();
        for spec in specs {
            let spec = match finalized.last() {
                Some(prev) => {
                    let lineage = produced_by(prev);
                    spec.map_scope(|scope| all_of([scope, lineage]))
                }
                None => spec,
            };
            finalized.push(Arc::new(spec.finalize()));
        }
        self.append(&finalized);
        finalized
    }

    /// Handlers whose scope accepts `resource`, in registration order.
    pub fn matching(&self, resource: &Resource) -> Vec<Arc<Handler>> {
        self.read()
            .iter()
            .filter(|h| h.applies_to(resource))
            .cloned()
            .collect()
    }

    pub fn handlers(&self) -> Vec<Arc<Handler>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn append(&self, handlers: &[Arc<Handler>]) {
        let mut guard = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for handler in handlers {
            debug!(
                handler = %handler.name(),
                id = %handler.id(),
                fingerprint = %handler.fingerprint(),
                scope = ?handler.scope(),
                "registered handler"
            );
            guard.push(handler.clone());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Handler>>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Prefix a shared scope onto every spec.
pub fn bind_scope(
    scope: Predicate,
    specs: impl IntoIterator<Item = HandlerSpec>,
) -> Vec<HandlerSpec> {
    specs
        .into_iter()
        .map(|spec| {
            let shared = scope.clone();
            spec.map_scope(|own| all_of([shared, own]))
        })
        .collect()
}
