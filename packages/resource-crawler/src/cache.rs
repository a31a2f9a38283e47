//! Transform memoization keyed by (parent resource, handler fingerprint).
//!
//! A hit replays the children a previous run persisted instead of invoking
//! the transform. Replayed children are revived: they take the current
//! handler's process identity and go back to `pending`, so they are walked
//! again this run and lineage-scoped pipeline stages still see them.

use tracing::debug;

use crate::error::StoreResult;
use crate::handler::Handler;
use crate::resource::{HandledState, Resource};
use crate::store::DynResourceStore;

#[derive(Clone)]
pub struct ResultCache {
    store: DynResourceStore,
}

impl ResultCache {
    pub fn new(store: DynResourceStore) -> Self {
        Self { store }
    }

    /// Previously produced children, or `None` on a miss.
    ///
    /// Handlers marked `dont_cache` always miss.
    pub async fn lookup(
        &self,
        handler: &Handler,
        parent: &Resource,
    ) -> StoreResult<Option<Vec<Resource>>> {
        if handler.dont_cache() {
            return Ok(None);
        }

        let cached = self.store.find_cached(handler, parent).await?;
        if cached.is_empty() {
            return Ok(None);
        }

        let mut revived = Vec::with_capacity(cached.len());
        for mut child in cached {
            child.lineage.produced_by = Some(handler.id());
            child.lineage.from_cache = true;
            child.depth = parent.depth + 1;
            self.store
                .set_state(&mut child, HandledState::Pending)
                .await?;
            revived.push(child);
        }

        debug!(
            handler = %handler.name(),
            parent_id = %parent.id,
            children = revived.len(),
            "cache hit"
        );
        Ok(Some(revived))
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache").finish_non_exhaustive()
    }
}
