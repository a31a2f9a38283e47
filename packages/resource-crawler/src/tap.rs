//! Resource taps: observe finalized resources without affecting the crawl.
//!
//! A resource is *finalized* once its dispatch state has been persisted
//! (`handled` or `orphaned`), or, for `empty` sentinels, once it has been
//! created. Taps see exactly what the [`CrawlHandle`](crate::CrawlHandle)
//! stream sees.
//!
//! Taps run fire-and-forget on their own tasks. Failures are logged and never
//! reach the engine.
//!
//! # Example
//!
//! ```ignore
//! use resource_crawler::{Resource, ResourceTap, TapContext};
//!
//! struct ImageExport { dir: PathBuf }
//!
//! #[async_trait]
//! impl ResourceTap for ImageExport {
//!     async fn on_resource(&self, resource: &Resource, _ctx: &TapContext) -> anyhow::Result<()> {
//!         if let Some(bytes) = resource.data.as_bytes() {
//!             tokio::fs::write(self.dir.join(resource.id.to_string()), bytes).await?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::resource::Resource;

// =============================================================================
// Tap Context
// =============================================================================

/// Context provided to resource taps.
#[derive(Debug, Clone, Copy)]
pub struct TapContext {
    /// Identifies the crawl run that finalized the resource.
    pub run_id: Uuid,
    /// When this tap execution started.
    pub timestamp: Instant,
}

impl TapContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            timestamp: Instant::now(),
        }
    }
}

// =============================================================================
// Resource Tap Trait
// =============================================================================

#[async_trait]
pub trait ResourceTap: Send + Sync + 'static {
    /// Called once per finalized resource.
    ///
    /// Errors are logged but do not affect the crawl.
    async fn on_resource(&self, resource: &Resource, ctx: &TapContext) -> Result<()>;
}

struct NamedTap {
    name: &'static str,
    tap: Arc<dyn ResourceTap>,
}

// =============================================================================
// Tap Registry
// =============================================================================

/// Registry of resource taps.
#[derive(Default, Clone)]
pub struct TapRegistry {
    taps: Vec<Arc<NamedTap>>,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub fn register<T: ResourceTap>(&mut self, tap: T) {
        self.taps.push(Arc::new(NamedTap {
            name: std::any::type_name::<T>(),
            tap: Arc::new(tap),
        }));
    }

    /// Spawn every tap for `resource`.
    pub fn run_all(&self, resource: &Resource, run_id: Uuid) {
        for named in &self.taps {
            let named = named.clone();
            let resource = resource.clone();
            let ctx = TapContext::new(run_id);
            tokio::spawn(async move {
                if let Err(e) = named.tap.on_resource(&resource, &ctx).await {
                    warn!(
                        tap = %named.name,
                        resource_id = %resource.id,
                        error = %e,
                        "tap failed"
                    );
                }
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRegistry")
            .field("tap_count", &self.taps.len())
            .finish()
    }
}
