//! Engine configuration.

use std::env;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

/// Configuration for a crawl engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Keep running after the frontier drains and pick up depth-0 resources
    /// inserted into the store later.
    ///
    /// The run then only ends when the store's change feed closes.
    /// Default: false.
    pub watch_for_seeds: bool,

    /// Upper bound on concurrently dispatched resources.
    ///
    /// Default: None (unbounded).
    pub max_in_flight: Option<usize>,

    /// Also start from every `pending` resource left behind by an
    /// interrupted run, not only from depth-0 seeds.
    ///
    /// Default: true.
    pub resume_pending: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watch_for_seeds: false,
            max_in_flight: None,
            resume_pending: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// - `CRAWLER_WATCH`: `true`/`false`
    /// - `CRAWLER_MAX_IN_FLIGHT`: positive integer
    /// - `CRAWLER_RESUME_PENDING`: `true`/`false`
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        let defaults = Self::default();

        Ok(Self {
            watch_for_seeds: match env::var("CRAWLER_WATCH") {
                Ok(v) => parse_bool(&v).context("CRAWLER_WATCH must be true or false")?,
                Err(_) => defaults.watch_for_seeds,
            },
            max_in_flight: env::var("CRAWLER_MAX_IN_FLIGHT")
                .ok()
                .map(|v| v.parse::<usize>())
                .transpose()
                .context("CRAWLER_MAX_IN_FLIGHT must be a valid number")?,
            resume_pending: match env::var("CRAWLER_RESUME_PENDING") {
                Ok(v) => parse_bool(&v).context("CRAWLER_RESUME_PENDING must be true or false")?,
                Err(_) => defaults.resume_pending,
            },
        })
    }

    pub fn with_watch_for_seeds(mut self, watch: bool) -> Self {
        self.watch_for_seeds = watch;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    pub fn with_resume_pending(mut self, resume: bool) -> Self {
        self.resume_pending = resume;
        self
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {other}"),
    }
}
