//! Runtime configuration.
//!
//! Loaded from JSON (every field optional) and then overridden from the
//! environment:
//! - `BATCHWALK_WORKER_NAME`
//! - `BATCHWALK_LOW_PRIORITY`
//! - `BATCHWALK_PAGE_DELAY_MS`
//! - `BATCHWALK_POLL_INTERVAL_MS`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchwalkConfig {
    pub queue: QueueConfig,
    pub walk: WalkConfig,
}

/// Settings of the serial task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name of the dedicated worker thread.
    pub worker_name: String,
    /// Run the worker at the lowest OS thread priority.
    pub low_priority: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_name: "batchwalk background queue worker".to_string(),
            low_priority: true,
        }
    }
}

/// Settings of batch walks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Pause before each page query so a walk does not hammer the store.
    pub page_delay_ms: u64,
    /// Upper bound between two completion checks of a waiting caller.
    pub poll_interval_ms: u64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: 200,
            poll_interval_ms: 5_000,
        }
    }
}

impl WalkConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BatchwalkConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| BatchError::Config(format!("invalid json: {e}")))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BatchError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Apply `BATCHWALK_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup("BATCHWALK_WORKER_NAME") {
            self.queue.worker_name = name;
        }
        if let Some(raw) = lookup("BATCHWALK_LOW_PRIORITY") {
            self.queue.low_priority = raw.trim().parse().map_err(|e| {
                BatchError::Config(format!("BATCHWALK_LOW_PRIORITY={raw}: {e}"))
            })?;
        }
        if let Some(raw) = lookup("BATCHWALK_PAGE_DELAY_MS") {
            self.walk.page_delay_ms = parse_millis("BATCHWALK_PAGE_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("BATCHWALK_POLL_INTERVAL_MS") {
            self.walk.poll_interval_ms = parse_millis("BATCHWALK_POLL_INTERVAL_MS", &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.walk.poll_interval_ms == 0 {
            return Err(BatchError::Config(
                "walk.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.queue.worker_name.trim().is_empty() {
            return Err(BatchError::Config(
                "queue.worker_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| BatchError::Config(format!("{key}={raw}: {e}")))
}
