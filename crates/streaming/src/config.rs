use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for region chunk caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkCacheConfig {
    /// Upper bound for a single chunk fetch. Zero disables the timeout.
    pub load_timeout_ms: u64,

    /// Padding (degrees) applied around the viewport when selecting chunks.
    pub viewport_padding_deg: f64,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 30_000,
            viewport_padding_deg: 0.25,
        }
    }
}

impl ChunkCacheConfig {
    /// Defaults overridden by `ZCTA_LOAD_TIMEOUT_MS` and `ZCTA_VIEWPORT_PADDING_DEG`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            load_timeout_ms: env_var_u64("ZCTA_LOAD_TIMEOUT_MS", d.load_timeout_ms),
            viewport_padding_deg: env_var_f64("ZCTA_VIEWPORT_PADDING_DEG", d.viewport_padding_deg),
        }
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        (self.load_timeout_ms > 0).then(|| Duration::from_millis(self.load_timeout_ms))
    }
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
