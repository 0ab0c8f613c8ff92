use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{InMemoryStatStore, SqliteStatStore, StatStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatCacheConfig {
    /// Stat maps kept after each write, by most recent access.
    pub max_stat_map_entries: usize,

    /// Buffered events per subscriber before it starts lagging.
    pub channel_capacity: usize,

    /// SQLite file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
}

impl Default for StatCacheConfig {
    fn default() -> Self {
        Self {
            max_stat_map_entries: 24,
            channel_capacity: 64,
            db_path: None,
        }
    }
}

impl StatCacheConfig {
    /// Defaults overridden by `ZCTA_STAT_CACHE_MAX_ENTRIES` and `ZCTA_STAT_CACHE_DB`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_stat_map_entries: env_var_usize(
                "ZCTA_STAT_CACHE_MAX_ENTRIES",
                d.max_stat_map_entries,
            ),
            channel_capacity: d.channel_capacity,
            db_path: env::var_os("ZCTA_STAT_CACHE_DB")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn StatStore>, StoreError> {
        match &self.db_path {
            Some(path) => Ok(Arc::new(SqliteStatStore::open(path)?)),
            None => Ok(Arc::new(InMemoryStatStore::new())),
        }
    }
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
