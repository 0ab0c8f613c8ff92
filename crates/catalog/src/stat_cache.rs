//! Persisted stat summaries and stat maps.
//!
//! Every operation runs as one blocking store call on tokio's blocking pool.
//! Store failures never reach callers: they are logged and surface as a miss
//! (reads) or a no-op (writes).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::{CacheChannel, CacheEvent};
use crate::config::StatCacheConfig;
use crate::records::{
    SCHEMA_VERSION, StatMapPayload, StatMapRecord, StatSummaryRow, SummaryRecord, stat_map_key,
    summary_key,
};
use crate::store::{StatStore, StoreError, StoreName, StoredEntry};

/// Meta record holding the schema version the stores were written with.
pub const SCHEMA_META_KEY: &str = "schemaVersion";

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Handle to the persisted stat cache. Clones share the store and channel.
#[derive(Clone)]
pub struct PersistentStatCache {
    store: Arc<dyn StatStore>,
    channel: CacheChannel,
    clock: Arc<dyn Clock>,
    config: StatCacheConfig,
}

impl std::fmt::Debug for PersistentStatCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStatCache")
            .field("channel", &self.channel.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentStatCache {
    pub async fn open(
        store: Arc<dyn StatStore>,
        channel: CacheChannel,
        config: StatCacheConfig,
    ) -> Self {
        Self::open_with_clock(store, channel, config, Arc::new(SystemClock)).await
    }

    /// Opening verifies the schema version before returning; stores written
    /// by another version (or by none) are wiped.
    pub async fn open_with_clock(
        store: Arc<dyn StatStore>,
        channel: CacheChannel,
        config: StatCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Self {
            store,
            channel,
            clock,
            config,
        };
        cache.ensure_schema().await;
        cache
    }

    pub fn config(&self) -> &StatCacheConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.channel.subscribe()
    }

    pub async fn read_summary(
        &self,
        parent_area: &str,
        boundary_type: &str,
    ) -> Option<SummaryRecord> {
        let key = summary_key(parent_area, boundary_type);
        self.run("read summary", move |store| {
            match store.get(StoreName::Summaries, &key)? {
                Some(entry) => Ok(Some(serde_json::from_str::<SummaryRecord>(&entry.payload)?)),
                None => Ok(None),
            }
        })
        .await
        .flatten()
    }

    pub async fn write_summary(
        &self,
        parent_area: &str,
        boundary_type: &str,
        rows: Vec<StatSummaryRow>,
    ) {
        let now = self.clock.now_ms();
        let record = SummaryRecord {
            key: summary_key(parent_area, boundary_type),
            saved_at: now,
            parent_area: parent_area.to_string(),
            boundary_type: boundary_type.to_string(),
            rows,
        };
        let key = record.key.clone();
        let written = self
            .run("write summary", move |store| {
                let payload = serde_json::to_string(&record)?;
                store.put(
                    StoreName::Summaries,
                    StoredEntry {
                        key: record.key,
                        last_accessed_at: now,
                        payload,
                    },
                )
            })
            .await;
        if written.is_some() {
            self.channel.publish(CacheEvent::Updated {
                store: StoreName::Summaries,
                key,
            });
        }
    }

    /// Returns the record with its access time refreshed. The refresh is one
    /// store call that only moves the recency column, so a concurrent write or
    /// clear is never undone by it.
    pub async fn read_stat_map(
        &self,
        stat_id: &str,
        parent_area: &str,
        boundary_type: &str,
    ) -> Option<StatMapRecord> {
        let key = stat_map_key(stat_id, parent_area, boundary_type);
        let now = self.clock.now_ms();
        self.run("read stat map", move |store| {
            let Some(entry) = store.touch(StoreName::StatMaps, &key, now)? else {
                return Ok(None);
            };
            let mut record: StatMapRecord = serde_json::from_str(&entry.payload)?;
            record.last_accessed_at = entry.last_accessed_at;
            Ok(Some(record))
        })
        .await
        .flatten()
    }

    /// Upsert, then evict all but the most recently accessed maps.
    pub async fn write_stat_map(&self, payload: StatMapPayload) {
        let now = self.clock.now_ms();
        let record = StatMapRecord::from_payload(payload, now);
        let key = record.key.clone();
        let max = self.config.max_stat_map_entries;
        let evicted = self
            .run("write stat map", move |store| {
                let payload = serde_json::to_string(&record)?;
                store.put(
                    StoreName::StatMaps,
                    StoredEntry {
                        key: record.key,
                        last_accessed_at: now,
                        payload,
                    },
                )?;
                store.trim_to(StoreName::StatMaps, max)
            })
            .await;
        let Some(evicted) = evicted else {
            return;
        };
        if !evicted.is_empty() {
            debug!("stat cache evicted {} stat maps", evicted.len());
        }
        self.channel.publish(CacheEvent::Updated {
            store: StoreName::StatMaps,
            key,
        });
    }

    pub async fn clear_all(&self) {
        if self
            .run("clear", |store| store.clear_all())
            .await
            .is_some()
        {
            self.channel.publish(CacheEvent::Cleared);
        }
    }

    async fn ensure_schema(&self) {
        let wiped = self
            .run("schema check", |store| {
                let current = SCHEMA_VERSION.to_string();
                let found = store.meta(SCHEMA_META_KEY)?;
                if found.as_deref() == Some(current.as_str()) {
                    return Ok(None);
                }
                store.clear_all()?;
                store.set_meta(SCHEMA_META_KEY, &current)?;
                Ok(Some(found))
            })
            .await
            .flatten();
        if let Some(previous) = wiped {
            info!(
                "stat cache schema {} -> {SCHEMA_VERSION}; stores cleared",
                previous.as_deref().unwrap_or("none")
            );
            self.channel.publish(CacheEvent::Cleared);
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StatStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || f(store.as_ref())).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("stat cache {op} failed: {e}");
                None
            }
            Err(e) => {
                warn!("stat cache {op} did not complete: {e}");
                None
            }
        }
    }
}
