use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// The two record stores kept side by side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreName {
    Summaries,
    StatMaps,
}

impl StoreName {
    pub const ALL: [StoreName; 2] = [StoreName::Summaries, StoreName::StatMaps];

    fn table(self) -> &'static str {
        match self {
            StoreName::Summaries => "summaries",
            StoreName::StatMaps => "stat_maps",
        }
    }
}

impl std::fmt::Display for StoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
    Corrupt(String),
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "stat store unavailable: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "stat store corrupt: {msg}"),
            StoreError::Backend(msg) => write!(f, "stat store error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// A stored JSON payload plus the recency column it is ordered by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub last_accessed_at: u64,
    pub payload: String,
}

/// Keyed storage for the stat cache.
///
/// Methods are blocking; callers run them off the async executor. Each call is
/// one unit of work: it either applies fully or returns an error.
pub trait StatStore: Send + Sync {
    fn get(&self, store: StoreName, key: &str) -> Result<Option<StoredEntry>, StoreError>;
    fn put(&self, store: StoreName, entry: StoredEntry) -> Result<(), StoreError>;
    fn delete(&self, store: StoreName, key: &str) -> Result<bool, StoreError>;
    fn clear(&self, store: StoreName) -> Result<(), StoreError>;

    /// Set an existing entry's `last_accessed_at` and return the entry, in one
    /// step. The payload is left as stored.
    fn touch(
        &self,
        store: StoreName,
        key: &str,
        now_ms: u64,
    ) -> Result<Option<StoredEntry>, StoreError>;

    /// Most recently accessed first; equal timestamps ordered by key.
    fn keys_by_recency(&self, store: StoreName) -> Result<Vec<String>, StoreError>;

    fn meta(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete every entry past the `max` most recent; returns the deleted keys.
    fn trim_to(&self, store: StoreName, max: usize) -> Result<Vec<String>, StoreError> {
        let doomed: Vec<String> = self.keys_by_recency(store)?.into_iter().skip(max).collect();
        for key in &doomed {
            self.delete(store, key)?;
        }
        Ok(doomed)
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        for store in StoreName::ALL {
            self.clear(store)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Tables {
    summaries: BTreeMap<String, StoredEntry>,
    stat_maps: BTreeMap<String, StoredEntry>,
    meta: BTreeMap<String, String>,
}

impl Tables {
    fn table(&mut self, store: StoreName) -> &mut BTreeMap<String, StoredEntry> {
        match store {
            StoreName::Summaries => &mut self.summaries,
            StoreName::StatMaps => &mut self.stat_maps,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStatStore {
    tables: Mutex<Tables>,
}

impl InMemoryStatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatStore for InMemoryStatStore {
    fn get(&self, store: StoreName, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self.tables.lock().table(store).get(key).cloned())
    }

    fn put(&self, store: StoreName, entry: StoredEntry) -> Result<(), StoreError> {
        self.tables
            .lock()
            .table(store)
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    fn delete(&self, store: StoreName, key: &str) -> Result<bool, StoreError> {
        Ok(self.tables.lock().table(store).remove(key).is_some())
    }

    fn clear(&self, store: StoreName) -> Result<(), StoreError> {
        self.tables.lock().table(store).clear();
        Ok(())
    }

    fn touch(
        &self,
        store: StoreName,
        key: &str,
        now_ms: u64,
    ) -> Result<Option<StoredEntry>, StoreError> {
        let mut tables = self.tables.lock();
        Ok(tables.table(store).get_mut(key).map(|entry| {
            entry.last_accessed_at = now_ms;
            entry.clone()
        }))
    }

    fn keys_by_recency(&self, store: StoreName) -> Result<Vec<String>, StoreError> {
        Ok(recency_order(self.tables.lock().table(store)))
    }

    fn meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.tables.lock().meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.tables
            .lock()
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn trim_to(&self, store: StoreName, max: usize) -> Result<Vec<String>, StoreError> {
        let mut tables = self.tables.lock();
        let table = tables.table(store);
        let doomed: Vec<String> = recency_order(table).into_iter().skip(max).collect();
        for key in &doomed {
            table.remove(key);
        }
        Ok(doomed)
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        for store in StoreName::ALL {
            tables.table(store).clear();
        }
        Ok(())
    }
}

/// Most recent first, ties by key.
fn recency_order(table: &BTreeMap<String, StoredEntry>) -> Vec<String> {
    let mut entries: Vec<(&String, u64)> = table
        .iter()
        .map(|(k, e)| (k, e.last_accessed_at))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(k, _)| k.clone()).collect()
}

/// SQLite-backed store; survives process restarts.
#[derive(Debug)]
pub struct SqliteStatStore {
    conn: Mutex<Connection>,
}

impl SqliteStatStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                key TEXT PRIMARY KEY,
                last_accessed_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stat_maps (
                key TEXT PRIMARY KEY,
                last_accessed_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stat_maps_last_accessed
                ON stat_maps(last_accessed_at);
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn to_sql_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn from_sql_ms(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}

fn recency_query(store: StoreName) -> String {
    format!(
        "SELECT key FROM {} ORDER BY last_accessed_at DESC, key ASC",
        store.table()
    )
}

fn collect_keys(conn: &Connection, store: StoreName) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&recency_query(store))?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

impl StatStore for SqliteStatStore {
    fn get(&self, store: StoreName, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT key, last_accessed_at, payload FROM {} WHERE key = ?1",
            store.table()
        );
        let entry = conn
            .query_row(&sql, params![key], |row| {
                Ok(StoredEntry {
                    key: row.get(0)?,
                    last_accessed_at: from_sql_ms(row.get(1)?),
                    payload: row.get(2)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    fn put(&self, store: StoreName, entry: StoredEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "INSERT INTO {} (key, last_accessed_at, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                last_accessed_at = excluded.last_accessed_at,
                payload = excluded.payload",
            store.table()
        );
        conn.execute(
            &sql,
            params![entry.key, to_sql_ms(entry.last_accessed_at), entry.payload],
        )?;
        Ok(())
    }

    fn delete(&self, store: StoreName, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("DELETE FROM {} WHERE key = ?1", store.table());
        Ok(conn.execute(&sql, params![key])? > 0)
    }

    fn clear(&self, store: StoreName) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {}", store.table()), [])?;
        Ok(())
    }

    fn touch(
        &self,
        store: StoreName,
        key: &str,
        now_ms: u64,
    ) -> Result<Option<StoredEntry>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            &format!(
                "UPDATE {} SET last_accessed_at = ?2 WHERE key = ?1",
                store.table()
            ),
            params![key, to_sql_ms(now_ms)],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let payload: String = tx.query_row(
            &format!("SELECT payload FROM {} WHERE key = ?1", store.table()),
            params![key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(Some(StoredEntry {
            key: key.to_string(),
            last_accessed_at: now_ms,
            payload,
        }))
    }

    fn keys_by_recency(&self, store: StoreName) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        collect_keys(&conn, store)
    }

    fn meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn trim_to(&self, store: StoreName, max: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let doomed: Vec<String> = collect_keys(&tx, store)?.into_iter().skip(max).collect();
        {
            let sql = format!("DELETE FROM {} WHERE key = ?1", store.table());
            let mut stmt = tx.prepare(&sql)?;
            for key in &doomed {
                stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(doomed)
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for store in StoreName::ALL {
            tx.execute(&format!("DELETE FROM {}", store.table()), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}
