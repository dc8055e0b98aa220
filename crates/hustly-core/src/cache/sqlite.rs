//! SQLite-backed cache storage.

use super::traits::{
    select_victims, CacheStats, CacheStorage, CachedEntry, EntryFootprint, EvictionPolicy,
    StoreStats, WriteMode,
};
use crate::error::{HustlyError, Result};
use crate::http::{headers_from_pairs, headers_to_pairs, CacheKey, GatewayResponse};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// SQLite-based cache storage.
///
/// All stores share one database; store membership is a column. Thread-safe
/// via an internal mutex on the connection.
pub struct SqliteCacheStorage {
    conn: Mutex<Connection>,
}

fn format_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width so text ordering matches time ordering.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Unreadable timestamps count as "now", so a damaged row looks fresh to
/// eviction and to `IfNewer` writes.
fn parse_ts(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            warn!("Corrupt cache timestamp {:?} ({}), treating it as now", raw, e);
            Utc::now()
        }
    }
}

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> HustlyError + '_ {
    move |e| HustlyError::Database {
        message: format!("{}: {}", context, e),
        source: Some(e),
    }
}

impl SqliteCacheStorage {
    /// Open (or create) the cache database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HustlyError::Io {
                message: format!("Failed to create cache directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(db_err("Failed to open cache database"))?;
        Self::from_connection(conn)
    }

    /// A private database that disappears with the process.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(db_err("Failed to open in-memory database"))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err("Failed to set pragmas"))?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_stores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                store TEXT NOT NULL,
                key TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                fetched_at TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                PRIMARY KEY (store, key)
            );

            -- LRU eviction per store
            CREATE INDEX IF NOT EXISTS idx_entries_accessed
                ON cache_entries(store, last_accessed);
            "#,
        )
        .map_err(db_err("Failed to initialize cache schema"))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| HustlyError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn ensure_store(conn: &Connection, store: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?1, ?2)",
            params![store, format_ts(Utc::now())],
        )
        .map_err(db_err("Failed to create store"))?;
        Ok(())
    }

    fn write_entry(
        conn: &Connection,
        store: &str,
        key: &CacheKey,
        response: &GatewayResponse,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let headers = serde_json::to_string(&headers_to_pairs(&response.headers))?;
        let now = format_ts(Utc::now());
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (store, key, method, url, status, headers, body, size_bytes,
             fetched_at, cached_at, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
            params![
                store,
                key.to_string(),
                key.method.as_str(),
                key.url,
                response.status.as_u16() as i64,
                headers,
                &response.body[..],
                response.size_bytes() as i64,
                format_ts(fetched_at),
                now,
            ],
        )
        .map_err(db_err("Failed to write cache entry"))?;
        Ok(())
    }
}

impl CacheStorage for SqliteCacheStorage {
    fn open(&self, store: &str) -> Result<()> {
        let conn = self.lock()?;
        Self::ensure_store(&conn, store)
    }

    fn has(&self, store: &str) -> Result<bool> {
        let conn = self.lock()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM cache_stores WHERE name = ?1",
                params![store],
                |_| Ok(true),
            )
            .optional()
            .map_err(db_err("Failed to check store"))?
            .unwrap_or(false);
        Ok(exists)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM cache_stores ORDER BY id")
            .map_err(db_err("Failed to prepare store query"))?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err("Failed to list stores"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    fn delete(&self, store: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;
        let entries = tx
            .execute("DELETE FROM cache_entries WHERE store = ?1", params![store])
            .map_err(db_err("Failed to delete store entries"))?;
        let removed = tx
            .execute("DELETE FROM cache_stores WHERE name = ?1", params![store])
            .map_err(db_err("Failed to delete store"))?;
        tx.commit().map_err(db_err("Failed to commit store deletion"))?;

        if removed > 0 {
            debug!("Deleted store '{}' with {} entries", store, entries);
        }
        Ok(removed > 0)
    }

    fn lookup(&self, store: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let conn = self.lock()?;
        let key_str = key.to_string();

        let row: Option<(i64, String, Vec<u8>, String, String)> = conn
            .query_row(
                r#"
                SELECT status, headers, body, fetched_at, cached_at
                FROM cache_entries
                WHERE store = ?1 AND key = ?2
                "#,
                params![store, key_str],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(db_err("Failed to query cache entry"))?;

        let Some((status, headers_json, body, fetched_at, cached_at)) = row else {
            return Ok(None);
        };

        let now = Utc::now();
        let _ = conn.execute(
            "UPDATE cache_entries SET last_accessed = ?1 WHERE store = ?2 AND key = ?3",
            params![format_ts(now), store, key_str],
        );

        let pairs: Vec<(String, String)> = serde_json::from_str(&headers_json)?;
        let status = StatusCode::from_u16(status as u16).map_err(|e| HustlyError::Store {
            store: store.to_string(),
            message: format!("Corrupt status for {}: {}", key, e),
        })?;

        Ok(Some(CachedEntry {
            key: key.clone(),
            response: GatewayResponse {
                status,
                headers: headers_from_pairs(&pairs),
                body: Bytes::from(body),
            },
            fetched_at: parse_ts(&fetched_at),
            cached_at: parse_ts(&cached_at),
            last_accessed: now,
        }))
    }

    fn put(
        &self,
        store: &str,
        key: &CacheKey,
        response: &GatewayResponse,
        fetched_at: DateTime<Utc>,
        mode: WriteMode,
    ) -> Result<bool> {
        let conn = self.lock()?;
        Self::ensure_store(&conn, store)?;

        if mode == WriteMode::IfNewer {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT fetched_at FROM cache_entries WHERE store = ?1 AND key = ?2",
                    params![store, key.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("Failed to read entry sequence"))?;
            if existing.is_some_and(|raw| parse_ts(&raw) > fetched_at) {
                debug!("Skipping stale write for {} in {}", key, store);
                return Ok(false);
            }
        }

        Self::write_entry(&conn, store, key, response, fetched_at)?;
        Ok(true)
    }

    fn put_all(
        &self,
        store: &str,
        entries: &[(CacheKey, GatewayResponse)],
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;
        Self::ensure_store(&tx, store)?;
        for (key, response) in entries {
            Self::write_entry(&tx, store, key, response, fetched_at)?;
        }
        tx.commit().map_err(db_err("Failed to commit bulk write"))?;
        Ok(())
    }

    fn entry_keys(&self, store: &str) -> Result<Vec<CacheKey>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT method, url FROM cache_entries WHERE store = ?1 ORDER BY url")
            .map_err(db_err("Failed to prepare key query"))?;
        let keys = stmt
            .query_map(params![store], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err("Failed to list entry keys"))?
            .filter_map(|r| r.ok())
            .filter_map(|(method, url)| CacheKey::from_parts(&method, &url))
            .collect();
        Ok(keys)
    }

    fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT s.name, s.created_at,
                       COUNT(e.key), COALESCE(SUM(e.size_bytes), 0)
                FROM cache_stores s
                LEFT JOIN cache_entries e ON e.store = s.name
                GROUP BY s.id
                ORDER BY s.id
                "#,
            )
            .map_err(db_err("Failed to prepare stats query"))?;

        let stores = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                let count: i64 = row.get(2)?;
                let size: i64 = row.get(3)?;
                Ok(StoreStats {
                    name,
                    entry_count: count as usize,
                    total_size_bytes: size as u64,
                    created_at: parse_ts(&created_at),
                })
            })
            .map_err(db_err("Failed to query store stats"))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(CacheStats::from_stores(stores))
    }

    fn evict(&self, store: &str, policy: &EvictionPolicy) -> Result<usize> {
        if policy.is_unbounded() {
            return Ok(0);
        }
        let mut conn = self.lock()?;

        let footprints: Vec<EntryFootprint> = {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT method, url, cached_at, last_accessed, size_bytes
                    FROM cache_entries
                    WHERE store = ?1
                    "#,
                )
                .map_err(db_err("Failed to prepare eviction query"))?;
            let rows = stmt
                .query_map(params![store], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .map_err(db_err("Failed to query for eviction"))?
                .filter_map(|r| r.ok())
                .filter_map(|(method, url, cached_at, last_accessed, size)| {
                    Some(EntryFootprint {
                        key: CacheKey::from_parts(&method, &url)?,
                        cached_at: parse_ts(&cached_at),
                        last_accessed: parse_ts(&last_accessed),
                        size_bytes: size as u64,
                    })
                })
                .collect();
            rows
        };

        let victims = select_victims(footprints, policy, Utc::now());
        if victims.is_empty() {
            return Ok(0);
        }

        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;
        for key in &victims {
            tx.execute(
                "DELETE FROM cache_entries WHERE store = ?1 AND key = ?2",
                params![store, key.to_string()],
            )
            .map_err(db_err("Failed to evict entry"))?;
        }
        tx.commit().map_err(db_err("Failed to commit eviction"))?;

        debug!("Evicted {} entries from {}", victims.len(), store);
        Ok(victims.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE};
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;

    fn create_test_storage() -> (TempDir, SqliteCacheStorage) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_cache.sqlite");
        let storage = SqliteCacheStorage::new(&db_path).unwrap();
        (temp_dir, storage)
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::get(&Url::parse(&format!("https://hustly.app{}", path)).unwrap())
    }

    #[test]
    fn test_put_and_lookup_round_trips_headers() {
        let (_temp, storage) = create_test_storage();
        let response = GatewayResponse::ok("<html>habits</html>")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"));

        storage
            .put("hustly-dynamic-v1", &key("/habits"), &response, Utc::now(), WriteMode::Overwrite)
            .unwrap();

        let entry = storage
            .lookup("hustly-dynamic-v1", &key("/habits"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.response, response);
        assert_eq!(entry.key, key("/habits"));
    }

    #[test]
    fn test_corrupt_timestamp_reads_as_now() {
        let (_temp, storage) = create_test_storage();
        let fetched_at = Utc::now() - chrono::Duration::hours(1);
        storage
            .put("hustly-dynamic-v1", &key("/habits"), &GatewayResponse::ok("v1"), fetched_at, WriteMode::Overwrite)
            .unwrap();
        storage
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE cache_entries SET fetched_at = 'yesterday-ish'", [])
            .unwrap();

        let before = Utc::now();
        let entry = storage
            .lookup("hustly-dynamic-v1", &key("/habits"))
            .unwrap()
            .unwrap();
        assert!(entry.fetched_at >= before);
        assert_eq!(entry.response.body, "v1");
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("cache.sqlite");
        {
            let storage = SqliteCacheStorage::new(&db_path).unwrap();
            storage
                .put("s", &key("/"), &GatewayResponse::ok("root"), Utc::now(), WriteMode::Overwrite)
                .unwrap();
        }
        let storage = SqliteCacheStorage::new(&db_path).unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["s"]);
        assert_eq!(
            storage.lookup("s", &key("/")).unwrap().unwrap().response.body,
            "root"
        );
    }

    #[test]
    fn test_delete_store_removes_entries() {
        let (_temp, storage) = create_test_storage();
        storage
            .put("v0-dynamic", &key("/a"), &GatewayResponse::ok("a"), Utc::now(), WriteMode::Overwrite)
            .unwrap();
        storage.open("v1-dynamic").unwrap();

        assert!(storage.delete("v0-dynamic").unwrap());
        assert!(!storage.has("v0-dynamic").unwrap());
        assert!(storage.has("v1-dynamic").unwrap());
        assert!(storage.lookup("v0-dynamic", &key("/a")).unwrap().is_none());
        assert_eq!(storage.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_if_newer_guard() {
        let (_temp, storage) = create_test_storage();
        let newer = Utc::now();
        let older = newer - chrono::Duration::milliseconds(250);

        assert!(storage
            .put("s", &key("/a"), &GatewayResponse::ok("new"), newer, WriteMode::IfNewer)
            .unwrap());
        assert!(!storage
            .put("s", &key("/a"), &GatewayResponse::ok("old"), older, WriteMode::IfNewer)
            .unwrap());
        assert!(storage
            .put("s", &key("/a"), &GatewayResponse::ok("forced"), older, WriteMode::Overwrite)
            .unwrap());
        assert_eq!(storage.lookup("s", &key("/a")).unwrap().unwrap().response.body, "forced");
    }

    #[test]
    fn test_put_all_and_stats() {
        let (_temp, storage) = create_test_storage();
        let entries = vec![
            (key("/"), GatewayResponse::ok("12345")),
            (key("/habits"), GatewayResponse::ok("67890")),
        ];
        storage.put_all("static", &entries, Utc::now()).unwrap();
        storage.open("dynamic").unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.store_count, 2);
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.store("static").unwrap().total_size_bytes, 10);
        assert_eq!(stats.store("dynamic").unwrap().entry_count, 0);
        assert_eq!(storage.entry_keys("static").unwrap().len(), 2);
    }

    #[test]
    fn test_evict_lru() {
        let (_temp, storage) = create_test_storage();
        for path in ["/a", "/b", "/c"] {
            storage
                .put("dyn", &key(path), &GatewayResponse::ok("x"), Utc::now(), WriteMode::Overwrite)
                .unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        // Touch /a so /b becomes the least recently accessed.
        storage.lookup("dyn", &key("/a")).unwrap();

        let policy = EvictionPolicy {
            max_entries: Some(2),
            ..Default::default()
        };
        assert_eq!(storage.evict("dyn", &policy).unwrap(), 1);
        assert!(storage.lookup("dyn", &key("/b")).unwrap().is_none());
        assert!(storage.lookup("dyn", &key("/a")).unwrap().is_some());
    }
}
