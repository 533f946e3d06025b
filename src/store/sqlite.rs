use std::fs;
use std::path::Path;
use std::time::SystemTime;

use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{from_unix_seconds, unix_seconds, CacheEntry, CacheKey, CacheStore, CachedRequest, CachedResponse};
use crate::error::CacheError;

/// Fixed accounting cost per stored row, covering the key, headers, and
/// SQLite bookkeeping, on top of the body length.
const PER_ENTRY_OVERHEAD: u64 = 512;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE NOT NULL,
    expiry_time INTEGER NOT NULL,
    last_accessed_time INTEGER NOT NULL,
    request_method TEXT NOT NULL,
    request_url TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    response_status INTEGER NOT NULL,
    response_headers TEXT NOT NULL,
    response_body BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
    ON cache_entries (expiry_time);
CREATE INDEX IF NOT EXISTS idx_cache_entries_last_accessed
    ON cache_entries (last_accessed_time);
";

/// Implements [`CacheStore`] with a single-file SQLite database.
///
/// All operations serialize on one connection; entries survive process
/// restart; corrupt rows are skipped on read and deleted opportunistically.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    max_bytes: u64,
    max_entries: Option<u64>,
}

struct RawRow {
    expiry_time: i64,
    request_method: String,
    request_url: String,
    request_headers: String,
    response_status: u16,
    response_headers: String,
    response_body: Vec<u8>,
}

impl SqliteStore {
    /// Opens (creating if necessary) the store at `path`.
    ///
    /// Failure here is fatal to the store: callers that cannot open a store
    /// should run uncached rather than retry through this handle.
    pub fn open(
        path: &Path,
        max_bytes: u64,
        max_entries: Option<u64>,
    ) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore { conn: Mutex::new(conn), max_bytes, max_entries })
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                row.get(0)
            })?;
        Ok(count.unsigned_abs())
    }

    /// Total accounted size: stored body bytes plus the per-entry overhead.
    pub fn total_bytes(&self) -> Result<u64, CacheError> {
        let conn = self.conn.lock();
        let (count, body_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(response_body)), 0)
             FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(body_bytes.unsigned_abs() + count.unsigned_abs() * PER_ENTRY_OVERHEAD)
    }

    fn decode(raw: RawRow) -> Result<CacheEntry, CacheError> {
        let request_headers = serde_json::from_str(&raw.request_headers)?;
        let response_headers = serde_json::from_str(&raw.response_headers)?;
        Ok(CacheEntry {
            expiry_time: from_unix_seconds(raw.expiry_time),
            request: CachedRequest {
                method: raw.request_method,
                url: raw.request_url,
                headers: request_headers,
            },
            response: CachedResponse {
                status: raw.response_status,
                headers: response_headers,
                body: raw.response_body,
            },
        })
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let conn = self.conn.lock();
        let lookup = conn
            .query_row(
                "SELECT expiry_time, request_method, request_url,
                        request_headers, response_status, response_headers,
                        response_body
                 FROM cache_entries WHERE key = ?1",
                [key.as_str()],
                |row| {
                    Ok(RawRow {
                        expiry_time: row.get(0)?,
                        request_method: row.get(1)?,
                        request_url: row.get(2)?,
                        request_headers: row.get(3)?,
                        response_status: row.get(4)?,
                        response_headers: row.get(5)?,
                        response_body: row.get(6)?,
                    })
                },
            )
            .optional();
        let raw = match lookup {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("cache read failed for {key}: {err}");
                return None;
            }
        };
        let entry = match Self::decode(raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("dropping corrupt cache entry for {key}: {err}");
                if let Err(err) = conn
                    .execute("DELETE FROM cache_entries WHERE key = ?1", [key.as_str()])
                {
                    debug!("could not delete corrupt entry for {key}: {err}");
                }
                return None;
            }
        };
        if let Err(err) = conn.execute(
            "UPDATE cache_entries SET last_accessed_time = ?1 WHERE key = ?2",
            params![unix_seconds(SystemTime::now()), key.as_str()],
        ) {
            debug!("could not refresh recency for {key}: {err}");
        }
        Some(entry)
    }

    fn put(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let request_headers = serde_json::to_string(&entry.request.headers)?;
        let response_headers = serde_json::to_string(&entry.response.headers)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
                 (key, expiry_time, last_accessed_time, request_method,
                  request_url, request_headers, response_status,
                  response_headers, response_body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key.as_str(),
                unix_seconds(entry.expiry_time),
                unix_seconds(SystemTime::now()),
                entry.request.method,
                entry.request.url,
                request_headers,
                entry.response.status,
                response_headers,
                entry.response.body,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key.as_str()])?;
        Ok(())
    }

    fn prune(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = unix_seconds(SystemTime::now());

        tx.execute("DELETE FROM cache_entries WHERE expiry_time < ?1", [now])?;

        if let Some(max_entries) = self.max_entries {
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM cache_entries",
                [],
                |row| row.get(0),
            )?;
            let excess = count - i64::try_from(max_entries).unwrap_or(i64::MAX);
            if excess > 0 {
                tx.execute(
                    "DELETE FROM cache_entries WHERE id IN (
                         SELECT id FROM cache_entries
                         ORDER BY last_accessed_time ASC, id ASC
                         LIMIT ?1)",
                    [excess],
                )?;
            }
        }

        let (count, body_bytes): (i64, i64) = tx.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(response_body)), 0)
             FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mut total =
            body_bytes.unsigned_abs() + count.unsigned_abs() * PER_ENTRY_OVERHEAD;
        if total > self.max_bytes {
            let mut victims: Vec<i64> = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, LENGTH(response_body) FROM cache_entries
                     ORDER BY last_accessed_time ASC, id ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    if total <= self.max_bytes {
                        break;
                    }
                    let (id, body_len) = row?;
                    victims.push(id);
                    total = total
                        .saturating_sub(body_len.unsigned_abs() + PER_ENTRY_OVERHEAD);
                }
            }
            for id in victims {
                tx.execute("DELETE FROM cache_entries WHERE id = ?1", [id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HttpHeaders;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn open_store(
        dir: &TempDir,
        max_bytes: u64,
        max_entries: Option<u64>,
    ) -> SqliteStore {
        SqliteStore::open(&dir.path().join("cache.sqlite"), max_bytes, max_entries)
            .unwrap()
    }

    fn entry(url: &str, body: &[u8], expiry_time: SystemTime) -> CacheEntry {
        let mut response_headers = HttpHeaders::new();
        response_headers.append("Content-Type", "application/octet-stream");
        CacheEntry {
            expiry_time,
            request: CachedRequest {
                method: "GET".into(),
                url: url.into(),
                headers: HttpHeaders::new(),
            },
            response: CachedResponse {
                status: 200,
                headers: response_headers,
                body: body.to_vec(),
            },
        }
    }

    fn set_recency(store: &SqliteStore, key: &CacheKey, seconds: i64) {
        store
            .conn
            .lock()
            .execute(
                "UPDATE cache_entries SET last_accessed_time = ?1 WHERE key = ?2",
                params![seconds, key.as_str()],
            )
            .unwrap();
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, None);
        let key = CacheKey::from_url("https://example.com/asset");
        let fresh = SystemTime::now() + Duration::from_secs(60);
        store.put(&key, entry("https://example.com/asset", b"payload", fresh)).unwrap();

        let found = store.get(&key).expect("entry should be present");
        assert_eq!(found.response.body, b"payload");
        assert_eq!(found.response.status, 200);
        assert_eq!(found.response.headers.get("content-type"), Some("application/octet-stream"));
        assert_eq!(found.request.method, "GET");
        assert!(store.get(&CacheKey::from_url("https://example.com/other")).is_none());
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.sqlite");
        let key = CacheKey::from_url("https://example.com/persist");
        let fresh = SystemTime::now() + Duration::from_secs(600);
        {
            let store = SqliteStore::open(&path, u64::MAX, None).unwrap();
            store.put(&key, entry("https://example.com/persist", b"still here", fresh)).unwrap();
        }
        let store = SqliteStore::open(&path, u64::MAX, None).unwrap();
        let found = store.get(&key).expect("entry should survive restart");
        assert_eq!(found.response.body, b"still here");
    }

    #[test]
    fn put_replaces_existing_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, None);
        let key = CacheKey::from_url("https://example.com/replace");
        let fresh = SystemTime::now() + Duration::from_secs(60);
        store.put(&key, entry("https://example.com/replace", b"one", fresh)).unwrap();
        store.put(&key, entry("https://example.com/replace", b"two", fresh)).unwrap();
        assert_eq!(store.entry_count().unwrap(), 1);
        assert_eq!(store.get(&key).unwrap().response.body, b"two");
    }

    #[test]
    fn delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, None);
        let fresh = SystemTime::now() + Duration::from_secs(60);
        let a = CacheKey::from_url("https://example.com/a");
        let b = CacheKey::from_url("https://example.com/b");
        store.put(&a, entry("https://example.com/a", b"a", fresh)).unwrap();
        store.put(&b, entry("https://example.com/b", b"b", fresh)).unwrap();

        store.delete(&a).unwrap();
        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_some());
        // deleting a missing key is not an error
        store.delete(&a).unwrap();

        store.clear().unwrap();
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[test]
    fn prune_removes_expired_before_anything_else() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, Some(60));
        let now = SystemTime::now();
        for i in 0..100 {
            let url = format!("https://example.com/{i}");
            let key = CacheKey::from_url(&url);
            let expiry = if i % 2 == 0 {
                now - Duration::from_secs(10)
            } else {
                now + Duration::from_secs(3600)
            };
            store.put(&key, entry(&url, b"x", expiry)).unwrap();
        }
        store.prune().unwrap();
        // The 50 expired entries go first, which already satisfies the
        // 60-entry limit; every fresh entry survives.
        assert_eq!(store.entry_count().unwrap(), 50);
        for i in 0..100 {
            let key = CacheKey::from_url(&format!("https://example.com/{i}"));
            assert_eq!(store.get(&key).is_some(), i % 2 == 1, "entry {i}");
        }
    }

    #[test]
    fn prune_evicts_least_recently_accessed_over_entry_limit() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, Some(2));
        let fresh = SystemTime::now() + Duration::from_secs(3600);
        let keys: Vec<CacheKey> = (0..4)
            .map(|i| {
                let url = format!("https://example.com/lru/{i}");
                let key = CacheKey::from_url(&url);
                store.put(&key, entry(&url, b"x", fresh)).unwrap();
                key
            })
            .collect();
        // Recency order, oldest first: 2, 0, 3, 1.
        set_recency(&store, &keys[2], 100);
        set_recency(&store, &keys[0], 200);
        set_recency(&store, &keys[3], 300);
        set_recency(&store, &keys[1], 400);

        store.prune().unwrap();
        assert!(store.get(&keys[2]).is_none());
        assert!(store.get(&keys[0]).is_none());
        assert!(store.get(&keys[3]).is_some());
        assert!(store.get(&keys[1]).is_some());
    }

    #[test]
    fn get_refreshes_recency() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, Some(1));
        let fresh = SystemTime::now() + Duration::from_secs(3600);
        let a = CacheKey::from_url("https://example.com/ra");
        let b = CacheKey::from_url("https://example.com/rb");
        store.put(&a, entry("https://example.com/ra", b"a", fresh)).unwrap();
        store.put(&b, entry("https://example.com/rb", b"b", fresh)).unwrap();
        set_recency(&store, &a, 100);
        set_recency(&store, &b, 200);
        // Touch `a`; it becomes the most recent and `b` is the LRU victim.
        assert!(store.get(&a).is_some());
        store.prune().unwrap();
        assert!(store.get(&a).is_some());
        assert!(store.get(&b).is_none());
    }

    #[test]
    fn prune_enforces_byte_budget() {
        let dir = TempDir::new().unwrap();
        let body = vec![0_u8; 4096];
        // Room for two entries and their overhead, not four.
        let budget = 2 * (4096 + PER_ENTRY_OVERHEAD) + 100;
        let store = open_store(&dir, budget, None);
        let fresh = SystemTime::now() + Duration::from_secs(3600);
        let keys: Vec<CacheKey> = (0..4)
            .map(|i| {
                let url = format!("https://example.com/big/{i}");
                let key = CacheKey::from_url(&url);
                store.put(&key, entry(&url, &body, fresh)).unwrap();
                key
            })
            .collect();
        for (i, key) in keys.iter().enumerate() {
            set_recency(&store, key, 100 + i as i64);
        }
        store.prune().unwrap();
        assert!(store.total_bytes().unwrap() <= budget);
        assert_eq!(store.entry_count().unwrap(), 2);
        assert!(store.get(&keys[0]).is_none());
        assert!(store.get(&keys[1]).is_none());
        assert!(store.get(&keys[2]).is_some());
        assert!(store.get(&keys[3]).is_some());
    }

    #[test]
    fn corrupt_row_is_skipped_and_deleted() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir, u64::MAX, None);
        let key = CacheKey::from_url("https://example.com/corrupt");
        let fresh = SystemTime::now() + Duration::from_secs(60);
        store.put(&key, entry("https://example.com/corrupt", b"x", fresh)).unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE cache_entries SET response_headers = 'not json'
                 WHERE key = ?1",
                [key.as_str()],
            )
            .unwrap();
        assert!(store.get(&key).is_none());
        assert_eq!(store.entry_count().unwrap(), 0);
    }
}
