//! SqliteCache - snapshot cache persisted in SQLite WAL
//!
//! Lets several processes on one host share parsed snapshots. The store is
//! best effort: any SQLite error is logged and treated as a miss.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{entry_valid, SnapshotCache};
use crate::backend::Provenance;
use crate::schema::CanonicalSnapshot;
use crate::Result;

struct StoredEntry {
    provenance: String,
    inserted_at_ms: i64,
    ttl_secs: i64,
    payload_json: String,
}

pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Opens (or creates) the cache database in WAL mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, for tests
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshot_cache (
                user_id        TEXT PRIMARY KEY,
                provenance     TEXT NOT NULL,
                inserted_at_ms INTEGER NOT NULL,
                ttl_secs       INTEGER NOT NULL,
                payload_json   TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load(&self, user_id: &str) -> rusqlite::Result<Option<StoredEntry>> {
        self.conn
            .lock()
            .query_row(
                "SELECT provenance, inserted_at_ms, ttl_secs, payload_json
                 FROM snapshot_cache WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(StoredEntry {
                        provenance: row.get(0)?,
                        inserted_at_ms: row.get(1)?,
                        ttl_secs: row.get(2)?,
                        payload_json: row.get(3)?,
                    })
                },
            )
            .optional()
    }

    fn delete(&self, user_id: &str) {
        if let Err(e) = self
            .conn
            .lock()
            .execute("DELETE FROM snapshot_cache WHERE user_id = ?1", params![user_id])
        {
            tracing::warn!("Snapshot cache delete failed for {}: {}", user_id, e);
        }
    }

    fn store(&self, user_id: &str, snapshot: &CanonicalSnapshot, provenance: &Provenance, ttl_secs: u64) -> Result<()> {
        let payload_json = serde_json::to_string(snapshot)?;
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO snapshot_cache
                (user_id, provenance, inserted_at_ms, ttl_secs, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                provenance.as_str(),
                chrono::Utc::now().timestamp_millis(),
                ttl,
                payload_json
            ],
        )?;
        Ok(())
    }
}

impl SnapshotCache for SqliteCache {
    fn get(&self, user_id: &str, current: &Provenance) -> Option<Arc<CanonicalSnapshot>> {
        let entry = match self.load(user_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Snapshot cache read failed for {}: {}", user_id, e);
                return None;
            }
        };

        let age_ms = chrono::Utc::now().timestamp_millis() - entry.inserted_at_ms;
        let age = Duration::from_millis(u64::try_from(age_ms).unwrap_or(0));
        let ttl = u64::try_from(entry.ttl_secs).unwrap_or(0);
        if !entry_valid(&Provenance::new(entry.provenance), current, age, ttl) {
            tracing::debug!("Evicting stale cache entry for {}", user_id);
            self.delete(user_id);
            return None;
        }

        match serde_json::from_str::<CanonicalSnapshot>(&entry.payload_json) {
            Ok(snapshot) => {
                tracing::debug!("Cache hit for {}", user_id);
                Some(Arc::new(snapshot))
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry for {}: {}", user_id, e);
                self.delete(user_id);
                None
            }
        }
    }

    fn put(&self, user_id: &str, snapshot: Arc<CanonicalSnapshot>, provenance: Provenance, ttl_secs: u64) {
        if let Err(e) = self.store(user_id, &snapshot, &provenance, ttl_secs) {
            tracing::warn!("Snapshot cache write dropped for {}: {}", user_id, e);
        }
    }

    fn invalidate(&self, user_id: &str) {
        self.delete(user_id);
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
