//! Snapshot cache
//!
//! Caches whole canonical snapshots per user. An entry is only served while
//! its provenance equals the backend's current provenance and it is younger
//! than its TTL; anything else is evicted on sight.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use crate::backend::Provenance;
use crate::config::{CacheKind, CacheSettings};
use crate::schema::CanonicalSnapshot;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

/// Per-user snapshot cache shared by all facades
pub trait SnapshotCache: Send + Sync {
    /// Cached snapshot if still valid for `current` provenance
    fn get(&self, user_id: &str, current: &Provenance) -> Option<Arc<CanonicalSnapshot>>;

    /// Stores `snapshot`, replacing any previous entry for the user
    fn put(&self, user_id: &str, snapshot: Arc<CanonicalSnapshot>, provenance: Provenance, ttl_secs: u64);

    fn invalidate(&self, user_id: &str);

    /// Store name, for logs
    fn name(&self) -> &'static str;
}

/// Entry validity: same provenance and age strictly below the TTL
pub(crate) fn entry_valid(stored: &Provenance, current: &Provenance, age: Duration, ttl_secs: u64) -> bool {
    stored == current && age < Duration::from_secs(ttl_secs)
}

/// Cache that never holds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl SnapshotCache for NullCache {
    fn get(&self, _user_id: &str, _current: &Provenance) -> Option<Arc<CanonicalSnapshot>> {
        None
    }

    fn put(&self, _user_id: &str, _snapshot: Arc<CanonicalSnapshot>, _provenance: Provenance, _ttl_secs: u64) {}

    fn invalidate(&self, _user_id: &str) {}

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Builds the configured cache store; a SQLite store that cannot be opened
/// degrades to [`NullCache`]
pub fn open_cache(settings: &CacheSettings) -> Arc<dyn SnapshotCache> {
    match settings.kind {
        CacheKind::Memory => Arc::new(MemoryCache::new()),
        CacheKind::Disabled => Arc::new(NullCache),
        CacheKind::Sqlite => match SqliteCache::open(&settings.sqlite_path) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                tracing::warn!(
                    "Snapshot cache at {} unavailable, caching disabled: {}",
                    settings.sqlite_path,
                    e
                );
                Arc::new(NullCache)
            }
        },
    }
}
