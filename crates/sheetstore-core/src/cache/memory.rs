//! In-process snapshot cache

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::{entry_valid, SnapshotCache};
use crate::backend::Provenance;
use crate::schema::CanonicalSnapshot;

struct Entry {
    snapshot: Arc<CanonicalSnapshot>,
    provenance: Provenance,
    inserted_at: Instant,
    ttl_secs: u64,
}

impl Entry {
    fn valid_for(&self, current: &Provenance) -> bool {
        entry_valid(&self.provenance, current, self.inserted_at.elapsed(), self.ttl_secs)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, valid or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SnapshotCache for MemoryCache {
    fn get(&self, user_id: &str, current: &Provenance) -> Option<Arc<CanonicalSnapshot>> {
        {
            let entries = self.entries.read();
            match entries.get(user_id) {
                None => return None,
                Some(entry) if entry.valid_for(current) => {
                    tracing::debug!("Cache hit for {}", user_id);
                    return Some(entry.snapshot.clone());
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a fresh put may have landed meanwhile
        let mut entries = self.entries.write();
        if entries.get(user_id).is_some_and(|e| !e.valid_for(current)) {
            tracing::debug!("Evicting stale cache entry for {}", user_id);
            entries.remove(user_id);
        }
        None
    }

    fn put(&self, user_id: &str, snapshot: Arc<CanonicalSnapshot>, provenance: Provenance, ttl_secs: u64) {
        self.entries.write().insert(
            user_id.to_string(),
            Entry {
                snapshot,
                provenance,
                inserted_at: Instant::now(),
                ttl_secs,
            },
        );
    }

    fn invalidate(&self, user_id: &str) {
        self.entries.write().remove(user_id);
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
