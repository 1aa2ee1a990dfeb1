//! Store manager: one memoized DataStore per user
//!
//! All stores built here share one snapshot cache and one lease guard, so
//! leases serialize mutations per user even across stores.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{open_backend, StorageBackend};
use crate::cache::{open_cache, SnapshotCache};
use crate::config::{StoreConfig, UserProfile};
use crate::facade::DataStore;
use crate::guard::LeaseGuard;
use crate::mapper::resolve_strategy;
use crate::{Result, StoreError};

pub struct StoreManager {
    config: StoreConfig,

    /// Known users
    profiles: RwLock<HashMap<String, UserProfile>>,

    /// Stores built so far
    stores: RwLock<HashMap<String, Arc<DataStore>>>,

    cache: Arc<dyn SnapshotCache>,
    guard: Arc<LeaseGuard>,
}

impl StoreManager {
    /// Manager with the cache store and lease guard described by `config`
    pub fn new(config: StoreConfig) -> Self {
        let cache = open_cache(&config.cache);
        let guard = Arc::new(LeaseGuard::new(config.lease.max_hold()));
        Self::with_shared(config, cache, guard)
    }

    /// Manager using an existing cache and guard
    pub fn with_shared(config: StoreConfig, cache: Arc<dyn SnapshotCache>, guard: Arc<LeaseGuard>) -> Self {
        let profiles = config
            .users
            .iter()
            .map(|p| (p.user_id.clone(), p.clone()))
            .collect();
        tracing::debug!(
            "Store manager ready: {} users, {} cache",
            config.users.len(),
            cache.name()
        );
        Self {
            config,
            profiles: RwLock::new(profiles),
            stores: RwLock::new(HashMap::new()),
            cache,
            guard,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn SnapshotCache> {
        &self.cache
    }

    pub fn guard(&self) -> &Arc<LeaseGuard> {
        &self.guard
    }

    /// Adds or replaces a user; a replaced user's store is rebuilt on next use
    pub fn register(&self, profile: UserProfile) -> Result<()> {
        if profile.user_id.trim().is_empty() {
            return Err(StoreError::InvalidConfig("user_id must not be empty".into()));
        }
        let user_id = profile.user_id.clone();
        self.profiles.write().insert(user_id.clone(), profile);
        self.stores.write().remove(&user_id);
        self.cache.invalidate(&user_id);
        tracing::info!("User registered: {}", user_id);
        Ok(())
    }

    /// Store for `user_id` over a backend built by the caller
    pub fn attach(
        &self,
        user_id: &str,
        backend: Arc<dyn StorageBackend>,
        strategy: &str,
    ) -> Arc<DataStore> {
        let store = Arc::new(self.build(user_id, backend, strategy));
        self.stores
            .write()
            .insert(user_id.to_string(), Arc::clone(&store));
        store
    }

    /// The user's store, built from their profile on first use
    pub fn store_for(&self, user_id: &str) -> Result<Arc<DataStore>> {
        if let Some(store) = self.stores.read().get(user_id) {
            return Ok(Arc::clone(store));
        }

        let profile = self
            .profiles
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::InvalidConfig(format!("unknown user: {}", user_id)))?;
        let backend = open_backend(&profile.location, &self.config.backend)?;
        let built = Arc::new(self.build(user_id, backend, &profile.strategy));

        // Another task may have built it meanwhile; keep the first one
        let mut stores = self.stores.write();
        let store = stores.entry(user_id.to_string()).or_insert(built);
        Ok(Arc::clone(store))
    }

    fn build(&self, user_id: &str, backend: Arc<dyn StorageBackend>, strategy: &str) -> DataStore {
        tracing::debug!(
            "Building store for {} ({} via {})",
            user_id,
            backend.describe(),
            strategy
        );
        DataStore::new(
            user_id,
            backend,
            resolve_strategy(strategy),
            Arc::clone(&self.cache),
            Arc::clone(&self.guard),
            &self.config,
        )
    }

    pub fn profiles(&self) -> Vec<UserProfile> {
        let mut profiles: Vec<_> = self.profiles.read().values().cloned().collect();
        profiles.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        profiles
    }

    /// Forgets a user and their cached snapshot
    pub fn remove(&self, user_id: &str) -> bool {
        let had_profile = self.profiles.write().remove(user_id).is_some();
        let had_store = self.stores.write().remove(user_id).is_some();
        self.cache.invalidate(user_id);
        had_profile || had_store
    }

    /// Default lease wait, for callers building their own timeouts
    pub fn lease_timeout(&self) -> Duration {
        self.config.lease.acquire_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, MemoryDocument};
    use crate::document::Workbook;
    use crate::mapper::{BANK_STATEMENT_STRATEGY, IDENTITY_STRATEGY};

    #[test]
    fn test_store_is_memoized_per_user() {
        let config = StoreConfig::new()
            .with_user(UserProfile::new("ana", "/tmp/ana.json"))
            .with_user(
                UserProfile::new("bia", "https://docs.google.com/spreadsheets/d/1Bia/edit")
                    .with_strategy(BANK_STATEMENT_STRATEGY),
            );
        let manager = StoreManager::new(config);

        let a1 = manager.store_for("ana").unwrap();
        let a2 = manager.store_for("ana").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(a1.backend_kind(), BackendKind::LocalDocument);
        assert_eq!(a1.strategy_id(), IDENTITY_STRATEGY);

        let b = manager.store_for("bia").unwrap();
        assert_eq!(b.backend_kind(), BackendKind::RemoteNativeSheet);
        assert_eq!(b.strategy_id(), BANK_STATEMENT_STRATEGY);
    }

    #[test]
    fn test_unknown_user_is_rejected() {
        let manager = StoreManager::new(StoreConfig::default());
        assert!(matches!(
            manager.store_for("ghost").err(),
            Some(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_register_and_remove() {
        let manager = StoreManager::new(StoreConfig::default());
        manager.register(UserProfile::new("caio", "caio.json")).unwrap();
        let first = manager.store_for("caio").unwrap();

        manager
            .register(UserProfile::new("caio", "caio-2.json"))
            .unwrap();
        let second = manager.store_for("caio").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        assert_eq!(manager.profiles().len(), 1);
        assert!(manager.remove("caio"));
        assert!(!manager.remove("caio"));
        assert!(manager.register(UserProfile::new(" ", "x.json")).is_err());
    }

    #[tokio::test]
    async fn test_attached_stores_share_the_guard() {
        let manager = StoreManager::new(StoreConfig::default());
        let doc = Arc::new(MemoryDocument::from_workbook(&Workbook::new()).unwrap());
        let store = manager.attach("ana", doc, IDENTITY_STRATEGY);

        let _lease = manager.guard().acquire("ana", Duration::ZERO).await.unwrap();
        let err = store
            .mutate_within(
                crate::schema::TableKind::Profile,
                crate::facade::Operation::Delete { id: 1 },
                Duration::ZERO,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }
}
