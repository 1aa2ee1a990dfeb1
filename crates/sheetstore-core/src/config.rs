//! Store configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::mapper::IDENTITY_STRATEGY;
use crate::{Result, StoreError};

/// Main store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend I/O settings
    pub backend: BackendSettings,

    /// Snapshot cache settings
    pub cache: CacheSettings,

    /// Mutation lease settings
    pub lease: LeaseSettings,

    /// Derived-value settings
    pub recalc: RecalcSettings,

    /// Known users and where their documents live
    pub users: Vec<UserProfile>,
}

impl StoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache TTL
    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.cache.ttl_secs = ttl_secs;
        self
    }

    /// Set the cache store kind
    pub fn with_cache_kind(mut self, kind: CacheKind) -> Self {
        self.cache.kind = kind;
        self
    }

    /// Set the default lease acquisition timeout
    pub fn with_lease_timeout(mut self, timeout_secs: u64) -> Self {
        self.lease.acquire_timeout_secs = timeout_secs;
        self
    }

    /// Set the backend I/O timeout
    pub fn with_io_timeout(mut self, timeout_secs: u64) -> Self {
        self.backend.io_timeout_secs = timeout_secs;
        self
    }

    /// Register a user profile
    pub fn with_user(mut self, profile: UserProfile) -> Self {
        self.users.retain(|u| u.user_id != profile.user_id);
        self.users.push(profile);
        self
    }

    pub fn user(&self, user_id: &str) -> Option<&UserProfile> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    /// Load configuration from a TOML or JSON file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)
                .map_err(|e| StoreError::InvalidConfig(format!("{}: {}", path.display(), e)))?,
        };
        Ok(config)
    }

    /// Save configuration to a TOML or JSON file (chosen by extension)
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => toml::to_string_pretty(self)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// File (optional) + `.env` + process environment, validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `SHEETSTORE_*` variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn secs(key: &str, raw: String) -> Result<u64> {
            raw.trim()
                .parse()
                .map_err(|_| StoreError::InvalidConfig(format!("{} must be whole seconds", key)))
        }

        if let Some(token) = lookup("SHEETSTORE_ACCESS_TOKEN") {
            self.backend.access_token = Some(token);
        }
        if let Some(raw) = lookup("SHEETSTORE_IO_TIMEOUT_SECS") {
            self.backend.io_timeout_secs = secs("SHEETSTORE_IO_TIMEOUT_SECS", raw)?;
        }
        if let Some(raw) = lookup("SHEETSTORE_CACHE_TTL_SECS") {
            self.cache.ttl_secs = secs("SHEETSTORE_CACHE_TTL_SECS", raw)?;
        }
        if let Some(path) = lookup("SHEETSTORE_CACHE_PATH") {
            self.cache.kind = CacheKind::Sqlite;
            self.cache.sqlite_path = path;
        }
        if let Some(raw) = lookup("SHEETSTORE_LEASE_TIMEOUT_SECS") {
            self.lease.acquire_timeout_secs = secs("SHEETSTORE_LEASE_TIMEOUT_SECS", raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease.max_hold_secs == 0 {
            return Err(StoreError::InvalidConfig(
                "lease.max_hold_secs must be positive".into(),
            ));
        }
        if self.backend.io_timeout_secs == 0 {
            return Err(StoreError::InvalidConfig(
                "backend.io_timeout_secs must be positive".into(),
            ));
        }
        let pct = self.recalc.alert_threshold_pct;
        if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
            return Err(StoreError::InvalidConfig(format!(
                "recalc.alert_threshold_pct must be in (0, 100], got {}",
                pct
            )));
        }
        if let Some(period) = &self.recalc.period {
            if crate::recalc::parse_period(period).is_none() {
                return Err(StoreError::InvalidConfig(format!(
                    "recalc.period must be YYYY-MM, got {}",
                    period
                )));
            }
        }
        for user in &self.users {
            if user.user_id.trim().is_empty() {
                return Err(StoreError::InvalidConfig("user_id must not be empty".into()));
            }
        }
        Ok(())
    }
}

/// Backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Timeout for a single read/write/probe, in seconds
    pub io_timeout_secs: u64,

    /// Drive API base (metadata and media download)
    pub drive_api_base: String,

    /// Drive upload API base
    pub upload_api_base: String,

    /// Sheets API base
    pub sheets_api_base: String,

    /// Bearer token for remote documents
    pub access_token: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            io_timeout_secs: 20,
            drive_api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_api_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            sheets_api_base: "https://sheets.googleapis.com/v4".to_string(),
            access_token: None,
        }
    }
}

impl BackendSettings {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Which store backs the snapshot cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// In-process map
    Memory,
    /// SQLite file shared across processes
    Sqlite,
    /// Always miss
    Disabled,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub kind: CacheKind,

    /// Entry time-to-live in seconds
    pub ttl_secs: u64,

    /// Database path when `kind = "sqlite"`
    pub sqlite_path: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            ttl_secs: 300, // 5 minutes
            sqlite_path: ".sheetstore/cache.db".to_string(),
        }
    }
}

/// Lease settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    /// Default wait for a lease before `LockTimeout`
    pub acquire_timeout_secs: u64,

    /// Hold time after which a lease expires on its own
    pub max_hold_secs: u64,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 10,
            max_hold_secs: 60,
        }
    }
}

impl LeaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_secs(self.max_hold_secs)
    }
}

/// Derived-value settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecalcSettings {
    /// Budget percentage at which status turns to `Alerta`
    pub alert_threshold_pct: Decimal,

    /// Fixed budget period (`YYYY-MM`); latest transaction month when unset
    pub period: Option<String>,
}

impl Default for RecalcSettings {
    fn default() -> Self {
        Self {
            alert_threshold_pct: Decimal::from(80),
            period: None,
        }
    }
}

/// Where one user's document lives and how it is laid out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,

    /// Path or URL of the document
    pub location: String,

    /// Mapper strategy identifier
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    IDENTITY_STRATEGY.to_string()
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            location: location.into(),
            strategy: default_strategy(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.cache.kind, CacheKind::Memory);
        assert!(config.lease.max_hold_secs > config.lease.acquire_timeout_secs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new()
            .with_cache_ttl(30)
            .with_lease_timeout(2)
            .with_user(UserProfile::new("ana", "/tmp/ana.json"))
            .with_user(UserProfile::new("ana", "/tmp/ana-2.json").with_strategy("bank_statement"));

        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.lease.acquire_timeout_secs, 2);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.user("ana").unwrap().strategy, "bank_statement");
    }

    #[test]
    fn test_toml_profile_defaults_strategy() {
        let config: StoreConfig = toml::from_str(
            r#"
            [cache]
            ttl_secs = 60

            [[users]]
            user_id = "bia"
            location = "https://docs.google.com/spreadsheets/d/abc123/edit"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.kind, CacheKind::Memory);
        assert_eq!(config.users[0].strategy, IDENTITY_STRATEGY);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("SHEETSTORE_ACCESS_TOKEN", "tok"),
            ("SHEETSTORE_CACHE_TTL_SECS", "12"),
            ("SHEETSTORE_CACHE_PATH", "/tmp/c.db"),
        ]
        .into_iter()
        .collect();

        let mut config = StoreConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend.access_token.as_deref(), Some("tok"));
        assert_eq!(config.cache.ttl_secs, 12);
        assert_eq!(config.cache.kind, CacheKind::Sqlite);

        let mut bad = StoreConfig::default();
        let err = bad
            .apply_env(|k| (k == "SHEETSTORE_IO_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StoreConfig::default();
        config.lease.max_hold_secs = 0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.recalc.period = Some("julho".into());
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default();
        config.recalc.alert_threshold_pct = Decimal::from(120);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheetstore.toml");
        let config = StoreConfig::new()
            .with_cache_ttl(42)
            .with_user(UserProfile::new("caio", "caio.json"));
        config.to_file(&path).unwrap();

        let loaded = StoreConfig::from_file(&path).unwrap();
        assert_eq!(loaded.cache.ttl_secs, 42);
        assert_eq!(loaded.users, config.users);
    }
}
