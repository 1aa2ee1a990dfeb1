//! sheetstore - typed data access over spreadsheet documents
//!
//! Lets many independent users keep personal-finance records in a spreadsheet
//! (a local file, a cloud file or a cloud-native sheet) and use it as a typed
//! database.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    DataStore (facade)                 │
//! │   read / mutate / recalculate_derived / force_resync  │
//! ├───────────────┬───────────────┬──────────────────────┤
//! │  LeaseGuard   │ SnapshotCache │   recalc (derived)   │
//! │ (per user)    │ (per user)    │                      │
//! ├───────────────┴───────┬───────┴──────────────────────┤
//! │     SchemaMapper      │  user layout <-> canonical    │
//! ├───────────────────────┴──────────────────────────────┤
//! │   StorageBackend: local | remote file | native sheet  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Backend detection**: one location string picks the storage variant
//! - **Canonical schema**: six fixed tables with typed columns
//! - **Layout strategies**: compiled-in mappers keyed by identifier
//! - **Provenance-checked cache**: never serves data older than the backend
//! - **Per-user leases**: no lost updates under concurrent mutation

pub mod backend;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod facade;
pub mod guard;
pub mod manager;
pub mod mapper;
pub mod recalc;
pub mod schema;

pub use backend::{detect, open_backend, BackendKind, ConnectionStatus, Provenance, StorageBackend};
pub use cache::{open_cache, MemoryCache, NullCache, SnapshotCache, SqliteCache};
pub use config::{CacheKind, StoreConfig, UserProfile};
pub use document::{RawTable, Workbook};
pub use error::{CoercionWarning, Result, StoreError};
pub use facade::{DataStore, MutationOutcome, Operation, ReadOutcome, RowInput};
pub use guard::{Lease, LeaseGuard};
pub use manager::StoreManager;
pub use mapper::{resolve_strategy, SchemaMapper, StrategyRegistry, IDENTITY_STRATEGY};
pub use recalc::{recalculate, RecalcContext};
pub use schema::{CanonicalSnapshot, CanonicalTable, Row, TableKind, Value, CANONICAL_SCHEMA_VERSION};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
