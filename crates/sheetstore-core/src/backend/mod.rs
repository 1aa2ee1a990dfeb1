//! Storage backends: raw document bytes in and out of a location
//!
//! Backends know nothing about the canonical schema. They move bytes, report
//! provenance, and refuse writes when the document changed since it was read.
//!
//! ```text
//! location ──detect──▶ BackendKind ──open_backend──▶ Arc<dyn StorageBackend>
//!                        ├─ LocalDocument       (file on disk)
//!                        ├─ RemoteDocumentFile  (Drive file media)
//!                        └─ RemoteNativeSheet   (Sheets values API)
//! ```

pub mod detect;
pub mod local;
pub mod memory;
pub mod native_sheet;
pub mod remote_file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::BackendSettings;
use crate::Result;

pub use detect::{detect, extract_document_id, BackendKind};
pub use local::LocalDocument;
pub use memory::MemoryDocument;
pub use native_sheet::RemoteNativeSheet;
pub use remote_file::RemoteDocumentFile;

/// Identifies which backend state a snapshot was derived from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance(pub String);

impl Provenance {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document bytes together with the provenance they were read at
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub provenance: Provenance,
}

/// Result of a liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub detail: String,
}

impl ConnectionStatus {
    pub fn up(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Byte-level access to one user's document
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable location, for logs
    fn describe(&self) -> String;

    /// Reads the whole document. Bytes are already validated as a workbook.
    async fn read(&self) -> Result<RawDocument>;

    /// Replaces the document if its provenance still equals `expected`
    async fn write(&self, bytes: &[u8], expected: &Provenance) -> Result<Provenance>;

    /// Current provenance without transferring the document
    async fn provenance(&self) -> Result<Provenance>;

    /// Lightweight liveness probe; never mutates
    async fn check_connection(&self) -> ConnectionStatus;
}

/// Builds the backend matching `location`
pub fn open_backend(location: &str, settings: &BackendSettings) -> Result<Arc<dyn StorageBackend>> {
    let kind = detect(location);
    tracing::debug!("Opening {:?} backend for {}", kind, location);

    let backend: Arc<dyn StorageBackend> = match kind {
        BackendKind::LocalDocument => Arc::new(LocalDocument::new(location, settings.io_timeout())),
        BackendKind::RemoteDocumentFile => {
            Arc::new(RemoteDocumentFile::from_location(location, settings)?)
        }
        BackendKind::RemoteNativeSheet => {
            Arc::new(RemoteNativeSheet::from_location(location, settings)?)
        }
    };
    Ok(backend)
}

/// Fails with `Conflict` unless `current == expected`
pub(crate) fn ensure_unchanged(expected: &Provenance, current: &Provenance) -> Result<()> {
    if expected == current {
        Ok(())
    } else {
        Err(crate::StoreError::Conflict {
            expected: expected.to_string(),
            found: current.to_string(),
        })
    }
}
