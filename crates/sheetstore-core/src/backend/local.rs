//! Local document on disk
//!
//! Provenance is a BLAKE3 digest of the file's bytes plus their length, so any
//! content change yields a new token regardless of timestamp resolution. Writes
//! go to a temporary file in the same directory and are renamed into place.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ensure_unchanged, BackendKind, ConnectionStatus, Provenance, RawDocument, StorageBackend};
use crate::document::Workbook;
use crate::{Result, StoreError};

pub struct LocalDocument {
    path: PathBuf,
    timeout: Duration,
}

impl LocalDocument {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, e: std::io::Error) -> StoreError {
        StoreError::Unavailable(format!("{}: {}", self.path.display(), e))
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            StoreError::Unavailable(format!(
                "{} of {} timed out after {:?}",
                op,
                self.path.display(),
                self.timeout
            ))
        })?
    }
}

pub(crate) fn provenance_of(bytes: &[u8]) -> Provenance {
    Provenance::new(format!(
        "blake3:{}:len:{}",
        blake3::hash(bytes).to_hex(),
        bytes.len()
    ))
}

fn replace_file(path: &Path, bytes: &[u8], expected: &Provenance) -> Result<Provenance> {
    let current = std::fs::read(path)
        .map(|b| provenance_of(&b))
        .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
    ensure_unchanged(expected, &current)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    Ok(provenance_of(bytes))
}

#[async_trait]
impl StorageBackend for LocalDocument {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalDocument
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn read(&self) -> Result<RawDocument> {
        self.bounded("read", async {
            let bytes = tokio::fs::read(&self.path)
                .await
                .map_err(|e| self.unavailable(e))?;
            Workbook::decode(&bytes)?;
            Ok(RawDocument {
                provenance: provenance_of(&bytes),
                bytes,
            })
        })
        .await
    }

    async fn write(&self, bytes: &[u8], expected: &Provenance) -> Result<Provenance> {
        let path = self.path.clone();
        let bytes = bytes.to_vec();
        let expected = expected.clone();
        self.bounded("write", async move {
            tokio::task::spawn_blocking(move || replace_file(&path, &bytes, &expected))
                .await
                .map_err(|e| StoreError::Unavailable(format!("write task failed: {}", e)))?
        })
        .await
    }

    async fn provenance(&self) -> Result<Provenance> {
        self.bounded("digest", async {
            let bytes = tokio::fs::read(&self.path)
                .await
                .map_err(|e| self.unavailable(e))?;
            Ok(provenance_of(&bytes))
        })
        .await
    }

    async fn check_connection(&self) -> ConnectionStatus {
        match tokio::time::timeout(self.timeout, tokio::fs::metadata(&self.path)).await {
            Ok(Ok(meta)) if meta.is_file() => ConnectionStatus::up(format!(
                "local document {} ({} bytes)",
                self.path.display(),
                meta.len()
            )),
            Ok(Ok(_)) => ConnectionStatus::down(format!("{} is not a file", self.path.display())),
            Ok(Err(e)) => ConnectionStatus::down(format!("{}: {}", self.path.display(), e)),
            Err(_) => ConnectionStatus::down(format!("{}: probe timed out", self.path.display())),
        }
    }
}
