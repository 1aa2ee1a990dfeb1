//! In-process document, for tests and demos
//!
//! Provenance is a write sequence counter. Latency and outages can be
//! simulated to exercise lease and fallback paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{ensure_unchanged, BackendKind, ConnectionStatus, Provenance, RawDocument, StorageBackend};
use crate::document::Workbook;
use crate::{Result, StoreError};

struct Slot {
    bytes: Vec<u8>,
    sequence: u64,
}

pub struct MemoryDocument {
    slot: Mutex<Slot>,
    latency: Option<Duration>,
    available: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

fn provenance_for(sequence: u64) -> Provenance {
    Provenance::new(format!("seq:{}", sequence))
}

impl MemoryDocument {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            slot: Mutex::new(Slot { bytes, sequence: 1 }),
            latency: None,
            available: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn from_workbook(workbook: &Workbook) -> Result<Self> {
        Ok(Self::new(workbook.encode()?))
    }

    /// Sleep this long inside every read and write
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Replace the content as an outside editor would
    pub fn replace_externally(&self, bytes: Vec<u8>) {
        let mut slot = self.slot.lock();
        slot.bytes = bytes;
        slot.sequence += 1;
    }

    pub fn workbook(&self) -> Result<Workbook> {
        Workbook::decode(&self.slot.lock().bytes)
    }

    /// Full document reads so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory document offline".into()))
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryDocument {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalDocument
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn read(&self) -> Result<RawDocument> {
        self.gate().await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let (bytes, sequence) = {
            let slot = self.slot.lock();
            (slot.bytes.clone(), slot.sequence)
        };
        Workbook::decode(&bytes)?;
        Ok(RawDocument {
            bytes,
            provenance: provenance_for(sequence),
        })
    }

    async fn write(&self, bytes: &[u8], expected: &Provenance) -> Result<Provenance> {
        self.gate().await?;
        let mut slot = self.slot.lock();
        ensure_unchanged(expected, &provenance_for(slot.sequence))?;
        slot.bytes = bytes.to_vec();
        slot.sequence += 1;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(provenance_for(slot.sequence))
    }

    async fn provenance(&self) -> Result<Provenance> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory document offline".into()));
        }
        Ok(provenance_for(self.slot.lock().sequence))
    }

    async fn check_connection(&self) -> ConnectionStatus {
        if self.available.load(Ordering::SeqCst) {
            ConnectionStatus::up("memory document")
        } else {
            ConnectionStatus::down("memory document offline")
        }
    }
}
