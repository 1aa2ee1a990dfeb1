//! DataStore: the single entry point collaborators use for one user
//!
//! ```text
//! read ──▶ provenance probe ──▶ cache hit? ──yes──▶ snapshot
//!                                   │no
//!                                   ▼
//!                      backend read ─▶ map ─▶ recalc ─▶ cache put
//!
//! mutate ──▶ lease ─▶ fresh read ─▶ apply ─▶ recalc dependants
//!                 ─▶ write affected sheets (provenance checked)
//!                 ─▶ invalidate cache ─▶ release
//! ```
//!
//! A failed mutation leaves the document and the cache untouched: nothing is
//! written until every step before the write has succeeded.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{BackendKind, ConnectionStatus, Provenance, RawDocument, StorageBackend};
use crate::cache::SnapshotCache;
use crate::config::StoreConfig;
use crate::document::Workbook;
use crate::error::CoercionWarning;
use crate::guard::LeaseGuard;
use crate::mapper::coerce::{match_enum, parse_date, parse_decimal, parse_integer};
use crate::mapper::{normalize_header, SchemaMapper};
use crate::recalc::{self, RecalcContext};
use crate::schema::{
    CanonicalSnapshot, CanonicalTable, ColumnDef, ColumnType, Row, TableKind, Value, ID_COLUMN,
};
use crate::{Result, StoreError};

/// Field values for an insert or update, keyed by canonical column name
pub type RowInput = BTreeMap<String, Value>;

/// A single-row change
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert(RowInput),
    Update { id: i64, changes: RowInput },
    Delete { id: i64 },
}

impl Operation {
    fn verb(&self) -> &'static str {
        match self {
            Operation::Insert(_) => "insert",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// A table read together with how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub table: CanonicalTable,
    pub warnings: Vec<CoercionWarning>,
    pub provenance: Provenance,
    /// Served from the last known-good snapshot after a backend failure
    pub stale: bool,
}

/// Result of a persisted mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// Row inserted, updated or deleted
    pub id: i64,
    /// The mutated table as persisted
    pub rows: CanonicalTable,
    /// Tables written: the mutated one plus changed dependants
    pub affected: Vec<TableKind>,
    pub provenance: Provenance,
    pub warnings: Vec<CoercionWarning>,
}

/// Typed, cached, lease-serialized access to one user's document
pub struct DataStore {
    user_id: String,
    backend: Arc<dyn StorageBackend>,
    mapper: Arc<dyn SchemaMapper>,
    cache: Arc<dyn SnapshotCache>,
    guard: Arc<LeaseGuard>,
    cache_ttl_secs: u64,
    lease_timeout: Duration,
    recalc: RecalcContext,
    last_good: RwLock<Option<Arc<CanonicalSnapshot>>>,
    /// Highest ID seen or issued per table; new IDs start above it
    id_floor: Mutex<HashMap<TableKind, i64>>,
}

impl DataStore {
    pub fn new(
        user_id: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        mapper: Arc<dyn SchemaMapper>,
        cache: Arc<dyn SnapshotCache>,
        guard: Arc<LeaseGuard>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            backend,
            mapper,
            cache,
            guard,
            cache_ttl_secs: config.cache.ttl_secs,
            lease_timeout: config.lease.acquire_timeout(),
            recalc: RecalcContext::from(&config.recalc),
            last_good: RwLock::new(None),
            id_floor: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn strategy_id(&self) -> &str {
        self.mapper.strategy_id()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Canonical rows of one table
    pub async fn read(&self, kind: TableKind) -> Result<CanonicalTable> {
        Ok(self.snapshot().await?.table(kind).clone())
    }

    pub async fn read_detailed(&self, kind: TableKind) -> Result<ReadOutcome> {
        let snapshot = self.snapshot().await?;
        Ok(outcome(&snapshot, kind, false))
    }

    /// Like [`read_detailed`](Self::read_detailed), but serves the last
    /// known-good snapshot, marked stale, when the backend fails
    pub async fn read_best_effort(&self, kind: TableKind) -> Result<ReadOutcome> {
        match self.snapshot().await {
            Ok(snapshot) => Ok(outcome(&snapshot, kind, false)),
            Err(e @ (StoreError::Unavailable(_) | StoreError::Corrupt(_))) => {
                let fallback = self.last_good.read().clone();
                match fallback {
                    Some(snapshot) => {
                        tracing::warn!(
                            "Serving stale {} for {} ({}): {}",
                            kind,
                            self.user_id,
                            snapshot.provenance,
                            e
                        );
                        Ok(outcome(&snapshot, kind, true))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Whole snapshot, from cache when still valid
    pub async fn snapshot(&self) -> Result<Arc<CanonicalSnapshot>> {
        let current = self.backend.provenance().await?;
        if let Some(hit) = self.cache.get(&self.user_id, &current) {
            self.remember(&hit);
            return Ok(hit);
        }

        tracing::debug!("Cache miss for {}, reading {}", self.user_id, self.backend.describe());
        let doc = self.backend.read().await?;
        let (_, mut snapshot) = self.decode(&doc)?;
        recalc::recalculate(&mut snapshot, &self.recalc);

        let snapshot = Arc::new(snapshot);
        self.cache.put(
            &self.user_id,
            Arc::clone(&snapshot),
            snapshot.provenance.clone(),
            self.cache_ttl_secs,
        );
        self.remember(&snapshot);
        Ok(snapshot)
    }

    fn remember(&self, snapshot: &Arc<CanonicalSnapshot>) {
        self.observe_ids(snapshot);
        *self.last_good.write() = Some(Arc::clone(snapshot));
    }

    fn decode(&self, doc: &RawDocument) -> Result<(Workbook, CanonicalSnapshot)> {
        let workbook = Workbook::decode(&doc.bytes)?;
        let snapshot = self.mapper.load_snapshot(&workbook, doc.provenance.clone());
        Ok((workbook, snapshot))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Applies `op` waiting up to the configured lease timeout
    pub async fn mutate(&self, kind: TableKind, op: Operation) -> Result<MutationOutcome> {
        self.mutate_within(kind, op, self.lease_timeout).await
    }

    /// Applies `op` waiting at most `timeout` for the user's lease
    pub async fn mutate_within(
        &self,
        kind: TableKind,
        op: Operation,
        timeout: Duration,
    ) -> Result<MutationOutcome> {
        let started = Instant::now();
        let verb = op.verb();
        let lease = self.guard.acquire(&self.user_id, timeout).await?;

        let doc = self.backend.read().await?;
        let (mut workbook, mut snapshot) = self.decode(&doc)?;
        self.observe_ids(&snapshot);

        let id = self.apply(&mut snapshot, kind, op)?;

        let mut affected = vec![kind];
        for changed in recalc::recalculate_tables(&mut snapshot, recalc::dependents(kind), &self.recalc) {
            if !affected.contains(&changed) {
                affected.push(changed);
            }
        }
        self.mapper.store_tables(&mut workbook, &snapshot, &affected);

        let provenance = self.backend.write(&workbook.encode()?, &doc.provenance).await?;
        self.cache.invalidate(&self.user_id);
        self.raise_floor(kind, id);

        if !lease.is_valid() {
            tracing::warn!(
                "Lease for {} expired during {} after {:?}",
                self.user_id,
                verb,
                lease.held_for()
            );
        }
        drop(lease);

        tracing::info!(
            "Persisted {} {} #{} for {} in {:?} ({} -> {})",
            kind,
            verb,
            id,
            self.user_id,
            started.elapsed(),
            doc.provenance,
            provenance
        );

        Ok(MutationOutcome {
            id,
            rows: snapshot.table(kind).clone(),
            warnings: snapshot.warnings_for(kind),
            affected,
            provenance,
        })
    }

    /// Recomputes every derived table under the lease and persists the tables
    /// whose stored form changed. Returns the tables written.
    pub async fn recalculate_derived(&self) -> Result<Vec<TableKind>> {
        let lease = self.guard.acquire(&self.user_id, self.lease_timeout).await?;

        let doc = self.backend.read().await?;
        let (mut workbook, mut snapshot) = self.decode(&doc)?;
        let changed = recalc::recalculate(&mut snapshot, &self.recalc);
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        let before = workbook.clone();
        self.mapper.store_tables(&mut workbook, &snapshot, &changed);
        if workbook == before {
            // Layout does not store the changed columns
            return Ok(Vec::new());
        }

        let provenance = self.backend.write(&workbook.encode()?, &doc.provenance).await?;
        self.cache.invalidate(&self.user_id);
        drop(lease);

        tracing::info!(
            "Recalculated {:?} for {} ({} -> {})",
            changed,
            self.user_id,
            doc.provenance,
            provenance
        );
        Ok(changed)
    }

    /// Drops the cached snapshot and reloads from the backend
    pub async fn force_resync(&self) -> Result<Provenance> {
        self.cache.invalidate(&self.user_id);
        tracing::debug!("Forced resync for {}", self.user_id);
        Ok(self.snapshot().await?.provenance.clone())
    }

    pub async fn check_connection(&self) -> ConnectionStatus {
        self.backend.check_connection().await
    }

    fn observe_ids(&self, snapshot: &CanonicalSnapshot) {
        let mut floors = self.id_floor.lock();
        for kind in TableKind::ALL {
            if let Some(max) = snapshot.table(kind).max_id() {
                let floor = floors.entry(kind).or_insert(0);
                *floor = (*floor).max(max);
            }
        }
    }

    fn raise_floor(&self, kind: TableKind, id: i64) {
        let mut floors = self.id_floor.lock();
        let floor = floors.entry(kind).or_insert(0);
        *floor = (*floor).max(id);
    }

    fn apply(&self, snapshot: &mut CanonicalSnapshot, kind: TableKind, op: Operation) -> Result<i64> {
        let floor = self.id_floor.lock().get(&kind).copied().unwrap_or(0);
        let table = snapshot.table_mut(kind);

        match op {
            Operation::Insert(input) => {
                let id = table.max_id().unwrap_or(0).max(floor) + 1;
                let mut row = Row::defaults(kind);
                assign_fields(kind, &mut row, &input)?;
                row.values[0] = Value::Integer(id);
                table.rows.push(row);
                Ok(id)
            }
            Operation::Update { id, changes } => {
                let pos = table.position(id).ok_or(StoreError::NotFound { table: kind, id })?;
                let mut row = table.rows[pos].clone();
                assign_fields(kind, &mut row, &changes)?;
                table.rows[pos] = row;
                Ok(id)
            }
            Operation::Delete { id } => {
                let pos = table.position(id).ok_or(StoreError::NotFound { table: kind, id })?;
                table.rows.remove(pos);
                Ok(id)
            }
        }
    }
}

fn outcome(snapshot: &CanonicalSnapshot, kind: TableKind, stale: bool) -> ReadOutcome {
    ReadOutcome {
        table: snapshot.table(kind).clone(),
        warnings: snapshot.warnings_for(kind),
        provenance: snapshot.provenance.clone(),
        stale,
    }
}

/// Writes collaborator-supplied fields into `row`
fn assign_fields(kind: TableKind, row: &mut Row, input: &RowInput) -> Result<()> {
    for (name, value) in input {
        let wanted = normalize_header(name);
        let (index, column) = kind
            .columns()
            .iter()
            .enumerate()
            .find(|(_, c)| normalize_header(c.name) == wanted)
            .ok_or_else(|| {
                StoreError::SchemaMismatch(format!("{} has no column '{}'", kind, name))
            })?;

        if column.name == ID_COLUMN {
            return Err(StoreError::SchemaMismatch(format!(
                "{} IDs are assigned by the store",
                kind
            )));
        }
        if column.derived {
            return Err(StoreError::SchemaMismatch(format!(
                "{}.{} is derived and cannot be written",
                kind, column.name
            )));
        }

        let value = conform(kind, column, value)?;
        if let Some(slot) = row.values.get_mut(index) {
            *slot = value;
        }
    }
    Ok(())
}

/// Checks `value` against the column type, parsing text where the type allows
fn conform(kind: TableKind, column: &ColumnDef, value: &Value) -> Result<Value> {
    let mismatch = || {
        StoreError::SchemaMismatch(format!(
            "{}.{} cannot hold {:?}",
            kind, column.name, value
        ))
    };

    if value.is_null() {
        return Ok(column.default_value());
    }

    let conformed = match (column.ty, value) {
        (ColumnType::Text, Value::Text(s)) => Some(Value::Text(s.trim().to_string())),
        (ColumnType::Integer, Value::Integer(n)) => Some(Value::Integer(*n)),
        (ColumnType::Integer, Value::Text(s)) => parse_integer(s).map(Value::Integer),
        (ColumnType::Decimal, Value::Decimal(d)) => Some(Value::Decimal(*d)),
        (ColumnType::Decimal, Value::Integer(n)) => Some(Value::Decimal((*n).into())),
        (ColumnType::Decimal, Value::Text(s)) => parse_decimal(s).map(Value::Decimal),
        (ColumnType::Date, Value::Date(d)) => Some(Value::Date(*d)),
        (ColumnType::Date, Value::Text(s)) => parse_date(s).map(Value::Date),
        (ColumnType::Enum(variants), Value::Text(s)) => match_enum(s, variants).map(Value::from),
        _ => None,
    };
    conformed.ok_or_else(mismatch)
}
