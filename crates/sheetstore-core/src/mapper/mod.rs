//! Schema mapping between user layouts and the canonical schema
//!
//! A strategy translates one user's tabular layout into canonical tables and
//! back. Strategies are compiled in and looked up by identifier; see
//! [`strategies`] for the built-in set.

pub mod coerce;
pub mod layout;
pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::backend::Provenance;
use crate::document::{RawTable, Workbook};
use crate::error::CoercionWarning;
use crate::schema::{CanonicalSnapshot, CanonicalTable, TableKind};

pub use coerce::NumberLocale;
pub use layout::{ColumnSource, LayoutMapper, RawColumn, TableLayout};

/// Layout identical to the canonical schema
pub const IDENTITY_STRATEGY: &str = "identity";

/// Signed-amount bank export
pub const BANK_STATEMENT_STRATEGY: &str = "bank_statement";

/// Older Portuguese household workbook
pub const LEGACY_PTBR_STRATEGY: &str = "legacy_ptbr";

/// Canonical rows plus the values that failed coercion
#[derive(Debug, Clone, PartialEq)]
pub struct MappedTable {
    pub table: CanonicalTable,
    pub warnings: Vec<CoercionWarning>,
}

/// Translates between one raw layout and the canonical schema
pub trait SchemaMapper: Send + Sync {
    fn strategy_id(&self) -> &str;

    /// Sheet holding `kind` in this layout
    fn sheet_name(&self, kind: TableKind) -> &str;

    /// Raw rows to canonical rows; never fails, bad cells become warnings
    fn to_canonical(&self, raw: &RawTable, kind: TableKind) -> MappedTable;

    /// Canonical rows to raw rows, emitting only columns the layout stores
    fn from_canonical(&self, table: &CanonicalTable) -> RawTable;

    /// Maps every table of a workbook; missing sheets read as empty tables
    fn load_snapshot(&self, workbook: &Workbook, provenance: Provenance) -> CanonicalSnapshot {
        let empty = RawTable::default();
        let mut snapshot = CanonicalSnapshot::empty(provenance);
        for kind in TableKind::ALL {
            let raw = workbook
                .sheet(self.sheet_name(kind))
                .map(|s| &s.table)
                .unwrap_or(&empty);
            let mapped = self.to_canonical(raw, kind);
            snapshot.set_table(mapped.table);
            snapshot.push_warnings(mapped.warnings);
        }
        snapshot
    }

    /// Writes the given tables into `workbook`, leaving other sheets untouched
    fn store_tables(&self, workbook: &mut Workbook, snapshot: &CanonicalSnapshot, kinds: &[TableKind]) {
        for &kind in kinds {
            workbook.put_sheet(self.sheet_name(kind), self.from_canonical(snapshot.table(kind)));
        }
    }
}

/// Folds case, accents and whitespace so headers compare loosely
pub fn normalize_header(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compiled strategies keyed by identifier
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn SchemaMapper>>,
}

impl StrategyRegistry {
    /// Registry holding the built-in strategies
    pub fn builtin() -> Self {
        let mut strategies: HashMap<&'static str, Arc<dyn SchemaMapper>> = HashMap::new();
        strategies.insert(IDENTITY_STRATEGY, Arc::new(strategies::identity()));
        strategies.insert(BANK_STATEMENT_STRATEGY, Arc::new(strategies::bank_statement()));
        strategies.insert(LEGACY_PTBR_STRATEGY, Arc::new(strategies::legacy_ptbr()));
        Self { strategies }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SchemaMapper>> {
        self.strategies.get(id).cloned()
    }

    /// Strategy for `id`, or identity when the id is unknown
    pub fn resolve(&self, id: &str) -> Arc<dyn SchemaMapper> {
        if let Some(mapper) = self.get(id) {
            return mapper;
        }
        tracing::warn!("Unknown mapper strategy '{}', using {}", id, IDENTITY_STRATEGY);
        Arc::new(strategies::identity())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.strategies.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

lazy_static! {
    static ref REGISTRY: StrategyRegistry = StrategyRegistry::builtin();
}

/// Resolves a strategy from the built-in registry
pub fn resolve_strategy(id: &str) -> Arc<dyn SchemaMapper> {
    REGISTRY.resolve(id)
}

/// Identifiers of the built-in strategies
pub fn strategy_ids() -> Vec<&'static str> {
    REGISTRY.ids()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Descrição "), "descricao");
        assert_eq!(normalize_header("VALOR   (R$)"), "valor (r$)");
        assert_eq!(normalize_header("Data\tLançamento"), "data lancamento");
        assert_eq!(normalize_header("Mês"), normalize_header("mes"));
    }

    #[test]
    fn test_registry_resolution() {
        assert_eq!(
            strategy_ids(),
            vec![BANK_STATEMENT_STRATEGY, IDENTITY_STRATEGY, LEGACY_PTBR_STRATEGY]
        );
        assert_eq!(resolve_strategy("bank_statement").strategy_id(), BANK_STATEMENT_STRATEGY);
        assert_eq!(resolve_strategy("no_such_layout").strategy_id(), IDENTITY_STRATEGY);
    }

    #[test]
    fn test_load_snapshot_fills_missing_sheets() {
        let mapper = resolve_strategy(IDENTITY_STRATEGY);
        let mut wb = Workbook::new();
        wb.put_sheet(
            "Perfil",
            RawTable::new(vec!["ID".into(), "Campo".into(), "Valor".into()])
                .with_row(vec!["1", "moeda", "BRL"]),
        );

        let snapshot = mapper.load_snapshot(&wb, Provenance::new("seq:1"));
        assert_eq!(snapshot.table(TableKind::Profile).len(), 1);
        for kind in [TableKind::Transactions, TableKind::Budgets, TableKind::Goals] {
            assert!(snapshot.table(kind).is_empty());
        }
        assert!(snapshot.warnings().is_empty());
    }

    #[test]
    fn test_store_tables_only_touches_named_kinds() {
        let mapper = resolve_strategy(IDENTITY_STRATEGY);
        let mut wb = Workbook::new();
        wb.put_sheet("Anotações", RawTable::new(vec!["Livre".into()]).with_row(vec!["x"]));

        let snapshot = CanonicalSnapshot::empty(Provenance::new("seq:1"));
        mapper.store_tables(&mut wb, &snapshot, &[TableKind::Debts]);

        let names: Vec<_> = wb.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Anotações", "Dívidas"]);
    }
}
