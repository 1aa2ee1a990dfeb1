//! Canonical schema: the fixed table/column contract all business logic uses
//!
//! Every table starts with an integer `ID` column. Column order here is the
//! order every mapper must produce.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::backend::Provenance;
use crate::error::CoercionWarning;
use crate::{Result, StoreError};

/// Version of the canonical contract below
pub const CANONICAL_SCHEMA_VERSION: u32 = 1;

/// Name of the identifier column, always first
pub const ID_COLUMN: &str = "ID";

pub const TRANSACTION_TYPES: &[&str] = &["Receita", "Despesa"];
pub const BUDGET_STATUSES: &[&str] = &["OK", "Alerta", "Excedido"];
pub const DEBT_STATUSES: &[&str] = &["Ativa", "Quitada"];
pub const GOAL_STATUSES: &[&str] = &["Em andamento", "Concluída"];

/// The fixed set of canonical tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Transactions,
    Budgets,
    Debts,
    Goals,
    Insights,
    Profile,
}

impl TableKind {
    pub const ALL: [TableKind; 6] = [
        TableKind::Transactions,
        TableKind::Budgets,
        TableKind::Debts,
        TableKind::Goals,
        TableKind::Insights,
        TableKind::Profile,
    ];

    /// Declared columns, in canonical order
    pub fn columns(self) -> &'static [ColumnDef] {
        match self {
            TableKind::Transactions => TRANSACTIONS,
            TableKind::Budgets => BUDGETS,
            TableKind::Debts => DEBTS,
            TableKind::Goals => GOALS,
            TableKind::Insights => INSIGHTS,
            TableKind::Profile => PROFILE,
        }
    }

    /// Sheet name used by layouts identical to the canonical schema
    pub fn sheet_name(self) -> &'static str {
        match self {
            TableKind::Transactions => "Transações",
            TableKind::Budgets => "Orçamentos",
            TableKind::Debts => "Dívidas",
            TableKind::Goals => "Metas",
            TableKind::Insights => "Insights",
            TableKind::Profile => "Perfil",
        }
    }

    pub fn column_index(self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }

    pub fn column(self, name: &str) -> Option<&'static ColumnDef> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn column_names(self) -> Vec<&'static str> {
        self.columns().iter().map(|c| c.name).collect()
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Transactions => write!(f, "Transactions"),
            TableKind::Budgets => write!(f, "Budgets"),
            TableKind::Debts => write!(f, "Debts"),
            TableKind::Goals => write!(f, "Goals"),
            TableKind::Insights => write!(f, "Insights"),
            TableKind::Profile => write!(f, "Profile"),
        }
    }
}

impl FromStr for TableKind {
    type Err = StoreError;

    /// Accepts the English kind or the canonical sheet name, any case
    fn from_str(s: &str) -> Result<Self> {
        let wanted = crate::mapper::normalize_header(s);
        TableKind::ALL
            .into_iter()
            .find(|k| {
                crate::mapper::normalize_header(&k.to_string()) == wanted
                    || crate::mapper::normalize_header(k.sheet_name()) == wanted
            })
            .ok_or_else(|| StoreError::InvalidConfig(format!("unknown table: {}", s)))
    }
}

/// Column value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Date,
    /// Enum-like string restricted to the listed spellings
    Enum(&'static [&'static str]),
}

/// Value used when the source has nothing for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    /// Empty string
    Empty,
    /// Numeric zero
    Zero,
    /// Null-marker
    Null,
    /// Fixed enum spelling
    Literal(&'static str),
}

/// Declared column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub default: ColumnDefault,
    /// Computed by recalculation, never written by collaborators
    pub derived: bool,
}

impl ColumnDef {
    const fn new(name: &'static str, ty: ColumnType, default: ColumnDefault) -> Self {
        Self {
            name,
            ty,
            default,
            derived: false,
        }
    }

    const fn id() -> Self {
        Self::new(ID_COLUMN, ColumnType::Integer, ColumnDefault::Null)
    }

    const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text, ColumnDefault::Empty)
    }

    const fn decimal(name: &'static str) -> Self {
        Self::new(name, ColumnType::Decimal, ColumnDefault::Zero)
    }

    const fn date(name: &'static str) -> Self {
        Self::new(name, ColumnType::Date, ColumnDefault::Null)
    }

    const fn enumeration(
        name: &'static str,
        variants: &'static [&'static str],
        default: ColumnDefault,
    ) -> Self {
        Self::new(name, ColumnType::Enum(variants), default)
    }

    const fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    /// The declared default as a value
    pub fn default_value(&self) -> Value {
        match (self.default, self.ty) {
            (ColumnDefault::Empty, _) => Value::Text(String::new()),
            (ColumnDefault::Zero, ColumnType::Integer) => Value::Integer(0),
            (ColumnDefault::Zero, _) => Value::Decimal(Decimal::ZERO),
            (ColumnDefault::Null, _) => Value::Null,
            (ColumnDefault::Literal(s), _) => Value::Text(s.to_string()),
        }
    }
}

const TRANSACTIONS: &[ColumnDef] = &[
    ColumnDef::id(),
    ColumnDef::date("Data"),
    ColumnDef::enumeration("Tipo", TRANSACTION_TYPES, ColumnDefault::Null),
    ColumnDef::text("Categoria"),
    ColumnDef::text("Descrição"),
    ColumnDef::decimal("Valor"),
    ColumnDef::text("Conta"),
];

const BUDGETS: &[ColumnDef] = &[
    ColumnDef::id(),
    ColumnDef::text("Categoria"),
    ColumnDef::text("Mês"),
    ColumnDef::decimal("Limite"),
    ColumnDef::decimal("Gasto").derived(),
    ColumnDef::decimal("Porcentagem").derived(),
    ColumnDef::enumeration("Status", BUDGET_STATUSES, ColumnDefault::Literal("OK")).derived(),
];

const DEBTS: &[ColumnDef] = &[
    ColumnDef::id(),
    ColumnDef::text("Credor"),
    ColumnDef::decimal("Valor Total"),
    ColumnDef::decimal("Valor Pago"),
    ColumnDef::decimal("Saldo").derived(),
    ColumnDef::decimal("Taxa Juros"),
    ColumnDef::date("Vencimento"),
    ColumnDef::enumeration("Status", DEBT_STATUSES, ColumnDefault::Literal("Ativa")).derived(),
];

const GOALS: &[ColumnDef] = &[
    ColumnDef::id(),
    ColumnDef::text("Meta"),
    ColumnDef::decimal("Valor Alvo"),
    ColumnDef::decimal("Valor Atual"),
    ColumnDef::date("Prazo"),
    ColumnDef::decimal("Progresso").derived(),
    ColumnDef::enumeration("Status", GOAL_STATUSES, ColumnDefault::Literal("Em andamento"))
        .derived(),
];

const INSIGHTS: &[ColumnDef] = &[
    ColumnDef::id(),
    ColumnDef::date("Data"),
    ColumnDef::text("Tipo"),
    ColumnDef::text("Mensagem"),
];

const PROFILE: &[ColumnDef] = &[
    ColumnDef::id(),
    ColumnDef::text("Campo"),
    ColumnDef::text("Valor"),
];

/// A typed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Decimal view; integers widen, everything else is `None`
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(n) => Some(Decimal::from(*n)),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering for collaborators
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    /// Raw cell rendering; null renders as an empty cell
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// One record; values are aligned with the table's declared columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    /// A row holding every column's default
    pub fn defaults(kind: TableKind) -> Self {
        Self {
            values: kind.columns().iter().map(ColumnDef::default_value).collect(),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.values.first().and_then(Value::as_integer)
    }
}

/// A table in canonical shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub kind: TableKind,
    pub rows: Vec<Row>,
}

impl CanonicalTable {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `index`
    pub fn get(&self, index: usize, column: &str) -> Option<&Value> {
        let col = self.kind.column_index(column)?;
        self.rows.get(index)?.values.get(col)
    }

    pub fn find(&self, id: i64) -> Option<&Row> {
        self.rows.iter().find(|r| r.id() == Some(id))
    }

    pub fn position(&self, id: i64) -> Option<usize> {
        self.rows.iter().position(|r| r.id() == Some(id))
    }

    pub fn max_id(&self) -> Option<i64> {
        self.rows.iter().filter_map(Row::id).max()
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let columns = self.kind.columns();
        self.rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row.values.iter())
                    .map(|(c, v)| (c.name.to_string(), v.to_json()))
                    .collect()
            })
            .collect()
    }
}

/// All canonical tables of one user at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSnapshot {
    pub provenance: Provenance,
    #[serde(deserialize_with = "complete_tables")]
    tables: BTreeMap<TableKind, CanonicalTable>,
    warnings: Vec<CoercionWarning>,
}

lazy_static! {
    static ref EMPTY_TABLES: Vec<CanonicalTable> =
        TableKind::ALL.into_iter().map(CanonicalTable::new).collect();
}

/// Payloads written by older builds may lack a table; those read as empty
fn complete_tables<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<TableKind, CanonicalTable>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut tables = BTreeMap::<TableKind, CanonicalTable>::deserialize(deserializer)?;
    for kind in TableKind::ALL {
        tables.entry(kind).or_insert_with(|| CanonicalTable::new(kind));
    }
    Ok(tables)
}

impl CanonicalSnapshot {
    /// Snapshot with every table present and empty
    pub fn empty(provenance: Provenance) -> Self {
        let tables = TableKind::ALL
            .into_iter()
            .map(|k| (k, CanonicalTable::new(k)))
            .collect();
        Self {
            provenance,
            tables,
            warnings: Vec::new(),
        }
    }

    pub fn table(&self, kind: TableKind) -> &CanonicalTable {
        match self.tables.get(&kind) {
            Some(table) => table,
            // ALL lists kinds in declaration order
            None => &EMPTY_TABLES[kind as usize],
        }
    }

    pub fn table_mut(&mut self, kind: TableKind) -> &mut CanonicalTable {
        self.tables
            .entry(kind)
            .or_insert_with(|| CanonicalTable::new(kind))
    }

    pub fn set_table(&mut self, table: CanonicalTable) {
        self.tables.insert(table.kind, table);
    }

    pub fn push_warnings(&mut self, warnings: impl IntoIterator<Item = CoercionWarning>) {
        self.warnings.extend(warnings);
    }

    pub fn warnings(&self) -> &[CoercionWarning] {
        &self.warnings
    }

    pub fn warnings_for(&self, kind: TableKind) -> Vec<CoercionWarning> {
        self.warnings
            .iter()
            .filter(|w| w.table == kind)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_starts_with_id() {
        for kind in TableKind::ALL {
            let first = kind.columns()[0];
            assert_eq!(first.name, ID_COLUMN, "{} must start with ID", kind);
            assert_eq!(first.ty, ColumnType::Integer);
        }
    }

    #[test]
    fn test_column_names_unique_per_table() {
        for kind in TableKind::ALL {
            let mut names = kind.column_names();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), kind.columns().len(), "duplicate column in {}", kind);
        }
    }

    #[test]
    fn test_defaults_follow_declared_types() {
        let row = Row::defaults(TableKind::Budgets);
        assert_eq!(row.values[0], Value::Null);
        assert_eq!(row.values[1], Value::Text(String::new()));
        assert_eq!(row.values[3], Value::Decimal(Decimal::ZERO));
        assert_eq!(row.values[6], Value::Text("OK".into()));
    }

    #[test]
    fn test_table_kind_parsing() {
        assert_eq!("transactions".parse::<TableKind>().unwrap(), TableKind::Transactions);
        assert_eq!("Orçamentos".parse::<TableKind>().unwrap(), TableKind::Budgets);
        assert_eq!("dividas".parse::<TableKind>().unwrap(), TableKind::Debts);
        assert!("ledger".parse::<TableKind>().is_err());
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut snapshot = CanonicalSnapshot::empty(Provenance::new("seq:3"));
        let mut row = Row::defaults(TableKind::Profile);
        row.values[0] = Value::Integer(1);
        row.values[1] = Value::from("moeda");
        row.values[2] = Value::from("BRL");
        snapshot.table_mut(TableKind::Profile).rows.push(row);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: CanonicalSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_snapshot_payload_missing_a_table() {
        let snapshot = CanonicalSnapshot::empty(Provenance::new("seq:4"));
        let mut payload = serde_json::to_value(&snapshot).unwrap();
        payload["tables"]
            .as_object_mut()
            .unwrap()
            .remove("Budgets")
            .unwrap();

        let parsed: CanonicalSnapshot = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.table(TableKind::Budgets).kind, TableKind::Budgets);
        assert!(parsed.table(TableKind::Budgets).is_empty());
        assert_eq!(parsed, snapshot);

        let mut bare = snapshot.clone();
        bare.tables.remove(&TableKind::Goals);
        assert_eq!(bare.table(TableKind::Goals).kind, TableKind::Goals);
        assert!(bare.table(TableKind::Goals).rows.is_empty());
    }
}
