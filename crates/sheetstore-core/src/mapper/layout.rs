//! Declarative table layouts and the mapper that interprets them
//!
//! A [`TableLayout`] says, for every canonical column, where its value comes
//! from in the raw sheet, and for every raw column, how it is produced from a
//! canonical row. [`LayoutMapper`] runs both directions for a full set of
//! layouts, so a strategy is only data.

use std::collections::{HashMap, HashSet};

use super::coerce::{coerce_cell, parse_decimal_in, Coerced, NumberLocale};
use super::{normalize_header, MappedTable, SchemaMapper};
use crate::document::RawTable;
use crate::error::CoercionWarning;
use crate::schema::{CanonicalTable, ColumnDef, Row, TableKind, Value, TRANSACTION_TYPES};

/// Where a canonical column's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// First raw column whose header matches one of the aliases
    Header(&'static [&'static str]),
    /// Absolute value of a signed amount column
    AbsoluteOf(&'static [&'static str]),
    /// Transaction type from the sign of an amount column: negative is `Despesa`
    SignOf(&'static [&'static str]),
    /// Not stored; the column default applies
    Absent,
}

/// How a raw column is produced on write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawColumn {
    Canonical {
        header: &'static str,
        column: &'static str,
    },
    /// `amount` negated when the `kind` column reads `Despesa`
    SignedAmount {
        header: &'static str,
        amount: &'static str,
        kind: &'static str,
    },
}

impl RawColumn {
    pub fn header(&self) -> &'static str {
        match self {
            RawColumn::Canonical { header, .. } | RawColumn::SignedAmount { header, .. } => *header,
        }
    }
}

/// Layout of one canonical table inside the user's workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub kind: TableKind,
    pub sheet: &'static str,
    /// One source per canonical column, in canonical order
    pub sources: Vec<ColumnSource>,
    pub raw: Vec<RawColumn>,
    pub locale: NumberLocale,
}

impl TableLayout {
    /// Canonical sheet, headers equal to column names, IDs stored
    pub fn identity(kind: TableKind) -> Self {
        let columns = kind.columns();
        Self {
            kind,
            sheet: kind.sheet_name(),
            sources: columns
                .iter()
                .map(|c| ColumnSource::Header(std::slice::from_ref(&c.name)))
                .collect(),
            raw: columns
                .iter()
                .map(|c| RawColumn::Canonical {
                    header: c.name,
                    column: c.name,
                })
                .collect(),
            locale: NumberLocale::Neutral,
        }
    }

    /// Empty layout on `sheet`: every column absent, nothing emitted
    pub fn new(kind: TableKind, sheet: &'static str) -> Self {
        Self {
            kind,
            sheet,
            sources: vec![ColumnSource::Absent; kind.columns().len()],
            raw: Vec::new(),
            locale: NumberLocale::Neutral,
        }
    }

    /// Number convention of the sheet's cells, both directions
    pub fn locale(mut self, locale: NumberLocale) -> Self {
        self.locale = locale;
        self
    }

    /// Sets the source of `column`; unknown names are ignored
    pub fn source(mut self, column: &str, source: ColumnSource) -> Self {
        match self.kind.column_index(column) {
            Some(i) => self.sources[i] = source,
            None => tracing::warn!("Layout for {} names unknown column '{}'", self.kind, column),
        }
        self
    }

    /// Reads `column` from `header` and writes it back under the same header
    pub fn stored(self, column: &'static str, header: &'static str, aliases: &'static [&'static str]) -> Self {
        self.source(column, ColumnSource::Header(aliases))
            .emit(RawColumn::Canonical { header, column })
    }

    pub fn emit(mut self, column: RawColumn) -> Self {
        self.raw.push(column);
        self
    }
}

/// Source resolved against one sheet's headers
#[derive(Debug, Clone, Copy)]
enum Resolved {
    Cell(usize),
    Absolute(usize),
    Sign(usize),
    Default,
}

fn header_index(headers: &[String]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, h) in headers.iter().enumerate() {
        index.entry(normalize_header(h)).or_insert(i);
    }
    index
}

fn lookup(index: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|a| index.get(&normalize_header(a)).copied())
}

/// Applies `layout` to `raw`
fn map_rows(layout: &TableLayout, raw: &RawTable) -> MappedTable {
    let kind = layout.kind;
    let locale = layout.locale;
    let columns = kind.columns();
    let index = header_index(&raw.headers);

    let resolved: Vec<Resolved> = layout
        .sources
        .iter()
        .map(|source| match *source {
            ColumnSource::Header(a) => lookup(&index, a).map_or(Resolved::Default, Resolved::Cell),
            ColumnSource::AbsoluteOf(a) => lookup(&index, a).map_or(Resolved::Default, Resolved::Absolute),
            ColumnSource::SignOf(a) => lookup(&index, a).map_or(Resolved::Default, Resolved::Sign),
            ColumnSource::Absent => Resolved::Default,
        })
        .collect();

    let mut table = CanonicalTable::new(kind);
    let mut warnings = Vec::new();

    for (i, cells) in raw.rows.iter().enumerate() {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let row_no = i + 1;
        let mut values = Vec::with_capacity(columns.len());

        for (column, how) in columns.iter().zip(resolved.iter()) {
            let value = match *how {
                Resolved::Default => column.default_value(),
                Resolved::Cell(c) => {
                    let cell = raw.cell(i, c);
                    match coerce_cell(cell, column.ty, locale) {
                        Coerced::Value(v) => v,
                        Coerced::Blank => column.default_value(),
                        Coerced::Invalid => {
                            warnings.push(warning(kind, row_no, column, cell));
                            Value::Null
                        }
                    }
                }
                Resolved::Absolute(c) => {
                    let cell = raw.cell(i, c);
                    match parse_decimal_in(cell, locale) {
                        Some(d) => Value::Decimal(d.abs()),
                        None if cell.trim().is_empty() => column.default_value(),
                        None => {
                            warnings.push(warning(kind, row_no, column, cell));
                            Value::Null
                        }
                    }
                }
                // Unreadable amounts are reported once, by the amount column
                Resolved::Sign(c) => match parse_decimal_in(raw.cell(i, c), locale) {
                    Some(d) if d.is_sign_negative() && !d.is_zero() => Value::from(TRANSACTION_TYPES[1]),
                    Some(_) => Value::from(TRANSACTION_TYPES[0]),
                    None => column.default_value(),
                },
            };
            values.push(value);
        }
        table.rows.push(Row { values });
    }

    assign_missing_ids(&mut table);
    MappedTable { table, warnings }
}

fn warning(kind: TableKind, row: usize, column: &ColumnDef, value: &str) -> CoercionWarning {
    CoercionWarning {
        table: kind,
        row,
        column: column.name.to_string(),
        value: value.to_string(),
    }
}

/// Gives rows with a missing or repeated ID a fresh one above the maximum
fn assign_missing_ids(table: &mut CanonicalTable) {
    let mut next = table.max_id().unwrap_or(0).max(0);
    let mut seen = HashSet::new();
    for row in &mut table.rows {
        let keep = matches!(row.id(), Some(id) if id > 0 && seen.insert(id));
        if !keep {
            next += 1;
            seen.insert(next);
            row.values[0] = Value::Integer(next);
        }
    }
}

fn render(table: &CanonicalTable, column: &str, row: &Row) -> Option<Value> {
    table
        .kind
        .column_index(column)
        .and_then(|i| row.values.get(i))
        .cloned()
}

fn unmap_rows(layout: &TableLayout, table: &CanonicalTable) -> RawTable {
    let locale = layout.locale;
    let headers = layout.raw.iter().map(|c| c.header().to_string()).collect();
    let mut out = RawTable::new(headers);

    for row in &table.rows {
        let cells = layout
            .raw
            .iter()
            .map(|rc| match *rc {
                RawColumn::Canonical { column, .. } => match render(table, column, row) {
                    Some(Value::Decimal(d)) => locale.render(d),
                    Some(v) => v.to_string(),
                    None => String::new(),
                },
                RawColumn::SignedAmount { amount, kind, .. } => {
                    let Some(value) = render(table, amount, row).and_then(|v| v.as_decimal()) else {
                        return String::new();
                    };
                    let outflow = render(table, kind, row)
                        .and_then(|v| v.as_text().map(normalize_header))
                        .is_some_and(|t| t == normalize_header(TRANSACTION_TYPES[1]));
                    if outflow {
                        locale.render(-value.abs())
                    } else {
                        locale.render(value.abs())
                    }
                }
            })
            .collect();
        out.rows.push(cells);
    }
    out
}

/// A strategy made of one layout per canonical table
pub struct LayoutMapper {
    id: &'static str,
    /// Indexed like `TableKind::ALL`
    layouts: Vec<TableLayout>,
}

impl LayoutMapper {
    /// Identity layouts for every table
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            layouts: TableKind::ALL.into_iter().map(TableLayout::identity).collect(),
        }
    }

    /// Replaces the layout of `layout.kind`
    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        let slot = layout.kind as usize;
        self.layouts[slot] = layout;
        self
    }

    pub fn layout(&self, kind: TableKind) -> &TableLayout {
        &self.layouts[kind as usize]
    }
}

impl SchemaMapper for LayoutMapper {
    fn strategy_id(&self) -> &str {
        self.id
    }

    fn sheet_name(&self, kind: TableKind) -> &str {
        self.layout(kind).sheet
    }

    fn to_canonical(&self, raw: &RawTable, kind: TableKind) -> MappedTable {
        map_rows(self.layout(kind), raw)
    }

    fn from_canonical(&self, table: &CanonicalTable) -> RawTable {
        unmap_rows(self.layout(table.kind), table)
    }
}
