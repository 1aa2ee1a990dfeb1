//! Built-in strategies
//!
//! | id               | what differs from canonical                               |
//! |------------------|-----------------------------------------------------------|
//! | `identity`       | nothing                                                   |
//! | `bank_statement` | transactions in `Extrato`, one signed `Amount` column     |
//! | `legacy_ptbr`    | `Lançamentos` and `Orçamento` sheets in pt-BR formats     |
//!
//! Imported sheets rarely carry IDs. Those layouts keep a trailing `ID` column:
//! a sheet without it gets IDs in row order on first read, and the first write
//! stores them so later deletes never renumber the remaining rows.

use super::coerce::NumberLocale;
use super::layout::{ColumnSource, LayoutMapper, RawColumn, TableLayout};
use super::{BANK_STATEMENT_STRATEGY, IDENTITY_STRATEGY, LEGACY_PTBR_STRATEGY};
use crate::schema::{TableKind, ID_COLUMN};

pub fn identity() -> LayoutMapper {
    LayoutMapper::new(IDENTITY_STRATEGY)
}

/// Bank export: `Date, Description, Category, Amount` with outflows negative
pub fn bank_statement() -> LayoutMapper {
    let transactions = TableLayout::new(TableKind::Transactions, "Extrato")
        .stored("Data", "Date", &["Date", "Data"])
        .stored("Descrição", "Description", &["Description", "Descrição"])
        .stored("Categoria", "Category", &["Category", "Categoria"])
        .source("Tipo", ColumnSource::SignOf(&["Amount", "Valor"]))
        .source("Valor", ColumnSource::AbsoluteOf(&["Amount", "Valor"]))
        .emit(RawColumn::SignedAmount {
            header: "Amount",
            amount: "Valor",
            kind: "Tipo",
        })
        .stored(ID_COLUMN, "ID", &["ID"]);

    LayoutMapper::new(BANK_STATEMENT_STRATEGY).with_layout(transactions)
}

/// Household workbook kept before the canonical sheets existed
pub fn legacy_ptbr() -> LayoutMapper {
    let transactions = TableLayout::new(TableKind::Transactions, "Lançamentos")
        .locale(NumberLocale::PtBr)
        .stored("Data", "Data Lançamento", &["Data Lançamento", "Data"])
        .stored("Descrição", "Histórico", &["Histórico", "Descrição"])
        .stored("Categoria", "Categoria", &["Categoria"])
        .stored("Tipo", "Tipo", &["Tipo"])
        .stored("Valor", "Valor (R$)", &["Valor (R$)", "Valor"])
        .stored(ID_COLUMN, "ID", &["ID"]);

    // Spent, percentage and status are recomputed, never stored here
    let budgets = TableLayout::new(TableKind::Budgets, "Orçamento")
        .locale(NumberLocale::PtBr)
        .stored("Categoria", "Categoria", &["Categoria"])
        .stored("Limite", "Limite Mensal", &["Limite Mensal", "Limite"])
        .stored(ID_COLUMN, "ID", &["ID"]);

    LayoutMapper::new(LEGACY_PTBR_STRATEGY)
        .with_layout(transactions)
        .with_layout(budgets)
}
