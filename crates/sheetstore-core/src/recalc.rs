//! Derived values: budget usage, debt balances, goal progress
//!
//! Pure functions over a snapshot. Running them twice changes nothing the
//! second time, which is what lets callers skip writes when nothing moved.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::config::RecalcSettings;
use crate::mapper::normalize_header;
use crate::schema::{
    CanonicalSnapshot, CanonicalTable, Row, TableKind, Value, BUDGET_STATUSES, DEBT_STATUSES,
    GOAL_STATUSES, TRANSACTION_TYPES,
};

/// A calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Parses `YYYY-MM` (or `MM/YYYY`)
pub fn parse_period(raw: &str) -> Option<Period> {
    let s = raw.trim();
    let (year, month) = match (s.split_once('-'), s.split_once('/')) {
        (Some((y, m)), None) => (y, m),
        (None, Some((m, y))) => (y, m),
        _ => return None,
    };
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if year < 1 || !(1..=12).contains(&month) {
        return None;
    }
    Some(Period { year, month })
}

/// Inputs to recalculation that do not come from the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcContext {
    pub alert_threshold_pct: Decimal,
    /// Period for budgets without their own month
    pub period: Option<Period>,
}

impl Default for RecalcContext {
    fn default() -> Self {
        Self::from(&RecalcSettings::default())
    }
}

impl From<&RecalcSettings> for RecalcContext {
    fn from(settings: &RecalcSettings) -> Self {
        Self {
            alert_threshold_pct: settings.alert_threshold_pct,
            period: settings.period.as_deref().and_then(parse_period),
        }
    }
}

/// Derived tables that must be recomputed after `kind` changes
pub fn dependents(kind: TableKind) -> &'static [TableKind] {
    match kind {
        TableKind::Transactions | TableKind::Budgets => &[TableKind::Budgets],
        TableKind::Debts => &[TableKind::Debts],
        TableKind::Goals => &[TableKind::Goals],
        TableKind::Insights | TableKind::Profile => &[],
    }
}

/// Tables holding derived columns
pub const DERIVED_TABLES: [TableKind; 3] = [TableKind::Budgets, TableKind::Debts, TableKind::Goals];

/// Recomputes every derived table, returning those whose values changed
pub fn recalculate(snapshot: &mut CanonicalSnapshot, ctx: &RecalcContext) -> Vec<TableKind> {
    recalculate_tables(snapshot, &DERIVED_TABLES, ctx)
}

/// Recomputes the listed derived tables, returning those whose values changed
pub fn recalculate_tables(
    snapshot: &mut CanonicalSnapshot,
    kinds: &[TableKind],
    ctx: &RecalcContext,
) -> Vec<TableKind> {
    let mut changed = Vec::new();
    for &kind in kinds {
        let updated = match kind {
            TableKind::Budgets => budgets(snapshot, ctx),
            TableKind::Debts => debts(snapshot.table(kind)),
            TableKind::Goals => goals(snapshot.table(kind)),
            _ => continue,
        };
        if &updated != snapshot.table(kind) {
            snapshot.set_table(updated);
            changed.push(kind);
        }
    }
    changed
}

fn get<'a>(row: &'a Row, kind: TableKind, column: &str) -> Option<&'a Value> {
    kind.column_index(column).and_then(|i| row.values.get(i))
}

fn amount(row: &Row, kind: TableKind, column: &str) -> Decimal {
    get(row, kind, column)
        .and_then(Value::as_decimal)
        .unwrap_or(Decimal::ZERO)
}

fn set(row: &mut Row, kind: TableKind, column: &str, value: Value) {
    if let Some(slot) = kind.column_index(column).and_then(|i| row.values.get_mut(i)) {
        *slot = value;
    }
}

fn row_label(row: &Row) -> String {
    row.id().map_or_else(|| "without ID".to_string(), |id| format!("#{}", id))
}

fn percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .map(|p| p.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}

struct Expense {
    period: Period,
    category: String,
    value: Decimal,
}

fn expenses(transactions: &CanonicalTable) -> Vec<Expense> {
    let kind = TableKind::Transactions;
    let outflow = TRANSACTION_TYPES[1];
    transactions
        .rows
        .iter()
        .filter(|r| get(r, kind, "Tipo").and_then(Value::as_text) == Some(outflow))
        .filter_map(|r| {
            Some(Expense {
                period: Period::of(get(r, kind, "Data")?.as_date()?),
                category: normalize_header(get(r, kind, "Categoria")?.as_text()?),
                value: get(r, kind, "Valor")?.as_decimal()?,
            })
        })
        .collect()
}

fn budgets(snapshot: &CanonicalSnapshot, ctx: &RecalcContext) -> CanonicalTable {
    let kind = TableKind::Budgets;
    let spent = expenses(snapshot.table(TableKind::Transactions));
    let fallback = ctx.period.or_else(|| spent.iter().map(|e| e.period).max());

    let mut table = snapshot.table(kind).clone();
    for row in &mut table.rows {
        let period = get(row, kind, "Mês")
            .and_then(Value::as_text)
            .and_then(parse_period)
            .or(fallback);
        let category = get(row, kind, "Categoria")
            .and_then(Value::as_text)
            .map(normalize_header)
            .unwrap_or_default();

        let gasto = match period {
            Some(p) => spent
                .iter()
                .filter(|e| e.period == p && e.category == category)
                .try_fold(Decimal::ZERO, |acc, e| acc.checked_add(e.value))
                .map(|total| total.round_dp(2)),
            None => Some(Decimal::ZERO),
        };
        let Some(gasto) = gasto else {
            tracing::warn!(
                "Budget {} spending overflows; leaving Gasto and Porcentagem empty",
                row_label(row)
            );
            set(row, kind, "Gasto", Value::Null);
            set(row, kind, "Porcentagem", Value::Null);
            set(row, kind, "Status", Value::from(BUDGET_STATUSES[2]));
            continue;
        };
        let pct = percent(gasto, amount(row, kind, "Limite"));
        let status = if pct > Decimal::ONE_HUNDRED {
            BUDGET_STATUSES[2]
        } else if pct >= ctx.alert_threshold_pct {
            BUDGET_STATUSES[1]
        } else {
            BUDGET_STATUSES[0]
        };

        set(row, kind, "Gasto", Value::Decimal(gasto));
        set(row, kind, "Porcentagem", Value::Decimal(pct));
        set(row, kind, "Status", Value::from(status));
    }
    table
}

fn debts(current: &CanonicalTable) -> CanonicalTable {
    let kind = TableKind::Debts;
    let mut table = current.clone();
    for row in &mut table.rows {
        let total = amount(row, kind, "Valor Total");
        let paid = amount(row, kind, "Valor Pago");
        let Some(balance) = total.checked_sub(paid) else {
            tracing::warn!("Debt {} balance overflows; leaving Saldo empty", row_label(row));
            set(row, kind, "Saldo", Value::Null);
            set(row, kind, "Status", Value::from(DEBT_STATUSES[0]));
            continue;
        };
        let balance = balance.max(Decimal::ZERO).round_dp(2);
        let status = if total > Decimal::ZERO && balance.is_zero() {
            DEBT_STATUSES[1]
        } else {
            DEBT_STATUSES[0]
        };
        set(row, kind, "Saldo", Value::Decimal(balance));
        set(row, kind, "Status", Value::from(status));
    }
    table
}

fn goals(current: &CanonicalTable) -> CanonicalTable {
    let kind = TableKind::Goals;
    let mut table = current.clone();
    for row in &mut table.rows {
        let target = amount(row, kind, "Valor Alvo");
        let saved = amount(row, kind, "Valor Atual");
        let progress = percent(saved, target).min(Decimal::ONE_HUNDRED);
        let status = if target > Decimal::ZERO && saved >= target {
            GOAL_STATUSES[1]
        } else {
            GOAL_STATUSES[0]
        };
        set(row, kind, "Progresso", Value::Decimal(progress));
        set(row, kind, "Status", Value::from(status));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Provenance;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn row(kind: TableKind, id: i64, fields: &[(&str, Value)]) -> Row {
        let mut row = Row::defaults(kind);
        row.values[0] = Value::Integer(id);
        for (name, value) in fields {
            set(&mut row, kind, name, value.clone());
        }
        row
    }

    fn expense(id: i64, day: NaiveDate, categoria: &str, valor: &str) -> Row {
        row(
            TableKind::Transactions,
            id,
            &[
                ("Data", Value::Date(day)),
                ("Tipo", Value::from("Despesa")),
                ("Categoria", Value::from(categoria)),
                ("Valor", Value::Decimal(dec(valor))),
            ],
        )
    }

    fn snapshot() -> CanonicalSnapshot {
        let july = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let june = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let mut s = CanonicalSnapshot::empty(Provenance::new("seq:1"));
        s.table_mut(TableKind::Transactions).rows = vec![
            expense(1, july, "Alimentação", "350.50"),
            expense(2, june, "Alimentação", "999.00"),
            expense(3, july, "Lazer", "90.00"),
        ];
        s.table_mut(TableKind::Budgets).rows = vec![
            row(TableKind::Budgets, 1, &[("Categoria", "alimentacao".into()), ("Limite", dec("1000.00").into())]),
            row(TableKind::Budgets, 2, &[("Categoria", "Lazer".into()), ("Limite", dec("100").into())]),
        ];
        s
    }

    #[test]
    fn test_budget_usage_for_latest_month() {
        let mut s = snapshot();
        let changed = recalculate(&mut s, &RecalcContext::default());
        assert_eq!(changed, vec![TableKind::Budgets]);

        let b = s.table(TableKind::Budgets);
        assert_eq!(b.get(0, "Gasto"), Some(&Value::Decimal(dec("350.50"))));
        assert_eq!(b.get(0, "Porcentagem"), Some(&Value::Decimal(dec("35.05"))));
        assert_eq!(b.get(0, "Status"), Some(&Value::from("OK")));
        assert_eq!(b.get(1, "Porcentagem"), Some(&Value::Decimal(dec("90.00"))));
        assert_eq!(b.get(1, "Status"), Some(&Value::from("Alerta")));
    }

    #[test]
    fn test_budget_month_and_context_period() {
        let mut s = snapshot();
        set(&mut s.table_mut(TableKind::Budgets).rows[0], TableKind::Budgets, "Mês", "2024-06".into());
        recalculate(&mut s, &RecalcContext::default());
        let b = s.table(TableKind::Budgets);
        assert_eq!(b.get(0, "Gasto"), Some(&Value::Decimal(dec("999.00"))));
        assert_eq!(b.get(0, "Status"), Some(&Value::from("Alerta")));

        let mut s = snapshot();
        let ctx = RecalcContext {
            period: parse_period("2024-06"),
            ..RecalcContext::default()
        };
        recalculate(&mut s, &ctx);
        assert_eq!(s.table(TableKind::Budgets).get(1, "Gasto"), Some(&Value::Decimal(Decimal::ZERO)));
    }

    #[test]
    fn test_budget_over_limit_and_zero_limit() {
        let mut s = snapshot();
        set(&mut s.table_mut(TableKind::Budgets).rows[1], TableKind::Budgets, "Limite", dec("50").into());
        s.table_mut(TableKind::Budgets)
            .rows
            .push(row(TableKind::Budgets, 3, &[("Categoria", "Lazer".into())]));
        recalculate(&mut s, &RecalcContext::default());

        let b = s.table(TableKind::Budgets);
        assert_eq!(b.get(1, "Status"), Some(&Value::from("Excedido")));
        assert_eq!(b.get(2, "Porcentagem"), Some(&Value::Decimal(Decimal::ZERO)));
        assert_eq!(b.get(2, "Status"), Some(&Value::from("OK")));
    }

    #[test]
    fn test_debts_and_goals() {
        let mut s = CanonicalSnapshot::empty(Provenance::new("seq:1"));
        s.table_mut(TableKind::Debts).rows = vec![
            row(TableKind::Debts, 1, &[("Valor Total", dec("1200").into()), ("Valor Pago", dec("200").into())]),
            row(TableKind::Debts, 2, &[("Valor Total", dec("500").into()), ("Valor Pago", dec("600").into())]),
        ];
        s.table_mut(TableKind::Goals).rows = vec![
            row(TableKind::Goals, 1, &[("Valor Alvo", dec("3000").into()), ("Valor Atual", dec("1000").into())]),
            row(TableKind::Goals, 2, &[("Valor Alvo", dec("100").into()), ("Valor Atual", dec("150").into())]),
        ];

        let changed = recalculate(&mut s, &RecalcContext::default());
        assert_eq!(changed, vec![TableKind::Debts, TableKind::Goals]);

        let d = s.table(TableKind::Debts);
        assert_eq!(d.get(0, "Saldo"), Some(&Value::Decimal(dec("1000"))));
        assert_eq!(d.get(0, "Status"), Some(&Value::from("Ativa")));
        assert_eq!(d.get(1, "Saldo"), Some(&Value::Decimal(Decimal::ZERO)));
        assert_eq!(d.get(1, "Status"), Some(&Value::from("Quitada")));

        let g = s.table(TableKind::Goals);
        assert_eq!(g.get(0, "Progresso"), Some(&Value::Decimal(dec("33.33"))));
        assert_eq!(g.get(1, "Progresso"), Some(&Value::Decimal(dec("100"))));
        assert_eq!(g.get(1, "Status"), Some(&Value::from("Concluída")));
    }

    #[test]
    fn test_overflowing_sums_leave_cells_empty() {
        let july = NaiveDate::from_ymd_opt(2024, 7, 10).unwrap();
        let mut s = snapshot();
        s.table_mut(TableKind::Transactions).rows = vec![
            expense(1, july, "Lazer", "79228162514264337593543950335"),
            expense(2, july, "Lazer", "79228162514264337593543950335"),
        ];
        s.table_mut(TableKind::Debts).rows = vec![row(
            TableKind::Debts,
            1,
            &[
                ("Valor Total", Decimal::MAX.into()),
                ("Valor Pago", Decimal::MIN.into()),
            ],
        )];

        let ctx = RecalcContext::default();
        recalculate(&mut s, &ctx);
        let b = s.table(TableKind::Budgets);
        assert_eq!(b.get(1, "Gasto"), Some(&Value::Null));
        assert_eq!(b.get(1, "Porcentagem"), Some(&Value::Null));
        assert_eq!(b.get(1, "Status"), Some(&Value::from("Excedido")));
        assert_eq!(b.get(0, "Gasto"), Some(&Value::Decimal(Decimal::ZERO)));

        let d = s.table(TableKind::Debts);
        assert_eq!(d.get(0, "Saldo"), Some(&Value::Null));
        assert_eq!(d.get(0, "Status"), Some(&Value::from("Ativa")));

        assert!(recalculate(&mut s, &ctx).is_empty());
    }

    #[test]
    fn test_recalculation_is_idempotent() {
        let mut s = snapshot();
        let ctx = RecalcContext::default();
        assert!(!recalculate(&mut s, &ctx).is_empty());
        let once = s.clone();
        assert!(recalculate(&mut s, &ctx).is_empty());
        assert_eq!(s, once);
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("2024-07"), Some(Period { year: 2024, month: 7 }));
        assert_eq!(parse_period("07/2024"), Some(Period { year: 2024, month: 7 }));
        assert_eq!(parse_period("2024-13"), None);
        assert_eq!(parse_period("julho"), None);
        assert_eq!(Period { year: 2024, month: 7 }.to_string(), "2024-07");
    }

    #[test]
    fn test_dependents() {
        assert_eq!(dependents(TableKind::Transactions), &[TableKind::Budgets]);
        assert!(dependents(TableKind::Profile).is_empty());
    }
}
