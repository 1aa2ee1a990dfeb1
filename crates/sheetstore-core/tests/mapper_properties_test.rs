//! Property tests for layout mapping and ID assignment
//!
//! Whatever the raw cells hold, mapped rows keep the canonical shape, and every
//! registered strategy stores and reloads canonical rows without losing IDs.

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

use sheetstore_core::backend::MemoryDocument;
use sheetstore_core::mapper::{
    strategies, strategy_ids, LayoutMapper, RawColumn, TableLayout, BANK_STATEMENT_STRATEGY,
    IDENTITY_STRATEGY, LEGACY_PTBR_STRATEGY,
};
use sheetstore_core::schema::ColumnType;
use sheetstore_core::{
    resolve_strategy, CanonicalSnapshot, CanonicalTable, DataStore, LeaseGuard, NullCache,
    Operation, Provenance, RawTable, Row, RowInput, SchemaMapper, StoreConfig, TableKind, Value,
    Workbook,
};

fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[0-9]{1,4}",
        "-?[0-9]{1,3}[.,][0-9]{2}",
        "\\([0-9]{1,3},[0-9]{2}\\)",
        "20[0-9]{2}-0[1-9]-[12][0-9]",
        "[0-3][0-9]/0[1-9]/20[0-9]{2}",
        "[a-zA-Zçãé ]{0,10}",
        Just("Despesa".to_string()),
        Just("receita".to_string()),
        Just("Quitada".to_string()),
    ]
}

fn raw_table(headers: Vec<String>) -> impl Strategy<Value = RawTable> {
    let width = headers.len();
    prop::collection::vec(prop::collection::vec(cell(), width), 0..12)
        .prop_map(move |rows| RawTable {
            headers: headers.clone(),
            rows,
        })
}

fn table_kind() -> impl Strategy<Value = TableKind> {
    (0..TableKind::ALL.len()).prop_map(|i| TableKind::ALL[i])
}

fn fits(ty: ColumnType, value: &Value) -> bool {
    match (ty, value) {
        (_, Value::Null) => true,
        (ColumnType::Text, Value::Text(_)) => true,
        (ColumnType::Integer, Value::Integer(_)) => true,
        (ColumnType::Decimal, Value::Decimal(_)) => true,
        (ColumnType::Date, Value::Date(_)) => true,
        (ColumnType::Enum(variants), Value::Text(s)) => variants.contains(&s.as_str()),
        _ => false,
    }
}

fn identity_headers(kind: TableKind) -> Vec<String> {
    kind.columns().iter().map(|c| c.name.to_string()).collect()
}

proptest! {
    #[test]
    fn prop_identity_rows_keep_canonical_shape(
        (kind, raw) in table_kind().prop_flat_map(|k| (Just(k), raw_table(identity_headers(k))))
    ) {
        let mapper = resolve_strategy(IDENTITY_STRATEGY);
        let mapped = mapper.to_canonical(&raw, kind);
        let columns = kind.columns();

        prop_assert!(mapped.table.len() <= raw.rows.len());
        let mut ids = Vec::new();
        for row in &mapped.table.rows {
            prop_assert_eq!(row.values.len(), columns.len());
            for (def, value) in columns.iter().zip(&row.values) {
                prop_assert!(fits(def.ty, value), "{} = {:?}", def.name, value);
            }
            let id = row.id();
            prop_assert!(matches!(id, Some(n) if n > 0));
            ids.push(id);
        }
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        prop_assert_eq!(unique.len(), ids.len());

        for warning in &mapped.warnings {
            prop_assert_eq!(warning.table, kind);
            prop_assert!(warning.row >= 1 && warning.row <= raw.rows.len());
        }
    }

    #[test]
    fn prop_bank_statement_amounts_are_unsigned(
        raw in raw_table(vec!["Date".into(), "Description".into(), "Category".into(), "Amount".into()])
    ) {
        let mapper = resolve_strategy(BANK_STATEMENT_STRATEGY);
        let mapped = mapper.to_canonical(&raw, TableKind::Transactions);

        for index in 0..mapped.table.len() {
            if let Some(Value::Decimal(valor)) = mapped.table.get(index, "Valor") {
                prop_assert!(!valor.is_sign_negative() || valor.is_zero());
            }
            let tipo = mapped.table.get(index, "Tipo");
            prop_assert!(matches!(
                tipo,
                Some(Value::Null) | Some(Value::Text(_))
            ));
            if let Some(Value::Text(t)) = tipo {
                prop_assert!(t == "Receita" || t == "Despesa", "{}", t);
            }
        }
    }

    #[test]
    fn prop_mapped_tables_render_back_to_known_headers(
        raw in raw_table(vec!["Data Lançamento".into(), "Histórico".into(), "Categoria".into(), "Tipo".into(), "Valor (R$)".into()])
    ) {
        let mapper = resolve_strategy(LEGACY_PTBR_STRATEGY);
        let mapped = mapper.to_canonical(&raw, TableKind::Transactions);
        let rendered = mapper.from_canonical(&mapped.table);

        prop_assert_eq!(rendered.rows.len(), mapped.table.len());
        for row in &rendered.rows {
            prop_assert_eq!(row.len(), rendered.headers.len());
        }
    }
}

fn value_for(ty: ColumnType) -> BoxedStrategy<Value> {
    match ty {
        ColumnType::Text => "[a-zA-Zçãé]{1,8}".prop_map(Value::Text).boxed(),
        ColumnType::Integer => (1i64..100_000).prop_map(Value::Integer).boxed(),
        ColumnType::Decimal => (1i64..1_000_000_000, 0u32..=3)
            .prop_map(|(n, scale)| Value::Decimal(Decimal::new(n, scale)))
            .boxed(),
        ColumnType::Date => (0u64..20_000)
            .prop_map(|d| Value::Date(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap() + Days::new(d)))
            .boxed(),
        ColumnType::Enum(variants) => prop::sample::select(variants.to_vec())
            .prop_map(Value::from)
            .boxed(),
    }
}

/// Rows with distinct positive IDs and a valid, non-empty value in every column
fn canonical_table(kind: TableKind) -> impl Strategy<Value = CanonicalTable> {
    let row = kind.columns()[1..]
        .iter()
        .map(|c| value_for(c.ty))
        .collect::<Vec<_>>();
    prop::collection::btree_set(1i64..10_000, 0..8)
        .prop_flat_map(move |ids| {
            let rows = vec![row.clone(); ids.len()];
            (Just(ids), rows)
        })
        .prop_map(move |(ids, rows)| {
            let mut table = CanonicalTable::new(kind);
            for (id, mut values) in ids.into_iter().zip(rows) {
                values.insert(0, Value::Integer(id));
                table.rows.push(Row { values });
            }
            table
        })
}

fn canonical_snapshot() -> impl Strategy<Value = CanonicalSnapshot> {
    let tables: Vec<_> = TableKind::ALL.into_iter().map(canonical_table).collect();
    tables.prop_map(|tables| {
        let mut snapshot = CanonicalSnapshot::empty(Provenance::new("seq:0"));
        for table in tables {
            snapshot.set_table(table);
        }
        snapshot
    })
}

/// Every registered strategy with its layouts
fn registered_layouts() -> Vec<(&'static str, LayoutMapper)> {
    let layouts = vec![
        (IDENTITY_STRATEGY, strategies::identity()),
        (BANK_STATEMENT_STRATEGY, strategies::bank_statement()),
        (LEGACY_PTBR_STRATEGY, strategies::legacy_ptbr()),
    ];
    let mut ids: Vec<_> = layouts.iter().map(|(id, _)| *id).collect();
    let mut registered = strategy_ids();
    ids.sort_unstable();
    registered.sort_unstable();
    assert_eq!(ids, registered);
    layouts
}

fn is_stored(layout: &TableLayout, column: &str) -> bool {
    layout.raw.iter().any(|rc| match *rc {
        RawColumn::Canonical { column: c, .. } => c == column,
        RawColumn::SignedAmount { amount, kind, .. } => amount == column || kind == column,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_strategy_round_trips_stored_columns(snapshot in canonical_snapshot()) {
        for (id, mapper) in registered_layouts() {
            let mut workbook = Workbook::new();
            mapper.store_tables(&mut workbook, &snapshot, &TableKind::ALL);
            let loaded = mapper.load_snapshot(&workbook, Provenance::new("seq:1"));
            prop_assert!(loaded.warnings().is_empty(), "{}: {:?}", id, loaded.warnings());

            for kind in TableKind::ALL {
                let layout = mapper.layout(kind);
                let (before, after) = (snapshot.table(kind), loaded.table(kind));
                prop_assert_eq!(before.len(), after.len(), "{} {}", id, kind);
                for (b, a) in before.rows.iter().zip(&after.rows) {
                    prop_assert_eq!(b.id(), a.id(), "{} {}", id, kind);
                    for (col, (bv, av)) in kind.columns().iter().zip(b.values.iter().zip(&a.values)) {
                        if is_stored(layout, col.name) {
                            prop_assert_eq!(bv, av, "{} {}.{}", id, kind, col.name);
                        } else {
                            prop_assert_eq!(av, &col.default_value(), "{} {}.{}", id, kind, col.name);
                        }
                    }
                }
            }

            // A second pass changes nothing
            let mut again = Workbook::new();
            mapper.store_tables(&mut again, &loaded, &TableKind::ALL);
            prop_assert_eq!(&again, &workbook, "{}", id);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_deletes_keep_ids_and_inserts_never_reuse_them(
        ops in prop::collection::vec(prop::option::of(any::<prop::sample::Index>()), 1..14)
    ) {
        for id in strategy_ids() {
            let doc = Arc::new(MemoryDocument::from_workbook(&Workbook::new()).unwrap());
            let config = StoreConfig::default();
            let store = DataStore::new(
                "prop",
                doc,
                resolve_strategy(id),
                Arc::new(NullCache),
                Arc::new(LeaseGuard::new(config.lease.max_hold())),
                &config,
            );

            let (issued, live, read) = tokio_test::block_on(async {
                let mut issued = Vec::new();
                let mut live: Vec<i64> = Vec::new();
                for op in &ops {
                    match op {
                        Some(pick) if !live.is_empty() => {
                            let victim = live.remove(pick.index(live.len()));
                            store
                                .mutate(TableKind::Transactions, Operation::Delete { id: victim })
                                .await
                                .unwrap();
                        }
                        _ => {
                            let mut fields = RowInput::new();
                            fields.insert("Data".into(), Value::from("2024-07-10"));
                            fields.insert("Tipo".into(), Value::from("Despesa"));
                            fields.insert("Categoria".into(), Value::from("Lazer"));
                            fields.insert("Descrição".into(), Value::from("cinema"));
                            fields.insert("Valor".into(), Value::from("32,00"));
                            let outcome = store
                                .mutate(TableKind::Transactions, Operation::Insert(fields))
                                .await
                                .unwrap();
                            issued.push(outcome.id);
                            live.push(outcome.id);
                        }
                    }
                }
                let read: Vec<i64> = store
                    .read(TableKind::Transactions)
                    .await
                    .unwrap()
                    .rows
                    .iter()
                    .filter_map(|r| r.id())
                    .collect();
                (issued, live, read)
            });

            prop_assert!(issued.windows(2).all(|w| w[0] < w[1]), "{}: {:?}", id, issued);
            prop_assert_eq!(read, live, "{}", id);
        }
    }
}
