//! LivePivot - In-Memory Columnar Tables with Live Pivot Views
//!
//! Typed columnar tables with upsert, key removal and ring-buffer limits,
//! and views that group, split, aggregate, filter, sort and project a
//! table's rows. Views are kept current on every table mutation and notify
//! their observers synchronously before the mutating call returns.

pub mod error;
pub mod column;
pub mod schema;
pub mod dataset;
pub mod changeset;
pub mod callbacks;
pub mod store;
pub mod filter;
pub mod aggregate;
pub mod config;
pub mod pipeline;
pub mod serialize;
pub mod table;
pub mod view;

pub use error::{Error, Result};
pub use column::{Column, ColumnType, ColumnValue};
pub use schema::{infer_column_type, Schema};
pub use dataset::{Dataset, Record, Tabular};
pub use changeset::{Changeset, PortId, TableChange};
pub use callbacks::{CallbackId, UpdateEvent};
pub use store::{TableOptions, TableSnapshot};
pub use filter::{Filter, FilterOp, Operand};
pub use aggregate::Aggregate;
pub use config::{SortKey, SortOrder, ViewConfig};
pub use pipeline::{materialize, row_path_column, ViewOutput, SPLIT_SEPARATOR};
pub use serialize::{Columns, Frame, Matrix};
pub use table::Table;
pub use view::View;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&UpdateEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &UpdateEvent| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_pivot_scenario() {
        init_logging();
        let table = Table::new(
            "scenario",
            Dataset::from_columns(vec![
                ("a", vec![1.into(), 2.into(), 3.into()]),
                ("b", vec!["x".into(), "y".into(), "z".into()]),
            ]),
            TableOptions::new(),
        )
        .unwrap();
        let view = table
            .view(ViewConfig::new().row_pivot("b").aggregate("a", Aggregate::Sum))
            .unwrap();

        assert_eq!(view.num_rows().unwrap(), 4);
        let records = view.to_records().unwrap();
        assert_eq!(records[0].get("a"), Some(&ColumnValue::Integer(6)));
        assert_eq!(view.row_path(0).unwrap(), Some(vec![]));
        for (row, (key, a)) in [("x", 1), ("y", 2), ("z", 3)].into_iter().enumerate() {
            assert_eq!(records[row + 1].get("a"), Some(&ColumnValue::Integer(a)));
            assert_eq!(
                records[row + 1].get(&row_path_column(0)),
                Some(&ColumnValue::from(key))
            );
        }
    }

    #[test]
    fn test_upsert_scenario() {
        init_logging();
        let table = Table::new(
            "keyed",
            vec![Record::new().with("k", "r1").with("v", 1)],
            TableOptions::new().index("k"),
        )
        .unwrap();
        table.update(vec![Record::new().with("k", "r1").with("v", 5)]).unwrap();
        assert_eq!(table.size().unwrap(), 1);
        assert_eq!(table.snapshot().unwrap().get_value(0, "v"), Some(ColumnValue::Integer(5)));
    }

    #[test]
    fn test_one_notification_per_update() {
        init_logging();
        let table = Table::new(
            "ticks",
            vec![Record::new().with("x", 0)],
            TableOptions::new(),
        )
        .unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let (count, callback) = counter();
        view.on_update(callback).unwrap();

        for i in 1..=5 {
            table.update(vec![Record::new().with("x", i)]).unwrap();
            // observed before update() returned
            assert_eq!(count.load(Ordering::SeqCst), i as usize);
            assert_eq!(view.num_rows().unwrap(), i as usize + 1);
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_remove_update_stops_notifications() {
        init_logging();
        let table = Table::new("t", vec![Record::new().with("x", 0)], TableOptions::new()).unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let (count, callback) = counter();
        let id = view.on_update(callback).unwrap();

        table.update(vec![Record::new().with("x", 1)]).unwrap();
        table.update(vec![Record::new().with("x", 2)]).unwrap();
        assert!(view.remove_update(id));
        table.update(vec![Record::new().with("x", 3)]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // unknown handles are a no-op
        assert!(!view.remove_update(id));
    }

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        init_logging();
        let table = Table::new("t", vec![Record::new().with("x", 0)], TableOptions::new()).unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let sink = Arc::clone(&order);
            view.on_update(move |_| sink.lock().unwrap().push(tag)).unwrap();
        }
        table.update(vec![Record::new().with("x", 1)]).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_ring_buffer_scenario() {
        init_logging();
        let schema = Schema::new(vec![("n".to_string(), ColumnType::Integer)]).unwrap();
        let table = Table::from_schema("ring", schema, TableOptions::new().limit(3)).unwrap();
        for n in 0..7 {
            table.update(vec![Record::new().with("n", n)]).unwrap();
        }
        assert_eq!(table.size().unwrap(), 3);
        let snapshot = table.snapshot().unwrap();
        let values: Vec<ColumnValue> = (0..3).filter_map(|i| snapshot.get_value(i, "n")).collect();
        assert_eq!(values, vec![6.into(), 4.into(), 5.into()]);

        // the next append overwrites position 7 mod 3
        table.update(vec![Record::new().with("n", 7)]).unwrap();
        assert_eq!(table.snapshot().unwrap().get_value(1, "n"), Some(ColumnValue::Integer(7)));
    }

    #[test]
    fn test_identity_view() {
        init_logging();
        let table = Table::new(
            "id",
            vec![
                Record::new().with("a", 1).with("b", "x"),
                Record::new().with("a", ColumnValue::Null).with("b", "y"),
            ],
            TableOptions::new(),
        )
        .unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        assert_eq!(view.schema().unwrap(), table.schema().unwrap());
        assert_eq!(view.to_records().unwrap(), table.snapshot().unwrap().to_records());
    }

    #[test]
    fn test_records_columns_round_trip() {
        init_logging();
        let table = Table::new(
            "rt",
            Dataset::from_columns(vec![
                ("g", vec!["a".into(), "b".into(), "a".into()]),
                ("side", vec!["buy".into(), "sell".into(), "buy".into()]),
                ("v", vec![1.5.into(), ColumnValue::Null, 2.0.into()]),
            ]),
            TableOptions::new(),
        )
        .unwrap();
        let view = table
            .view(ViewConfig::new().row_pivot("g").column_pivot("side"))
            .unwrap();

        let records = view.to_records().unwrap();
        let rebuilt: Columns = view
            .column_paths()
            .unwrap()
            .into_iter()
            .map(|name| {
                let values = records
                    .iter()
                    .map(|r| r.get(&name).cloned().unwrap_or(ColumnValue::Null))
                    .collect();
                (name, values)
            })
            .collect();
        assert_eq!(rebuilt, view.to_columns().unwrap());
    }

    #[test]
    fn test_release_semantics() {
        init_logging();
        let table = Table::new("rel", vec![Record::new().with("x", 1)], TableOptions::new()).unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let deleted = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&deleted);
        view.on_delete(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        view.delete().unwrap();
        view.delete().unwrap();
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert!(matches!(view.to_columns(), Err(Error::StaleView(_))));

        table.delete().unwrap();
        assert!(matches!(table.delete(), Err(Error::InUse(_))));
        assert!(matches!(table.columns(), Err(Error::StaleView(_))));
    }

    #[test]
    fn test_failed_update_leaves_views_unchanged() {
        init_logging();
        let table = Table::new(
            "atomic",
            vec![Record::new().with("k", 1).with("v", 10)],
            TableOptions::new().index("k"),
        )
        .unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let (count, callback) = counter();
        view.on_update(callback).unwrap();

        let result = table.update(vec![
            Record::new().with("k", 2).with("v", 20),
            Record::new().with("k", 3).with("v", "not a number"),
        ]);
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
        assert_eq!(table.size().unwrap(), 1);
        assert_eq!(view.num_rows().unwrap(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nested_update_from_observer() {
        init_logging();
        let table = Table::new("nested", vec![Record::new().with("x", 0)], TableOptions::new()).unwrap();
        let view = table.view(ViewConfig::new()).unwrap();
        let echo_port = table.make_port();

        let ports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ports);
        let echoed = Arc::new(AtomicBool::new(false));
        let inner = table.clone();
        view.on_update(move |event| {
            sink.lock().unwrap().push(event.port_id);
            if !echoed.swap(true, Ordering::SeqCst) {
                inner
                    .update_with_port(vec![Record::new().with("x", 99)], echo_port)
                    .unwrap();
            }
        })
        .unwrap();

        table.update(vec![Record::new().with("x", 1)]).unwrap();
        assert_eq!(table.size().unwrap(), 3);
        assert_eq!(view.num_rows().unwrap(), 3);
        assert_eq!(*ports.lock().unwrap(), vec![PortId::default(), echo_port]);
    }

    #[test]
    fn test_concurrent_writers() {
        init_logging();
        let schema = Schema::from_tokens(&[("id", "int"), ("who", "string")]).unwrap();
        let table = Table::from_schema("shared", schema, TableOptions::new().index("id")).unwrap();
        let view = table.view(ViewConfig::new().row_pivot("who")).unwrap();

        std::thread::scope(|scope| {
            for writer in 0..4i64 {
                let table = table.clone();
                scope.spawn(move || {
                    let port = table.make_port();
                    for i in 0..25i64 {
                        let record = Record::new().with("id", writer * 100 + i).with("who", format!("w{}", writer));
                        table.update_with_port(vec![record], port).unwrap();
                    }
                });
            }
        });

        assert_eq!(table.size().unwrap(), 100);
        // total row plus one group per writer
        assert_eq!(view.num_rows().unwrap(), 5);
        assert_eq!(view.get_min_max("id").unwrap().map(|(_, hi)| hi), Some(ColumnValue::Integer(7800)));
    }

    #[test]
    fn test_text_inputs_and_json_config() {
        init_logging();
        let csv = "sym,qty,day\nAAPL,10,2024-01-02\nMSFT,5,2024-01-03\nAAPL,7,2024-01-04\n";
        let table = Table::new("csv", Dataset::from_csv(csv).unwrap(), TableOptions::new()).unwrap();
        assert_eq!(table.schema().unwrap().get_column_type("day"), Some(ColumnType::Date));

        let config = ViewConfig::from_json(
            r#"{"row_pivots":["sym"],"aggregates":{"qty":"sum"},"columns":["qty"],"sort":[["qty","desc"]]}"#,
        )
        .unwrap();
        let view = table.view(config).unwrap();
        assert_eq!(
            view.to_csv().unwrap(),
            "__ROW_PATH_0__,qty\n,22\nAAPL,17\nMSFT,5\n"
        );

        table
            .update(Dataset::from_json(r#"[{"sym":"MSFT","qty":20,"day":"2024-01-05"}]"#).unwrap())
            .unwrap();
        assert_eq!(
            view.to_json().unwrap(),
            r#"[{"__ROW_PATH_0__":null,"qty":42},{"__ROW_PATH_0__":"MSFT","qty":25},{"__ROW_PATH_0__":"AAPL","qty":17}]"#
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn int_table(values: &[Option<i64>], options: TableOptions) -> Table {
            let column: Vec<ColumnValue> = values.iter().map(|v| ColumnValue::from(*v)).collect();
            let ids: Vec<ColumnValue> = (0..values.len() as i64).map(ColumnValue::from).collect();
            Table::new(
                "prop",
                Dataset::from_columns(vec![("id", ids), ("v", column)]),
                options,
            )
            .unwrap()
        }

        proptest! {
            /// Inferring a schema twice from the same dataset gives the same result
            #[test]
            fn prop_inference_deterministic(
                ints in prop::collection::vec(prop::option::of(-1000i64..1000), 1..20),
                use_float in any::<bool>()
            ) {
                let values: Vec<ColumnValue> = ints
                    .iter()
                    .enumerate()
                    .map(|(i, v)| match v {
                        Some(n) if use_float && i == 0 => ColumnValue::Float(*n as f64 + 0.5),
                        other => ColumnValue::from(*other),
                    })
                    .collect();
                let data = Dataset::from_columns(vec![("v", values)]);
                let first = Table::new("a", data.clone(), TableOptions::new()).unwrap();
                let second = Table::new("b", data, TableOptions::new()).unwrap();
                prop_assert_eq!(first.schema().unwrap(), second.schema().unwrap());
            }

            /// Matching keys never change the size; new keys add exactly one row each
            #[test]
            fn prop_upsert_size_law(
                initial in 1usize..10,
                keys in prop::collection::vec(0i64..20, 0..15)
            ) {
                let table = int_table(&vec![Some(0); initial], TableOptions::new().index("id"));
                let mut known: std::collections::HashSet<i64> = (0..initial as i64).collect();
                for key in keys {
                    let before = table.size().unwrap();
                    table.update(vec![Record::new().with("id", key).with("v", key)]).unwrap();
                    let expected = if known.insert(key) { before + 1 } else { before };
                    prop_assert_eq!(table.size().unwrap(), expected);
                }
                let before = table.size().unwrap();
                table.update(vec![Record::new().with("v", 1)]).unwrap();
                prop_assert_eq!(table.size().unwrap(), before + 1);
            }

            /// After N appends to a table limited to L rows, position p holds the
            /// latest value v < N with v mod L == p
            #[test]
            fn prop_ring_buffer_law(limit in 1usize..8, appends in 0usize..30) {
                let schema = Schema::new(vec![("n".to_string(), ColumnType::Integer)]).unwrap();
                let table = Table::from_schema("ring", schema, TableOptions::new().limit(limit)).unwrap();
                for n in 0..appends {
                    table.update(vec![Record::new().with("n", n as i64)]).unwrap();
                }
                prop_assert_eq!(table.size().unwrap(), appends.min(limit));
                let snapshot = table.snapshot().unwrap();
                for p in 0..appends.min(limit) {
                    let latest = (0..appends).filter(|v| v % limit == p).max().unwrap();
                    prop_assert_eq!(snapshot.get_value(p, "n"), Some(ColumnValue::Integer(latest as i64)));
                }
            }

            /// Removals never change which rows a limited table evicts next:
            /// the retained keys are always the newest `limit` still present
            #[test]
            fn prop_ring_buffer_with_removals(
                limit in 1usize..6,
                ops in prop::collection::vec((any::<bool>(), 0usize..8), 0..40)
            ) {
                let schema = Schema::from_tokens(&[("id", "integer")]).unwrap();
                let table = Table::from_schema(
                    "ring",
                    schema,
                    TableOptions::new().index("id").limit(limit),
                )
                .unwrap();
                let mut model: std::collections::VecDeque<i64> = std::collections::VecDeque::new();
                let mut next = 0i64;
                for (append, pick) in ops {
                    if append || model.is_empty() {
                        table.update(vec![Record::new().with("id", next)]).unwrap();
                        model.push_back(next);
                        if model.len() > limit {
                            model.pop_front();
                        }
                        next += 1;
                    } else {
                        let key = model.remove(pick % model.len()).unwrap();
                        prop_assert_eq!(table.remove(vec![key]).unwrap(), 1);
                    }
                    let mut retained: Vec<i64> = table
                        .snapshot()
                        .unwrap()
                        .column("id")
                        .unwrap()
                        .iter()
                        .filter_map(|v| v.as_i64())
                        .collect();
                    retained.sort_unstable();
                    let expected: Vec<i64> = model.iter().copied().collect();
                    prop_assert_eq!(retained, expected);
                }
            }

            /// An unconfigured view reproduces the table
            #[test]
            fn prop_identity_law(values in prop::collection::vec(prop::option::of(-50i64..50), 0..30)) {
                let table = int_table(&values, TableOptions::new());
                let view = table.view(ViewConfig::new()).unwrap();
                prop_assert_eq!(view.to_records().unwrap(), table.snapshot().unwrap().to_records());
            }

            /// A live view always matches a fresh run of the pipeline
            #[test]
            fn prop_incremental_matches_full(
                values in prop::collection::vec(prop::option::of(-50i64..50), 1..20),
                ops in prop::collection::vec((0i64..30, prop::option::of(-50i64..50), any::<bool>()), 0..20),
                row_pivot in any::<bool>(),
                column_pivot in any::<bool>(),
                descending in any::<bool>()
            ) {
                let table = int_table(&values, TableOptions::new().index("id").limit(25));
                let sort = if descending { SortKey::descending("v") } else { SortKey::ascending("v") };
                let mut config = ViewConfig::new()
                    .filter(Filter::unary("v", FilterOp::IsNotNull))
                    .sort(sort);
                if row_pivot {
                    config = config.row_pivot("v");
                }
                if column_pivot {
                    config = config.column_pivot("v");
                }
                let view = table.view(config.clone()).unwrap();

                for (key, value, remove) in ops {
                    if remove {
                        table.remove(vec![key]).unwrap();
                    } else {
                        table.update(vec![Record::new().with("id", key).with("v", value)]).unwrap();
                    }
                    let expected = materialize(&table.snapshot().unwrap(), &config).unwrap();
                    prop_assert_eq!(view.output().unwrap().to_records(), expected.to_records());
                }
            }
        }
    }
}
