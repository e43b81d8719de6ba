//! Disabling any single rule never changes a query's results or the
//! documents it writes.

mod common;

use common::{database, fill, run, sorted};
use proptest::prelude::*;
use tessera_common::Value;
use tessera_core::{MemoryStorage, StorageEngine};
use tessera_engine::query::plan::AggregateFunction;
use tessera_engine::query::{BinaryOp, ComparisonOp, ExecutionPlan, Expression, Function, Optimizer};
use tessera_engine::{Config, Database, PlanBuilder, QueryOptions};

fn n(var: tessera_common::VariableId) -> Expression {
    Expression::variable(var).attribute("n")
}

/// `FOR d IN docs LET x = d.n * 2 FILTER x > 4 FILTER true SORT d.n SORT d.n RETURN x`
fn filtered_calculation() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    let x = b
        .let_("x", Expression::binary(BinaryOp::Mul, n(d), Expression::literal(2)))
        .unwrap();
    b.filter(Expression::compare(ComparisonOp::Gt, Expression::variable(x), Expression::literal(4)))
        .unwrap();
    b.filter(Expression::literal(true)).unwrap();
    b.sort_by(n(d), true).unwrap();
    b.sort_by(n(d), true).unwrap();
    b.return_(x).unwrap();
    b.build().unwrap()
}

/// `FOR a IN docs FOR b IN other FILTER a.n == b.n RETURN [a.n, b.m]`
fn join() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let a = b.for_collection("a", "docs").unwrap();
    let o = b.for_collection("b", "other").unwrap();
    b.filter(n(a).equals(n(o))).unwrap();
    let pair = b
        .let_("pair", Expression::array(vec![n(a), Expression::variable(o).attribute("m")]))
        .unwrap();
    b.return_(pair).unwrap();
    b.build().unwrap()
}

/// `FOR o IN other LET c = LENGTH((FOR d IN docs FILTER d.n > o.m RETURN d)) RETURN c`
fn correlated_count() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let o = b.for_collection("o", "other").unwrap();
    let sub = b
        .subquery("sub", |b| {
            let d = b.for_collection("d", "docs")?;
            b.filter(Expression::compare(
                ComparisonOp::Gt,
                n(d),
                Expression::variable(o).attribute("m"),
            ))?;
            Ok(d)
        })
        .unwrap();
    let count = b
        .let_("count", Expression::call(Function::Length, vec![Expression::variable(sub)]))
        .unwrap();
    b.return_(count).unwrap();
    b.build().unwrap()
}

/// `FOR d IN docs FILTER d.n >= 1 SORT d.n DESC LIMIT 1, 3 RETURN d.n`
fn sorted_page() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    b.filter(Expression::compare(ComparisonOp::Ge, n(d), Expression::literal(1)))
        .unwrap();
    b.sort_by(n(d), false).unwrap();
    b.limit(1, 3).unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

/// `FOR d IN docs COLLECT g = d.n % 3 AGGREGATE c = COUNT(), s = SUM(d.n) RETURN [g, c, s]`
fn grouped() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    let key = b
        .calculate(Expression::binary(BinaryOp::Mod, n(d), Expression::literal(3)))
        .unwrap();
    let input = b.calculate(n(d)).unwrap();
    let outputs = b
        .collect(
            &[("g", key)],
            &[("c", AggregateFunction::Count, None), ("s", AggregateFunction::Sum, Some(input))],
            None,
        )
        .unwrap();
    let row = b
        .let_("row", Expression::array(outputs.into_iter().map(Expression::variable).collect()))
        .unwrap();
    b.return_(row).unwrap();
    b.build().unwrap()
}

/// `FOR d IN docs FILTER 1 IN d.tags RETURN d.n`
fn tag_lookup() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    b.filter(Expression::compare(
        ComparisonOp::In,
        Expression::literal(1),
        Expression::variable(d).attribute("tags"),
    ))
    .unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

const SHAPES: [fn() -> ExecutionPlan; 6] =
    [filtered_calculation, join, correlated_count, sorted_page, grouped, tag_lookup];

fn db(ns: &[i64]) -> Database {
    let storage = MemoryStorage::new();
    let docs = ns
        .iter()
        .map(|v| {
            Value::map([
                ("n", Value::Int64(*v)),
                ("tags", Value::List(vec![Value::Int64(v % 2), Value::Int64(v % 3)])),
            ])
        })
        .collect();
    fill(&storage, "docs", 1, docs);
    fill(&storage, "log", 1, Vec::new());
    fill(
        &storage,
        "other",
        1,
        (0..3).map(|m| Value::map([("n", Value::Int64(m)), ("m", Value::Int64(m))])).collect(),
    );
    storage.ensure_index("docs", "n").unwrap();
    storage.ensure_index("docs", "tags[*]").unwrap();
    database(storage, Config::default())
}

fn results(db: &Database, shape: fn() -> ExecutionPlan, options: &QueryOptions, ordered: bool) -> Vec<Value> {
    let values = run(db, shape(), options);
    if ordered { values } else { sorted(values) }
}

/// `FOR d IN docs LET r = (REMOVE d IN docs RETURN d) FILTER d.n == 1 RETURN d.n`
fn remove_in_subquery() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    b.subquery("r", |b| {
        b.remove("docs", d, None)?;
        Ok(d)
    })
    .unwrap();
    b.filter(n(d).equals(Expression::literal(1))).unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

/// `FOR d IN docs LET r = (LET x = {n: d.n} INSERT x INTO log RETURN x)
/// FILTER d.n >= 2 RETURN d.n`
fn insert_in_subquery() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    b.subquery("r", |b| {
        let x = b.let_("x", Expression::object(vec![("n", n(d))]))?;
        b.insert("log", x, None)?;
        Ok(x)
    })
    .unwrap();
    b.filter(Expression::compare(ComparisonOp::Ge, n(d), Expression::literal(2)))
        .unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

/// `FOR d IN docs LET r = (LET p = {_key: d._key, seen: true} UPDATE p IN docs RETURN p)
/// FILTER 1 IN d.tags RETURN d.n`
fn update_in_subquery() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    b.subquery("r", |b| {
        let patch = b.let_(
            "p",
            Expression::object(vec![
                ("_key", Expression::variable(d).attribute("_key")),
                ("seen", Expression::literal(true)),
            ]),
        )?;
        b.update("docs", patch, None)?;
        Ok(patch)
    })
    .unwrap();
    b.filter(Expression::compare(
        ComparisonOp::In,
        Expression::literal(1),
        Expression::variable(d).attribute("tags"),
    ))
    .unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

/// `FOR d IN docs INSERT {n: d.n} INTO log FILTER d.n < 2 RETURN d.n`
fn insert_in_loop() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    let x = b.let_("x", Expression::object(vec![("n", n(d))])).unwrap();
    b.insert("log", x, None).unwrap();
    b.filter(Expression::compare(ComparisonOp::Lt, n(d), Expression::literal(2)))
        .unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

/// `FOR o IN other FOR d IN docs FILTER d.n == o.m
/// UPDATE {_key: d._key, m: o.m} IN docs RETURN d.n`
fn update_in_join() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let o = b.for_collection("o", "other").unwrap();
    let d = b.for_collection("d", "docs").unwrap();
    b.filter(n(d).equals(Expression::variable(o).attribute("m"))).unwrap();
    let patch = b
        .let_(
            "p",
            Expression::object(vec![
                ("_key", Expression::variable(d).attribute("_key")),
                ("m", Expression::variable(o).attribute("m")),
            ]),
        )
        .unwrap();
    b.update("docs", patch, None).unwrap();
    let out = b.let_("out", n(d)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

const WRITING_SHAPES: [fn() -> ExecutionPlan; 5] =
    [remove_in_subquery, insert_in_subquery, update_in_subquery, insert_in_loop, update_in_join];

/// Drops the storage-assigned identity of a document.
fn without_identity(document: Value) -> Value {
    match document {
        Value::Map(mut fields) => {
            fields.remove("_key");
            fields.remove("_id");
            Value::Map(fields)
        }
        other => other,
    }
}

/// Runs `shape` on a fresh database and returns its sorted results together
/// with the sorted contents of `docs` and `log` afterwards. Keys of `log`
/// depend on write order, so they are left out.
fn effects(ns: &[i64], shape: fn() -> ExecutionPlan, options: &QueryOptions) -> (Vec<Value>, Vec<Value>, Vec<Value>) {
    let db = db(ns);
    let rows = sorted(run(&db, shape(), options));
    let docs = sorted(db.storage().scan("docs", None).unwrap());
    let log = sorted(
        db.storage()
            .scan("log", None)
            .unwrap()
            .into_iter()
            .map(without_identity)
            .collect(),
    );
    (rows, docs, log)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn single_rule_disabled_matches_unoptimized(ns in prop::collection::vec(0i64..6, 0..10)) {
        let db = db(&ns);
        let rules: Vec<&str> = Optimizer::new().rule_names().into_iter().map(|(name, _)| name).collect();
        for (index, shape) in SHAPES.into_iter().enumerate() {
            let ordered = index == 3;
            let reference = results(&db, shape, &QueryOptions::new().with_disabled_rule("-all"), ordered);
            let optimized = results(&db, shape, &QueryOptions::new(), ordered);
            prop_assert_eq!(&optimized, &reference, "shape {} fully optimized", index);
            for rule in &rules {
                let options = QueryOptions::new().with_disabled_rule(format!("-{rule}"));
                let actual = results(&db, shape, &options, ordered);
                prop_assert_eq!(&actual, &reference, "shape {} without {}", index, rule);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn single_rule_disabled_writes_like_unoptimized(ns in prop::collection::vec(0i64..6, 0..8)) {
        let rules: Vec<&str> = Optimizer::new().rule_names().into_iter().map(|(name, _)| name).collect();
        for (index, shape) in WRITING_SHAPES.into_iter().enumerate() {
            let reference = effects(&ns, shape, &QueryOptions::new().with_disabled_rule("-all"));
            let optimized = effects(&ns, shape, &QueryOptions::new());
            prop_assert_eq!(&optimized, &reference, "writing shape {} fully optimized", index);
            for rule in &rules {
                let options = QueryOptions::new().with_disabled_rule(format!("-{rule}"));
                let actual = effects(&ns, shape, &options);
                prop_assert_eq!(&actual, &reference, "writing shape {} without {}", index, rule);
            }
        }
    }
}

#[test]
fn test_filter_after_nested_remove_sees_every_document() {
    let (rows, docs, _) = effects(&[1, 2, 3], remove_in_subquery, &QueryOptions::new());
    assert_eq!(rows, vec![Value::Int64(1)]);
    assert!(docs.is_empty());

    let (rows, _, log) = effects(&[1, 2, 3], insert_in_subquery, &QueryOptions::new());
    assert_eq!(rows, vec![Value::Int64(2), Value::Int64(3)]);
    assert_eq!(log.len(), 3);
}

#[test]
fn test_count_subquery_shape_is_collapsed() {
    let db = db(&[0, 1, 2, 3, 4]);
    let optimized = db.optimize(correlated_count(), &QueryOptions::new()).unwrap();
    assert!(optimized.best().unwrap().plan.has_applied("optimize-subquery-count"));
    let mut counts = run(&db, correlated_count(), &QueryOptions::new());
    counts.sort();
    assert_eq!(counts, vec![Value::Int64(2), Value::Int64(3), Value::Int64(4)]);
}
