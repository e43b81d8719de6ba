//! Count-only subqueries.

mod common;

use common::{database, fill, run};
use tessera_common::{Value, VariableId};
use tessera_core::MemoryStorage;
use tessera_engine::query::{ExecutionPlan, Expression, Function};
use tessera_engine::{Config, Database, PlanBuilder, QueryOptions};

const RULE: &str = "optimize-subquery-count";

fn db() -> Database {
    let storage = MemoryStorage::new();
    fill(
        &storage,
        "docs",
        1,
        (0..10).map(|n| Value::map([("g", Value::Int64(n % 3))])).collect(),
    );
    fill(
        &storage,
        "groups",
        1,
        (0..4).map(|g| Value::map([("g", Value::Int64(g))])).collect(),
    );
    database(storage, Config::default())
}

/// `FOR o IN groups SORT o.g LET sub = (FOR d IN docs FILTER d.g == o.g [LIMIT limit] RETURN d)
/// RETURN <result(sub)>`
fn grouped_counts(limit: Option<u64>, result: impl FnOnce(VariableId) -> Expression) -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let o = b.for_collection("o", "groups").unwrap();
    b.sort_by(Expression::variable(o).attribute("g"), true).unwrap();
    let sub = b
        .subquery("sub", |b| {
            let d = b.for_collection("d", "docs")?;
            b.filter(
                Expression::variable(d)
                    .attribute("g")
                    .equals(Expression::variable(o).attribute("g")),
            )?;
            if let Some(count) = limit {
                b.limit(0, count)?;
            }
            Ok(d)
        })
        .unwrap();
    let out = b.let_("out", result(sub)).unwrap();
    b.return_(out).unwrap();
    b.build().unwrap()
}

fn length(sub: VariableId) -> Expression {
    Expression::call(Function::Length, vec![Expression::variable(sub)])
}

fn ints(items: &[i64]) -> Vec<Value> {
    items.iter().map(|i| Value::Int64(*i)).collect()
}

#[test]
fn test_count_results_unchanged() {
    let db = db();
    let optimized = db.optimize(grouped_counts(None, length), &QueryOptions::new()).unwrap();
    assert!(optimized.best().unwrap().plan.has_applied(RULE));

    let counted = run(&db, grouped_counts(None, length), &QueryOptions::new());
    let materialized = run(
        &db,
        grouped_counts(None, length),
        &QueryOptions::new().with_disabled_rule(format!("-{RULE}")),
    );
    assert_eq!(counted, ints(&[4, 3, 3, 0]));
    assert_eq!(counted, materialized);
}

#[test]
fn test_not_applied_with_limit() {
    let db = db();
    let optimized = db.optimize(grouped_counts(Some(2), length), &QueryOptions::new()).unwrap();
    assert!(!optimized.best().unwrap().plan.has_applied(RULE));
    assert_eq!(
        run(&db, grouped_counts(Some(2), length), &QueryOptions::new()),
        ints(&[2, 2, 2, 0])
    );
}

#[test]
fn test_not_applied_when_documents_are_used() {
    let db = db();
    let both = |sub| Expression::array(vec![length(sub), Expression::variable(sub)]);
    let optimized = db.optimize(grouped_counts(None, both), &QueryOptions::new()).unwrap();
    assert!(!optimized.best().unwrap().plan.has_applied(RULE));

    let rows = run(&db, grouped_counts(None, both), &QueryOptions::new());
    let Value::List(first) = &rows[0] else {
        panic!("expected a list, got {:?}", rows[0]);
    };
    assert_eq!(first[0], Value::Int64(4));
    assert_eq!(first[1].as_list().map(<[Value]>::len), Some(4));
}
