//! Enumeration interchange and the plan cap.

mod common;

use common::{database, fill, run, sorted};
use tessera_common::Value;
use tessera_core::MemoryStorage;
use tessera_engine::query::{ExecutionPlan, Expression};
use tessera_engine::{Config, PlanBuilder, QueryOptions};

fn storage(loops: usize) -> MemoryStorage {
    let storage = MemoryStorage::new();
    for i in 0..loops {
        let documents = (0..2).map(|n| Value::map([("n", Value::Int64(n))])).collect();
        fill(&storage, &format!("c{i}"), 1, documents);
    }
    storage
}

/// `FOR v0 IN c0 ... FOR vN IN cN RETURN [v0.n, ..., vN.n]`
fn nested_loops(loops: usize) -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let vars: Vec<_> = (0..loops)
        .map(|i| b.for_collection(&format!("v{i}"), &format!("c{i}")).unwrap())
        .collect();
    let row = b
        .let_(
            "row",
            Expression::array(vars.into_iter().map(|v| Expression::variable(v).attribute("n")).collect()),
        )
        .unwrap();
    b.return_(row).unwrap();
    b.build().unwrap()
}

#[test]
fn test_four_loops_give_all_orders() {
    common::init_tracing();
    let db = database(storage(4), Config::default());
    let optimized = db.optimize(nested_loops(4), &QueryOptions::new()).unwrap();
    assert_eq!(optimized.candidates.len(), 24);
    assert_eq!(optimized.stats.plans_created, 23);
    assert_eq!(optimized.stats.plans_truncated, 0);
}

#[test]
fn test_seven_loops_capped() {
    let db = database(storage(7), Config::default().with_max_number_of_plans(128));
    let optimized = db.optimize(nested_loops(7), &QueryOptions::new()).unwrap();
    assert_eq!(optimized.candidates.len(), 128);
    assert!(optimized.stats.plans_truncated > 0);

    let first = run(&db, nested_loops(7), &QueryOptions::new());
    let second = run(&db, nested_loops(7), &QueryOptions::new());
    assert_eq!(first.len(), 128);
    assert_eq!(first, second);

    let unoptimized = run(&db, nested_loops(7), &QueryOptions::new().with_disabled_rule("-all"));
    assert_eq!(sorted(first), sorted(unoptimized));
}

#[test]
fn test_seven_loops_uncapped() {
    let db = database(storage(7), Config::default());
    let options = QueryOptions::new().with_max_number_of_plans(5040);
    let optimized = db.optimize(nested_loops(7), &options).unwrap();
    assert_eq!(optimized.candidates.len(), 5040);
    assert_eq!(optimized.stats.plans_truncated, 0);
}

#[test]
fn test_dependent_loop_stays_above_its_source() {
    // FOR a IN c0 FOR b IN a.list RETURN b has a single valid order.
    let storage = MemoryStorage::new();
    fill(
        &storage,
        "c0",
        1,
        vec![Value::map([(
            "list",
            Value::List(vec![Value::Int64(1), Value::Int64(2)]),
        )])],
    );
    let db = database(storage, Config::default());
    let mut b = PlanBuilder::new();
    let a = b.for_collection("a", "c0").unwrap();
    let item = b.for_expression("item", Expression::variable(a).attribute("list")).unwrap();
    b.return_(item).unwrap();
    let plan = b.build().unwrap();

    let optimized = db.optimize(plan.clone(), &QueryOptions::new()).unwrap();
    assert_eq!(optimized.candidates.len(), 1);
    assert_eq!(
        sorted(run(&db, plan, &QueryOptions::new())),
        vec![Value::Int64(1), Value::Int64(2)]
    );
}
