//! Shard-parallel execution joined by a gather.

mod common;

use common::{database, fill, sorted};
use tessera_common::Value;
use tessera_core::MemoryStorage;
use tessera_engine::query::{BinaryOp, ExecutionPlan, Expression, Function};
use tessera_engine::{Config, Database, PlanBuilder, QueryOptions};

fn db(shards: usize, distributed: bool) -> Database {
    let storage = MemoryStorage::new();
    let documents = (0..100).map(|n| Value::map([("n", Value::Int64(n))])).collect();
    fill(&storage, "docs", shards, documents);
    database(storage, Config::default().with_batch_size(7).with_distributed(distributed))
}

/// `FOR d IN docs FILTER d.n % 2 == 0 [SORT d.n] RETURN d.n`
fn evens(sort: bool) -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    let n = Expression::variable(d).attribute("n");
    b.filter(Expression::binary(BinaryOp::Mod, n.clone(), Expression::literal(2)).equals(Expression::literal(0)))
        .unwrap();
    let out = if sort {
        b.sort_by(n, true).unwrap()
    } else {
        b.let_("n", n).unwrap()
    };
    b.return_(out).unwrap();
    b.build().unwrap()
}

fn expected() -> Vec<Value> {
    (0..50).map(|i| Value::Int64(i * 2)).collect()
}

fn has_gather(db: &Database, plan: ExecutionPlan) -> bool {
    let explanation = db.explain(plan, &QueryOptions::new()).unwrap();
    explanation.plans[0].nodes.iter().any(|n| n.node_type == "GatherNode")
}

#[test]
fn test_sorted_gather_merges_shards() {
    common::init_tracing();
    let db = db(4, true);
    assert!(has_gather(&db, evens(true)));

    let mut cursor = db.query(evens(true), &QueryOptions::new()).unwrap();
    let values = cursor.collect_all().unwrap();
    assert_eq!(values, expected());

    let stats = cursor.stats();
    assert_eq!(stats.partitions, 4);
    assert_eq!(stats.scanned_full, 100);
    assert_eq!(stats.filtered, 50);
}

#[test]
fn test_unordered_gather_returns_every_row() {
    let db = db(4, true);
    assert!(has_gather(&db, evens(false)));
    let mut cursor = db.query(evens(false), &QueryOptions::new()).unwrap();
    assert_eq!(sorted(cursor.collect_all().unwrap()), expected());
    assert_eq!(cursor.stats().partitions, 4);
}

#[test]
fn test_no_gather_without_cluster_or_shards() {
    let local = db(4, false);
    assert!(!has_gather(&local, evens(true)));
    let single = db(1, true);
    assert!(!has_gather(&single, evens(true)));

    for db in [local, single] {
        let mut cursor = db.query(evens(true), &QueryOptions::new()).unwrap();
        assert_eq!(cursor.collect_all().unwrap(), expected());
        assert_eq!(cursor.stats().partitions, 0);
    }
}

#[test]
fn test_partition_failure_fails_query() {
    // FOR d IN docs RETURN FAIL(d.n)
    let db = db(4, true);
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    let out = b
        .let_(
            "out",
            Expression::call(Function::Fail, vec![Expression::variable(d).attribute("n")]),
        )
        .unwrap();
    b.return_(out).unwrap();
    let plan = b.build().unwrap();
    assert!(has_gather(&db, plan.clone()));

    let mut cursor = db.query(plan, &QueryOptions::new()).unwrap();
    let err = cursor.collect_all().unwrap_err();
    assert!(!err.is_killed());
    assert!(cursor.is_finished());
    assert!(db.running_queries().is_empty());
}
