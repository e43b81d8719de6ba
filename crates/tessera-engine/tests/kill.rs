//! Killing queries through the database facade.

mod common;

use std::thread;

use common::{database, fill};
use tessera_common::Value;
use tessera_core::MemoryStorage;
use tessera_engine::query::{ExecutionPlan, Expression};
use tessera_engine::{Config, Database, KillOutcome, PlanBuilder, QueryOptions, QueryState};

fn db(shards: usize, config: Config) -> Database {
    let storage = MemoryStorage::new();
    let documents = (0..200).map(|n| Value::map([("n", Value::Int64(n))])).collect();
    fill(&storage, "docs", shards, documents);
    database(storage, config.with_batch_size(10))
}

fn scan() -> ExecutionPlan {
    let mut b = PlanBuilder::new();
    let d = b.for_collection("d", "docs").unwrap();
    let n = b.let_("n", Expression::variable(d).attribute("n")).unwrap();
    b.return_(n).unwrap();
    b.build().unwrap()
}

#[test]
fn test_repeated_kill_succeeds() {
    let db = db(1, Config::default());
    let mut cursor = db.query(scan(), &QueryOptions::new()).unwrap();
    assert_eq!(cursor.next_batch().unwrap().unwrap().len(), 10);
    assert_eq!(db.running_queries(), vec![cursor.id()]);

    assert_eq!(db.kill(cursor.id()), KillOutcome::Killed);
    assert_eq!(db.kill(cursor.id()), KillOutcome::Killed);
    assert!(db.running_queries().is_empty());

    let err = cursor.next_batch().unwrap_err();
    assert!(err.is_killed());
    assert!(cursor.is_finished());
    assert_eq!(db.registry().state(cursor.id()), Some(QueryState::Killed));
}

#[test]
fn test_kill_after_completion_not_found() {
    let db = db(1, Config::default());
    let mut cursor = db.query(scan(), &QueryOptions::new()).unwrap();
    assert_eq!(cursor.collect_all().unwrap().len(), 200);
    assert_eq!(db.kill(cursor.id()), KillOutcome::NotFound);
    assert_eq!(cursor.next_batch().unwrap(), None);

    let id = cursor.id();
    drop(cursor);
    assert_eq!(db.kill(id), KillOutcome::NotFound);
}

#[test]
fn test_kill_from_another_thread() {
    let db = db(1, Config::default());
    let mut cursor = db.query(scan(), &QueryOptions::new()).unwrap();
    let id = cursor.id();
    cursor.next_batch().unwrap();

    let outcome = thread::scope(|s| s.spawn(|| db.kill(id)).join().unwrap());
    assert_eq!(outcome, KillOutcome::Killed);
    assert!(cursor.next_batch().unwrap_err().is_killed());
}

#[test]
fn test_kill_distributed_query() {
    common::init_tracing();
    let db = db(4, Config::default().with_distributed(true));
    let mut cursor = db.query(scan(), &QueryOptions::new()).unwrap();
    assert!(cursor.next_batch().unwrap().is_some());
    assert_eq!(db.kill(cursor.id()), KillOutcome::Killed);
    assert!(cursor.next_batch().unwrap_err().is_killed());
    // Dropping joins the partition workers, which must observe the kill.
    drop(cursor);
    assert!(db.running_queries().is_empty());
}

#[test]
fn test_concurrent_queries_are_independent() {
    let db = db(1, Config::default());
    let mut first = db.query(scan(), &QueryOptions::new()).unwrap();
    let mut second = db.query(scan(), &QueryOptions::new()).unwrap();
    assert_ne!(first.id(), second.id());

    assert_eq!(db.kill(first.id()), KillOutcome::Killed);
    assert!(first.next_batch().unwrap_err().is_killed());
    assert_eq!(second.collect_all().unwrap().len(), 200);
}
