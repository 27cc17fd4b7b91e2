//! Deterministic interleaving tests over queued host delivery.
//!
//! The host queues every completion notification; the test alternates
//! between running ready futures and delivering notifications, so several
//! logical operations advance step by step against one database.

use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use stowage_core::{
    open_database, CollectionSpec, Database, Key, MigrationPlan, StoreConfig, StoreResult, Value,
};
use stowage_host::{Delivery, MemoryHost, MemoryHostConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn queued_host() -> MemoryHost {
    MemoryHost::with_config(MemoryHostConfig::new().delivery(Delivery::Queued))
}

/// Alternates between the executor and the host until neither has work.
fn drive(pool: &mut LocalPool, host: &MemoryHost) {
    loop {
        pool.run_until_stalled();
        if host.pump() == 0 {
            break;
        }
    }
}

fn run<T, F>(pool: &mut LocalPool, host: &MemoryHost, future: F) -> T
where
    T: 'static,
    F: Future<Output = T> + 'static,
{
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    pool.spawner()
        .spawn_local(async move {
            *sink.borrow_mut() = Some(future.await);
        })
        .unwrap();
    drive(pool, host);
    let result = slot.borrow_mut().take();
    result.expect("future did not complete")
}

fn setup(config: StoreConfig) -> (LocalPool, MemoryHost, Database<MemoryHost>, Key) {
    init_tracing();
    let mut pool = LocalPool::new();
    let host = queued_host();

    let mut plan = MigrationPlan::new();
    plan.step(1, "people", |ctx| {
        ctx.create_collection(&CollectionSpec::new("people", "id").auto_increment())
    })
    .unwrap();

    let opener = host.clone();
    let db = run(&mut pool, &host, async move {
        Database::open_with_config(&opener, "race", 1, &plan, config).await
    })
    .unwrap();

    let writer = db.clone();
    let key = run(&mut pool, &host, async move {
        writer
            .add(
                "people",
                Value::object([("name", Value::from("A")), ("age", Value::from(1))]),
            )
            .await
    })
    .unwrap();

    (pool, host, db, key)
}

/// Spawns two updates of the same record and runs them to completion.
fn race(
    pool: &mut LocalPool,
    host: &MemoryHost,
    db: &Database<MemoryHost>,
    key: &Key,
) -> Vec<StoreResult<Value>> {
    let results = Rc::new(RefCell::new(Vec::new()));
    let patches = [
        Value::object([("age", Value::from(2))]),
        Value::object([("city", Value::from("Oslo"))]),
    ];
    for patch in patches {
        let db = db.clone();
        let key = key.clone();
        let results = Rc::clone(&results);
        pool.spawner()
            .spawn_local(async move {
                let outcome = db.update("people", key, patch).await;
                results.borrow_mut().push(outcome);
            })
            .unwrap();
    }
    drive(pool, host);
    let finished = results.borrow_mut().drain(..).collect();
    finished
}

fn stored(pool: &mut LocalPool, host: &MemoryHost, db: &Database<MemoryHost>, key: &Key) -> Value {
    let db = db.clone();
    let key = key.clone();
    run(pool, host, async move { db.get("people", key).await })
        .unwrap()
        .unwrap()
}

#[test]
fn racing_updates_both_apply_when_serialized() {
    let (mut pool, host, db, key) = setup(StoreConfig::default());

    let results = race(&mut pool, &host, &db, &key);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
    let record = stored(&mut pool, &host, &db, &key);
    assert_eq!(record.get("name"), Some(&Value::from("A")));
    assert_eq!(record.get("age"), Some(&Value::from(2)));
    assert_eq!(record.get("city"), Some(&Value::from("Oslo")));
}

#[test]
fn racing_updates_lose_one_patch_without_serialization() {
    let (mut pool, host, db, key) = setup(StoreConfig::new().serialize_updates(false));

    let results = race(&mut pool, &host, &db, &key);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
    let record = stored(&mut pool, &host, &db, &key);
    let age_applied = record.get("age") == Some(&Value::from(2));
    let city_applied = record.get("city") == Some(&Value::from("Oslo"));
    assert!(age_applied != city_applied, "exactly one patch survives: {record:?}");
}

#[test]
fn queued_operations_resolve_once_each() {
    let (mut pool, host, db, _) = setup(StoreConfig::default());
    let done = Rc::new(RefCell::new(0));

    for i in 0..10 {
        let db = db.clone();
        let done = Rc::clone(&done);
        pool.spawner()
            .spawn_local(async move {
                db.add("people", Value::object([("n", Value::from(i))]))
                    .await
                    .unwrap();
                *done.borrow_mut() += 1;
            })
            .unwrap();
    }
    drive(&mut pool, &host);

    assert_eq!(*done.borrow(), 10);
    assert_eq!(host.pending_notifications(), 0);
    let db2 = db.clone();
    let count = run(&mut pool, &host, async move { db2.count("people").await }).unwrap();
    assert_eq!(count, 11);
}

#[test]
fn request_futures_wait_for_delivery() {
    let (mut pool, host, db, key) = setup(StoreConfig::default());
    let fetched = Rc::new(RefCell::new(None));

    let sink = Rc::clone(&fetched);
    let reader = db.clone();
    pool.spawner()
        .spawn_local(async move {
            *sink.borrow_mut() = Some(reader.get("people", key).await);
        })
        .unwrap();

    pool.run_until_stalled();
    assert!(fetched.borrow().is_none());
    assert_eq!(host.pending_notifications(), 1);

    drive(&mut pool, &host);
    assert!(matches!(*fetched.borrow(), Some(Ok(Some(_)))));
}
