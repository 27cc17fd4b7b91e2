//! Integration tests for opening and upgrading databases.

use std::cell::Cell;
use std::rc::Rc;
use stowage_core::{
    delete_database, open_database, CollectionSpec, Database, IndexSpec, MigrationOperation,
    MigrationPlan, SchemaStep, StoreConfig, StoreError, Value,
};
use stowage_host::{HostError, HostErrorKind, MemoryHost};

/// Plan whose steps count how often they run.
fn counted_plan(runs: &Rc<Cell<u32>>) -> MigrationPlan {
    let mut plan = MigrationPlan::new();
    let counter = Rc::clone(runs);
    plan.step(1, "create_notes", move |ctx| {
        counter.set(counter.get() + 1);
        ctx.create_collection(&CollectionSpec::new("notes", "id").auto_increment())
    })
    .unwrap();
    let counter = Rc::clone(runs);
    plan.step(2, "index_notes", move |ctx| {
        counter.set(counter.get() + 1);
        ctx.create_index("notes", &IndexSpec::new("by_tag", "tag"))
    })
    .unwrap();
    plan
}

#[tokio::test]
async fn reopening_same_version_skips_migrator() {
    let host = MemoryHost::new();
    let runs = Rc::new(Cell::new(0));
    let plan = counted_plan(&runs);

    let first = open_database(&host, "notes", 2, &plan).await.unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(first.migration_report().unwrap().applied_count(), 2);
    first.close();

    let second = open_database(&host, "notes", 2, &plan).await.unwrap();
    assert_eq!(runs.get(), 2);
    assert!(second.migration_report().is_none());
}

#[tokio::test]
async fn incremental_upgrade_runs_only_new_steps() {
    let host = MemoryHost::new();
    let runs = Rc::new(Cell::new(0));
    let plan = counted_plan(&runs);

    open_database(&host, "notes", 1, &plan).await.unwrap().close();
    assert_eq!(runs.get(), 1);

    let db = open_database(&host, "notes", 2, &plan).await.unwrap();
    assert_eq!(runs.get(), 2);
    let report = db.migration_report().unwrap();
    assert_eq!((report.from_version, report.to_version), (1, 2));
    assert_eq!(
        report.operations().cloned().collect::<Vec<_>>(),
        vec![MigrationOperation::CreateIndex {
            collection: "notes".into(),
            index_name: "by_tag".into(),
        }]
    );
}

#[tokio::test]
async fn version_without_steps_still_upgrades() {
    let host = MemoryHost::new();
    let runs = Rc::new(Cell::new(0));
    let plan = counted_plan(&runs);

    let db = open_database(&host, "notes", 5, &plan).await.unwrap();

    assert_eq!(db.version(), 5);
    assert_eq!(runs.get(), 2);
    assert_eq!(host.database_version("notes"), Some(5));
}

#[tokio::test]
async fn lower_version_reuses_newer_schema() {
    let host = MemoryHost::new();
    let runs = Rc::new(Cell::new(0));
    let plan = counted_plan(&runs);
    open_database(&host, "notes", 2, &plan).await.unwrap().close();

    let db = open_database(&host, "notes", 1, &plan).await.unwrap();

    assert_eq!(db.version(), 2);
    assert_eq!(runs.get(), 2);
    db.add("notes", Value::object([("tag", Value::from("x"))]))
        .await
        .unwrap();
}

#[tokio::test]
async fn lower_version_can_be_refused() {
    let host = MemoryHost::new();
    let plan = counted_plan(&Rc::new(Cell::new(0)));
    open_database(&host, "notes", 2, &plan).await.unwrap().close();

    let config = StoreConfig::new().reuse_newer_schema(false);
    let err = Database::open_with_config(&host, "notes", 1, &plan, config)
        .await
        .unwrap_err();

    assert!(err.is_connection());
    assert_eq!(err.host_kind(), Some(HostErrorKind::Version));
}

#[tokio::test]
async fn failed_migration_keeps_prior_version_and_schema() {
    let host = MemoryHost::new();
    let mut plan = MigrationPlan::new();
    plan.register(Box::new(
        SchemaStep::new(1, "notes").collection(CollectionSpec::new("notes", "id").auto_increment()),
    ))
    .unwrap();
    let v1 = plan.clone();
    plan.register(Box::new(
        SchemaStep::new(2, "broken")
            .collection(CollectionSpec::new("tags", "name"))
            .index("missing", IndexSpec::new("x", "x")),
    ))
    .unwrap();

    let db = open_database(&host, "app", 1, &v1).await.unwrap();
    db.add("notes", Value::object([("text", Value::from("kept"))]))
        .await
        .unwrap();
    db.close();

    let err = open_database(&host, "app", 2, &plan).await.unwrap_err();
    assert!(matches!(err, StoreError::Migration { .. }));
    assert!(err.to_string().contains("broken"));

    assert_eq!(host.database_version("app"), Some(1));
    let db = open_database(&host, "app", 1, &v1).await.unwrap();
    assert_eq!(db.collection_names(), vec!["notes"]);
    assert_eq!(db.count("notes").await.unwrap(), 1);
}

#[tokio::test]
async fn unique_index_over_conflicting_data_fails_migration() {
    let host = MemoryHost::new();
    let mut plan = MigrationPlan::new();
    plan.step(1, "users", |ctx| ctx.create_collection(&CollectionSpec::new("users", "id")))
        .unwrap();
    let v1 = plan.clone();
    plan.step(2, "unique_email", |ctx| {
        ctx.create_index("users", &IndexSpec::new("email", "email").unique())
    })
    .unwrap();

    let db = open_database(&host, "app", 1, &v1).await.unwrap();
    for id in [1, 2] {
        db.add(
            "users",
            Value::object([("id", Value::from(id)), ("email", Value::from("same@x"))]),
        )
        .await
        .unwrap();
    }
    db.close();

    let err = open_database(&host, "app", 2, &plan).await.unwrap_err();
    assert!(err.is_migration());
    assert_eq!(host.database_version("app"), Some(1));
}

#[tokio::test]
async fn redeclaring_existing_schema_is_not_an_error() {
    let host = MemoryHost::new();
    let users = CollectionSpec::new("users", "id").index(IndexSpec::new("by_name", "name"));
    let mut plan = MigrationPlan::new();
    plan.register(Box::new(SchemaStep::new(1, "users").collection(users.clone())))
        .unwrap();
    plan.register(Box::new(
        SchemaStep::new(2, "users_again")
            .collection(users)
            .index("users", IndexSpec::new("by_name", "name")),
    ))
    .unwrap();

    let db = open_database(&host, "app", 2, &plan).await.unwrap();

    let report = db.migration_report().unwrap();
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(report.applied_count(), 2);
}

#[tokio::test]
async fn host_refusal_is_a_connection_error() {
    let host = MemoryHost::new();
    host.fail_next_open(HostError::new(HostErrorKind::QuotaExceeded, "disk full"));

    let err = open_database(&host, "app", 1, &MigrationPlan::new())
        .await
        .unwrap_err();

    assert!(err.is_connection());
    assert_eq!(err.host_kind(), Some(HostErrorKind::QuotaExceeded));
}

#[tokio::test]
async fn invalid_arguments_are_connection_errors() {
    let host = MemoryHost::new();
    let plan = MigrationPlan::new();

    assert!(open_database(&host, "", 1, &plan).await.unwrap_err().is_connection());
    assert!(open_database(&host, "app", 0, &plan).await.unwrap_err().is_connection());
}

#[tokio::test]
async fn delete_database_drops_schema() {
    let host = MemoryHost::new();
    let runs = Rc::new(Cell::new(0));
    let plan = counted_plan(&runs);
    open_database(&host, "notes", 2, &plan).await.unwrap().close();

    delete_database(&host, "notes").await.unwrap();
    assert_eq!(host.database_version("notes"), None);

    open_database(&host, "notes", 2, &plan).await.unwrap();
    assert_eq!(runs.get(), 4);
}
