//! Browser tests for the IndexedDB host.
//!
//! Run with `wasm-pack test --headless --firefox web/stowage_wasm`.

use stowage_core::{
    delete_database, open_database, CollectionSpec, Database, IndexSpec, Key, MigrationPlan,
    SchemaStep, StoreError, Value,
};
use stowage_host::HostErrorKind;
use stowage_wasm::IdbHost;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn unique_db_name(prefix: &str) -> String {
    let now = js_sys::Date::now() as u64;
    let rand = (js_sys::Math::random() * 1_000_000.0) as u64;
    format!("{prefix}-{now:x}-{rand:x}")
}

fn schema() -> MigrationPlan {
    let mut plan = MigrationPlan::new();
    plan.register(Box::new(
        SchemaStep::new(1, "initial")
            .collection(
                CollectionSpec::new("people", "id")
                    .auto_increment()
                    .index(IndexSpec::new("by_city", "city")),
            )
            .collection(CollectionSpec::new("tags", "name")),
    ))
    .unwrap();
    plan
}

async fn open(prefix: &str) -> (IdbHost, String, Database<IdbHost>) {
    let host = IdbHost::from_global().unwrap();
    let name = unique_db_name(prefix);
    let db = open_database(&host, &name, 1, &schema()).await.unwrap();
    (host, name, db)
}

async fn cleanup(host: &IdbHost, db: Database<IdbHost>, name: &str) {
    db.close();
    delete_database(host, name).await.unwrap();
}

#[wasm_bindgen_test]
async fn add_get_update_round_trip() {
    let (host, name, db) = open("stowage-crud").await;

    let key = db
        .add(
            "people",
            Value::object([("name", Value::from("A")), ("age", Value::from(1))]),
        )
        .await
        .unwrap();
    assert_eq!(key, Key::Integer(1));

    let updated = db
        .update("people", key.clone(), Value::object([("age", Value::from(2))]))
        .await
        .unwrap();
    assert_eq!(updated.get("name"), Some(&Value::from("A")));
    assert_eq!(updated.get("age"), Some(&Value::from(2)));
    assert_eq!(db.get("people", key).await.unwrap(), Some(updated));

    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn get_all_and_index_lookup() {
    let (host, name, db) = open("stowage-query").await;
    for (person, city) in [("A", "Oslo"), ("B", "Lima"), ("C", "Oslo")] {
        db.add(
            "people",
            Value::object([("name", Value::from(person)), ("city", Value::from(city))]),
        )
        .await
        .unwrap();
    }

    assert_eq!(db.get_all("people").await.unwrap().len(), 3);
    assert_eq!(db.count("people").await.unwrap(), 3);
    let oslo = db.get_all_by_index("people", "by_city", "Oslo").await.unwrap();
    assert_eq!(oslo.len(), 2);

    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn duplicate_key_is_reported() {
    let (host, name, db) = open("stowage-dup").await;
    let tag = Value::object([("name", Value::from("rust"))]);
    db.add("tags", tag.clone()).await.unwrap();

    let err = db.add("tags", tag).await.unwrap_err();

    assert!(err.is_duplicate_key());
    assert_eq!(err.host_kind(), Some(HostErrorKind::Constraint));
    assert_eq!(db.count("tags").await.unwrap(), 1);

    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn update_missing_record_is_not_found() {
    let (host, name, db) = open("stowage-missing").await;

    let err = db
        .update("people", 99, Value::object([("age", Value::from(2))]))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn delete_removes_record() {
    let (host, name, db) = open("stowage-delete").await;
    let key = db.add("people", Value::object([("name", Value::from("A"))])).await.unwrap();

    db.delete("people", key.clone()).await.unwrap();
    db.delete("people", 12345).await.unwrap();

    assert_eq!(db.get("people", key).await.unwrap(), None);
    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn upgrade_adds_index_and_keeps_data() {
    let (host, name, db) = open("stowage-upgrade").await;
    db.add("people", Value::object([("email", Value::from("a@x"))]))
        .await
        .unwrap();
    db.close();

    let mut plan = schema();
    plan.step(2, "by_email", |ctx| {
        ctx.create_index("people", &IndexSpec::new("by_email", "email").unique())
    })
    .unwrap();
    let db = open_database(&host, &name, 2, &plan).await.unwrap();

    assert_eq!(db.version(), 2);
    assert_eq!(db.migration_report().unwrap().applied_count(), 1);
    let found = db.get_all_by_index("people", "by_email", "a@x").await.unwrap();
    assert_eq!(found.len(), 1);

    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn failed_migration_keeps_prior_version() {
    let (host, name, db) = open("stowage-failed").await;
    db.close();

    let mut plan = schema();
    plan.register(Box::new(
        SchemaStep::new(2, "broken").index("missing", IndexSpec::new("x", "x")),
    ))
    .unwrap();
    let err = open_database(&host, &name, 2, &plan).await.unwrap_err();
    assert!(matches!(err, StoreError::Migration { .. }));

    let db = open_database(&host, &name, 1, &schema()).await.unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.collection_names(), vec!["people", "tags"]);

    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn unique_index_over_duplicates_is_a_migration_error() {
    let (host, name, db) = open("stowage-unique").await;
    for city in ["Oslo", "Oslo"] {
        db.add("people", Value::object([("city", Value::from(city))]))
            .await
            .unwrap();
    }
    db.close();

    let mut plan = schema();
    plan.step(2, "unique_city", |ctx| {
        ctx.create_index("people", &IndexSpec::new("city_unique", "city").unique())
    })
    .unwrap();
    let err = open_database(&host, &name, 2, &plan).await.unwrap_err();
    assert!(err.is_migration(), "{err:?}");

    let db = open_database(&host, &name, 1, &schema()).await.unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.count("people").await.unwrap(), 2);

    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn batch_is_atomic() {
    let (host, name, db) = open("stowage-batch").await;
    db.add("tags", Value::object([("name", Value::from("taken"))]))
        .await
        .unwrap();

    let err = db
        .batch()
        .add("people", Value::object([("name", Value::from("Ghost"))]))
        .add("tags", Value::object([("name", Value::from("taken"))]))
        .commit()
        .await
        .unwrap_err();

    assert!(err.is_duplicate_key());
    assert_eq!(db.count("people").await.unwrap(), 0);
    cleanup(&host, db, &name).await;
}

#[wasm_bindgen_test]
async fn closed_database_rejects_operations() {
    let (host, name, db) = open("stowage-closed").await;
    db.close();

    let err = db.get_all("people").await.unwrap_err();

    assert!(err.is_connection());
    delete_database(&host, &name).await.unwrap();
}
