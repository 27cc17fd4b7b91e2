//! Integration tests for the async store adapter.

use stowage_core::{
    open_database, BatchOutcome, CollectionSpec, Database, IndexSpec, Key, MigrationPlan, SchemaStep,
    StoreError, Value,
};
use stowage_host::{HostErrorKind, MemoryHost};

fn schema() -> MigrationPlan {
    let mut plan = MigrationPlan::new();
    plan.register(Box::new(
        SchemaStep::new(1, "initial")
            .collection(
                CollectionSpec::new("people", "id")
                    .auto_increment()
                    .index(IndexSpec::new("by_city", "city"))
                    .index(IndexSpec::new("by_email", "email").unique()),
            )
            .collection(CollectionSpec::new("tags", "name"))
            .collection(CollectionSpec::out_of_line("settings")),
    ))
    .unwrap();
    plan
}

async fn open() -> Database<MemoryHost> {
    open_database(&MemoryHost::new(), "adapter", 1, &schema())
        .await
        .unwrap()
}

fn person(name: &str, age: i64) -> Value {
    Value::object([("name", Value::from(name)), ("age", Value::from(age))])
}

#[tokio::test]
async fn add_then_get_returns_record_with_generated_key() {
    let db = open().await;
    let record = person("A", 1);

    let key = db.add("people", record.clone()).await.unwrap();
    let stored = db.get("people", key.clone()).await.unwrap().unwrap();

    let mut expected = record;
    expected.set("id", key.to_value()).unwrap();
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn get_all_returns_every_added_record() {
    let db = open().await;
    for i in 0..5 {
        db.add("people", person(&format!("p{i}"), i)).await.unwrap();
    }

    let all = db.get_all("people").await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(db.count("people").await.unwrap(), 5);
    let ids: Vec<_> = all.iter().map(|r| r.get("id").cloned()).collect();
    assert_eq!(ids, (1..=5).map(|i| Some(Value::from(i))).collect::<Vec<_>>());
}

#[tokio::test]
async fn update_merges_patch() {
    let db = open().await;
    let key = db.add("people", person("A", 1)).await.unwrap();

    let updated = db
        .update("people", key.clone(), Value::object([("age", Value::from(2))]))
        .await
        .unwrap();

    let mut expected = person("A", 2);
    expected.set("id", key.to_value()).unwrap();
    assert_eq!(updated, expected);
    assert_eq!(db.get("people", key).await.unwrap(), Some(expected));
}

#[tokio::test]
async fn update_adds_new_fields_and_keeps_others() {
    let db = open().await;
    let key = db.add("people", person("A", 1)).await.unwrap();

    let updated = db
        .update("people", key, Value::object([("city", Value::from("Oslo"))]))
        .await
        .unwrap();

    assert_eq!(updated.get("name"), Some(&Value::from("A")));
    assert_eq!(updated.get("age"), Some(&Value::from(1)));
    assert_eq!(updated.get("city"), Some(&Value::from("Oslo")));
}

#[tokio::test]
async fn update_missing_record_is_not_found() {
    let db = open().await;

    let err = db
        .update("people", 42, Value::object([("age", Value::from(2))]))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::NotFound { ref key, .. } if *key == Key::Integer(42)));
    assert_eq!(db.count("people").await.unwrap(), 0);
}

#[tokio::test]
async fn update_rejects_bad_patches() {
    let db = open().await;
    let key = db.add("people", person("A", 1)).await.unwrap();

    let err = db.update("people", key.clone(), Value::from(3)).await.unwrap_err();
    assert!(err.is_adapter());
    assert_eq!(err.host_kind(), Some(HostErrorKind::Data));

    let err = db
        .update("people", key.clone(), Value::object([("id", Value::from(99))]))
        .await
        .unwrap_err();
    assert!(err.is_adapter());

    // restating the same key is allowed
    db.update("people", key.clone(), Value::object([("id", key.to_value())]))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_with_out_of_line_keys() {
    let db = open().await;
    db.put_with_key("settings", "ui", Value::object([("theme", Value::from("light"))]))
        .await
        .unwrap();

    let updated = db
        .update("settings", "ui", Value::object([("font", Value::from(12))]))
        .await
        .unwrap();

    assert_eq!(updated.get("theme"), Some(&Value::from("light")));
    assert_eq!(db.get("settings", "ui").await.unwrap(), Some(updated));
}

#[tokio::test]
async fn delete_then_get_is_none() {
    let db = open().await;
    let key = db.add("people", person("A", 1)).await.unwrap();

    db.delete("people", key.clone()).await.unwrap();
    assert_eq!(db.get("people", key).await.unwrap(), None);
}

#[tokio::test]
async fn delete_missing_key_succeeds() {
    let db = open().await;
    db.delete("people", 12345).await.unwrap();
    db.delete("settings", "never-stored").await.unwrap();
}

#[tokio::test]
async fn duplicate_in_line_key_is_reported() {
    let db = open().await;
    let tag = Value::object([("name", Value::from("rust"))]);
    db.add("tags", tag.clone()).await.unwrap();

    let err = db.add("tags", tag).await.unwrap_err();

    match err {
        StoreError::DuplicateKey {
            collection, key, ..
        } => {
            assert_eq!(collection, "tags");
            assert_eq!(key, Some(Key::from("rust")));
        }
        other => panic!("expected duplicate key, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_out_of_line_key_is_reported() {
    let db = open().await;
    db.add_with_key("settings", "ui", Value::from(1)).await.unwrap();

    let err = db
        .add_with_key("settings", "ui", Value::from(2))
        .await
        .unwrap_err();

    assert!(err.is_duplicate_key());
    assert_eq!(db.get("settings", "ui").await.unwrap(), Some(Value::from(1)));
}

#[tokio::test]
async fn unique_index_violation_on_add_is_duplicate_key() {
    let db = open().await;
    let mut first = person("A", 1);
    first.set("email", Value::from("a@x")).unwrap();
    let mut second = person("B", 2);
    second.set("email", Value::from("a@x")).unwrap();

    db.add("people", first).await.unwrap();
    let err = db.add("people", second).await.unwrap_err();

    assert!(err.is_duplicate_key());
    assert_eq!(db.count("people").await.unwrap(), 1);
}

#[tokio::test]
async fn put_replaces_without_duplicate_error() {
    let db = open().await;
    let tag = Value::object([("name", Value::from("rust")), ("uses", Value::from(1))]);
    db.put("tags", tag).await.unwrap();

    let replaced = Value::object([("name", Value::from("rust")), ("uses", Value::from(2))]);
    let key = db.put("tags", replaced.clone()).await.unwrap();

    assert_eq!(key, Key::from("rust"));
    assert_eq!(db.get_all("tags").await.unwrap(), vec![replaced]);
}

#[tokio::test]
async fn index_lookup_returns_matching_records() {
    let db = open().await;
    for (name, city) in [("A", "Oslo"), ("B", "Lima"), ("C", "Oslo")] {
        let mut record = person(name, 1);
        record.set("city", Value::from(city)).unwrap();
        db.add("people", record).await.unwrap();
    }
    db.add("people", person("NoCity", 1)).await.unwrap();

    let oslo = db.get_all_by_index("people", "by_city", "Oslo").await.unwrap();
    let names: Vec<_> = oslo.iter().filter_map(|r| r.get("name").cloned()).collect();
    assert_eq!(names, vec![Value::from("A"), Value::from("C")]);

    assert!(db
        .get_all_by_index("people", "by_city", "Paris")
        .await
        .unwrap()
        .is_empty());
    let err = db
        .get_all_by_index("people", "no_such_index", "x")
        .await
        .unwrap_err();
    assert_eq!(err.host_kind(), Some(HostErrorKind::NotFound));
}

#[tokio::test]
async fn unknown_collection_is_an_adapter_error() {
    let db = open().await;

    let err = db.get_all("missing").await.unwrap_err();

    assert!(err.is_adapter());
    assert_eq!(err.host_kind(), Some(HostErrorKind::NotFound));
}

#[tokio::test]
async fn invalid_key_is_an_adapter_error() {
    let db = open().await;
    let record = Value::object([("name", Value::from(true))]);

    let err = db.add("tags", record).await.unwrap_err();

    assert!(err.is_adapter());
    assert_eq!(err.host_kind(), Some(HostErrorKind::Data));
}

#[tokio::test]
async fn mutating_after_add_does_not_change_stored_record() {
    let db = open().await;
    let mut record = person("A", 1);
    let key = db.add("people", record.clone()).await.unwrap();

    record.set("age", Value::from(100)).unwrap();

    let stored = db.get("people", key).await.unwrap().unwrap();
    assert_eq!(stored.get("age"), Some(&Value::from(1)));
}

#[tokio::test]
async fn batch_commits_all_writes() {
    let db = open().await;
    let existing = db.add("people", person("Old", 1)).await.unwrap();

    let outcomes = db
        .batch()
        .add("people", person("New", 2))
        .put("tags", Value::object([("name", Value::from("t"))]))
        .put_with_key("settings", "mode", Value::from("dark"))
        .delete("people", existing.clone())
        .commit()
        .await
        .unwrap();

    assert_eq!(
        outcomes,
        vec![
            BatchOutcome::Stored(Key::Integer(2)),
            BatchOutcome::Stored(Key::from("t")),
            BatchOutcome::Stored(Key::from("mode")),
            BatchOutcome::Deleted,
        ]
    );
    assert_eq!(db.get("people", existing).await.unwrap(), None);
    assert_eq!(db.count("people").await.unwrap(), 1);
}

#[tokio::test]
async fn failing_batch_applies_nothing() {
    let db = open().await;
    db.add_with_key("settings", "taken", Value::from(1)).await.unwrap();

    let err = db
        .batch()
        .add("people", person("Ghost", 1))
        .add_with_key("settings", "taken", Value::from(2))
        .put_with_key("settings", "other", Value::from(3))
        .commit()
        .await
        .unwrap_err();

    assert!(err.is_duplicate_key());
    assert_eq!(db.count("people").await.unwrap(), 0);
    assert_eq!(db.get("settings", "other").await.unwrap(), None);
    assert_eq!(db.get("settings", "taken").await.unwrap(), Some(Value::from(1)));
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let db = open().await;
    let batch = db.batch();
    assert!(batch.is_empty());
    assert!(batch.commit().await.unwrap().is_empty());
}

#[tokio::test]
async fn operations_after_close_are_connection_errors() {
    let db = open().await;
    let clone = db.clone();
    db.add("people", person("A", 1)).await.unwrap();

    db.close();
    db.close();

    assert!(clone.is_closed());
    assert!(clone.get_all("people").await.unwrap_err().is_connection());
    assert!(clone.add("people", person("B", 2)).await.unwrap_err().is_connection());
    assert!(db.delete("people", 1).await.unwrap_err().is_connection());
    assert!(db
        .batch()
        .delete("people", 1)
        .commit()
        .await
        .unwrap_err()
        .is_connection());
}

#[tokio::test]
async fn collection_names_list_schema() {
    let db = open().await;
    assert_eq!(db.collection_names(), vec!["people", "settings", "tags"]);
    assert_eq!(db.name(), "adapter");
    assert_eq!(db.version(), 1);
}
