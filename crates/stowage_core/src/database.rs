//! Async store adapter.
//!
//! [`Database`] turns each record operation into one host transaction:
//! it opens the transaction with the narrowest mode the operation needs,
//! issues the requests, waits for each callback through a oneshot channel and
//! commits before resolving.

use crate::batch::Batch;
use crate::config::StoreConfig;
use crate::connection::{self, Opened};
use crate::error::{StoreError, StoreResult};
use crate::locks::KeyLocks;
use crate::migration::{MigrationPlan, MigrationReport};
use crate::request;
use std::fmt;
use std::rc::Rc;
use stowage_codec::{Key, Value};
use stowage_host::{
    HostConnection, HostError, HostErrorKind, HostTransaction, StorageHost, TransactionMode,
};
use tracing::{debug, info, warn};

/// Transaction type of a host.
pub(crate) type HostTxn<H> =
    <<H as StorageHost>::Connection as HostConnection>::Transaction;

struct DatabaseInner<H: StorageHost> {
    name: String,
    connection: H::Connection,
    config: StoreConfig,
    report: Option<MigrationReport>,
    update_locks: KeyLocks,
}

/// Handle to an open database.
///
/// Cloning is cheap and clones share the connection: closing any clone
/// closes them all.
///
/// # Example
///
/// ```
/// use futures::executor::block_on;
/// use stowage_core::{open_database, MigrationPlan};
/// use stowage_codec::Value;
/// use stowage_host::{CollectionSpec, MemoryHost};
///
/// let mut plan = MigrationPlan::new();
/// plan.step(1, "people", |ctx| {
///     ctx.create_collection(&CollectionSpec::new("people", "id").auto_increment())
/// })
/// .unwrap();
///
/// block_on(async {
///     let db = open_database(&MemoryHost::new(), "app", 1, &plan).await.unwrap();
///     let key = db
///         .add("people", Value::object([("name", Value::from("A")), ("age", Value::from(1))]))
///         .await
///         .unwrap();
///     let updated = db
///         .update("people", key, Value::object([("age", Value::from(2))]))
///         .await
///         .unwrap();
///     assert_eq!(updated.get("age"), Some(&Value::Integer(2)));
///     db.close();
/// });
/// ```
pub struct Database<H: StorageHost> {
    inner: Rc<DatabaseInner<H>>,
}

impl<H: StorageHost> Clone for Database<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: StorageHost> fmt::Debug for Database<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Opens a database with the default [`StoreConfig`].
///
/// See [`Database::open_with_config`].
pub async fn open_database<H: StorageHost>(
    host: &H,
    name: &str,
    version: u32,
    migrations: &MigrationPlan,
) -> StoreResult<Database<H>> {
    Database::open(host, name, version, migrations).await
}

impl<H: StorageHost> Database<H> {
    /// Opens a database with the default [`StoreConfig`].
    pub async fn open(
        host: &H,
        name: &str,
        version: u32,
        migrations: &MigrationPlan,
    ) -> StoreResult<Self> {
        Self::open_with_config(host, name, version, migrations, StoreConfig::default()).await
    }

    /// Opens `name` at `version`.
    ///
    /// A new database, or one stored at a lower version, is upgraded first by
    /// running the migrations with `stored < version <= requested`. Opening
    /// at the stored version runs nothing.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Connection`] for an empty name, version 0, or a host
    ///   refusal (a lower version is only a refusal when
    ///   [`StoreConfig::reuse_newer_schema`] is off)
    /// - [`StoreError::Migration`] if a migration fails; the database keeps
    ///   its prior version and schema
    pub async fn open_with_config(
        host: &H,
        name: &str,
        version: u32,
        migrations: &MigrationPlan,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let Opened { connection, report } =
            connection::connect(host, name, version, migrations, &config).await?;
        Ok(Self {
            inner: Rc::new(DatabaseInner {
                name: name.to_string(),
                connection,
                config,
                report,
                update_locks: KeyLocks::default(),
            }),
        })
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Schema version the database was opened at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.inner.connection.version()
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Report of the upgrade run when this handle was opened, if any.
    #[must_use]
    pub fn migration_report(&self) -> Option<&MigrationReport> {
        self.inner.report.as_ref()
    }

    /// Names of all collections, in ascending order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.connection.collection_names()
    }

    /// Closes the handle and every clone of it. Closing twice is a no-op.
    pub fn close(&self) {
        if !self.is_closed() {
            self.inner.connection.close();
            info!(name = %self.inner.name, "closed database");
        }
    }

    /// Returns true once the handle is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed()
    }

    /// Inserts a record and returns its key.
    ///
    /// For collections with a key field the key is read from the record, or
    /// generated and written into it when the collection auto-increments.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if the key (or a unique index value) is
    /// taken, [`StoreError::Adapter`] for any other request failure.
    pub async fn add(&self, collection: &str, record: Value) -> StoreResult<Key> {
        self.write_one("add", collection, record, None, false).await
    }

    /// Inserts a record under an explicit key (out-of-line collections).
    pub async fn add_with_key(
        &self,
        collection: &str,
        key: impl Into<Key>,
        record: Value,
    ) -> StoreResult<Key> {
        self.write_one("add", collection, record, Some(key.into()), false)
            .await
    }

    /// Inserts or replaces a record and returns its key.
    pub async fn put(&self, collection: &str, record: Value) -> StoreResult<Key> {
        self.write_one("put", collection, record, None, true).await
    }

    /// Inserts or replaces a record under an explicit key.
    pub async fn put_with_key(
        &self,
        collection: &str,
        key: impl Into<Key>,
        record: Value,
    ) -> StoreResult<Key> {
        self.write_one("put", collection, record, Some(key.into()), true)
            .await
    }

    /// Fetches one record. A missing key resolves to `None`.
    pub async fn get(&self, collection: &str, key: impl Into<Key>) -> StoreResult<Option<Value>> {
        let key = key.into();
        let txn = self.begin("get", collection, &[collection], TransactionMode::ReadOnly)?;
        let record = request::issue(|cb| txn.get(collection, &key, cb))
            .await
            .map_err(|e| self.failed("get", collection, e))?;
        self.finish("get", collection, &txn).await?;
        debug!(collection, %key, found = record.is_some(), "get");
        Ok(record)
    }

    /// Fetches all records of a collection, in key order.
    pub async fn get_all(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let txn = self.begin("get_all", collection, &[collection], TransactionMode::ReadOnly)?;
        let records = request::issue(|cb| txn.get_all(collection, cb))
            .await
            .map_err(|e| self.failed("get_all", collection, e))?;
        self.finish("get_all", collection, &txn).await?;
        debug!(collection, count = records.len(), "get_all");
        Ok(records)
    }

    /// Fetches the records whose indexed field equals `value`, in key order.
    pub async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Key>,
    ) -> StoreResult<Vec<Value>> {
        let value = value.into();
        let txn = self.begin(
            "get_all_by_index",
            collection,
            &[collection],
            TransactionMode::ReadOnly,
        )?;
        let records = request::issue(|cb| txn.get_all_by_index(collection, index, &value, cb))
            .await
            .map_err(|e| self.failed("get_all_by_index", collection, e))?;
        self.finish("get_all_by_index", collection, &txn).await?;
        debug!(collection, index, %value, count = records.len(), "get_all_by_index");
        Ok(records)
    }

    /// Counts the records of a collection.
    pub async fn count(&self, collection: &str) -> StoreResult<u64> {
        let txn = self.begin("count", collection, &[collection], TransactionMode::ReadOnly)?;
        let count = request::issue(|cb| txn.count(collection, cb))
            .await
            .map_err(|e| self.failed("count", collection, e))?;
        self.finish("count", collection, &txn).await?;
        Ok(count)
    }

    /// Merges `patch` into the record at `key` and returns the result.
    ///
    /// Fields of `patch` overwrite same-named fields, all other fields are
    /// kept, and the merged record replaces the stored one. The read and the
    /// write share one read-write transaction. Unless
    /// [`StoreConfig::serialize_updates`] is off, updates to the same key
    /// run one at a time in arrival order.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if nothing is stored at `key`
    /// - [`StoreError::Adapter`] if `patch` is not a map, if it changes the
    ///   collection's key field, or for any request failure
    pub async fn update(
        &self,
        collection: &str,
        key: impl Into<Key>,
        patch: Value,
    ) -> StoreResult<Value> {
        let key = key.into();
        if !patch.is_map() {
            return Err(StoreError::adapter(
                "update",
                collection,
                HostError::data(format!("patch must be a map, got {}", patch.type_name())),
            ));
        }

        let _guard = if self.inner.config.serialize_updates {
            Some(self.inner.update_locks.lock(collection, &key).await)
        } else {
            None
        };

        let txn = self.begin("update", collection, &[collection], TransactionMode::ReadWrite)?;
        let current = request::issue(|cb| txn.get(collection, &key, cb))
            .await
            .map_err(|e| self.failed("update", collection, e))?;
        let Some(mut record) = current else {
            txn.abort();
            return Err(StoreError::not_found(collection, key));
        };

        let spec = txn
            .collection_spec(collection)
            .map_err(|e| self.failed("update", collection, e))?;
        if let Some(field) = spec.key_field.as_deref() {
            if let Some(patched) = patch.get(field) {
                if Key::from_value(patched).ok().as_ref() != Some(&key) {
                    txn.abort();
                    return Err(StoreError::adapter(
                        "update",
                        collection,
                        HostError::data(format!("patch may not change key field '{field}'")),
                    ));
                }
            }
        }

        if let Err(err) = record.merge_patch(&patch) {
            txn.abort();
            return Err(StoreError::invalid_data("update", collection, err));
        }

        let explicit_key = spec.key_field.is_none().then(|| key.clone());
        request::issue(|cb| txn.put(collection, record.clone(), explicit_key, cb))
            .await
            .map_err(|e| self.failed("update", collection, e))?;
        self.finish("update", collection, &txn).await?;
        debug!(collection, %key, "update");
        Ok(record)
    }

    /// Removes a record. Removing a missing key succeeds.
    pub async fn delete(&self, collection: &str, key: impl Into<Key>) -> StoreResult<()> {
        let key = key.into();
        let txn = self.begin("delete", collection, &[collection], TransactionMode::ReadWrite)?;
        request::issue(|cb| txn.delete(collection, &key, cb))
            .await
            .map_err(|e| self.failed("delete", collection, e))?;
        self.finish("delete", collection, &txn).await?;
        debug!(collection, %key, "delete");
        Ok(())
    }

    /// Starts a batch of writes committed in one transaction.
    #[must_use]
    pub fn batch(&self) -> Batch<'_, H> {
        Batch::new(self)
    }

    async fn write_one(
        &self,
        operation: &'static str,
        collection: &str,
        record: Value,
        key: Option<Key>,
        overwrite: bool,
    ) -> StoreResult<Key> {
        let txn = self.begin(operation, collection, &[collection], TransactionMode::ReadWrite)?;
        let known_key = key.clone().or_else(|| in_line_key(&txn, collection, &record));

        let stored = request::issue(|cb| {
            if overwrite {
                txn.put(collection, record, key, cb);
            } else {
                txn.add(collection, record, key, cb);
            }
        })
        .await
        .map_err(|e| self.write_failed(operation, collection, known_key.clone(), overwrite, e))?;

        let (cb, committed) = request::request();
        txn.commit(cb);
        committed.await.map_err(|e| {
            self.write_failed(operation, collection, Some(stored.clone()), overwrite, e)
        })?;

        debug!(collection, key = %stored, operation, "stored record");
        Ok(stored)
    }

    /// Starts a transaction for one adapter operation.
    pub(crate) fn begin(
        &self,
        operation: &'static str,
        collection: &str,
        scope: &[&str],
        mode: TransactionMode,
    ) -> StoreResult<HostTxn<H>> {
        if self.is_closed() {
            return Err(self.closed());
        }
        self.inner
            .connection
            .transaction(scope, mode)
            .map_err(|e| self.failed(operation, collection, e))
    }

    /// Commits a transaction whose requests all succeeded.
    pub(crate) async fn finish(
        &self,
        operation: &'static str,
        collection: &str,
        txn: &HostTxn<H>,
    ) -> StoreResult<()> {
        request::issue(|cb| txn.commit(cb))
            .await
            .map_err(|e| self.failed(operation, collection, e))
    }

    fn closed(&self) -> StoreError {
        StoreError::connection(format!("database '{}' is closed", self.inner.name))
    }

    /// Maps a host failure of any request.
    pub(crate) fn failed(&self, operation: &'static str, collection: &str, err: HostError) -> StoreError {
        if err.is(HostErrorKind::InvalidState) || self.is_closed() {
            return StoreError::connection_from(
                format!("database '{}' is not usable", self.inner.name),
                err,
            );
        }
        if err.is(HostErrorKind::Abort) || err.is(HostErrorKind::TransactionInactive) {
            warn!(collection, operation, error = %err, "transaction aborted");
        }
        StoreError::adapter(operation, collection, err)
    }

    /// Maps a host failure of an insert or upsert.
    pub(crate) fn write_failed(
        &self,
        operation: &'static str,
        collection: &str,
        key: Option<Key>,
        overwrite: bool,
        err: HostError,
    ) -> StoreError {
        if !overwrite && err.is(HostErrorKind::Constraint) {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
                source: err,
            };
        }
        self.failed(operation, collection, err)
    }
}

/// Key carried inside a record, for collections with a key field.
pub(crate) fn in_line_key<T: HostTransaction>(
    txn: &T,
    collection: &str,
    record: &Value,
) -> Option<Key> {
    let spec = txn.collection_spec(collection).ok()?;
    let field = spec.key_field?;
    record.get(&field).and_then(|v| Key::from_value(v).ok())
}
