//! Host storage facility contract.

use crate::error::HostResult;
use crate::schema::{CollectionSpec, IndexSpec, TransactionMode};
use stowage_codec::{Key, Value};

/// Receives the single outcome of a host request.
///
/// Hosts invoke every callback they accept exactly once, either during the
/// issuing call or later from their own event loop. A host that drops a
/// callback without invoking it has failed to answer the request.
pub type Callback<T> = Box<dyn FnOnce(HostResult<T>) + 'static>;

/// Runs the schema upgrade while an open request holds the version-change
/// lock.
///
/// Returning an error aborts the open request and leaves the database at its
/// previous version.
pub type UpgradeHandler = Box<dyn FnOnce(&mut dyn UpgradeScope) -> HostResult<()> + 'static>;

/// A storage facility that opens versioned databases.
///
/// This is the boundary to the storage engine Stowage drives. The engine
/// owns persistence, indexing and transaction internals; implementations
/// only translate between its native request objects and these callbacks.
///
/// # Invariants
///
/// - Every accepted callback is invoked exactly once
/// - Schema changes only happen inside an [`UpgradeHandler`]
/// - Requests within one transaction complete in issue order
///
/// # Implementors
///
/// - [`crate::MemoryHost`] - in-memory engine for tests and native use
pub trait StorageHost {
    /// Open connection type.
    type Connection: HostConnection + 'static;

    /// Opens database `name`.
    ///
    /// With `Some(version)` higher than the stored version (or for a new
    /// database) `on_upgrade` runs before the callback fires. With `None`
    /// the database opens at its current version, creating it at version 1
    /// if it does not exist. A version lower than the stored one fails with
    /// a `Version` error.
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: UpgradeHandler,
        callback: Callback<Self::Connection>,
    );

    /// Deletes database `name`. Deleting a missing database succeeds.
    fn delete_database(&self, name: &str, callback: Callback<()>);
}

/// An open connection to one database.
pub trait HostConnection {
    /// Transaction type.
    type Transaction: HostTransaction + 'static;

    /// Database name.
    fn name(&self) -> &str;

    /// Schema version this connection was opened at.
    fn version(&self) -> u32;

    /// Names of all collections, in ascending order.
    fn collection_names(&self) -> Vec<String>;

    /// Starts a transaction over a fixed set of collections.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the connection is closed
    /// - `NotFound` if a collection does not exist
    /// - `InvalidAccess` if `scope` is empty
    fn transaction(&self, scope: &[&str], mode: TransactionMode) -> HostResult<Self::Transaction>;

    /// Closes the connection. Transactions already started may finish.
    fn close(&self);

    /// Returns true once [`HostConnection::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// A transaction over a fixed set of collections.
///
/// Requests complete in issue order. The first failing request aborts the
/// transaction and discards all of its writes; later requests fail with
/// `TransactionInactive`.
pub trait HostTransaction {
    /// Access mode fixed at creation.
    fn mode(&self) -> TransactionMode;

    /// Declaration of a collection in scope, including its indexes.
    ///
    /// # Errors
    ///
    /// `NotFound` if the collection is not in the transaction scope.
    fn collection_spec(&self, collection: &str) -> HostResult<CollectionSpec>;

    /// Inserts a record, failing with `Constraint` if its key exists.
    ///
    /// `key` must be given for out-of-line collections without key
    /// generation and must be absent for collections with a key field.
    /// Delivers the key the record was stored under.
    fn add(&self, collection: &str, record: Value, key: Option<Key>, callback: Callback<Key>);

    /// Inserts or replaces a record. Same key rules as [`HostTransaction::add`].
    fn put(&self, collection: &str, record: Value, key: Option<Key>, callback: Callback<Key>);

    /// Fetches one record.
    fn get(&self, collection: &str, key: &Key, callback: Callback<Option<Value>>);

    /// Fetches all records in key order.
    fn get_all(&self, collection: &str, callback: Callback<Vec<Value>>);

    /// Fetches records whose indexed field equals `value`, in key order.
    fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Key,
        callback: Callback<Vec<Value>>,
    );

    /// Counts records.
    fn count(&self, collection: &str, callback: Callback<u64>);

    /// Removes a record. Removing a missing key succeeds.
    fn delete(&self, collection: &str, key: &Key, callback: Callback<()>);

    /// Commits once all issued requests have completed successfully.
    fn commit(&self, callback: Callback<()>);

    /// Aborts, discarding all writes.
    fn abort(&self);
}

/// Schema operations available during a version upgrade.
pub trait UpgradeScope {
    /// Version the database had before this upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    /// Version the database will have once the upgrade succeeds.
    fn new_version(&self) -> u32;

    /// Returns true if the collection exists.
    fn has_collection(&self, name: &str) -> bool;

    /// Creates a collection and its declared indexes.
    ///
    /// # Errors
    ///
    /// `Constraint` if a collection with that name already exists.
    fn create_collection(&mut self, spec: &CollectionSpec) -> HostResult<()>;

    /// Returns true if the collection has an index with that name.
    fn has_index(&self, collection: &str, index: &str) -> bool;

    /// Creates an index over an existing collection, indexing its records.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the collection does not exist
    /// - `Constraint` if the index exists or a unique index would be violated
    fn create_index(&mut self, collection: &str, spec: &IndexSpec) -> HostResult<()>;
}
