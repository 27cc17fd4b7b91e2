//! Multi-write batches committed in one transaction.

use crate::database::{in_line_key, Database, HostTxn};
use crate::error::{StoreError, StoreResult};
use crate::request::{self, Request};
use std::collections::BTreeSet;
use stowage_codec::{Key, Value};
use stowage_host::{HostError, HostTransaction, StorageHost, TransactionMode};
use tracing::debug;

#[derive(Debug, Clone)]
enum BatchWrite {
    Add {
        collection: String,
        record: Value,
        key: Option<Key>,
    },
    Put {
        collection: String,
        record: Value,
        key: Option<Key>,
    },
    Delete {
        collection: String,
        key: Key,
    },
}

impl BatchWrite {
    fn collection(&self) -> &str {
        match self {
            Self::Add { collection, .. } | Self::Put { collection, .. } | Self::Delete { collection, .. } => {
                collection
            }
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Result of one write in a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The record was stored under this key.
    Stored(Key),
    /// The key was deleted (or was already absent).
    Deleted,
}

impl BatchOutcome {
    /// Key a record was stored under, if this was an add or put.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Stored(key) => Some(key),
            Self::Deleted => None,
        }
    }
}

enum Pending {
    Stored(Request<Key>),
    Deleted(Request<()>),
}

/// Writes over one or more collections that commit together or not at all.
///
/// Built with [`Database::batch`].
#[must_use = "a batch does nothing until committed"]
pub struct Batch<'a, H: StorageHost> {
    db: &'a Database<H>,
    writes: Vec<BatchWrite>,
}

impl<'a, H: StorageHost> Batch<'a, H> {
    pub(crate) fn new(db: &'a Database<H>) -> Self {
        Self {
            db,
            writes: Vec::new(),
        }
    }

    /// Queues an insert.
    pub fn add(mut self, collection: impl Into<String>, record: Value) -> Self {
        self.writes.push(BatchWrite::Add {
            collection: collection.into(),
            record,
            key: None,
        });
        self
    }

    /// Queues an insert under an explicit key.
    pub fn add_with_key(mut self, collection: impl Into<String>, key: impl Into<Key>, record: Value) -> Self {
        self.writes.push(BatchWrite::Add {
            collection: collection.into(),
            record,
            key: Some(key.into()),
        });
        self
    }

    /// Queues an upsert.
    pub fn put(mut self, collection: impl Into<String>, record: Value) -> Self {
        self.writes.push(BatchWrite::Put {
            collection: collection.into(),
            record,
            key: None,
        });
        self
    }

    /// Queues an upsert under an explicit key.
    pub fn put_with_key(mut self, collection: impl Into<String>, key: impl Into<Key>, record: Value) -> Self {
        self.writes.push(BatchWrite::Put {
            collection: collection.into(),
            record,
            key: Some(key.into()),
        });
        self
    }

    /// Queues a delete.
    pub fn delete(mut self, collection: impl Into<String>, key: impl Into<Key>) -> Self {
        self.writes.push(BatchWrite::Delete {
            collection: collection.into(),
            key: key.into(),
        });
        self
    }

    /// Number of queued writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies all writes in one read-write transaction.
    ///
    /// Returns one outcome per write, in the order they were queued.
    ///
    /// # Errors
    ///
    /// The first failing write's error, mapped as for the single-record
    /// operations. Nothing from the batch is applied.
    pub async fn commit(self) -> StoreResult<Vec<BatchOutcome>> {
        let Some(first) = self.writes.first() else {
            return Ok(Vec::new());
        };
        let first_collection = first.collection().to_string();

        let scope: BTreeSet<&str> = self.writes.iter().map(BatchWrite::collection).collect();
        let scope: Vec<&str> = scope.into_iter().collect();
        let txn = self
            .db
            .begin("batch", &first_collection, &scope, TransactionMode::ReadWrite)?;

        let mut issued = Vec::with_capacity(self.writes.len());
        for write in &self.writes {
            let pending = match write {
                BatchWrite::Add {
                    collection,
                    record,
                    key,
                } => {
                    let (cb, pending) = request::request();
                    txn.add(collection, record.clone(), key.clone(), cb);
                    Pending::Stored(pending)
                }
                BatchWrite::Put {
                    collection,
                    record,
                    key,
                } => {
                    let (cb, pending) = request::request();
                    txn.put(collection, record.clone(), key.clone(), cb);
                    Pending::Stored(pending)
                }
                BatchWrite::Delete { collection, key } => {
                    let (cb, pending) = request::request();
                    txn.delete(collection, key, cb);
                    Pending::Deleted(pending)
                }
            };
            issued.push(pending);
        }

        let mut outcomes = Vec::with_capacity(issued.len());
        for (write, pending) in self.writes.iter().zip(issued) {
            let result = match pending {
                Pending::Stored(stored) => stored.await.map(BatchOutcome::Stored),
                Pending::Deleted(deleted) => deleted.await.map(|()| BatchOutcome::Deleted),
            };
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    txn.abort();
                    return Err(self.write_error(&txn, write, err));
                }
            }
        }

        let (cb, committed) = request::request();
        txn.commit(cb);
        if let Err(err) = committed.await {
            let overwrite = !self
                .writes
                .iter()
                .any(|w| matches!(w, BatchWrite::Add { .. }));
            return Err(self
                .db
                .write_failed("batch", &first_collection, None, overwrite, err));
        }

        debug!(writes = outcomes.len(), collections = scope.len(), "committed batch");
        Ok(outcomes)
    }

    fn write_error(
        &self,
        txn: &HostTxn<H>,
        write: &BatchWrite,
        err: HostError,
    ) -> StoreError {
        let collection = write.collection();
        match write {
            BatchWrite::Add { record, key, .. } => {
                let known = key.clone().or_else(|| in_line_key(txn, collection, record));
                self.db
                    .write_failed(write.operation(), collection, known, false, err)
            }
            BatchWrite::Put { .. } | BatchWrite::Delete { .. } => {
                self.db.failed(write.operation(), collection, err)
            }
        }
    }
}

impl<H: StorageHost> std::fmt::Debug for Batch<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("database", &self.db.name())
            .field("writes", &self.writes)
            .finish()
    }
}
