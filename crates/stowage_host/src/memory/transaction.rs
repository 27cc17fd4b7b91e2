use super::collection::CollectionData;
use super::{DbState, Dispatcher};
use crate::backend::{Callback, HostConnection, HostTransaction};
use crate::error::{HostError, HostErrorKind, HostResult};
use crate::schema::{CollectionSpec, TransactionMode};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stowage_codec::{Key, Value};
use tracing::{debug, trace};

/// An open connection to a [`super::MemoryHost`] database.
pub struct MemoryConnection {
    name: String,
    version: u32,
    db: Arc<RwLock<DbState>>,
    closed: AtomicBool,
    dispatcher: Dispatcher,
    next_transaction_id: Arc<AtomicU64>,
}

impl MemoryConnection {
    pub(crate) fn new(
        name: &str,
        version: u32,
        db: Arc<RwLock<DbState>>,
        dispatcher: Dispatcher,
        next_transaction_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            name: name.to_string(),
            version,
            db,
            closed: AtomicBool::new(false),
            dispatcher,
            next_transaction_id,
        }
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl HostConnection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.db.read().collections.keys().cloned().collect()
    }

    fn transaction(&self, scope: &[&str], mode: TransactionMode) -> HostResult<MemoryTransaction> {
        if self.is_closed() {
            return Err(HostError::invalid_state(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }
        if scope.is_empty() {
            return Err(HostError::new(
                HostErrorKind::InvalidAccess,
                "transaction scope must name at least one collection",
            ));
        }
        {
            let db = self.db.read();
            if let Some(missing) = scope.iter().find(|name| !db.collections.contains_key(**name)) {
                return Err(HostError::not_found(format!(
                    "collection '{missing}' not found in '{}'",
                    self.name
                )));
            }
        }

        let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        trace!(txn = id, ?scope, %mode, "started");
        Ok(MemoryTransaction {
            id,
            db: Arc::clone(&self.db),
            scope: scope.iter().map(|s| (*s).to_string()).collect(),
            mode,
            inner: Mutex::new(TxnInner::default()),
            dispatcher: self.dispatcher.clone(),
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(name = %self.name, "closed connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

/// A write applied to a snapshot, replayed on commit.
#[derive(Debug)]
enum WriteOp {
    Add {
        collection: String,
        key: Key,
        record: Value,
    },
    Put {
        collection: String,
        key: Key,
        record: Value,
    },
    Delete {
        collection: String,
        key: Key,
    },
}

impl WriteOp {
    fn collection(&self) -> &str {
        match self {
            Self::Add { collection, .. } | Self::Put { collection, .. } | Self::Delete { collection, .. } => {
                collection
            }
        }
    }

    fn apply(&self, data: &mut CollectionData) -> HostResult<()> {
        match self {
            Self::Add { key, record, .. } => data.write(key.clone(), record, false),
            Self::Put { key, record, .. } => data.write(key.clone(), record, true),
            Self::Delete { key, .. } => data.remove(key).map(|_| ()),
        }
    }
}

#[derive(Debug, Default)]
struct TxnInner {
    state: TxnState,
    /// Per-collection working copies, taken on first access.
    snapshots: HashMap<String, CollectionData>,
    log: Vec<WriteOp>,
}

impl TxnInner {
    fn ensure_active(&self) -> HostResult<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(HostError::transaction_inactive(
                "transaction has already committed",
            )),
            TxnState::Aborted => Err(HostError::transaction_inactive(
                "transaction has been aborted",
            )),
        }
    }

    fn discard(&mut self) {
        self.state = TxnState::Aborted;
        self.snapshots.clear();
        self.log.clear();
    }
}

/// A transaction on a [`MemoryConnection`].
///
/// Reads and writes go to private snapshots of the collections in scope.
/// Commit replays the writes against the committed state; a transaction
/// dropped before commit leaves no trace.
pub struct MemoryTransaction {
    id: u64,
    db: Arc<RwLock<DbState>>,
    scope: BTreeSet<String>,
    mode: TransactionMode,
    inner: Mutex<TxnInner>,
    dispatcher: Dispatcher,
}

impl MemoryTransaction {
    fn run<T, F>(&self, collection: &str, writes: bool, callback: Callback<T>, op: F)
    where
        T: 'static,
        F: FnOnce(&mut CollectionData, &mut Vec<WriteOp>) -> HostResult<T>,
    {
        let result = self.execute(collection, writes, op);
        self.dispatcher.deliver(callback, result);
    }

    fn execute<T, F>(&self, collection: &str, writes: bool, op: F) -> HostResult<T>
    where
        F: FnOnce(&mut CollectionData, &mut Vec<WriteOp>) -> HostResult<T>,
    {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;

        let result = self.access(&mut inner, collection, writes, op);
        if let Err(err) = &result {
            debug!(txn = self.id, collection, error = %err, "failed request aborted transaction");
            inner.discard();
        }
        result
    }

    fn access<T, F>(&self, inner: &mut TxnInner, collection: &str, writes: bool, op: F) -> HostResult<T>
    where
        F: FnOnce(&mut CollectionData, &mut Vec<WriteOp>) -> HostResult<T>,
    {
        if writes && self.mode == TransactionMode::ReadOnly {
            return Err(HostError::read_only(format!(
                "cannot write to '{collection}' in a read-only transaction"
            )));
        }
        if !self.scope.contains(collection) {
            return Err(HostError::not_found(format!(
                "collection '{collection}' is not in the transaction scope"
            )));
        }

        let TxnInner { snapshots, log, .. } = inner;
        let data = match snapshots.entry(collection.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let committed = self.db.read();
                let data = committed.collections.get(collection).ok_or_else(|| {
                    HostError::not_found(format!("collection '{collection}' no longer exists"))
                })?;
                entry.insert(data.clone())
            }
        };
        op(data, log)
    }

    fn finish(&self) -> HostResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;

        let log = std::mem::take(&mut inner.log);
        inner.snapshots.clear();
        if log.is_empty() {
            inner.state = TxnState::Committed;
            return Ok(());
        }

        let mut db = self.db.write();
        match replay(&db, &log) {
            Ok(staged) => {
                db.collections.extend(staged);
                inner.state = TxnState::Committed;
                trace!(txn = self.id, writes = log.len(), "committed");
                Ok(())
            }
            Err(err) => {
                inner.discard();
                debug!(txn = self.id, error = %err, "commit failed");
                Err(err)
            }
        }
    }
}

/// Applies `log` to copies of the committed collections it touches.
fn replay(db: &DbState, log: &[WriteOp]) -> HostResult<HashMap<String, CollectionData>> {
    let mut staged: HashMap<String, CollectionData> = HashMap::new();
    for op in log {
        let name = op.collection();
        let data = match staged.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let committed = db.collections.get(name).ok_or_else(|| {
                    HostError::not_found(format!("collection '{name}' no longer exists"))
                })?;
                entry.insert(committed.clone())
            }
        };
        op.apply(data)?;
    }
    Ok(staged)
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("mode", &self.mode)
            .field("state", &self.inner.lock().state)
            .finish_non_exhaustive()
    }
}

impl HostTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn collection_spec(&self, collection: &str) -> HostResult<CollectionSpec> {
        if !self.scope.contains(collection) {
            return Err(HostError::not_found(format!(
                "collection '{collection}' is not in the transaction scope"
            )));
        }
        self.db
            .read()
            .collections
            .get(collection)
            .map(|data| data.spec().clone())
            .ok_or_else(|| HostError::not_found(format!("collection '{collection}' no longer exists")))
    }

    fn add(&self, collection: &str, mut record: Value, key: Option<Key>, callback: Callback<Key>) {
        self.run(collection, true, callback, |data, log| {
            let key = data.resolve_key(&mut record, key)?;
            data.write(key.clone(), &record, false)?;
            log.push(WriteOp::Add {
                collection: collection.to_string(),
                key: key.clone(),
                record,
            });
            Ok(key)
        });
    }

    fn put(&self, collection: &str, mut record: Value, key: Option<Key>, callback: Callback<Key>) {
        self.run(collection, true, callback, |data, log| {
            let key = data.resolve_key(&mut record, key)?;
            data.write(key.clone(), &record, true)?;
            log.push(WriteOp::Put {
                collection: collection.to_string(),
                key: key.clone(),
                record,
            });
            Ok(key)
        });
    }

    fn get(&self, collection: &str, key: &Key, callback: Callback<Option<Value>>) {
        self.run(collection, false, callback, |data, _| data.get(key));
    }

    fn get_all(&self, collection: &str, callback: Callback<Vec<Value>>) {
        self.run(collection, false, callback, |data, _| data.all());
    }

    fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Key,
        callback: Callback<Vec<Value>>,
    ) {
        self.run(collection, false, callback, |data, _| data.by_index(index, value));
    }

    fn count(&self, collection: &str, callback: Callback<u64>) {
        self.run(collection, false, callback, |data, _| Ok(data.len() as u64));
    }

    fn delete(&self, collection: &str, key: &Key, callback: Callback<()>) {
        self.run(collection, true, callback, |data, log| {
            data.remove(key)?;
            log.push(WriteOp::Delete {
                collection: collection.to_string(),
                key: key.clone(),
            });
            Ok(())
        });
    }

    fn commit(&self, callback: Callback<()>) {
        let result = self.finish();
        self.dispatcher.deliver(callback, result);
    }

    fn abort(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TxnState::Active {
            inner.discard();
            trace!(txn = self.id, "aborted");
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == TxnState::Active && !inner.log.is_empty() {
            debug!(
                txn = self.id,
                discarded = inner.log.len(),
                "dropped before commit"
            );
        }
    }
}
