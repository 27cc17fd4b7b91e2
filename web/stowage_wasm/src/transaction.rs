//! Connections and transactions over `IDBDatabase`.

use crate::convert::{key_from_js, key_to_js, value_from_js, value_to_js, values_from_js};
use crate::error::host_error;
use crate::request::{listen, Listener};
use js_sys::Array;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use stowage_codec::{Key, Value};
use stowage_host::{
    Callback, CollectionSpec, HostConnection, HostError, HostErrorKind, HostResult,
    HostTransaction, IndexSpec, TransactionMode,
};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    DomStringList, Event, IdbDatabase, IdbObjectStore, IdbRequest, IdbTransaction,
    IdbTransactionMode,
};

pub(crate) fn string_list(list: &DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.get(i)).collect()
}

/// An open IndexedDB database.
///
/// The connection closes itself when another context requests a version
/// change, so upgrades elsewhere are not blocked by this page.
pub struct IdbConnection {
    db: IdbDatabase,
    name: String,
    version: u32,
    closed: Rc<Cell<bool>>,
    _on_version_change: Listener,
}

impl IdbConnection {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn new(db: IdbDatabase) -> Self {
        let closed = Rc::new(Cell::new(false));
        let on_version_change = {
            let db = db.clone();
            let closed = Rc::clone(&closed);
            Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
                warn!(name = %db.name(), "version change requested elsewhere, closing connection");
                closed.set(true);
                db.close();
            })
        };
        db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));

        Self {
            name: db.name(),
            version: db.version() as u32,
            db,
            closed,
            _on_version_change: on_version_change,
        }
    }
}

impl fmt::Debug for IdbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbConnection")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.closed.get())
            .finish_non_exhaustive()
    }
}

impl HostConnection for IdbConnection {
    type Transaction = IdbTxn;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn transaction(&self, scope: &[&str], mode: TransactionMode) -> HostResult<IdbTxn> {
        if self.is_closed() {
            return Err(HostError::invalid_state(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }
        if scope.is_empty() {
            return Err(HostError::new(
                HostErrorKind::InvalidAccess,
                "transaction scope is empty",
            ));
        }
        let names: Array = scope.iter().map(|name| JsValue::from_str(name)).collect();
        let idb_mode = match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        };
        let inner = self
            .db
            .transaction_with_str_sequence_and_mode(&names, idb_mode)
            .map_err(|e| host_error(&e))?;
        Ok(IdbTxn::new(inner, mode))
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            self.db.set_onversionchange(None);
            self.db.close();
            debug!(name = %self.name, "closed connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

#[derive(Default)]
struct TxnState {
    outcome: Option<HostResult<()>>,
    waiting: Option<Callback<()>>,
    commit_requested: bool,
    listeners: Vec<Listener>,
}

/// A transaction over `IDBTransaction`.
///
/// Completion is tracked from creation, so a commit requested after the
/// browser already finished the transaction still reports its outcome.
/// Dropping a transaction that was never committed aborts it.
pub struct IdbTxn {
    inner: IdbTransaction,
    mode: TransactionMode,
    state: Rc<RefCell<TxnState>>,
}

impl IdbTxn {
    fn new(inner: IdbTransaction, mode: TransactionMode) -> Self {
        let state = Rc::new(RefCell::new(TxnState::default()));

        let on_complete = {
            let state = Rc::clone(&state);
            let txn = inner.clone();
            Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
                finished(&state, &txn, Ok(()));
            })
        };
        let on_abort = {
            let state = Rc::clone(&state);
            let txn = inner.clone();
            Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
                let err = txn.error().map_or_else(
                    || HostError::abort("transaction aborted"),
                    |ex| host_error(&ex.into()),
                );
                finished(&state, &txn, Err(err));
            })
        };
        inner.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        inner.set_onabort(Some(on_abort.as_ref().unchecked_ref()));
        state.borrow_mut().listeners = vec![on_complete, on_abort];

        Self { inner, mode, state }
    }

    fn store(&self, collection: &str) -> HostResult<IdbObjectStore> {
        self.inner.object_store(collection).map_err(|e| host_error(&e))
    }

    /// Routes a request's outcome to `callback`, aborting on a synchronous
    /// failure the same way a failed request would.
    fn issue<T, F>(&self, issued: HostResult<IdbRequest>, callback: Callback<T>, read: F)
    where
        T: 'static,
        F: FnOnce(JsValue) -> HostResult<T> + 'static,
    {
        match issued {
            Ok(request) => listen(&request, callback, read),
            Err(err) => {
                self.abort();
                callback(Err(err));
            }
        }
    }

    fn write(
        &self,
        collection: &str,
        record: &Value,
        key: Option<&Key>,
        overwrite: bool,
    ) -> HostResult<IdbRequest> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(HostError::read_only("write in a read-only transaction"));
        }
        let store = self.store(collection)?;
        let value = value_to_js(record)?;
        let request = match (key, overwrite) {
            (Some(key), false) => store.add_with_key(&value, &key_to_js(key)?),
            (None, false) => store.add(&value),
            (Some(key), true) => store.put_with_key(&value, &key_to_js(key)?),
            (None, true) => store.put(&value),
        };
        request.map_err(|e| host_error(&e))
    }

    fn request_commit(&self) {
        // The browser commits on its own once requests drain; an explicit
        // commit only fails if that already happened.
        if let Err(err) = self.inner.commit() {
            debug!(error = %host_error(&err), "explicit commit skipped");
        }
    }
}

fn finished(
    state: &Rc<RefCell<TxnState>>,
    txn: &IdbTransaction,
    outcome: HostResult<()>,
) {
    txn.set_oncomplete(None);
    txn.set_onabort(None);
    let (waiting, listeners) = {
        let mut state = state.borrow_mut();
        state.outcome = Some(outcome.clone());
        (state.waiting.take(), std::mem::take(&mut state.listeners))
    };
    if let Some(callback) = waiting {
        callback(outcome);
    }
    drop(listeners);
}

impl fmt::Debug for IdbTxn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("IdbTxn")
            .field("mode", &self.mode)
            .field("finished", &state.outcome.is_some())
            .field("commit_requested", &state.commit_requested)
            .finish_non_exhaustive()
    }
}

impl HostTransaction for IdbTxn {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn collection_spec(&self, collection: &str) -> HostResult<CollectionSpec> {
        let store = self.store(collection)?;
        let key_field = store.key_path().map_err(|e| host_error(&e))?.as_string();

        let mut indexes = Vec::new();
        for name in string_list(&store.index_names()) {
            let index = store.index(&name).map_err(|e| host_error(&e))?;
            let field = index
                .key_path()
                .map_err(|e| host_error(&e))?
                .as_string()
                .unwrap_or_default();
            let spec = IndexSpec::new(name, field);
            indexes.push(if index.unique() { spec.unique() } else { spec });
        }

        Ok(CollectionSpec {
            name: collection.to_string(),
            key_field,
            auto_increment: store.auto_increment(),
            indexes,
        })
    }

    fn add(&self, collection: &str, record: Value, key: Option<Key>, callback: Callback<Key>) {
        let issued = self.write(collection, &record, key.as_ref(), false);
        self.issue(issued, callback, key_from_js);
    }

    fn put(&self, collection: &str, record: Value, key: Option<Key>, callback: Callback<Key>) {
        let issued = self.write(collection, &record, key.as_ref(), true);
        self.issue(issued, callback, key_from_js);
    }

    fn get(&self, collection: &str, key: &Key, callback: Callback<Option<Value>>) {
        let issued = self.store(collection).and_then(|store| {
            store.get(&key_to_js(key)?).map_err(|e| host_error(&e))
        });
        self.issue(issued, callback, |result| {
            if result.is_undefined() {
                Ok(None)
            } else {
                value_from_js(result).map(Some)
            }
        });
    }

    fn get_all(&self, collection: &str, callback: Callback<Vec<Value>>) {
        let issued = self
            .store(collection)
            .and_then(|store| store.get_all().map_err(|e| host_error(&e)));
        self.issue(issued, callback, values_from_js);
    }

    fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Key,
        callback: Callback<Vec<Value>>,
    ) {
        let issued = self.store(collection).and_then(|store| {
            let index = store.index(index).map_err(|e| host_error(&e))?;
            index
                .get_all_with_key(&key_to_js(value)?)
                .map_err(|e| host_error(&e))
        });
        self.issue(issued, callback, values_from_js);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&self, collection: &str, callback: Callback<u64>) {
        let issued = self
            .store(collection)
            .and_then(|store| store.count().map_err(|e| host_error(&e)));
        self.issue(issued, callback, |result| {
            result
                .as_f64()
                .map(|n| n as u64)
                .ok_or_else(|| HostError::data("count is not a number"))
        });
    }

    fn delete(&self, collection: &str, key: &Key, callback: Callback<()>) {
        let issued = if self.mode == TransactionMode::ReadOnly {
            Err(HostError::read_only("delete in a read-only transaction"))
        } else {
            self.store(collection).and_then(|store| {
                store.delete(&key_to_js(key)?).map_err(|e| host_error(&e))
            })
        };
        self.issue(issued, callback, |_| Ok(()));
    }

    fn commit(&self, callback: Callback<()>) {
        let outcome = {
            let mut state = self.state.borrow_mut();
            state.commit_requested = true;
            state.outcome.clone()
        };
        match outcome {
            Some(outcome) => callback(outcome),
            None => {
                self.state.borrow_mut().waiting = Some(callback);
                self.request_commit();
            }
        }
    }

    fn abort(&self) {
        if let Err(err) = self.inner.abort() {
            debug!(error = %host_error(&err), "abort after transaction finished");
        }
    }
}

impl Drop for IdbTxn {
    fn drop(&mut self) {
        let abandoned = {
            let state = self.state.borrow();
            state.outcome.is_none() && !state.commit_requested
        };
        if abandoned {
            self.abort();
        }
    }
}
