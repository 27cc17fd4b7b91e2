//! `IDBFactory` as a storage host.

use crate::error::{host_error, request_error, WasmError, WasmResult};
use crate::request::{listen, Listener};
use crate::transaction::{string_list, IdbConnection};
use std::cell::RefCell;
use std::rc::Rc;
use stowage_host::{
    Callback, CollectionSpec, HostError, HostResult, IndexSpec, StorageHost, UpgradeHandler,
    UpgradeScope,
};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Event, IdbDatabase, IdbFactory, IdbIndexParameters, IdbObjectStore, IdbObjectStoreParameters,
    IdbOpenDbRequest, IdbTransaction, IdbVersionChangeEvent, Window, WorkerGlobalScope,
};

/// Storage host backed by the browser's IndexedDB.
///
/// # Example
///
/// ```no_run
/// use stowage_core::{open_database, CollectionSpec, MigrationPlan, Value};
/// use stowage_wasm::IdbHost;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let host = IdbHost::from_global()?;
/// let mut plan = MigrationPlan::new();
/// plan.step(1, "notes", |ctx| {
///     ctx.create_collection(&CollectionSpec::new("notes", "id").auto_increment())
/// })?;
///
/// let db = open_database(&host, "app", 1, &plan).await?;
/// db.add("notes", Value::object([("text", Value::from("hello"))])).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct IdbHost {
    factory: IdbFactory,
}

impl IdbHost {
    /// Wraps an existing factory.
    #[must_use]
    pub fn new(factory: IdbFactory) -> Self {
        Self { factory }
    }

    /// Uses the `indexedDB` of the current window or worker.
    ///
    /// # Errors
    ///
    /// [`WasmError::Unavailable`] when the global scope has no IndexedDB
    /// (for example in an opaque-origin frame).
    pub fn from_global() -> WasmResult<Self> {
        let global = js_sys::global();
        let factory = if let Some(window) = global.dyn_ref::<Window>() {
            window.indexed_db()
        } else if let Some(worker) = global.dyn_ref::<WorkerGlobalScope>() {
            worker.indexed_db()
        } else {
            return Err(WasmError::Unavailable);
        };
        factory
            .map_err(|e| WasmError::Host(host_error(&e)))?
            .map(Self::new)
            .ok_or(WasmError::Unavailable)
    }
}

impl StorageHost for IdbHost {
    type Connection = IdbConnection;

    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: UpgradeHandler,
        callback: Callback<IdbConnection>,
    ) {
        let request = match version {
            Some(version) => self.factory.open_with_u32(name, version),
            None => self.factory.open(name),
        };
        match request {
            Ok(request) => OpenRequest::attach(request, on_upgrade, callback),
            Err(err) => callback(Err(host_error(&err))),
        }
    }

    fn delete_database(&self, name: &str, callback: Callback<()>) {
        match self.factory.delete_database(name) {
            Ok(request) => listen(&request, callback, |_| Ok(())),
            Err(err) => callback(Err(host_error(&err))),
        }
    }
}

struct OpenState {
    callback: Option<Callback<IdbConnection>>,
    on_upgrade: Option<UpgradeHandler>,
    upgrade_failure: Option<HostError>,
    listeners: Vec<Listener>,
    on_upgrade_needed: Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>,
}

/// Listeners of one `IDBOpenDBRequest`.
struct OpenRequest;

impl OpenRequest {
    fn attach(
        request: IdbOpenDbRequest,
        on_upgrade: UpgradeHandler,
        callback: Callback<IdbConnection>,
    ) {
        let state = Rc::new(RefCell::new(OpenState {
            callback: Some(callback),
            on_upgrade: Some(on_upgrade),
            upgrade_failure: None,
            listeners: Vec::new(),
            on_upgrade_needed: None,
        }));

        let on_upgrade_needed = {
            let state = Rc::clone(&state);
            let request = request.clone();
            Closure::<dyn FnMut(IdbVersionChangeEvent)>::new(
                move |event: IdbVersionChangeEvent| Self::upgrade(&state, &request, &event),
            )
        };
        let on_success = {
            let state = Rc::clone(&state);
            let request = request.clone();
            Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
                Self::settle(&state, &request, true);
            })
        };
        let on_error = {
            let state = Rc::clone(&state);
            let request = request.clone();
            Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
                Self::settle(&state, &request, false);
            })
        };
        let on_blocked = Closure::<dyn FnMut(Event)>::new(|_event: Event| {
            warn!("open is blocked by connections in other contexts");
        });

        request.set_onupgradeneeded(Some(on_upgrade_needed.as_ref().unchecked_ref()));
        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));

        let mut guard = state.borrow_mut();
        guard.listeners = vec![on_success, on_error, on_blocked];
        guard.on_upgrade_needed = Some(on_upgrade_needed);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn upgrade(
        state: &Rc<RefCell<OpenState>>,
        request: &IdbOpenDbRequest,
        event: &IdbVersionChangeEvent,
    ) {
        let Some(handler) = state.borrow_mut().on_upgrade.take() else {
            return;
        };
        let old_version = event.old_version() as u32;
        let new_version = event.new_version().map_or(old_version, |v| v as u32);

        let db = match request.result() {
            Ok(db) => db.unchecked_into::<IdbDatabase>(),
            Err(err) => {
                state.borrow_mut().upgrade_failure = Some(host_error(&err));
                return;
            }
        };
        let Some(transaction) = request.transaction() else {
            state.borrow_mut().upgrade_failure =
                Some(HostError::invalid_state("upgrade has no version-change transaction"));
            return;
        };

        debug!(name = %db.name(), old_version, new_version, "running upgrade");
        let mut scope = IdbUpgrade {
            db: &db,
            transaction: &transaction,
            old_version,
            new_version,
        };
        if let Err(err) = handler(&mut scope) {
            state.borrow_mut().upgrade_failure = Some(err);
            if let Err(abort) = transaction.abort() {
                debug!(error = %host_error(&abort), "upgrade already finished");
            }
        }
    }

    fn settle(state: &Rc<RefCell<OpenState>>, request: &IdbOpenDbRequest, succeeded: bool) {
        let (callback, failure, listeners, on_upgrade_needed) = {
            let mut state = state.borrow_mut();
            let Some(callback) = state.callback.take() else {
                return;
            };
            (
                callback,
                state.upgrade_failure.take(),
                std::mem::take(&mut state.listeners),
                state.on_upgrade_needed.take(),
            )
        };
        request.set_onupgradeneeded(None);
        request.set_onsuccess(None);
        request.set_onerror(None);
        request.set_onblocked(None);

        let result = if succeeded {
            request
                .result()
                .map(|db| IdbConnection::new(db.unchecked_into()))
                .map_err(|e| host_error(&e))
        } else {
            Err(failure.unwrap_or_else(|| request_error(request)))
        };
        callback(result);
        drop(listeners);
        drop(on_upgrade_needed);
    }
}

/// Schema operations inside a version-change transaction.
struct IdbUpgrade<'a> {
    db: &'a IdbDatabase,
    transaction: &'a IdbTransaction,
    old_version: u32,
    new_version: u32,
}

impl IdbUpgrade<'_> {
    fn store(&self, collection: &str) -> HostResult<IdbObjectStore> {
        self.transaction
            .object_store(collection)
            .map_err(|e| host_error(&e))
    }
}

fn create_index_on(store: &IdbObjectStore, spec: &IndexSpec) -> HostResult<()> {
    let params = IdbIndexParameters::new();
    params.set_unique(spec.unique);
    store
        .create_index_with_str_and_optional_parameters(&spec.name, &spec.field, &params)
        .map(drop)
        .map_err(|e| host_error(&e))
}

impl UpgradeScope for IdbUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn has_collection(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_collection(&mut self, spec: &CollectionSpec) -> HostResult<()> {
        if spec.name.is_empty() {
            return Err(HostError::data("collection name is empty"));
        }
        if self.has_collection(&spec.name) {
            return Err(HostError::constraint(format!(
                "collection '{}' already exists",
                spec.name
            )));
        }
        let params = IdbObjectStoreParameters::new();
        params.set_auto_increment(spec.auto_increment);
        if let Some(field) = &spec.key_field {
            params.set_key_path(&JsValue::from_str(field));
        }
        let store = self
            .db
            .create_object_store_with_optional_parameters(&spec.name, &params)
            .map_err(|e| host_error(&e))?;
        for index in &spec.indexes {
            create_index_on(&store, index)?;
        }
        Ok(())
    }

    fn has_index(&self, collection: &str, index: &str) -> bool {
        self.store(collection)
            .map(|store| string_list(&store.index_names()).iter().any(|name| name == index))
            .unwrap_or(false)
    }

    fn create_index(&mut self, collection: &str, spec: &IndexSpec) -> HostResult<()> {
        let store = self.store(collection)?;
        if store.index_names().contains(&spec.name) {
            return Err(HostError::constraint(format!(
                "index '{}' already exists on '{collection}'",
                spec.name
            )));
        }
        create_index_on(&store, spec)
    }
}
