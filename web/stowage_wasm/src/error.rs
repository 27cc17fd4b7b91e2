//! Error types for the browser bindings.

use stowage_core::StoreError;
use stowage_host::{HostError, HostErrorKind};
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{DomException, IdbRequest};

/// Errors surfaced to JavaScript callers.
#[derive(Debug, Error)]
pub enum WasmError {
    /// Neither a window nor a worker scope exposes `indexedDB`.
    #[error("IndexedDB is not available in this context")]
    Unavailable,

    /// A schema description passed from JavaScript could not be read.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A value could not cross the JavaScript boundary.
    #[error(transparent)]
    Host(#[from] HostError),
}

impl WasmError {
    /// Name given to the thrown JavaScript `Error`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unavailable => "NotSupportedError",
            Self::Schema(_) => "SchemaError",
            Self::Store(StoreError::Connection { .. }) => "ConnectionError",
            Self::Store(StoreError::Migration { .. }) => "MigrationError",
            Self::Store(StoreError::DuplicateKey { .. }) => "DuplicateKeyError",
            Self::Store(StoreError::NotFound { .. }) => "NotFoundError",
            Self::Store(StoreError::Adapter { .. }) => "AdapterError",
            Self::Host(err) => err.kind.as_str(),
        }
    }
}

impl From<WasmError> for JsValue {
    fn from(err: WasmError) -> Self {
        let js = js_sys::Error::new(&err.to_string());
        js.set_name(err.name());
        js.into()
    }
}

/// Result type for operations exposed to JavaScript.
pub type WasmResult<T> = Result<T, WasmError>;

/// Maps a thrown value or a request's error onto the host vocabulary.
pub(crate) fn host_error(value: &JsValue) -> HostError {
    if let Some(ex) = value.dyn_ref::<DomException>() {
        return HostError::new(HostErrorKind::from_name(&ex.name()), ex.message());
    }
    // IDBFactory.open throws a TypeError for version 0
    if let Some(err) = value.dyn_ref::<js_sys::TypeError>() {
        return HostError::data(String::from(err.message()));
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return HostError::new(HostErrorKind::Unknown, String::from(err.message()));
    }
    HostError::new(HostErrorKind::Unknown, format!("{value:?}"))
}

/// Error carried by a request that fired its `error` event.
pub(crate) fn request_error(request: &IdbRequest) -> HostError {
    match request.error() {
        Ok(Some(ex)) => host_error(&ex.into()),
        Ok(None) => HostError::abort("request failed without an error"),
        Err(err) => host_error(&err),
    }
}
