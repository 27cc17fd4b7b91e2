//! # Stowage WASM
//!
//! Runs Stowage in the browser over IndexedDB.
//!
//! This crate provides:
//! - [`IdbHost`], the storage host contract implemented over `indexedDB`,
//!   usable with every `stowage_core` operation from Rust
//! - [`Store`], a JavaScript-facing handle via wasm-bindgen
//!
//! ## Usage
//!
//! ```javascript
//! import init, { Store } from 'stowage_wasm';
//!
//! async function main() {
//!     await init();
//!
//!     const store = await Store.open("app", 1, [
//!         { version: 1, name: "initial",
//!           collections: [{ name: "people", key_field: "id", auto_increment: true }] },
//!     ]);
//!     const key = await store.add("people", { name: "A", age: 1 });
//!     const updated = await store.update("people", key, { age: 2 });
//!     console.log(updated);
//!
//!     store.close();
//! }
//! ```
//!
//! Connections close themselves when another tab upgrades the same
//! database; later operations then fail with a connection error and the
//! page should reopen.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod convert;
mod error;
mod host;
mod request;
mod store;
mod transaction;
mod utils;

pub use error::{WasmError, WasmResult};
pub use host::IdbHost;
pub use store::Store;
pub use transaction::{IdbConnection, IdbTxn};

use wasm_bindgen::prelude::*;

/// Initialize the WASM module.
///
/// This sets up panic hooks for better error messages in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
}
