//! # Stowage Host
//!
//! The contract between Stowage and the storage engine it drives, plus an
//! in-memory reference engine.
//!
//! A host is a transactional, versioned, callback-driven record store in the
//! shape of a browser's IndexedDB. Stowage never touches storage directly:
//! every read and write is a request issued against a host transaction whose
//! outcome arrives as exactly one completion notification.
//!
//! ## Design Principles
//!
//! - Hosts own persistence, indexing and transaction semantics
//! - Schema changes happen only inside a version upgrade
//! - Every request is answered exactly once, in issue order per transaction
//! - Failures carry a [`HostErrorKind`] drawn from the DOMException names
//!
//! ## Available Hosts
//!
//! - [`MemoryHost`] - in-memory engine with immediate or queued delivery
//!
//! ## Example
//!
//! ```rust
//! use stowage_host::{
//!     CollectionSpec, HostConnection, HostTransaction, MemoryHost, StorageHost, TransactionMode,
//! };
//! use stowage_codec::{Key, Value};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let host = MemoryHost::new();
//! let conn = Rc::new(RefCell::new(None));
//! let slot = Rc::clone(&conn);
//! host.open(
//!     "app",
//!     Some(1),
//!     Box::new(|scope| scope.create_collection(&CollectionSpec::new("notes", "id").auto_increment())),
//!     Box::new(move |result| *slot.borrow_mut() = result.ok()),
//! );
//! let conn = conn.borrow_mut().take().unwrap();
//!
//! let txn = conn.transaction(&["notes"], TransactionMode::ReadWrite).unwrap();
//! let key = Rc::new(RefCell::new(None));
//! let slot = Rc::clone(&key);
//! txn.add(
//!     "notes",
//!     Value::object([("text", Value::from("hello"))]),
//!     None,
//!     Box::new(move |result| *slot.borrow_mut() = result.ok()),
//! );
//! txn.commit(Box::new(|result| assert!(result.is_ok())));
//!
//! assert_eq!(*key.borrow(), Some(Key::Integer(1)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod schema;

pub use backend::{
    Callback, HostConnection, HostTransaction, StorageHost, UpgradeHandler, UpgradeScope,
};
pub use error::{HostError, HostErrorKind, HostResult};
pub use memory::{Delivery, MemoryConnection, MemoryHost, MemoryHostConfig, MemoryTransaction};
pub use schema::{CollectionSpec, IndexSpec, TransactionMode};
