//! # Stowage Core
//!
//! Asynchronous record storage over a callback-driven host.
//!
//! This crate provides:
//! - The connection manager: [`open_database`], [`delete_database`] and
//!   [`Database::close`]
//! - The schema migrator: versioned [`MigrationPlan`]s of [`Migration`]
//!   steps, run inside the host's upgrade window
//! - The async store adapter: [`Database`] operations that each run in one
//!   host transaction and resolve exactly once
//! - A typed error taxonomy ([`StoreError`]) and configuration
//!   ([`StoreConfig`])
//!
//! Futures returned here are not tied to any runtime. They are `!Send`:
//! hosts answer on the thread that issued the request.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod connection;
mod database;
mod error;
mod locks;
pub mod migration;
mod request;

pub use batch::{Batch, BatchOutcome};
pub use config::StoreConfig;
pub use connection::delete_database;
pub use database::{open_database, Database};
pub use error::{StoreError, StoreResult};
pub use migration::{
    Migration, MigrationContext, MigrationOperation, MigrationPlan, MigrationReport, SchemaStep,
};

pub use stowage_codec::{Key, Value};
pub use stowage_host::{CollectionSpec, IndexSpec};
