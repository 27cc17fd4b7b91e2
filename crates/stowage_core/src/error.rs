//! Error types for the store adapter.

use stowage_codec::{CodecError, Key};
use stowage_host::{HostError, HostErrorKind};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by [`crate::Database`] and the connection manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened, or the handle is closed.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
        /// Host failure behind it, if any.
        #[source]
        source: Option<HostError>,
    },

    /// A schema upgrade step failed. The database keeps its prior version.
    #[error("migration failed: {message}")]
    Migration {
        /// Description of the failure.
        message: String,
    },

    /// An insert collided with an existing key or a unique index entry.
    #[error("duplicate key in collection '{collection}': {source}")]
    DuplicateKey {
        /// Target collection.
        collection: String,
        /// Primary key of the rejected record, when known before the write.
        key: Option<Key>,
        /// Host constraint failure.
        #[source]
        source: HostError,
    },

    /// No record is stored at the key.
    #[error("no record with key {key} in collection '{collection}'")]
    NotFound {
        /// Target collection.
        collection: String,
        /// Missing key.
        key: Key,
    },

    /// Any other request failure, with the host's own detail.
    #[error("{operation} on '{collection}' failed: {source}")]
    Adapter {
        /// Adapter operation that failed.
        operation: &'static str,
        /// Target collection.
        collection: String,
        /// Host failure.
        #[source]
        source: HostError,
    },
}

impl StoreError {
    /// Creates a connection error without a host cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection error caused by a host failure.
    pub fn connection_from(message: impl Into<String>, source: HostError) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a migration error.
    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(collection: impl Into<String>, key: Key) -> Self {
        Self::NotFound {
            collection: collection.into(),
            key,
        }
    }

    /// Creates an adapter error.
    pub fn adapter(operation: &'static str, collection: impl Into<String>, source: HostError) -> Self {
        Self::Adapter {
            operation,
            collection: collection.into(),
            source,
        }
    }

    /// Creates an adapter error for a record the codec rejected.
    pub(crate) fn invalid_data(
        operation: &'static str,
        collection: impl Into<String>,
        source: CodecError,
    ) -> Self {
        Self::adapter(operation, collection, HostError::from(source))
    }

    /// Host error kind behind this error, if it came from the host.
    #[must_use]
    pub fn host_kind(&self) -> Option<HostErrorKind> {
        match self {
            Self::Connection { source, .. } => source.as_ref().map(|e| e.kind),
            Self::DuplicateKey { source, .. } | Self::Adapter { source, .. } => Some(source.kind),
            Self::Migration { .. } | Self::NotFound { .. } => None,
        }
    }

    /// Returns true for [`StoreError::Connection`].
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns true for [`StoreError::Migration`].
    #[must_use]
    pub fn is_migration(&self) -> bool {
        matches!(self, Self::Migration { .. })
    }

    /// Returns true for [`StoreError::DuplicateKey`].
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Returns true for [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`StoreError::Adapter`].
    #[must_use]
    pub fn is_adapter(&self) -> bool {
        matches!(self, Self::Adapter { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn adapter_error_keeps_host_detail() {
        let err = StoreError::adapter("get", "users", HostError::data("bad key"));

        assert_eq!(err.to_string(), "get on 'users' failed: DataError: bad key");
        assert_eq!(err.host_kind(), Some(HostErrorKind::Data));
        assert!(err.source().is_some());
    }

    #[test]
    fn not_found_names_the_key() {
        let err = StoreError::not_found("users", Key::from("alice"));
        assert_eq!(
            err.to_string(),
            "no record with key \"alice\" in collection 'users'"
        );
        assert!(err.is_not_found());
        assert_eq!(err.host_kind(), None);
    }

    #[test]
    fn connection_error_source_is_optional() {
        assert!(StoreError::connection("closed").source().is_none());
        let err = StoreError::connection_from("open failed", HostError::invalid_state("gone"));
        assert_eq!(err.host_kind(), Some(HostErrorKind::InvalidState));
    }

    #[test]
    fn codec_failures_are_data_errors() {
        let err = StoreError::invalid_data("update", "users", CodecError::NotAMap { type_name: "text" });
        assert!(err.is_adapter());
        assert_eq!(err.host_kind(), Some(HostErrorKind::Data));
    }
}
