//! Error types for host operations.

use std::fmt;
use stowage_codec::CodecError;
use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Category of a host failure.
///
/// The variants mirror the DOMException names a browser storage engine
/// reports, so that every host maps its native failures onto the same
/// vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    /// A uniqueness constraint (primary key or unique index) was violated.
    Constraint,
    /// The supplied data or key is not acceptable.
    Data,
    /// A named collection, index or database does not exist.
    NotFound,
    /// A write was attempted in a read-only transaction.
    ReadOnly,
    /// The transaction already finished.
    TransactionInactive,
    /// The connection is closed or otherwise unusable.
    InvalidState,
    /// The request is malformed (for example an empty transaction scope).
    InvalidAccess,
    /// The requested version is lower than the stored version.
    Version,
    /// The transaction or request was aborted.
    Abort,
    /// Storage quota exhausted.
    QuotaExceeded,
    /// Access to storage was denied.
    Security,
    /// Anything the host could not classify.
    Unknown,
}

impl HostErrorKind {
    /// Returns the DOMException-style name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Constraint => "ConstraintError",
            Self::Data => "DataError",
            Self::NotFound => "NotFoundError",
            Self::ReadOnly => "ReadOnlyError",
            Self::TransactionInactive => "TransactionInactiveError",
            Self::InvalidState => "InvalidStateError",
            Self::InvalidAccess => "InvalidAccessError",
            Self::Version => "VersionError",
            Self::Abort => "AbortError",
            Self::QuotaExceeded => "QuotaExceededError",
            Self::Security => "SecurityError",
            Self::Unknown => "UnknownError",
        }
    }

    /// Maps a DOMException name onto a kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "ConstraintError" => Self::Constraint,
            "DataError" | "DataCloneError" => Self::Data,
            "NotFoundError" => Self::NotFound,
            "ReadOnlyError" => Self::ReadOnly,
            "TransactionInactiveError" => Self::TransactionInactive,
            "InvalidStateError" => Self::InvalidState,
            "InvalidAccessError" => Self::InvalidAccess,
            "VersionError" => Self::Version,
            "AbortError" => Self::Abort,
            "QuotaExceededError" => Self::QuotaExceeded,
            "SecurityError" => Self::Security,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure notification delivered by a host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HostError {
    /// Failure category.
    pub kind: HostErrorKind,
    /// The host's own description of the failure.
    pub message: String,
}

impl HostError {
    /// Creates an error of the given kind.
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Constraint, message)
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Data, message)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::NotFound, message)
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::ReadOnly, message)
    }

    /// Creates a transaction-inactive error.
    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::TransactionInactive, message)
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::InvalidState, message)
    }

    /// Creates an abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Abort, message)
    }

    /// Returns true if this error is of the given kind.
    #[must_use]
    pub fn is(&self, kind: HostErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<CodecError> for HostError {
    fn from(err: CodecError) -> Self {
        Self::data(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_name() {
        let err = HostError::constraint("key already exists");
        assert_eq!(err.to_string(), "ConstraintError: key already exists");
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            HostErrorKind::Constraint,
            HostErrorKind::NotFound,
            HostErrorKind::Version,
            HostErrorKind::QuotaExceeded,
            HostErrorKind::Security,
        ] {
            assert_eq!(HostErrorKind::from_name(kind.as_str()), kind);
        }
        assert_eq!(HostErrorKind::from_name("Weird"), HostErrorKind::Unknown);
    }

    #[test]
    fn codec_errors_become_data_errors() {
        let err: HostError = CodecError::InvalidKey { type_name: "map" }.into();
        assert!(err.is(HostErrorKind::Data));
    }
}
