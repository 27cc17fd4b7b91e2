//! Schema declarations shared by hosts and the migrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declaration of a collection (object store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,
    /// Field holding each record's key. `None` means keys are supplied
    /// alongside records (out-of-line keys).
    pub key_field: Option<String>,
    /// Whether the collection generates integer keys for records without one.
    #[serde(default)]
    pub auto_increment: bool,
    /// Secondary indexes created together with the collection.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSpec {
    /// Declares a collection whose records carry their key in `key_field`.
    pub fn new(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: Some(key_field.into()),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Declares a collection with out-of-line keys.
    pub fn out_of_line(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: None,
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Enables key generation.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Adds an index declaration.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Declaration of a secondary index over one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within its collection.
    pub name: String,
    /// Record field the index is built from.
    pub field: String,
    /// Whether two records may share a field value.
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Declares a non-unique index.
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            unique: false,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("readonly"),
            Self::ReadWrite => f.write_str("readwrite"),
        }
    }
}
