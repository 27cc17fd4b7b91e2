//! Store configuration.

/// Configuration for opening a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether `update` calls on the same (collection, key) run one after
    /// another. When disabled, racing updates are last-write-wins.
    pub serialize_updates: bool,

    /// Whether opening with a version lower than the stored one reuses the
    /// stored schema instead of failing.
    pub reuse_newer_schema: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            serialize_updates: true,
            reuse_newer_schema: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether updates to the same key are serialized.
    #[must_use]
    pub const fn serialize_updates(mut self, value: bool) -> Self {
        self.serialize_updates = value;
        self
    }

    /// Sets whether a lower requested version reopens at the stored version.
    #[must_use]
    pub const fn reuse_newer_schema(mut self, value: bool) -> Self {
        self.reuse_newer_schema = value;
        self
    }
}
