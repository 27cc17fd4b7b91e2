//! Schema migration support.
//!
//! This module declares collections and indexes while a database is being
//! upgraded to a new version.
//!
//! ## Design Philosophy
//!
//! Migrations in Stowage are:
//! - **Versioned**: each entry targets one schema version; an upgrade from
//!   `old` to `new` runs the entries with `old < version <= new`, in order
//! - **Forward-only**: there is no rollback step; a failing entry aborts the
//!   whole upgrade and the host keeps the previous schema
//! - **Idempotent**: declaring something that already exists is skipped
//! - **Synchronous**: entries run inside the host's version-change window
//!
//! ## Usage
//!
//! ```
//! use stowage_core::migration::{MigrationPlan, SchemaStep};
//! use stowage_host::{CollectionSpec, IndexSpec};
//!
//! let mut plan = MigrationPlan::new();
//! plan.register(Box::new(
//!     SchemaStep::new(1, "create_users")
//!         .collection(CollectionSpec::new("users", "id").auto_increment()),
//! ))
//! .unwrap();
//! plan.step(2, "index_email", |ctx| {
//!     ctx.create_index("users", &IndexSpec::new("email", "email").unique())
//! })
//! .unwrap();
//!
//! assert_eq!(plan.latest_version(), Some(2));
//! assert!(plan.validate().is_ok());
//! ```

use crate::error::{StoreError, StoreResult};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use stowage_host::{CollectionSpec, IndexSpec, UpgradeScope};
use tracing::{debug, info};

/// Version number for migrations.
pub type MigrationVersion = u32;

/// Information about a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version number (unique).
    pub version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// An operation performed (or skipped) during a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Created a new collection.
    CreateCollection {
        /// Name of the collection.
        name: String,
    },
    /// Created an index.
    CreateIndex {
        /// Collection the index is on.
        collection: String,
        /// Name of the index.
        index_name: String,
    },
    /// Custom operation.
    Custom {
        /// Description of the operation.
        description: String,
    },
}

impl fmt::Display for MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection { name } => write!(f, "create collection '{name}'"),
            Self::CreateIndex {
                collection,
                index_name,
            } => write!(f, "create index '{index_name}' on '{collection}'"),
            Self::Custom { description } => f.write_str(description),
        }
    }
}

/// Context passed to migration steps.
///
/// Wraps the host's upgrade scope. Every declaration is checked against the
/// current schema first, so re-declaring an existing collection or index is
/// recorded as skipped instead of failing.
pub struct MigrationContext<'a> {
    scope: &'a mut dyn UpgradeScope,
    version: MigrationVersion,
    operations: Vec<MigrationOperation>,
    skipped: Vec<MigrationOperation>,
}

impl<'a> MigrationContext<'a> {
    fn new(scope: &'a mut dyn UpgradeScope, version: MigrationVersion) -> Self {
        Self {
            scope,
            version,
            operations: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Version of the migration currently running.
    #[must_use]
    pub fn version(&self) -> MigrationVersion {
        self.version
    }

    /// Version the database had before this upgrade (0 if it is new).
    #[must_use]
    pub fn old_version(&self) -> MigrationVersion {
        self.scope.old_version()
    }

    /// Version the database is being upgraded to.
    #[must_use]
    pub fn new_version(&self) -> MigrationVersion {
        self.scope.new_version()
    }

    /// Returns true if the collection exists.
    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.scope.has_collection(name)
    }

    /// Returns true if the collection has the named index.
    #[must_use]
    pub fn has_index(&self, collection: &str, index: &str) -> bool {
        self.scope.has_index(collection, index)
    }

    /// Declares a collection together with its indexes.
    ///
    /// An existing collection is left as it is, but any of the declared
    /// indexes it lacks are still created.
    pub fn create_collection(&mut self, spec: &CollectionSpec) -> StoreResult<()> {
        if self.scope.has_collection(&spec.name) {
            self.skip(MigrationOperation::CreateCollection {
                name: spec.name.clone(),
            });
            for index in &spec.indexes {
                self.create_index(&spec.name, index)?;
            }
            return Ok(());
        }

        self.scope.create_collection(spec).map_err(|e| {
            StoreError::migration(format!("cannot create collection '{}': {}", spec.name, e))
        })?;
        self.operations.push(MigrationOperation::CreateCollection {
            name: spec.name.clone(),
        });
        for index in &spec.indexes {
            self.operations.push(MigrationOperation::CreateIndex {
                collection: spec.name.clone(),
                index_name: index.name.clone(),
            });
        }
        Ok(())
    }

    /// Declares an index on an existing collection.
    ///
    /// # Errors
    ///
    /// Fails if the collection does not exist, or if a unique index would be
    /// violated by records already stored.
    pub fn create_index(&mut self, collection: &str, spec: &IndexSpec) -> StoreResult<()> {
        if !self.scope.has_collection(collection) {
            return Err(StoreError::migration(format!(
                "cannot create index '{}': collection '{}' does not exist",
                spec.name, collection
            )));
        }
        if self.scope.has_index(collection, &spec.name) {
            self.skip(MigrationOperation::CreateIndex {
                collection: collection.to_string(),
                index_name: spec.name.clone(),
            });
            return Ok(());
        }

        self.scope.create_index(collection, spec).map_err(|e| {
            StoreError::migration(format!(
                "cannot create index '{}' on '{}': {}",
                spec.name, collection, e
            ))
        })?;
        self.operations.push(MigrationOperation::CreateIndex {
            collection: collection.to_string(),
            index_name: spec.name.clone(),
        });
        Ok(())
    }

    /// Records a custom operation.
    pub fn custom(&mut self, description: &str) {
        self.operations.push(MigrationOperation::Custom {
            description: description.to_string(),
        });
    }

    /// Operations performed so far.
    #[must_use]
    pub fn operations(&self) -> &[MigrationOperation] {
        &self.operations
    }

    fn skip(&mut self, operation: MigrationOperation) {
        debug!(version = self.version, %operation, "skipped, already present");
        self.skipped.push(operation);
    }
}

impl fmt::Debug for MigrationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationContext")
            .field("version", &self.version)
            .field("operations", &self.operations)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

/// Trait for defining migrations.
pub trait Migration {
    /// Returns the schema version this migration produces.
    ///
    /// Versions must be unique within a plan and at least 1.
    fn version(&self) -> MigrationVersion;

    /// Returns the name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Runs the migration.
    fn up(&self, ctx: &mut MigrationContext<'_>) -> StoreResult<()>;
}

/// A declarative migration: collections and indexes to ensure exist.
#[derive(Debug, Clone)]
pub struct SchemaStep {
    version: MigrationVersion,
    name: String,
    description: Option<String>,
    collections: Vec<CollectionSpec>,
    indexes: Vec<(String, IndexSpec)>,
}

impl SchemaStep {
    /// Creates an empty step.
    pub fn new(version: MigrationVersion, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            description: None,
            collections: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares a collection (with the indexes in its spec).
    #[must_use]
    pub fn collection(mut self, spec: CollectionSpec) -> Self {
        self.collections.push(spec);
        self
    }

    /// Declares an index on a collection created by this or an earlier step.
    #[must_use]
    pub fn index(mut self, collection: impl Into<String>, spec: IndexSpec) -> Self {
        self.indexes.push((collection.into(), spec));
        self
    }
}

impl Migration for SchemaStep {
    fn version(&self) -> MigrationVersion {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> StoreResult<()> {
        for spec in &self.collections {
            ctx.create_collection(spec)?;
        }
        for (collection, spec) in &self.indexes {
            ctx.create_index(collection, spec)?;
        }
        Ok(())
    }
}

/// A migration backed by a closure.
struct FnMigration<F> {
    version: MigrationVersion,
    name: String,
    up: F,
}

impl<F> Migration for FnMigration<F>
where
    F: Fn(&mut MigrationContext<'_>) -> StoreResult<()>,
{
    fn version(&self) -> MigrationVersion {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> StoreResult<()> {
        (self.up)(ctx)
    }
}

/// One migration applied during an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Version number.
    pub version: MigrationVersion,
    /// Migration name.
    pub name: String,
    /// Operations it performed.
    pub operations: Vec<MigrationOperation>,
}

/// Summary of one version upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version before the upgrade (0 for a new database).
    pub from_version: MigrationVersion,
    /// Version after the upgrade.
    pub to_version: MigrationVersion,
    /// Migrations that ran, in order.
    pub applied: Vec<AppliedMigration>,
    /// Declarations skipped because they already existed.
    pub skipped: Vec<MigrationOperation>,
}

impl MigrationReport {
    /// Number of migrations that ran.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// All operations performed, across migrations.
    pub fn operations(&self) -> impl Iterator<Item = &MigrationOperation> {
        self.applied.iter().flat_map(|m| m.operations.iter())
    }
}

/// Ordered set of migrations describing a schema's history.
///
/// Cloning is cheap; clones share the registered migrations.
#[derive(Clone, Default)]
pub struct MigrationPlan {
    migrations: BTreeMap<MigrationVersion, Rc<dyn Migration>>,
}

impl MigrationPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration.
    ///
    /// # Errors
    ///
    /// Fails if the version is 0 or already registered.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> StoreResult<()> {
        let version = migration.version();
        if version == 0 {
            return Err(StoreError::migration(format!(
                "migration '{}' has version 0; versions start at 1",
                migration.name()
            )));
        }
        if self.migrations.contains_key(&version) {
            return Err(StoreError::migration(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, Rc::from(migration));
        Ok(())
    }

    /// Registers a closure as the migration for `version`.
    pub fn step<F>(&mut self, version: MigrationVersion, name: impl Into<String>, up: F) -> StoreResult<()>
    where
        F: Fn(&mut MigrationContext<'_>) -> StoreResult<()> + 'static,
    {
        self.register(Box::new(FnMigration {
            version,
            name: name.into(),
            up,
        }))
    }

    /// Returns the registered migrations in version order.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info_of(m.as_ref())).collect()
    }

    /// Returns the migrations an upgrade from `from` to `to` would run.
    #[must_use]
    pub fn pending(&self, from: MigrationVersion, to: MigrationVersion) -> Vec<MigrationInfo> {
        self.range(from, to).map(|m| info_of(m.as_ref())).collect()
    }

    /// Highest registered version.
    #[must_use]
    pub fn latest_version(&self) -> Option<MigrationVersion> {
        self.migrations.keys().next_back().copied()
    }

    /// Number of registered migrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns true if no migrations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Validates that versions are sequential from 1 with no gaps.
    pub fn validate(&self) -> StoreResult<()> {
        for (i, version) in self.migrations.keys().enumerate() {
            let expected = MigrationVersion::try_from(i + 1).unwrap_or(MigrationVersion::MAX);
            if *version != expected {
                return Err(StoreError::migration(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }

    fn range(
        &self,
        from: MigrationVersion,
        to: MigrationVersion,
    ) -> impl Iterator<Item = &Rc<dyn Migration>> {
        self.migrations
            .iter()
            .filter(move |(v, _)| **v > from && **v <= to)
            .map(|(_, m)| m)
    }

    /// Runs the migrations due for the scope's version change.
    ///
    /// Stops at the first failure, which the caller must turn into an
    /// aborted upgrade.
    pub(crate) fn run(&self, scope: &mut dyn UpgradeScope) -> StoreResult<MigrationReport> {
        let from = scope.old_version();
        let to = scope.new_version();
        let mut report = MigrationReport {
            from_version: from,
            to_version: to,
            ..MigrationReport::default()
        };

        for migration in self.range(from, to) {
            let version = migration.version();
            let mut ctx = MigrationContext::new(&mut *scope, version);
            migration.up(&mut ctx).map_err(|e| match e {
                StoreError::Migration { message } => StoreError::migration(format!(
                    "migration {} '{}': {}",
                    version,
                    migration.name(),
                    message
                )),
                other => StoreError::migration(format!(
                    "migration {} '{}': {}",
                    version,
                    migration.name(),
                    other
                )),
            })?;

            info!(
                version,
                name = migration.name(),
                operations = ctx.operations.len(),
                "applied migration"
            );
            let MigrationContext {
                operations, skipped, ..
            } = ctx;
            report.skipped.extend(skipped);
            report.applied.push(AppliedMigration {
                version,
                name: migration.name().to_string(),
                operations,
            });
        }

        Ok(report)
    }
}

fn info_of(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}

impl fmt::Debug for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}
