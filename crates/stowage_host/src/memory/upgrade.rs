use super::collection::CollectionData;
use crate::backend::UpgradeScope;
use crate::error::{HostError, HostResult};
use crate::schema::{CollectionSpec, IndexSpec};
use std::collections::BTreeMap;

/// Upgrade scope over a staged copy of a database's collections.
pub(crate) struct MemoryUpgrade<'a> {
    old_version: u32,
    new_version: u32,
    collections: &'a mut BTreeMap<String, CollectionData>,
}

impl<'a> MemoryUpgrade<'a> {
    pub(crate) fn new(
        old_version: u32,
        new_version: u32,
        collections: &'a mut BTreeMap<String, CollectionData>,
    ) -> Self {
        Self {
            old_version,
            new_version,
            collections,
        }
    }
}

impl UpgradeScope for MemoryUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    fn create_collection(&mut self, spec: &CollectionSpec) -> HostResult<()> {
        if spec.name.is_empty() {
            return Err(HostError::data("collection name must not be empty"));
        }
        if self.collections.contains_key(&spec.name) {
            return Err(HostError::constraint(format!(
                "collection '{}' already exists",
                spec.name
            )));
        }
        let data = CollectionData::new(spec)?;
        self.collections.insert(spec.name.clone(), data);
        Ok(())
    }

    fn has_index(&self, collection: &str, index: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|data| data.has_index(index))
    }

    fn create_index(&mut self, collection: &str, spec: &IndexSpec) -> HostResult<()> {
        self.collections
            .get_mut(collection)
            .ok_or_else(|| HostError::not_found(format!("collection '{collection}' not found")))?
            .create_index(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostErrorKind;

    #[test]
    fn create_collection_twice_is_a_constraint_error() {
        let mut collections = BTreeMap::new();
        let mut scope = MemoryUpgrade::new(0, 1, &mut collections);
        let spec = CollectionSpec::new("notes", "id");

        scope.create_collection(&spec).unwrap();
        let err = scope.create_collection(&spec).unwrap_err();
        assert!(err.is(HostErrorKind::Constraint));
    }

    #[test]
    fn index_on_missing_collection_is_not_found() {
        let mut collections = BTreeMap::new();
        let mut scope = MemoryUpgrade::new(0, 1, &mut collections);

        let err = scope
            .create_index("ghost", &IndexSpec::new("x", "x"))
            .unwrap_err();
        assert!(err.is(HostErrorKind::NotFound));
        assert!(!scope.has_index("ghost", "x"));
    }

    #[test]
    fn declared_indexes_are_created_with_collection() {
        let mut collections = BTreeMap::new();
        let mut scope = MemoryUpgrade::new(0, 1, &mut collections);
        scope
            .create_collection(&CollectionSpec::new("users", "id").index(IndexSpec::new("by_name", "name")))
            .unwrap();

        assert!(scope.has_collection("users"));
        assert!(scope.has_index("users", "by_name"));
    }
}
