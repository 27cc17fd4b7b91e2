//! Collection storage for the in-memory host.

use crate::error::{HostError, HostResult};
use crate::schema::{CollectionSpec, IndexSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use stowage_codec::{Decode, Encode, Key, Value};

/// Entries of one secondary index: field value -> primary keys.
#[derive(Debug, Clone)]
struct IndexData {
    spec: IndexSpec,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    /// Extracts this index's key from a record. Records without the field,
    /// or with a value that is not a valid key, are not indexed.
    fn key_of(&self, record: &Value) -> Option<Key> {
        record
            .get(&self.spec.field)
            .and_then(|v| Key::from_value(v).ok())
    }

    fn check_unique(&self, index_key: &Key, primary: &Key) -> HostResult<()> {
        if !self.spec.unique {
            return Ok(());
        }
        match self.entries.get(index_key) {
            Some(keys) if keys.iter().any(|k| k != primary) => Err(HostError::constraint(format!(
                "unique index '{}' already contains {}",
                self.spec.name, index_key
            ))),
            _ => Ok(()),
        }
    }

    fn insert(&mut self, index_key: Key, primary: Key) {
        self.entries.entry(index_key).or_default().insert(primary);
    }

    fn remove(&mut self, index_key: &Key, primary: &Key) {
        if let Some(keys) = self.entries.get_mut(index_key) {
            keys.remove(primary);
            if keys.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }
}

/// Records of one collection, stored as encoded copies.
///
/// Every record is kept as canonical CBOR so that callers never share
/// memory with stored data.
#[derive(Debug, Clone)]
pub(crate) struct CollectionData {
    spec: CollectionSpec,
    records: BTreeMap<Key, Vec<u8>>,
    /// Next generated key. Starts at 1 and never goes down. Shared by every
    /// copy of the collection, so overlapping transactions draw distinct keys.
    next_key: Arc<AtomicI64>,
    indexes: BTreeMap<String, IndexData>,
}

impl CollectionData {
    /// Creates an empty collection with the indexes declared in `spec`.
    pub(crate) fn new(spec: &CollectionSpec) -> HostResult<Self> {
        let mut data = Self {
            spec: CollectionSpec {
                indexes: Vec::new(),
                ..spec.clone()
            },
            records: BTreeMap::new(),
            next_key: Arc::new(AtomicI64::new(1)),
            indexes: BTreeMap::new(),
        };
        for index in &spec.indexes {
            data.create_index(index)?;
        }
        Ok(data)
    }

    pub(crate) fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub(crate) fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    /// Adds an index and fills it from the existing records.
    pub(crate) fn create_index(&mut self, spec: &IndexSpec) -> HostResult<()> {
        if self.indexes.contains_key(&spec.name) {
            return Err(HostError::constraint(format!(
                "index '{}' already exists on '{}'",
                spec.name, self.spec.name
            )));
        }

        let mut index = IndexData::new(spec.clone());
        for (primary, bytes) in &self.records {
            let record = Value::decode(bytes)?;
            if let Some(index_key) = index.key_of(&record) {
                index.check_unique(&index_key, primary)?;
                index.insert(index_key, primary.clone());
            }
        }

        self.spec.indexes.push(spec.clone());
        self.indexes.insert(spec.name.clone(), index);
        Ok(())
    }

    /// Works out the key a record is stored under, generating one if the
    /// collection allows it. Generated keys are written into the record's
    /// key field for collections with in-line keys.
    pub(crate) fn resolve_key(&mut self, record: &mut Value, explicit: Option<Key>) -> HostResult<Key> {
        let key_field = self.spec.key_field.clone();
        let key = match (key_field.as_deref(), explicit) {
            (Some(_), Some(_)) => {
                return Err(HostError::data(format!(
                    "collection '{}' uses in-line keys; a separate key was provided",
                    self.spec.name
                )))
            }
            (Some(field), None) => {
                if !record.is_map() {
                    return Err(HostError::data(format!(
                        "collection '{}' stores maps keyed by '{}', got {}",
                        self.spec.name,
                        field,
                        record.type_name()
                    )));
                }
                match record.get(field) {
                    Some(value) => Key::from_value(value)?,
                    None if self.spec.auto_increment => {
                        let key = self.generate_key()?;
                        record.set(field, key.to_value())?;
                        key
                    }
                    None => {
                        return Err(HostError::data(format!(
                            "record has no '{}' field and '{}' does not generate keys",
                            field, self.spec.name
                        )))
                    }
                }
            }
            (None, Some(key)) => key,
            (None, None) if self.spec.auto_increment => self.generate_key()?,
            (None, None) => {
                return Err(HostError::data(format!(
                    "collection '{}' uses out-of-line keys and no key was provided",
                    self.spec.name
                )))
            }
        };

        if self.spec.auto_increment {
            if let Key::Integer(n) = key {
                self.next_key.fetch_max(n.saturating_add(1), Ordering::SeqCst);
            }
        }
        Ok(key)
    }

    fn generate_key(&self) -> HostResult<Key> {
        self.next_key
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map(Key::Integer)
            .map_err(|_| {
                HostError::constraint(format!(
                    "key generator of '{}' is exhausted",
                    self.spec.name
                ))
            })
    }

    /// Stores a record under `key`.
    ///
    /// With `overwrite` false an existing key is a constraint error. All
    /// unique indexes are checked before anything is modified.
    pub(crate) fn write(&mut self, key: Key, record: &Value, overwrite: bool) -> HostResult<()> {
        if !overwrite && self.records.contains_key(&key) {
            return Err(HostError::constraint(format!(
                "key {} already exists in '{}'",
                key, self.spec.name
            )));
        }

        let new_index_keys: Vec<Option<Key>> =
            self.indexes.values().map(|index| index.key_of(record)).collect();
        for (index, index_key) in self.indexes.values().zip(&new_index_keys) {
            if let Some(index_key) = index_key {
                index.check_unique(index_key, &key)?;
            }
        }

        let bytes = record.encode()?;
        self.unindex(&key)?;
        for (index, index_key) in self.indexes.values_mut().zip(new_index_keys) {
            if let Some(index_key) = index_key {
                index.insert(index_key, key.clone());
            }
        }
        self.records.insert(key, bytes);
        Ok(())
    }

    /// Removes a record. Returns whether it existed.
    pub(crate) fn remove(&mut self, key: &Key) -> HostResult<bool> {
        self.unindex(key)?;
        Ok(self.records.remove(key).is_some())
    }

    fn unindex(&mut self, key: &Key) -> HostResult<()> {
        let Some(bytes) = self.records.get(key) else {
            return Ok(());
        };
        let old = Value::decode(bytes)?;
        for index in self.indexes.values_mut() {
            if let Some(index_key) = index.key_of(&old) {
                index.remove(&index_key, key);
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: &Key) -> HostResult<Option<Value>> {
        self.records
            .get(key)
            .map(|bytes| Value::decode(bytes).map_err(HostError::from))
            .transpose()
    }

    pub(crate) fn all(&self) -> HostResult<Vec<Value>> {
        self.records
            .values()
            .map(|bytes| Value::decode(bytes).map_err(HostError::from))
            .collect()
    }

    pub(crate) fn by_index(&self, index: &str, value: &Key) -> HostResult<Vec<Value>> {
        let index = self.indexes.get(index).ok_or_else(|| {
            HostError::not_found(format!("index '{}' not found on '{}'", index, self.spec.name))
        })?;
        let Some(keys) = index.entries.get(value) else {
            return Ok(Vec::new());
        };
        keys.iter()
            .filter_map(|key| self.records.get(key))
            .map(|bytes| Value::decode(bytes).map_err(HostError::from))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
