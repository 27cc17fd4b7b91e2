//! JavaScript-facing store.

use crate::convert::{key_from_js, key_to_js, value_from_js, value_to_js};
use crate::error::{WasmError, WasmResult};
use crate::host::IdbHost;
use js_sys::{Array, Promise};
use serde::Deserialize;
use stowage_codec::{Key, Value};
use stowage_core::{CollectionSpec, Database, IndexSpec, MigrationPlan, SchemaStep};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

/// One schema step as written in JavaScript.
///
/// ```javascript
/// { version: 1, name: "initial",
///   collections: [{ name: "people", key_field: "id", auto_increment: true,
///                   indexes: [{ name: "by_city", field: "city" }] }],
///   indexes: [] }
/// ```
#[derive(Debug, Deserialize)]
struct StepDecl {
    version: u32,
    name: String,
    #[serde(default)]
    collections: Vec<CollectionSpec>,
    #[serde(default)]
    indexes: Vec<IndexDecl>,
}

#[derive(Debug, Deserialize)]
struct IndexDecl {
    collection: String,
    name: String,
    field: String,
    #[serde(default)]
    unique: bool,
}

fn plan_from_js(steps: JsValue) -> WasmResult<MigrationPlan> {
    let steps: Vec<StepDecl> =
        serde_wasm_bindgen::from_value(steps).map_err(|e| WasmError::Schema(e.to_string()))?;
    let mut plan = MigrationPlan::new();
    for decl in steps {
        let mut step = SchemaStep::new(decl.version, decl.name);
        for collection in decl.collections {
            step = step.collection(collection);
        }
        for index in decl.indexes {
            let spec = IndexSpec::new(index.name, index.field);
            step = step.index(index.collection, if index.unique { spec.unique() } else { spec });
        }
        plan.register(Box::new(step))?;
    }
    Ok(plan)
}

fn key_arg(key: JsValue) -> WasmResult<Key> {
    Ok(key_from_js(key)?)
}

fn record_arg(record: JsValue) -> WasmResult<Value> {
    Ok(value_from_js(record)?)
}

fn records_to_js(records: &[Value]) -> WasmResult<JsValue> {
    let array = Array::new();
    for record in records {
        array.push(&value_to_js(record)?);
    }
    Ok(array.into())
}

/// A Stowage database opened over IndexedDB.
///
/// Every operation returns a `Promise`. Failures reject with an `Error`
/// whose `name` is one of `ConnectionError`, `MigrationError`,
/// `DuplicateKeyError`, `NotFoundError` or `AdapterError`.
///
/// ```javascript
/// const store = await Store.open("app", 1, [
///   { version: 1, name: "initial",
///     collections: [{ name: "people", key_field: "id", auto_increment: true }] },
/// ]);
/// const key = await store.add("people", { name: "A", age: 1 });
/// await store.update("people", key, { age: 2 });
/// ```
#[wasm_bindgen]
pub struct Store {
    db: Database<IdbHost>,
}

#[wasm_bindgen]
impl Store {
    /// Opens `name` at `version`, running the schema steps it is missing.
    pub async fn open(name: String, version: u32, steps: JsValue) -> Result<Store, JsValue> {
        let plan = plan_from_js(steps)?;
        let host = IdbHost::from_global()?;
        let db = Database::open(&host, &name, version, &plan)
            .await
            .map_err(WasmError::from)?;
        Ok(Store { db })
    }

    /// Deletes database `name`.
    #[wasm_bindgen(js_name = deleteDatabase)]
    pub async fn delete_database(name: String) -> Result<(), JsValue> {
        let host = IdbHost::from_global()?;
        stowage_core::delete_database(&host, &name)
            .await
            .map_err(WasmError::from)?;
        Ok(())
    }

    /// Database name.
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.db.name().to_string()
    }

    /// Schema version the database is open at.
    #[wasm_bindgen(getter)]
    pub fn version(&self) -> u32 {
        self.db.version()
    }

    /// Names of all collections.
    #[wasm_bindgen(js_name = collectionNames)]
    pub fn collection_names(&self) -> Array {
        self.db
            .collection_names()
            .into_iter()
            .map(JsValue::from)
            .collect()
    }

    /// Inserts a record, resolving to its key.
    pub fn add(&self, collection: String, record: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let key = db.add(&collection, record_arg(record)?).await.map_err(WasmError::from)?;
            Ok(key_to_js(&key).map_err(WasmError::from)?)
        })
    }

    /// Inserts a record under an explicit key.
    #[wasm_bindgen(js_name = addWithKey)]
    pub fn add_with_key(&self, collection: String, key: JsValue, record: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let key = db
                .add_with_key(&collection, key_arg(key)?, record_arg(record)?)
                .await
                .map_err(WasmError::from)?;
            Ok(key_to_js(&key).map_err(WasmError::from)?)
        })
    }

    /// Inserts or replaces a record, resolving to its key.
    pub fn put(&self, collection: String, record: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let key = db.put(&collection, record_arg(record)?).await.map_err(WasmError::from)?;
            Ok(key_to_js(&key).map_err(WasmError::from)?)
        })
    }

    /// Inserts or replaces a record under an explicit key.
    #[wasm_bindgen(js_name = putWithKey)]
    pub fn put_with_key(&self, collection: String, key: JsValue, record: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let key = db
                .put_with_key(&collection, key_arg(key)?, record_arg(record)?)
                .await
                .map_err(WasmError::from)?;
            Ok(key_to_js(&key).map_err(WasmError::from)?)
        })
    }

    /// Resolves to the record, or `undefined` when absent.
    pub fn get(&self, collection: String, key: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let record = db.get(&collection, key_arg(key)?).await.map_err(WasmError::from)?;
            match record {
                Some(record) => Ok(value_to_js(&record).map_err(WasmError::from)?),
                None => Ok(JsValue::UNDEFINED),
            }
        })
    }

    /// Resolves to every record in key order.
    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, collection: String) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let records = db.get_all(&collection).await.map_err(WasmError::from)?;
            Ok(records_to_js(&records)?)
        })
    }

    /// Resolves to the records whose indexed field equals `value`.
    #[wasm_bindgen(js_name = getAllByIndex)]
    pub fn get_all_by_index(&self, collection: String, index: String, value: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let records = db
                .get_all_by_index(&collection, &index, key_arg(value)?)
                .await
                .map_err(WasmError::from)?;
            Ok(records_to_js(&records)?)
        })
    }

    /// Resolves to the number of records.
    #[allow(clippy::cast_precision_loss)]
    pub fn count(&self, collection: String) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let count = db.count(&collection).await.map_err(WasmError::from)?;
            Ok(JsValue::from_f64(count as f64))
        })
    }

    /// Merges `patch` into the stored record, resolving to the result.
    pub fn update(&self, collection: String, key: JsValue, patch: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let updated = db
                .update(&collection, key_arg(key)?, record_arg(patch)?)
                .await
                .map_err(WasmError::from)?;
            Ok(value_to_js(&updated).map_err(WasmError::from)?)
        })
    }

    /// Removes a record. Removing a missing key succeeds.
    pub fn delete(&self, collection: String, key: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            db.delete(&collection, key_arg(key)?)
                .await
                .map_err(WasmError::from)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Closes the database. Later operations reject with `ConnectionError`.
    pub fn close(&self) {
        self.db.close();
    }
}
