//! Conversions between records and JavaScript values.
//!
//! Records cross as plain objects. Integer keys travel as numbers and byte
//! keys as `Uint8Array`; IndexedDB hands binary keys back as `ArrayBuffer`.

use js_sys::{Array, ArrayBuffer, Uint8Array};
use serde::Serialize;
use serde_wasm_bindgen::Serializer;
use stowage_codec::{Key, Value};
use stowage_host::{HostError, HostResult};
use wasm_bindgen::{JsCast, JsValue};

/// Largest integer a JavaScript number holds exactly.
const MAX_SAFE_INTEGER: i64 = (1_i64 << 53) - 1;

pub(crate) fn value_to_js(value: &Value) -> HostResult<JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|e| HostError::data(e.to_string()))
}

pub(crate) fn value_from_js(value: JsValue) -> HostResult<Value> {
    serde_wasm_bindgen::from_value(value).map_err(|e| HostError::data(e.to_string()))
}

pub(crate) fn values_from_js(value: JsValue) -> HostResult<Vec<Value>> {
    let array = value
        .dyn_into::<Array>()
        .map_err(|_| HostError::data("expected an array of records"))?;
    array.iter().map(value_from_js).collect()
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn key_to_js(key: &Key) -> HostResult<JsValue> {
    match key {
        Key::Integer(n) if n.unsigned_abs() <= MAX_SAFE_INTEGER.unsigned_abs() => {
            Ok(JsValue::from_f64(*n as f64))
        }
        Key::Integer(n) => Err(HostError::data(format!(
            "integer key {n} does not fit a JavaScript number"
        ))),
        Key::Text(s) => Ok(JsValue::from_str(s)),
        Key::Bytes(b) => Ok(Uint8Array::from(b.as_slice()).into()),
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn key_from_js(value: JsValue) -> HostResult<Key> {
    if let Some(n) = value.as_f64() {
        if n.fract() != 0.0 || n.abs() > MAX_SAFE_INTEGER as f64 {
            return Err(HostError::data(format!("key {n} is not an integer")));
        }
        return Ok(Key::Integer(n as i64));
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::Text(s));
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Ok(Key::Bytes(Uint8Array::new(buffer).to_vec()));
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return Ok(Key::Bytes(bytes.to_vec()));
    }
    Err(HostError::data("unsupported key type"))
}
