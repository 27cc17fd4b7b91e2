//! Dynamic record value type.

use crate::error::{CodecError, CodecResult};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic record value.
///
/// Records stored through Stowage are trees of `Value`s, usually a `Map` at
/// the root. Floats are intentionally not supported: numbers are whole
/// `i64` integers so that equality and ordering stay exact.
///
/// Map entries are kept sorted by [`Value::cmp_canonical`] so that two maps
/// with the same entries compare equal regardless of insertion order. Build
/// maps through [`Value::map`] or [`Value::object`] rather than the raw
/// variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key-value pairs (keys are sorted canonically).
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with sorted keys.
    ///
    /// Keys are sorted by their canonical CBOR encoding (bytewise comparison).
    /// When the same key appears twice the later entry wins.
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        let mut map = Value::Map(Vec::with_capacity(pairs.len()));
        for (key, value) in pairs {
            map.insert_entry(key, value);
        }
        map
    }

    /// Create a map value from text field names.
    ///
    /// ```
    /// use stowage_codec::Value;
    ///
    /// let person = Value::object([("name", Value::from("Ada")), ("age", Value::from(36))]);
    /// assert_eq!(person.get("age"), Some(&Value::Integer(36)));
    /// ```
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::map(
            fields
                .into_iter()
                .map(|(name, value)| (Value::Text(name.into()), value))
                .collect(),
        )
    }

    /// Compare two values for canonical ordering.
    ///
    /// This follows the bytewise order of canonical CBOR encodings, which
    /// is what map key sorting uses.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let self_type = self.major_type();
        let other_type = other.major_type();

        if self_type != other_type {
            return self_type.cmp(&other_type);
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Null, Value::Bool(_)) => Ordering::Greater,
            (Value::Bool(_), Value::Null) => Ordering::Less,
            // Same major type means same sign. Negative integers encode their
            // argument as -1 - n.
            #[allow(clippy::cast_sign_loss)]
            (Value::Integer(a), Value::Integer(b)) => {
                if *a >= 0 {
                    Self::cmp_unsigned_canonical(*a as u64, *b as u64)
                } else {
                    Self::cmp_unsigned_canonical((-1 - *a) as u64, (-1 - *b) as u64)
                }
            }
            (Value::Bytes(a), Value::Bytes(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()).then_with(|| {
                a.iter()
                    .zip(b.iter())
                    .map(|(av, bv)| av.cmp_canonical(bv))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
            (Value::Map(a), Value::Map(b)) => a.len().cmp(&b.len()).then_with(|| {
                a.iter()
                    .zip(b.iter())
                    .map(|((ak, av), (bk, bv))| ak.cmp_canonical(bk).then_with(|| av.cmp_canonical(bv)))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
            _ => Ordering::Equal,
        }
    }

    /// Compare two unsigned integers by their canonical CBOR encoding.
    ///
    /// Shorter encodings sort first; equal lengths compare numerically.
    fn cmp_unsigned_canonical(a: u64, b: u64) -> Ordering {
        Self::cbor_uint_encoded_len(a)
            .cmp(&Self::cbor_uint_encoded_len(b))
            .then_with(|| a.cmp(&b))
    }

    /// Returns the encoded length (in bytes) of an unsigned integer in CBOR.
    fn cbor_uint_encoded_len(n: u64) -> usize {
        if n <= 23 {
            1
        } else if n <= 0xFF {
            2
        } else if n <= 0xFFFF {
            3
        } else if n <= 0xFFFF_FFFF {
            5
        } else {
            9
        }
    }

    /// Get the CBOR major type for this value.
    fn major_type(&self) -> u8 {
        match self {
            Value::Integer(n) if *n >= 0 => 0,
            Value::Integer(_) => 1,
            Value::Bytes(_) => 2,
            Value::Text(_) => 3,
            Value::Array(_) => 4,
            Value::Map(_) => 5,
            Value::Bool(_) | Value::Null => 7,
        }
    }

    /// Short name of this value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a text field in this map value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_text() == Some(field))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Sets a text field on this map value, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAMap`] if this value is not a map.
    pub fn set(&mut self, field: &str, value: Value) -> CodecResult<()> {
        if !self.is_map() {
            return Err(CodecError::NotAMap {
                type_name: self.type_name(),
            });
        }
        self.insert_entry(Value::Text(field.to_string()), value);
        Ok(())
    }

    /// Removes a text field from this map value and returns it.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        match self {
            Value::Map(pairs) => {
                let pos = pairs.iter().position(|(k, _)| k.as_text() == Some(field))?;
                Some(pairs.remove(pos).1)
            }
            _ => None,
        }
    }

    /// Shallow-merges `patch` into this map.
    ///
    /// Every entry of `patch` overwrites the same-named entry here; entries
    /// absent from `patch` are preserved. Nested maps are replaced, not
    /// merged.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAMap`] if either side is not a map.
    pub fn merge_patch(&mut self, patch: &Value) -> CodecResult<()> {
        let Value::Map(patch_pairs) = patch else {
            return Err(CodecError::NotAMap {
                type_name: patch.type_name(),
            });
        };
        if !self.is_map() {
            return Err(CodecError::NotAMap {
                type_name: self.type_name(),
            });
        }
        for (key, value) in patch_pairs {
            self.insert_entry(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Inserts an entry keeping canonical key order. No-op on non-maps.
    fn insert_entry(&mut self, key: Value, value: Value) {
        if let Value::Map(pairs) = self {
            match pairs.binary_search_by(|(k, _)| k.cmp_canonical(&key)) {
                Ok(pos) => pairs[pos].1 = value,
                Err(pos) => pairs.insert(pos, (key, value)),
            }
        }
    }

    /// Converts a JSON document into a value.
    ///
    /// # Errors
    ///
    /// Fails on fractional numbers and integers outside the `i64` range.
    pub fn from_json(json: serde_json::Value) -> CodecResult<Self> {
        serde_json::from_value(json).map_err(|e| {
            let msg = e.to_string();
            match msg.strip_prefix("float values are forbidden: ") {
                Some(value) => CodecError::FloatForbidden {
                    value: value.to_string(),
                },
                None => CodecError::decoding_failed(msg),
            }
        })
    }

    /// Converts this value into a JSON document.
    ///
    /// # Errors
    ///
    /// Fails if a map has keys that JSON cannot express (arrays, maps, bytes).
    pub fn to_json(&self) -> CodecResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (key, value) in pairs {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a record value without floats")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| E::custom(CodecError::IntegerOverflow))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| E::custom(CodecError::IntegerOverflow))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| E::custom(CodecError::IntegerOverflow))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        // Whole numbers arrive as floats from JavaScript and some JSON sources.
        if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
            Ok(Value::Integer(v as i64))
        } else {
            Err(E::custom(CodecError::FloatForbidden {
                value: v.to_string(),
            }))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry()? {
            pairs.push((key, value));
        }
        Ok(Value::map(pairs))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}
