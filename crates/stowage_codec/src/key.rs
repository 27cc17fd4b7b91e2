//! Record keys.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::fmt;

/// A primary or index key.
///
/// Keys are totally ordered: all integers sort before all text, and all text
/// before all byte strings. Within a kind the natural order applies. This is
/// the order in which collections iterate their records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key (auto-increment keys are always integers).
    Integer(i64),
    /// Text key.
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
}

impl Key {
    /// Extracts a key from a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] for nulls, booleans, arrays and maps.
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        match value {
            Value::Integer(n) => Ok(Key::Integer(*n)),
            Value::Text(s) => Ok(Key::Text(s.clone())),
            Value::Bytes(b) => Ok(Key::Bytes(b.clone())),
            other => Err(CodecError::InvalidKey {
                type_name: other.type_name(),
            }),
        }
    }

    /// Returns the key as a record value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(n) => Value::Integer(*n),
            Key::Text(s) => Value::Text(s.clone()),
            Key::Bytes(b) => Value::Bytes(b.clone()),
        }
    }

    /// Returns the integer, if this is an integer key.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Key::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s:?}"),
            Key::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl TryFrom<&Value> for Key {
    type Error = CodecError;

    fn try_from(value: &Value) -> CodecResult<Self> {
        Key::from_value(value)
    }
}

impl TryFrom<Value> for Key {
    type Error = CodecError;

    fn try_from(value: Value) -> CodecResult<Self> {
        Key::from_value(&value)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Integer(n) => Value::Integer(n),
            Key::Text(s) => Value::Text(s),
            Key::Bytes(b) => Value::Bytes(b),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_order_integers_text_bytes() {
        let mut keys = vec![
            Key::Bytes(vec![0]),
            Key::from("a"),
            Key::from(10),
            Key::from(-3),
            Key::from(""),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::from(-3),
                Key::from(10),
                Key::from(""),
                Key::from("a"),
                Key::Bytes(vec![0]),
            ]
        );
    }

    #[test]
    fn from_value_rejects_structured_values() {
        assert_eq!(Key::from_value(&Value::from(5)).unwrap(), Key::Integer(5));
        assert!(matches!(
            Key::from_value(&Value::Null),
            Err(CodecError::InvalidKey { type_name: "null" })
        ));
        assert!(Key::from_value(&Value::Array(vec![])).is_err());
        assert!(Key::from_value(&Value::object([("a", Value::Null)])).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Key::from(42).to_string(), "42");
        assert_eq!(Key::from("id").to_string(), "\"id\"");
        assert_eq!(Key::Bytes(vec![0xab, 0x01]).to_string(), "0xab01");
    }
}
