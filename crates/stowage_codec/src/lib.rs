//! # Stowage Codec
//!
//! Record values, keys and CBOR encoding for Stowage.
//!
//! This crate provides:
//! - [`Value`], the structured record type stored in collections
//! - [`Key`], the ordered primary/index key type
//! - Canonical CBOR encoding, used by hosts to keep an independent copy of
//!   every stored record
//! - Shallow field merging for read-modify-write updates
//!
//! ## Usage
//!
//! ```
//! use stowage_codec::{from_cbor, to_cbor, Value};
//!
//! let mut record = Value::object([("name", Value::from("A")), ("age", Value::from(1))]);
//! record.merge_patch(&Value::object([("age", Value::from(2))])).unwrap();
//!
//! let bytes = to_cbor(&record).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod key;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use key::Key;
pub use value::Value;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
