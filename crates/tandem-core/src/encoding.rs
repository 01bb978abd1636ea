//! Opaque ordered-value encoding for message arguments and state payloads
//!
//! Each argument is encoded independently so a message is an ordered list of
//! opaque values. The engine never looks inside them; only the protocol that
//! owns the message kind decodes them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Result, TandemError};

/// One opaque encoded value (CBOR)
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoded(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl Encoded {
    /// Encode a value
    pub fn of<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_cbor::to_vec(value)?))
    }

    /// Decode into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_cbor::from_slice(&self.0)?)
    }

    /// Raw encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Encoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoded({} bytes)", self.0.len())
    }
}

/// Positional reader over a message's encoded arguments
///
/// Construction checks the argument count; every accessor reports shape
/// mismatches as `MalformedMessage`.
#[derive(Debug, Clone, Copy)]
pub struct Arguments<'a> {
    values: &'a [Encoded],
}

impl<'a> Arguments<'a> {
    /// Wrap `values`, requiring exactly `expected` of them
    pub fn expect(values: &'a [Encoded], expected: usize) -> Result<Self> {
        if values.len() != expected {
            return Err(TandemError::malformed_message(format!(
                "expected {expected} arguments, got {}",
                values.len()
            )));
        }
        Ok(Self { values })
    }

    /// Decode the argument at `index`
    pub fn at<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            TandemError::malformed_message(format!("missing argument {index}"))
        })?;
        serde_cbor::from_slice(&value.0).map_err(|e| {
            TandemError::malformed_message(format!("argument {index} has the wrong shape: {e}"))
        })
    }
}
