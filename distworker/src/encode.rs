//! Best-effort conversion of host values to wire data.
//!
//! [`try_encode`] is the single primitive: it either yields a JSON value or
//! an [`EncodeError`]. Callers pick the policy on failure:
//! - report conversion propagates the error,
//! - warning conversion substitutes `null` ([`encode_or_null`]) or the
//!   value's debug representation ([`encode_or_repr`]).

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EncodeError;

pub fn try_encode<T: Serialize + ?Sized>(value: &T) -> Result<Value, EncodeError> {
    Ok(serde_json::to_value(value)?)
}

/// Like [`try_encode`] but the result must be a mapping.
pub fn try_encode_map<T: Serialize + ?Sized>(value: &T) -> Result<Map<String, Value>, EncodeError> {
    match try_encode(value)? {
        Value::Object(map) => Ok(map),
        other => Err(EncodeError::NotAMapping {
            kind: value_kind(&other),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// An arbitrary host value that may or may not survive encoding.
///
/// Implemented for every `Serialize + Debug` type. A failing `Serialize`
/// impl (or a shape JSON cannot express, like non-string map keys) is what
/// makes a value unencodable.
pub trait Encodable: fmt::Debug + Send + Sync {
    fn encode(&self) -> Result<Value, EncodeError>;

    /// Printable representation used when encoding fails.
    fn repr(&self) -> String {
        format!("{self:?}")
    }
}

impl<T> Encodable for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn encode(&self) -> Result<Value, EncodeError> {
        try_encode(self)
    }
}

pub fn encode_or_null(value: &dyn Encodable) -> Value {
    match value.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::debug!(error = %e, value = ?value, "Substituting null for unencodable value");
            Value::Null
        }
    }
}

pub fn encode_or_repr(value: &dyn Encodable) -> Value {
    match value.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            let repr = value.repr();
            tracing::debug!(error = %e, %repr, "Substituting repr for unencodable value");
            Value::String(repr)
        }
    }
}
