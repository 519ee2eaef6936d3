//! Loader/dumper pipelines.
//!
//! Adapters describe coercions as ordered `CastStep` lists. Steps run left to
//! right and the first failure short-circuits the whole pipeline.


use crate::{
    model::FieldKind,
    value::{Value, ValueTag},
};
use thiserror::Error as ThisError;
use ulid::Ulid;

///
/// CastError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum CastError {
    #[error("cannot cast {found} value to {kind}")]
    TypeMismatch { kind: FieldKind, found: ValueTag },

    #[error("'{label}' is not a member of {kind}")]
    UnknownEnumLabel { kind: FieldKind, label: String },

    #[error("invalid binary id: {reason}")]
    InvalidBinaryId { reason: String },
}

/// Single fallible transform over a value.
pub type CastFn = fn(Value) -> Result<Value, CastError>;

///
/// CastStep
///

#[derive(Clone, Copy, Debug)]
pub enum CastStep {
    /// Apply the logical kind's own coercion (see [`cast_value`]).
    Kind,
    /// Apply an adapter-supplied transform.
    Fn(CastFn),
}

impl CastStep {
    fn run(self, kind: FieldKind, value: Value) -> Result<Value, CastError> {
        match self {
            Self::Kind => cast_value(kind, value),
            Self::Fn(f) => f(value),
        }
    }
}

/// Run `steps` over `value` in order.
pub fn apply(steps: &[CastStep], kind: FieldKind, value: Value) -> Result<Value, CastError> {
    steps
        .iter()
        .try_fold(value, |value, step| step.run(kind, value))
}

/// Coerce a value into the canonical representation of `kind`.
///
/// Null passes through every kind; nullability is a schema concern.
#[expect(clippy::cast_precision_loss)]
pub fn cast_value(kind: FieldKind, value: Value) -> Result<Value, CastError> {
    match (kind, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldKind::Id | FieldKind::Int, v @ Value::Int(_))
        | (FieldKind::Float, v @ Value::Float(_))
        | (FieldKind::Bool, v @ Value::Bool(_))
        | (FieldKind::Text, v @ Value::Text(_))
        | (FieldKind::Blob, v @ Value::Blob(_))
        | (FieldKind::BinaryId, v @ Value::Ulid(_)) => Ok(v),
        (FieldKind::Float, Value::Int(v)) => Ok(Value::Float(v as f64)),
        (FieldKind::Enum(labels), Value::Text(label)) => {
            if labels.contains(&label.as_str()) {
                Ok(Value::Text(label))
            } else {
                Err(CastError::UnknownEnumLabel { kind, label })
            }
        }
        (FieldKind::BinaryId, Value::Text(text)) => text_to_ulid(Value::Text(text)),
        (kind, other) => Err(CastError::TypeMismatch {
            kind,
            found: other.tag(),
        }),
    }
}

///
/// Adapter helpers
///
/// Building blocks for adapters whose backend lacks a native ULID or
/// boolean representation.
///

pub fn ulid_to_bytes(value: Value) -> Result<Value, CastError> {
    match value {
        Value::Ulid(id) => Ok(Value::Blob(id.to_bytes().to_vec())),
        Value::Null => Ok(Value::Null),
        other => Err(binary_id_mismatch(&other)),
    }
}

pub fn bytes_to_ulid(value: Value) -> Result<Value, CastError> {
    match value {
        Value::Blob(bytes) => {
            let bytes: [u8; 16] =
                bytes
                    .try_into()
                    .map_err(|bytes: Vec<u8>| CastError::InvalidBinaryId {
                        reason: format!("expected 16 bytes, found {}", bytes.len()),
                    })?;
            Ok(Value::Ulid(Ulid::from_bytes(bytes)))
        }
        v @ (Value::Ulid(_) | Value::Null) => Ok(v),
        other => Err(binary_id_mismatch(&other)),
    }
}

pub fn ulid_to_text(value: Value) -> Result<Value, CastError> {
    match value {
        Value::Ulid(id) => Ok(Value::Text(id.to_string())),
        Value::Null => Ok(Value::Null),
        other => Err(binary_id_mismatch(&other)),
    }
}

pub fn text_to_ulid(value: Value) -> Result<Value, CastError> {
    match value {
        Value::Text(text) => Ulid::from_string(&text)
            .map(Value::Ulid)
            .map_err(|err| CastError::InvalidBinaryId {
                reason: err.to_string(),
            }),
        v @ (Value::Ulid(_) | Value::Null) => Ok(v),
        other => Err(binary_id_mismatch(&other)),
    }
}

pub fn bool_to_int(value: Value) -> Result<Value, CastError> {
    match value {
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Null => Ok(Value::Null),
        other => Err(CastError::TypeMismatch {
            kind: FieldKind::Bool,
            found: other.tag(),
        }),
    }
}

pub fn int_to_bool(value: Value) -> Result<Value, CastError> {
    match value {
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        v @ (Value::Bool(_) | Value::Null) => Ok(v),
        other => Err(CastError::TypeMismatch {
            kind: FieldKind::Bool,
            found: other.tag(),
        }),
    }
}

const fn binary_id_mismatch(value: &Value) -> CastError {
    CastError::TypeMismatch {
        kind: FieldKind::BinaryId,
        found: value.tag(),
    }
}
