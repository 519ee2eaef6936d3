use crate::value::ValueTag;
use std::fmt;

///
/// FieldModel
/// Runtime field metadata used by planning and validation.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldModel {
    /// Field name as used in queries and rows.
    pub name: &'static str,
    /// Logical type of the field.
    pub kind: FieldKind,
}

impl FieldModel {
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

///
/// FieldKind
///
/// Logical field type. Each kind lowers to exactly one storage primitive;
/// adapters decide how that primitive is represented in their backend.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FieldKind {
    /// Integer primary key generated by storage.
    Id,
    /// ULID key; adapters pick the binary representation.
    BinaryId,
    Int,
    Float,
    Bool,
    Text,
    Blob,
    /// Text restricted to a closed set of labels.
    Enum(&'static [&'static str]),
}

impl FieldKind {
    #[must_use]
    pub const fn primitive(self) -> Primitive {
        match self {
            Self::Id => Primitive::Id,
            Self::BinaryId => Primitive::BinaryId,
            Self::Int => Primitive::Integer,
            Self::Float => Primitive::Float,
            Self::Bool => Primitive::Boolean,
            Self::Text | Self::Enum(_) => Primitive::String,
            Self::Blob => Primitive::Binary,
        }
    }

    /// Value tag a caller-side value of this kind carries after casting.
    #[must_use]
    pub const fn value_tag(self) -> ValueTag {
        match self {
            Self::Id | Self::Int => ValueTag::Int,
            Self::BinaryId => ValueTag::Ulid,
            Self::Float => ValueTag::Float,
            Self::Bool => ValueTag::Bool,
            Self::Text | Self::Enum(_) => ValueTag::Text,
            Self::Blob => ValueTag::Blob,
        }
    }

    /// Stable tag fed into shape fingerprints.
    #[must_use]
    pub const fn fingerprint_tag(self) -> u8 {
        match self {
            Self::Id => 0x01,
            Self::BinaryId => 0x02,
            Self::Int => 0x03,
            Self::Float => 0x04,
            Self::Bool => 0x05,
            Self::Text => 0x06,
            Self::Blob => 0x07,
            Self::Enum(_) => 0x08,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => f.write_str("id"),
            Self::BinaryId => f.write_str("binary_id"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Bool => f.write_str("bool"),
            Self::Text => f.write_str("text"),
            Self::Blob => f.write_str("blob"),
            Self::Enum(labels) => write!(f, "enum({})", labels.join("|")),
        }
    }
}

///
/// Primitive
///
/// Storage primitive a logical kind lowers to; the first argument of the
/// adapter's loader/dumper hooks.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Primitive {
    Id,
    BinaryId,
    Integer,
    Float,
    Boolean,
    String,
    Binary,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Id => "id",
            Self::BinaryId => "binary_id",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Binary => "binary",
        };
        f.write_str(label)
    }
}
