use crate::model::field::{FieldKind, FieldModel};
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// Source
///
/// Storage location of a table: optional prefix (schema/keyspace) plus
/// table name.
///

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Source {
    pub prefix: Option<String>,
    pub table: String,
}

impl Source {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            prefix: None,
            table: table.into(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

///
/// AutogenerateKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AutogenerateKind {
    Id,
    BinaryId,
    EmbedId,
}

///
/// AutogenerateId
/// Primary-key field whose value the adapter (or storage) generates.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AutogenerateId {
    pub field: &'static str,
    pub kind: AutogenerateKind,
}

///
/// SchemaModel
/// Static description of one struct/table binding.
///

#[derive(Debug)]
pub struct SchemaModel {
    /// Fully-qualified schema identifier (for dispatch and diagnostics).
    pub path: &'static str,
    pub prefix: Option<&'static str>,
    pub table: &'static str,
    /// Ordered field list; declaration order is the default select order.
    pub fields: &'static [FieldModel],
    pub primary_key: &'static [&'static str],
    pub autogenerate_id: Option<AutogenerateId>,
}

impl SchemaModel {
    #[must_use]
    pub fn source(&self) -> Source {
        Source {
            prefix: self.prefix.map(str::to_string),
            table: self.table.to_string(),
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldModel> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.field(name).map(|field| field.kind)
    }
}

///
/// SchemaMetadata
///
/// Per-call description of the struct binding handed to the adapter's
/// insert/update/delete verbs. Never cached.
///

#[derive(Clone, Debug, PartialEq)]
pub struct SchemaMetadata {
    pub source: Source,
    pub schema: &'static str,
    /// Free-form caller context forwarded to the adapter untouched.
    pub context: Option<serde_json::Value>,
    pub autogenerate_id: Option<AutogenerateId>,
}

impl SchemaMetadata {
    #[must_use]
    pub fn for_schema(model: &SchemaModel) -> Self {
        Self {
            source: model.source(),
            schema: model.path,
            context: None,
            autogenerate_id: model.autogenerate_id,
        }
    }

    /// Fill in a prefix, e.g. from repository configuration, when the model
    /// declares none. A model prefix always wins.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        if self.source.prefix.is_none() {
            self.source.prefix = prefix.map(str::to_string);
        }
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}
