//! Runtime schema description consumed by the planner and the adapter
//! contract. Models are static and produced by the schema layer.

mod field;
mod schema;

pub use field::{FieldKind, FieldModel, Primitive};
pub use schema::{AutogenerateId, AutogenerateKind, SchemaMetadata, SchemaModel, Source};
