//! Core runtime for Strata: the storage adapter contract, the repository
//! registry, and the query planner with its per-repository statement cache.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod adapter;
pub mod cast;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod obs;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, caches, or registry internals are re-exported here.
///

pub mod prelude {
    pub use crate::{
        adapter::{Adapter, OnConflict, WriteOutcome},
        config::{RepoConfig, RestartType},
        db::{
            Repo,
            query::{
                CompareOp, Expr, JoinKind, Operation, OrderDirection, Predicate, Query, SelectItem,
            },
        },
        model::{FieldKind, FieldModel, SchemaModel, Source},
        value::Value,
    };
}
