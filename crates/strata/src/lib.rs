//! ## Crate layout
//! - `core`: adapter contract, repository registry, query planner, statement
//!   cache, values and observability.
//!
//! The `prelude` module mirrors the surface used by application code that
//! builds queries and runs them through a [`Repo`]. Adapter authors usually
//! reach into `core::adapter` and `core::cast` directly.

pub use strata_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use crate::core::{
    db::{Repo, plan_query, prepare_query},
    error::InternalError as Error,
};

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::core::{db::query::Queryable as _, prelude::*};
}
