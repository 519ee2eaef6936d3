//! Logical query representation and the planning pipeline.

mod ast;
pub mod plan;
mod queryable;


pub use ast::{
    CompareOp, Expr, FromExpr, JoinExpr, JoinKind, OrderDirection, OrderExpr, Predicate, Query,
    SelectItem, UpdateExpr,
};
pub use queryable::Queryable;

use std::fmt;

///
/// Operation
///
/// Logical operation a query is planned for. Each operation admits a
/// different clause set during normalization.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    All,
    UpdateAll,
    DeleteAll,
}

impl Operation {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::All => 0x01,
            Self::UpdateAll => 0x02,
            Self::DeleteAll => 0x03,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::All => "all",
            Self::UpdateAll => "update_all",
            Self::DeleteAll => "delete_all",
        };
        f.write_str(label)
    }
}
