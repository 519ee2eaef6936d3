//! Deterministic cache keys derived from the bound query shape.
//!
//! Parameter values never reach the hasher: by the time a query is hashed
//! every literal has been replaced by a positional `Param`, and only the
//! parameter's type is encoded.
#![expect(clippy::cast_possible_truncation)]

use crate::{
    db::query::{Expr, FromExpr, Operation, OrderDirection, Predicate, Query, SelectItem},
    model::FieldKind,
    value::ValueTag,
};
use sha2::{Digest, Sha256};
use std::fmt;

///
/// CacheKey
///
/// Stable, deterministic key for the prepared-statement cache.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub(crate) const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn as_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

///
/// ParamType
/// Type of one bound parameter as it enters the key.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParamType {
    /// Bound against a field of known kind.
    Kind(FieldKind),
    /// Bound with no field context (schemaless source, bare literal).
    Untyped(ValueTag),
}

/// Compute the cache key of a bound query.
pub(crate) fn cache_key(operation: Operation, query: &Query, params: &[ParamType]) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(b"strata:qk:v1");

    write_tag(&mut hasher, 0x01);
    write_tag(&mut hasher, operation.tag());

    write_tag(&mut hasher, 0x02);
    write_opt_str(&mut hasher, query.prefix.as_deref());

    write_tag(&mut hasher, 0x03);
    hash_from(&mut hasher, &query.from);

    write_tag(&mut hasher, 0x04);
    write_u32(&mut hasher, query.joins.len() as u32);
    for join in &query.joins {
        write_tag(&mut hasher, join.kind.tag());
        hash_from(&mut hasher, &join.from);
        hash_predicate(&mut hasher, &join.on);
    }

    write_tag(&mut hasher, 0x05);
    write_u32(&mut hasher, query.filters.len() as u32);
    for filter in &query.filters {
        hash_predicate(&mut hasher, filter);
    }

    write_tag(&mut hasher, 0x06);
    hash_select(&mut hasher, query.select.as_deref());

    write_tag(&mut hasher, 0x07);
    write_u32(&mut hasher, query.order_by.len() as u32);
    for order in &query.order_by {
        hash_expr(&mut hasher, &order.expr);
        write_tag(&mut hasher, order_direction_tag(order.direction));
    }

    write_tag(&mut hasher, 0x08);
    hash_opt_expr(&mut hasher, query.limit.as_ref());

    write_tag(&mut hasher, 0x09);
    hash_opt_expr(&mut hasher, query.offset.as_ref());

    write_tag(&mut hasher, 0x0a);
    write_tag(&mut hasher, u8::from(query.distinct));

    write_tag(&mut hasher, 0x0b);
    write_u32(&mut hasher, query.updates.len() as u32);
    for update in &query.updates {
        write_str(&mut hasher, &update.field);
        hash_expr(&mut hasher, &update.value);
    }

    write_tag(&mut hasher, 0x0c);
    write_u32(&mut hasher, query.preloads.len() as u32);
    for preload in &query.preloads {
        write_str(&mut hasher, preload);
    }

    write_tag(&mut hasher, 0x0d);
    write_u32(&mut hasher, params.len() as u32);
    for param in params {
        hash_param_type(&mut hasher, *param);
    }

    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);

    CacheKey(out)
}

fn hash_from(hasher: &mut Sha256, from: &FromExpr) {
    write_opt_str(hasher, from.source.prefix.as_deref());
    write_str(hasher, &from.source.table);
    write_opt_str(hasher, from.schema_path());
}

fn hash_select(hasher: &mut Sha256, select: Option<&[SelectItem]>) {
    let Some(items) = select else {
        write_tag(hasher, 0x00);
        return;
    };

    write_tag(hasher, 0x01);
    write_u32(hasher, items.len() as u32);
    for item in items {
        match item {
            SelectItem::Source(binding) => {
                write_tag(hasher, 0x30);
                write_u32(hasher, *binding as u32);
            }
            SelectItem::Expr(expr) => {
                write_tag(hasher, 0x31);
                hash_expr(hasher, expr);
            }
        }
    }
}

fn hash_predicate(hasher: &mut Sha256, predicate: &Predicate) {
    match predicate {
        Predicate::Compare { left, op, right } => {
            write_tag(hasher, 0x20);
            write_tag(hasher, op.tag());
            hash_expr(hasher, left);
            hash_expr(hasher, right);
        }
        Predicate::IsNull(expr) => {
            write_tag(hasher, 0x21);
            hash_expr(hasher, expr);
        }
        Predicate::And(children) => {
            write_tag(hasher, 0x22);
            write_u32(hasher, children.len() as u32);
            for child in children {
                hash_predicate(hasher, child);
            }
        }
        Predicate::Or(children) => {
            write_tag(hasher, 0x23);
            write_u32(hasher, children.len() as u32);
            for child in children {
                hash_predicate(hasher, child);
            }
        }
        Predicate::Not(inner) => {
            write_tag(hasher, 0x24);
            hash_predicate(hasher, inner);
        }
    }
}

fn hash_expr(hasher: &mut Sha256, expr: &Expr) {
    match expr {
        Expr::Field { binding, field } => {
            write_tag(hasher, 0x10);
            write_u32(hasher, *binding as u32);
            write_str(hasher, field);
        }
        Expr::Param(index) => {
            write_tag(hasher, 0x11);
            write_u32(hasher, *index as u32);
        }
        // Unbound literals only reach here for queries that skipped binding.
        Expr::Value(value) => {
            write_tag(hasher, 0x12);
            write_tag(hasher, value.tag().to_u8());
        }
        Expr::Fragment(text) => {
            write_tag(hasher, 0x13);
            write_str(hasher, text);
        }
    }
}

fn hash_opt_expr(hasher: &mut Sha256, expr: Option<&Expr>) {
    match expr {
        Some(expr) => {
            write_tag(hasher, 0x01);
            hash_expr(hasher, expr);
        }
        None => write_tag(hasher, 0x00),
    }
}

fn hash_param_type(hasher: &mut Sha256, param: ParamType) {
    match param {
        ParamType::Kind(kind) => {
            write_tag(hasher, 0x01);
            write_tag(hasher, kind.fingerprint_tag());
        }
        ParamType::Untyped(tag) => {
            write_tag(hasher, 0x02);
            write_tag(hasher, tag.to_u8());
        }
    }
}

const fn order_direction_tag(direction: OrderDirection) -> u8 {
    match direction {
        OrderDirection::Asc => 0x01,
        OrderDirection::Desc => 0x02,
    }
}

fn write_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            write_tag(hasher, 0x01);
            write_str(hasher, value);
        }
        None => write_tag(hasher, 0x00),
    }
}

fn write_str(hasher: &mut Sha256, value: &str) {
    write_u32(hasher, value.len() as u32);
    hasher.update(value.as_bytes());
}

fn write_u32(hasher: &mut Sha256, value: u32) {
    hasher.update(value.to_be_bytes());
}

fn write_tag(hasher: &mut Sha256, tag: u8) {
    hasher.update([tag]);
}
