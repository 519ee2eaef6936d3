//! Query planning.
//!
//! Every query runs the same linear pipeline: ToQuery, EnsureSelect,
//! Prepare (bind and key), Normalize. `prepare_query` then consults the
//! repository's cache; `plan_query` stops after normalization and never
//! touches a cache.

mod fingerprint;
mod metadata;
mod normalize;
mod prepare;
mod select;

#[cfg(test)]
mod tests;

pub use fingerprint::CacheKey;
pub use metadata::{QueryMetadata, SelectField, SelectShape, SourceMeta};
pub use normalize::{PlannedJoin, PlannedQuery};

use crate::{
    adapter::{Adapter, AdapterError, Prepared, QueryPlan},
    cast::CastError,
    db::{
        cache::{CacheEntry, CacheSlot},
        query::{Operation, Queryable},
        registry::{RegistryError, RepoEntry, RepoIdentity, Registry},
    },
    model::FieldKind,
    obs::sink::{self, MetricsEvent},
    value::Value,
};
use derive_more::{Deref, IntoIterator};
use std::{fmt, sync::Arc};
use thiserror::Error as ThisError;

///
/// PlanError
/// Caller-side query defects, detected before anything is cached.
///

#[derive(Debug, ThisError)]
pub enum PlanError {
    #[error("source {table} has no schema; select its fields explicitly")]
    SchemalessSelect { table: String },

    #[error("binding {binding} is out of range for a query with {sources} source(s)")]
    UnknownBinding { binding: usize, sources: usize },

    #[error("unknown field '{field}' on {table}")]
    UnknownField { table: String, field: String },

    #[error("invalid value for '{field}': {error}")]
    InvalidValue { field: String, error: CastError },

    #[error("{clause} must be a non-negative integer, found {found}")]
    InvalidLimit { clause: &'static str, found: String },

    #[error("like needs a text field, '{field}' is {kind}")]
    LikeOnNonText { field: String, kind: FieldKind },

    #[error("placeholder ${index} cannot appear in a caller-built query")]
    UnexpectedParam { index: usize },

    #[error("{operation} does not support {clause}")]
    UnsupportedClause {
        operation: Operation,
        clause: &'static str,
    },

    #[error("update_all needs at least one set clause")]
    MissingUpdates,

    #[error("field '{field}' is set more than once")]
    DuplicateUpdate { field: String },
}

///
/// QueryError
///

#[derive(Debug, ThisError)]
pub enum QueryError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

///
/// Params
/// Bound values in placeholder order, already dumped for the adapter.
///

#[derive(Clone, Debug, Default, Deref, IntoIterator, PartialEq)]
#[into_iterator(owned, ref)]
pub struct Params(Vec<Value>);

impl Params {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

///
/// PreparedQuery
/// Everything `Adapter::execute` needs for one call.
///

pub struct PreparedQuery<A: Adapter> {
    pub plan: QueryPlan<A::Prepared, A::Cached>,
    pub params: Params,
    pub metadata: QueryMetadata,
    pub key: CacheKey,
}

impl<A: Adapter> fmt::Debug for PreparedQuery<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedQuery")
            .field("plan", &self.plan)
            .field("params", &self.params)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Plan `queryable` for a repository of the process-wide registry.
pub fn prepare_query<A: Adapter>(
    operation: Operation,
    repo: impl Into<RepoIdentity>,
    queryable: impl Queryable,
) -> Result<PreparedQuery<A>, QueryError> {
    prepare_query_in(Registry::global(), operation, repo, queryable)
}

pub fn prepare_query_in<A: Adapter>(
    registry: &Registry,
    operation: Operation,
    repo: impl Into<RepoIdentity>,
    queryable: impl Queryable,
) -> Result<PreparedQuery<A>, QueryError> {
    let entry = registry.lookup::<A>(repo)?;

    prepare_with(&entry, operation, queryable)
}

pub(crate) fn prepare_with<A: Adapter>(
    entry: &RepoEntry<A>,
    operation: Operation,
    queryable: impl Queryable,
) -> Result<PreparedQuery<A>, QueryError> {
    let mut query = select::ensure_select(queryable.to_query(), operation)?;
    if query.prefix.is_none() {
        query.prefix.clone_from(&entry.config().prefix);
    }
    sink::record(MetricsEvent::Plan { operation });

    let bound = prepare::bind(query, operation, entry.adapter())?;
    let planned = normalize::normalize(bound.query, operation)?;
    let metadata = QueryMetadata::from_planned(&planned);
    let plan = cache_plan(entry, operation, bound.key, &planned);

    Ok(PreparedQuery {
        plan,
        params: bound.params,
        metadata,
        key: bound.key,
    })
}

/// Plan `queryable` against `adapter` without a repository or cache.
///
/// No select is injected; an `all` without one is planned as-is.
pub fn plan_query<A: Adapter + ?Sized>(
    operation: Operation,
    adapter: &A,
    queryable: impl Queryable,
) -> Result<(PlannedQuery, Params), QueryError> {
    let bound = prepare::bind(queryable.to_query(), operation, adapter)?;
    let planned = normalize::normalize(bound.query, operation)?;

    Ok((planned, bound.params))
}

// Cache consult/populate. No lock is held while the adapter prepares.
fn cache_plan<A: Adapter>(
    entry: &RepoEntry<A>,
    operation: Operation,
    key: CacheKey,
    planned: &PlannedQuery,
) -> QueryPlan<A::Prepared, A::Cached> {
    let cache = entry.cache();
    let adapter = entry.adapter();

    if !cache.is_enabled() {
        let prepared = match adapter.prepare(operation, planned) {
            Prepared::Cache(prepared) | Prepared::NoCache(prepared) => prepared,
        };
        sink::record(MetricsEvent::Prepare {
            operation,
            cacheable: false,
        });
        return QueryPlan::NoCache(Arc::new(prepared));
    }

    match cache.get(&key) {
        Some(CacheEntry::Cached(cached)) => {
            if adapter.validate_cached(entry.meta(), &cached) {
                cache.record_hit();
                return QueryPlan::Cached {
                    slot: CacheSlot::new(cache.clone(), key),
                    cached,
                };
            }
            tracing::debug!(%key, "cached statement rejected, re-preparing");
            cache.evict(&key);
            cache.record_miss();
        }
        Some(CacheEntry::Prepared(prepared)) => {
            cache.record_hit();
            return QueryPlan::Cache {
                slot: CacheSlot::new(cache.clone(), key),
                prepared,
            };
        }
        None => cache.record_miss(),
    }

    tracing::trace!(%key, %operation, "preparing statement");
    match adapter.prepare(operation, planned) {
        Prepared::Cache(prepared) => {
            sink::record(MetricsEvent::Prepare {
                operation,
                cacheable: true,
            });
            let slot = CacheSlot::new(cache.clone(), key);
            let prepared = Arc::new(prepared);

            // A concurrent planner may have stored this key first; adopt it.
            match cache.insert_new(key, CacheEntry::Prepared(prepared.clone())) {
                CacheEntry::Prepared(prepared) => QueryPlan::Cache { slot, prepared },
                CacheEntry::Cached(cached) if adapter.validate_cached(entry.meta(), &cached) => {
                    QueryPlan::Cached { slot, cached }
                }
                CacheEntry::Cached(_) => {
                    tracing::debug!(%key, "adopted statement rejected, keeping fresh prepare");
                    cache.replace(&key, CacheEntry::Prepared(prepared.clone()));
                    QueryPlan::Cache { slot, prepared }
                }
            }
        }
        Prepared::NoCache(prepared) => {
            sink::record(MetricsEvent::Prepare {
                operation,
                cacheable: false,
            });
            QueryPlan::NoCache(Arc::new(prepared))
        }
    }
}
