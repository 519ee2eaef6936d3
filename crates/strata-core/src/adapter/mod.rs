//! Storage adapter contract.
//!
//! The planner, registry and cache only ever talk to a backend through the
//! [`Adapter`] trait. One implementation per backend; no hierarchy.

mod write;


pub use write::{ConflictAction, Constraint, ConstraintKind, OnConflict, WriteOutcome};

use crate::{
    cast::{self, CastError, CastStep},
    config::{RepoConfig, RestartType},
    db::{
        cache::CacheSlot,
        query::{
            Operation,
            plan::{Params, PlannedQuery, QueryMetadata},
        },
        registry::RepoId,
    },
    model::{AutogenerateKind, FieldKind, Primitive, SchemaMetadata},
    value::Value,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error as ThisError;

/// One raw result row, positionally aligned with the query's select shape.
pub type Row = Vec<Value>;

/// Named field values for single-source writes and filters.
pub type Fields = Vec<(String, Value)>;

///
/// AdapterError
///

#[derive(Debug, ThisError)]
pub enum AdapterError {
    #[error("adapter '{adapter}' failed to start: {reason}")]
    Startup {
        adapter: &'static str,
        reason: String,
    },

    #[error("adapter '{adapter}' failed to initialize: {reason}")]
    Init {
        adapter: &'static str,
        reason: String,
    },

    #[error("adapter has no loader for primitive {primitive} ({kind})")]
    MissingLoader { primitive: Primitive, kind: FieldKind },

    #[error("adapter has no dumper for primitive {primitive} ({kind})")]
    MissingDumper { primitive: Primitive, kind: FieldKind },

    #[error("adapter cannot autogenerate {kind:?} values")]
    UnsupportedAutogenerate { kind: AutogenerateKind },

    #[error("backend call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("backend error: {message}")]
    Backend { message: String },
}

///
/// CoerceError
/// Failure while running a loader/dumper pipeline.
///

#[derive(Debug, ThisError)]
pub enum CoerceError {
    #[error(transparent)]
    Contract(#[from] AdapterError),

    #[error(transparent)]
    Cast(#[from] CastError),
}

///
/// ChildSpec
///
/// What the caller's supervisor has to run for this adapter. Supervision
/// itself happens outside this crate.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChildSpec {
    pub id: String,
    pub restart: RestartType,
    pub shutdown: Option<Duration>,
}

impl ChildSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, restart: RestartType) -> Self {
        Self {
            id: id.into(),
            restart,
            shutdown: None,
        }
    }
}

///
/// ExecOptions
///
/// Per-call options forwarded to the adapter. The timeout is enforced by the
/// adapter at its backend boundary; nothing above it blocks.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub prefix: Option<String>,
}

impl ExecOptions {
    #[must_use]
    pub fn from_config(config: &RepoConfig) -> Self {
        Self {
            timeout: config.timeout(),
            prefix: config.prefix.clone(),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

///
/// QueryResult
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub num_rows: u64,
    /// `None` when the operation returns no rows (e.g. delete without returning).
    pub rows: Option<Vec<Row>>,
}

///
/// Prepared
/// Adapter cache classification for a freshly prepared statement.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Prepared<P> {
    Cache(P),
    NoCache(P),
}

///
/// QueryPlan
///
/// Statement handed to [`Adapter::execute`].
///
/// - `NoCache`: prepared for this call only.
/// - `Cache`: freshly prepared and stored; the adapter may register it with
///   the backend and call `slot.store(cached)`.
/// - `Cached`: previously registered; if the backend reports it as stale the
///   adapter calls `slot.reset(prepared)` or `slot.evict()`.
///

pub enum QueryPlan<P, C> {
    NoCache(Arc<P>),
    Cache {
        slot: CacheSlot<P, C>,
        prepared: Arc<P>,
    },
    Cached {
        slot: CacheSlot<P, C>,
        cached: Arc<C>,
    },
}

impl<P, C> QueryPlan<P, C> {
    #[must_use]
    pub const fn slot(&self) -> Option<&CacheSlot<P, C>> {
        match self {
            Self::NoCache(_) => None,
            Self::Cache { slot, .. } | Self::Cached { slot, .. } => Some(slot),
        }
    }

    #[must_use]
    pub const fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }
}

impl<P, C> Clone for QueryPlan<P, C> {
    fn clone(&self) -> Self {
        match self {
            Self::NoCache(prepared) => Self::NoCache(prepared.clone()),
            Self::Cache { slot, prepared } => Self::Cache {
                slot: slot.clone(),
                prepared: prepared.clone(),
            },
            Self::Cached { slot, cached } => Self::Cached {
                slot: slot.clone(),
                cached: cached.clone(),
            },
        }
    }
}

impl<P, C> std::fmt::Debug for QueryPlan<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCache(_) => f.write_str("QueryPlan::NoCache"),
            Self::Cache { slot, .. } => write!(f, "QueryPlan::Cache({})", slot.key()),
            Self::Cached { slot, .. } => write!(f, "QueryPlan::Cached({})", slot.key()),
        }
    }
}

///
/// Adapter
///
/// Contract every storage backend implements. Implementations are shared
/// across threads for the lifetime of a repository.
///

pub trait Adapter: Send + Sync + 'static {
    /// Opaque per-repository state produced by [`Adapter::init`].
    type Meta: Send + Sync + 'static;
    /// Backend-specific compiled statement.
    type Prepared: Send + Sync + 'static;
    /// Backend handle for a statement registered with the backend.
    type Cached: Send + Sync + 'static;

    // lifecycle

    /// Start whatever the adapter depends on; returns the names started.
    fn ensure_all_started(
        &self,
        config: &RepoConfig,
        restart: RestartType,
    ) -> Result<Vec<String>, AdapterError>;

    fn init(&self, config: &RepoConfig) -> Result<(ChildSpec, Self::Meta), AdapterError>;

    /// Startup-time registration hook, run once per repository before it
    /// becomes visible in the registry.
    fn setup(
        &self,
        _repo: RepoId,
        _config: &RepoConfig,
        _meta: &Self::Meta,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    // types

    /// Steps decoding a storage value of `primitive` into `kind`.
    fn loaders(&self, primitive: Primitive, kind: FieldKind) -> Result<Vec<CastStep>, AdapterError>;

    /// Steps encoding a `kind` value into the storage `primitive`.
    fn dumpers(&self, primitive: Primitive, kind: FieldKind) -> Result<Vec<CastStep>, AdapterError>;

    /// `Ok(None)` leaves generation to storage.
    fn autogenerate(&self, kind: AutogenerateKind) -> Result<Option<Value>, AdapterError>;

    // queries

    fn prepare(&self, operation: Operation, query: &PlannedQuery) -> Prepared<Self::Prepared>;

    /// Checked on every cache hit before a registered statement is reused.
    fn validate_cached(&self, _meta: &Self::Meta, _cached: &Self::Cached) -> bool {
        true
    }

    fn execute(
        &self,
        meta: &Self::Meta,
        query_meta: &QueryMetadata,
        plan: QueryPlan<Self::Prepared, Self::Cached>,
        params: &Params,
        options: &ExecOptions,
    ) -> Result<QueryResult, AdapterError>;

    // schema writes

    #[allow(clippy::too_many_arguments)]
    fn insert_all(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        header: &[String],
        rows: Vec<Fields>,
        on_conflict: &OnConflict,
        returning: &[String],
        options: &ExecOptions,
    ) -> Result<QueryResult, AdapterError>;

    fn insert(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        fields: Fields,
        on_conflict: &OnConflict,
        returning: &[String],
        options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError>;

    /// Returns [`WriteOutcome::Stale`] when `filters` match no row.
    fn update(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        fields: Fields,
        filters: Fields,
        returning: &[String],
        options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError>;

    /// Returns [`WriteOutcome::Stale`] when `filters` match no row.
    fn delete(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        filters: Fields,
        returning: &[String],
        options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError>;
}

/// Encode `value` of logical `kind` through the adapter's dumpers.
pub fn dump_value<A: Adapter + ?Sized>(
    adapter: &A,
    kind: FieldKind,
    value: Value,
) -> Result<Value, CoerceError> {
    let steps = adapter.dumpers(kind.primitive(), kind)?;

    Ok(cast::apply(&steps, kind, value)?)
}

/// Decode a storage `value` into logical `kind` through the adapter's loaders.
pub fn load_value<A: Adapter + ?Sized>(
    adapter: &A,
    kind: FieldKind,
    value: Value,
) -> Result<Value, CoerceError> {
    let steps = adapter.loaders(kind.primitive(), kind)?;

    Ok(cast::apply(&steps, kind, value)?)
}
