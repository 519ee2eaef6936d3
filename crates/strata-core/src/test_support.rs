//! In-memory fixture adapter and schema models shared by unit tests.
//!
//! `MemoryAdapter` keeps rows per table and ignores predicates: `all`
//! returns every row of the `from` table, `delete_all` empties it.

use crate::{
    adapter::{
        Adapter, AdapterError, ChildSpec, ConflictAction, Constraint, ExecOptions, Fields,
        OnConflict, Prepared, QueryPlan, QueryResult, WriteOutcome,
    },
    cast::{self, CastStep},
    config::{RepoConfig, RestartType},
    db::{
        cache::{CacheEntry, QueryCache},
        query::{
            Expr, Operation, Predicate,
            plan::{CacheKey, Params, PlannedQuery, QueryMetadata},
        },
        registry::RepoId,
    },
    model::{
        AutogenerateId, AutogenerateKind, FieldKind, FieldModel, Primitive, SchemaMetadata,
        SchemaModel,
    },
    value::Value,
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};
use ulid::Ulid;

pub(crate) static ROLES: &[&str] = &["admin", "member"];

pub(crate) static USERS: SchemaModel = SchemaModel {
    path: "accounts::User",
    prefix: Some("public"),
    table: "users",
    fields: &[
        FieldModel::new("id", FieldKind::BinaryId),
        FieldModel::new("name", FieldKind::Text),
        FieldModel::new("age", FieldKind::Int),
        FieldModel::new("active", FieldKind::Bool),
        FieldModel::new("role", FieldKind::Enum(ROLES)),
    ],
    primary_key: &["id"],
    autogenerate_id: Some(AutogenerateId {
        field: "id",
        kind: AutogenerateKind::BinaryId,
    }),
};

pub(crate) static POSTS: SchemaModel = SchemaModel {
    path: "blog::Post",
    prefix: None,
    table: "posts",
    fields: &[
        FieldModel::new("id", FieldKind::Id),
        FieldModel::new("user_id", FieldKind::BinaryId),
        FieldModel::new("name", FieldKind::Text),
        FieldModel::new("score", FieldKind::Float),
    ],
    primary_key: &["id"],
    autogenerate_id: Some(AutogenerateId {
        field: "id",
        kind: AutogenerateKind::Id,
    }),
};

///
/// MemoryStatement
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemoryStatement {
    pub(crate) operation: Operation,
    pub(crate) text: String,
}

///
/// RegisteredStatement
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RegisteredStatement {
    pub(crate) handle: u64,
    pub(crate) statement: MemoryStatement,
}

///
/// FixtureMeta
///

#[derive(Debug, Default)]
pub(crate) struct FixtureMeta {
    setup_repo: OnceLock<RepoId>,
    tables: Mutex<BTreeMap<String, Vec<Fields>>>,
}

impl FixtureMeta {
    pub(crate) fn setup_repo(&self) -> Option<RepoId> {
        self.setup_repo.get().copied()
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<Fields> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn with_table<R>(&self, table: &str, f: impl FnOnce(&mut Vec<Fields>) -> R) -> R {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(tables.entry(table.to_string()).or_default())
    }
}

///
/// MemoryAdapter
///

pub(crate) type MemoryCache = QueryCache<MemoryStatement, RegisteredStatement>;

#[derive(Debug, Default)]
pub(crate) struct MemoryAdapter {
    fail_init: bool,
    reject_cached: AtomicBool,
    prepares: AtomicUsize,
    executions: AtomicUsize,
    next_handle: AtomicU64,
    register_during_prepare: Mutex<Option<(Arc<MemoryCache>, CacheKey)>>,
}

impl MemoryAdapter {
    pub(crate) fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub(crate) fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub(crate) fn execute_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Make every later `validate_cached` call fail.
    pub(crate) fn reject_cached(&self) {
        self.reject_cached.store(true, Ordering::SeqCst);
    }

    /// During the next `prepare`, store a registered statement under `key`
    /// as a concurrent planner that already executed would.
    pub(crate) fn register_during_next_prepare(&self, cache: Arc<MemoryCache>, key: CacheKey) {
        *self
            .register_during_prepare
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((cache, key));
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Adapter for MemoryAdapter {
    type Meta = FixtureMeta;
    type Prepared = MemoryStatement;
    type Cached = RegisteredStatement;

    fn ensure_all_started(
        &self,
        _config: &RepoConfig,
        _restart: RestartType,
    ) -> Result<Vec<String>, AdapterError> {
        Ok(vec!["memory".to_string()])
    }

    fn init(&self, config: &RepoConfig) -> Result<(ChildSpec, Self::Meta), AdapterError> {
        if self.fail_init {
            return Err(AdapterError::Init {
                adapter: "memory",
                reason: "backend unreachable".to_string(),
            });
        }
        let name = config.name.as_deref().unwrap_or("anonymous");

        Ok((
            ChildSpec::new(format!("memory:{name}"), RestartType::Permanent),
            FixtureMeta::default(),
        ))
    }

    fn setup(
        &self,
        repo: RepoId,
        _config: &RepoConfig,
        meta: &Self::Meta,
    ) -> Result<(), AdapterError> {
        let _ = meta.setup_repo.set(repo);
        Ok(())
    }

    fn loaders(
        &self,
        primitive: Primitive,
        _kind: FieldKind,
    ) -> Result<Vec<CastStep>, AdapterError> {
        Ok(match primitive {
            Primitive::BinaryId => vec![CastStep::Fn(cast::bytes_to_ulid), CastStep::Kind],
            Primitive::Boolean => vec![CastStep::Fn(cast::int_to_bool), CastStep::Kind],
            _ => vec![CastStep::Kind],
        })
    }

    fn dumpers(
        &self,
        primitive: Primitive,
        _kind: FieldKind,
    ) -> Result<Vec<CastStep>, AdapterError> {
        Ok(match primitive {
            Primitive::BinaryId => vec![CastStep::Kind, CastStep::Fn(cast::ulid_to_bytes)],
            Primitive::Boolean => vec![CastStep::Kind, CastStep::Fn(cast::bool_to_int)],
            _ => vec![CastStep::Kind],
        })
    }

    fn autogenerate(&self, kind: AutogenerateKind) -> Result<Option<Value>, AdapterError> {
        match kind {
            AutogenerateKind::Id => Ok(None),
            AutogenerateKind::BinaryId => Ok(Some(Value::Ulid(Ulid::new()))),
            AutogenerateKind::EmbedId => Err(AdapterError::UnsupportedAutogenerate { kind }),
        }
    }

    fn prepare(&self, operation: Operation, query: &PlannedQuery) -> Prepared<Self::Prepared> {
        self.prepares.fetch_add(1, Ordering::SeqCst);

        let statement = MemoryStatement {
            operation,
            text: render(query),
        };
        let racing = self
            .register_during_prepare
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((cache, key)) = racing {
            cache.insert_new(
                key,
                CacheEntry::Cached(Arc::new(RegisteredStatement {
                    handle: self.next_handle(),
                    statement: statement.clone(),
                })),
            );
        }
        if has_fragment(query) {
            Prepared::NoCache(statement)
        } else {
            Prepared::Cache(statement)
        }
    }

    fn validate_cached(&self, _meta: &Self::Meta, _cached: &Self::Cached) -> bool {
        !self.reject_cached.load(Ordering::SeqCst)
    }

    fn execute(
        &self,
        meta: &Self::Meta,
        query_meta: &QueryMetadata,
        plan: QueryPlan<Self::Prepared, Self::Cached>,
        _params: &Params,
        _options: &ExecOptions,
    ) -> Result<QueryResult, AdapterError> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        let operation = match &plan {
            QueryPlan::NoCache(prepared) => prepared.operation,
            QueryPlan::Cache { slot, prepared } => {
                slot.store(RegisteredStatement {
                    handle: self.next_handle(),
                    statement: (**prepared).clone(),
                });
                prepared.operation
            }
            QueryPlan::Cached { cached, .. } => cached.statement.operation,
        };
        let table = query_meta
            .root()
            .map(|root| root.source.table.clone())
            .ok_or_else(|| AdapterError::Backend {
                message: "query has no source".to_string(),
            })?;

        let rows = meta.rows(&table);
        let num_rows = rows.len() as u64;

        match operation {
            Operation::All => {
                let shape = query_meta.select.clone().unwrap_or_default();
                let rows = rows
                    .iter()
                    .map(|row| {
                        shape
                            .names()
                            .map(|name| {
                                name.and_then(|name| lookup(row, name))
                                    .unwrap_or(Value::Null)
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect();

                Ok(QueryResult {
                    num_rows,
                    rows: Some(rows),
                })
            }
            Operation::UpdateAll => Ok(QueryResult {
                num_rows,
                rows: None,
            }),
            Operation::DeleteAll => {
                meta.with_table(&table, Vec::clear);
                Ok(QueryResult {
                    num_rows,
                    rows: None,
                })
            }
        }
    }

    fn insert_all(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        _header: &[String],
        rows: Vec<Fields>,
        on_conflict: &OnConflict,
        returning: &[String],
        options: &ExecOptions,
    ) -> Result<QueryResult, AdapterError> {
        let mut num_rows = 0;
        let mut returned: Vec<Vec<Value>> = Vec::new();

        for fields in rows {
            if let WriteOutcome::Ok(values) =
                self.insert(meta, schema_meta, fields, on_conflict, returning, options)?
            {
                num_rows += 1;
                returned.push(values.into_iter().map(|(_, value)| value).collect());
            }
        }

        Ok(QueryResult {
            num_rows,
            rows: (!returning.is_empty()).then_some(returned),
        })
    }

    fn insert(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        fields: Fields,
        on_conflict: &OnConflict,
        returning: &[String],
        _options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError> {
        let table = &schema_meta.source.table;

        meta.with_table(table, |rows| {
            let existing = lookup(&fields, "id").and_then(|id| {
                rows.iter()
                    .position(|row| lookup(row, "id").as_ref() == Some(&id))
            });

            match (existing, &on_conflict.action) {
                (None, _) => rows.push(fields.clone()),
                (Some(_), ConflictAction::Raise) => {
                    return Ok(WriteOutcome::Invalid(vec![Constraint::unique(format!(
                        "{table}_pkey"
                    ))]));
                }
                (Some(_), ConflictAction::Nothing) => return Ok(WriteOutcome::Ok(Vec::new())),
                (Some(index), ConflictAction::ReplaceAll) => rows[index].clone_from(&fields),
                (Some(index), ConflictAction::Replace(names)) => {
                    for (name, value) in &fields {
                        if names.contains(name) {
                            assign(&mut rows[index], name, value.clone());
                        }
                    }
                }
            }

            Ok(WriteOutcome::Ok(project(&fields, returning)))
        })
    }

    fn update(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        fields: Fields,
        filters: Fields,
        returning: &[String],
        _options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError> {
        meta.with_table(&schema_meta.source.table, |rows| {
            let Some(row) = rows.iter_mut().find(|row| matches_all(row, &filters)) else {
                return Ok(WriteOutcome::Stale);
            };
            for (name, value) in fields {
                assign(row, &name, value);
            }

            Ok(WriteOutcome::Ok(project(row, returning)))
        })
    }

    fn delete(
        &self,
        meta: &Self::Meta,
        schema_meta: &SchemaMetadata,
        filters: Fields,
        returning: &[String],
        _options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError> {
        meta.with_table(&schema_meta.source.table, |rows| {
            let Some(index) = rows.iter().position(|row| matches_all(row, &filters)) else {
                return Ok(WriteOutcome::Stale);
            };
            let row = rows.remove(index);

            Ok(WriteOutcome::Ok(project(&row, returning)))
        })
    }
}

///
/// OtherAdapter
/// Second adapter type with no coercion support at all.
///

#[derive(Debug, Default)]
pub(crate) struct OtherAdapter;

impl Adapter for OtherAdapter {
    type Meta = ();
    type Prepared = ();
    type Cached = ();

    fn ensure_all_started(
        &self,
        _config: &RepoConfig,
        _restart: RestartType,
    ) -> Result<Vec<String>, AdapterError> {
        Ok(Vec::new())
    }

    fn init(&self, _config: &RepoConfig) -> Result<(ChildSpec, Self::Meta), AdapterError> {
        Ok((ChildSpec::new("other", RestartType::Temporary), ()))
    }

    fn loaders(
        &self,
        primitive: Primitive,
        kind: FieldKind,
    ) -> Result<Vec<CastStep>, AdapterError> {
        Err(AdapterError::MissingLoader { primitive, kind })
    }

    fn dumpers(
        &self,
        primitive: Primitive,
        kind: FieldKind,
    ) -> Result<Vec<CastStep>, AdapterError> {
        Err(AdapterError::MissingDumper { primitive, kind })
    }

    fn autogenerate(&self, kind: AutogenerateKind) -> Result<Option<Value>, AdapterError> {
        Err(AdapterError::UnsupportedAutogenerate { kind })
    }

    fn prepare(&self, _operation: Operation, _query: &PlannedQuery) -> Prepared<Self::Prepared> {
        Prepared::NoCache(())
    }

    fn execute(
        &self,
        _meta: &Self::Meta,
        _query_meta: &QueryMetadata,
        _plan: QueryPlan<Self::Prepared, Self::Cached>,
        _params: &Params,
        _options: &ExecOptions,
    ) -> Result<QueryResult, AdapterError> {
        Ok(QueryResult::default())
    }

    fn insert_all(
        &self,
        _meta: &Self::Meta,
        _schema_meta: &SchemaMetadata,
        _header: &[String],
        _rows: Vec<Fields>,
        _on_conflict: &OnConflict,
        _returning: &[String],
        _options: &ExecOptions,
    ) -> Result<QueryResult, AdapterError> {
        Ok(QueryResult::default())
    }

    fn insert(
        &self,
        _meta: &Self::Meta,
        _schema_meta: &SchemaMetadata,
        _fields: Fields,
        _on_conflict: &OnConflict,
        _returning: &[String],
        _options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError> {
        Ok(WriteOutcome::Stale)
    }

    fn update(
        &self,
        _meta: &Self::Meta,
        _schema_meta: &SchemaMetadata,
        _fields: Fields,
        _filters: Fields,
        _returning: &[String],
        _options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError> {
        Ok(WriteOutcome::Stale)
    }

    fn delete(
        &self,
        _meta: &Self::Meta,
        _schema_meta: &SchemaMetadata,
        _filters: Fields,
        _returning: &[String],
        _options: &ExecOptions,
    ) -> Result<WriteOutcome, AdapterError> {
        Ok(WriteOutcome::Stale)
    }
}

// helpers

fn lookup(row: &Fields, name: &str) -> Option<Value> {
    row.iter()
        .find(|(field, _)| field == name)
        .map(|(_, value)| value.clone())
}

fn assign(row: &mut Fields, name: &str, value: Value) {
    match row.iter_mut().find(|(field, _)| field == name) {
        Some((_, slot)) => *slot = value,
        None => row.push((name.to_string(), value)),
    }
}

fn matches_all(row: &Fields, filters: &Fields) -> bool {
    filters
        .iter()
        .all(|(name, value)| lookup(row, name).as_ref() == Some(value))
}

fn project(row: &Fields, returning: &[String]) -> Fields {
    returning
        .iter()
        .map(|name| (name.clone(), lookup(row, name).unwrap_or(Value::Null)))
        .collect()
}

fn render(query: &PlannedQuery) -> String {
    let sources: Vec<String> = query
        .sources
        .iter()
        .map(|from| from.source.to_string())
        .collect();

    format!("{} {}", query.operation, sources.join(","))
}

fn has_fragment(query: &PlannedQuery) -> bool {
    fn in_predicate(predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Compare { left, right, .. } => left.is_fragment() || right.is_fragment(),
            Predicate::IsNull(expr) => expr.is_fragment(),
            Predicate::And(children) | Predicate::Or(children) => children.iter().any(in_predicate),
            Predicate::Not(inner) => in_predicate(inner),
        }
    }

    query.predicate.as_ref().is_some_and(in_predicate)
        || query.joins.iter().any(|join| in_predicate(&join.on))
        || query
            .select
            .as_ref()
            .is_some_and(|shape| shape.fields.iter().any(|field| field.expr.is_fragment()))
        || query.order_by.iter().any(|order| order.expr.is_fragment())
        || [&query.limit, &query.offset]
            .into_iter()
            .flatten()
            .any(Expr::is_fragment)
        || query.updates.iter().any(|update| update.value.is_fragment())
}
