use crate::{
    adapter::{self, Adapter, ExecOptions, Fields, OnConflict, QueryResult, Row, WriteOutcome},
    cast,
    config::{RepoConfig, RestartType},
    db::{
        query::{
            Operation, Queryable,
            plan::{self, PlanError, PreparedQuery, QueryMetadata, SelectShape},
        },
        registry::{Registry, RepoEntry, RepoId, StartedRepo},
    },
    error::InternalError,
    model::{SchemaMetadata, SchemaModel},
};
use std::{marker::PhantomData, time::Duration};

///
/// Repo
///
/// Typed handle to one running repository.
///
/// - `A` is the [`Adapter`] the repository was started with.
///
/// The handle holds no state of its own: every call resolves the entry in
/// its registry, so calls after [`Repo::stop`] fail with a not-found error.
///

pub struct Repo<A: Adapter> {
    registry: &'static Registry,
    id: RepoId,
    timeout: Option<Duration>,
    _marker: PhantomData<A>,
}

impl<A: Adapter> Repo<A> {
    #[must_use]
    pub const fn new(registry: &'static Registry, id: RepoId) -> Self {
        Self {
            registry,
            id,
            timeout: None,
            _marker: PhantomData,
        }
    }

    /// Start a repository in the process-wide registry.
    pub fn start(
        adapter: A,
        config: RepoConfig,
        restart: RestartType,
    ) -> Result<(Self, StartedRepo), InternalError> {
        Self::start_in(Registry::global(), adapter, config, restart)
    }

    pub fn start_in(
        registry: &'static Registry,
        adapter: A,
        config: RepoConfig,
        restart: RestartType,
    ) -> Result<(Self, StartedRepo), InternalError> {
        let started = registry.start(adapter, config, restart)?;

        Ok((Self::new(registry, started.id), started))
    }

    pub fn stop(self) -> Result<(), InternalError> {
        self.registry.stop(self.id)?;

        Ok(())
    }

    #[must_use]
    pub const fn id(&self) -> RepoId {
        self.id
    }

    /// Override the configured timeout for calls made through this handle.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn entry(&self) -> Result<RepoEntry<A>, InternalError> {
        Ok(self.registry.lookup::<A>(self.id)?)
    }

    //
    // Queries
    //

    pub fn prepare(
        &self,
        operation: Operation,
        queryable: impl Queryable,
    ) -> Result<PreparedQuery<A>, InternalError> {
        let entry = self.entry()?;

        Ok(plan::prepare_with(&entry, operation, queryable)?)
    }

    /// Run an `all` query; rows come back decoded through the loaders.
    pub fn all(&self, queryable: impl Queryable) -> Result<Vec<Row>, InternalError> {
        let (entry, metadata, result) = self.run(Operation::All, queryable)?;
        let shape = metadata.select.unwrap_or_default();

        result
            .rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| load_row(entry.adapter(), &shape, row))
            .collect()
    }

    /// Returns the number of rows updated.
    pub fn update_all(&self, queryable: impl Queryable) -> Result<u64, InternalError> {
        let (_, _, result) = self.run(Operation::UpdateAll, queryable)?;

        Ok(result.num_rows)
    }

    /// Returns the number of rows deleted.
    pub fn delete_all(&self, queryable: impl Queryable) -> Result<u64, InternalError> {
        let (_, _, result) = self.run(Operation::DeleteAll, queryable)?;

        Ok(result.num_rows)
    }

    /// Decode one raw row aligned with `shape`.
    pub fn load_row(&self, shape: &SelectShape, row: Row) -> Result<Row, InternalError> {
        let entry = self.entry()?;

        load_row(entry.adapter(), shape, row)
    }

    //
    // Schema writes
    //

    pub fn insert(
        &self,
        model: &'static SchemaModel,
        fields: Fields,
        on_conflict: &OnConflict,
    ) -> Result<WriteOutcome, InternalError> {
        let entry = self.entry()?;
        let adapter = entry.adapter();
        let fields = autogenerate(adapter, model, fields)?;
        let fields = dump_fields(adapter, model, fields)?;

        let outcome = adapter.insert(
            entry.meta(),
            &schema_meta(&entry, model),
            fields,
            on_conflict,
            &returning(model),
            &self.options(&entry),
        )?;

        load_outcome(adapter, model, outcome)
    }

    /// Insert many rows in one adapter call; returns the number inserted.
    pub fn insert_all(
        &self,
        model: &'static SchemaModel,
        rows: Vec<Fields>,
        on_conflict: &OnConflict,
    ) -> Result<u64, InternalError> {
        let entry = self.entry()?;
        let adapter = entry.adapter();

        let mut header: Vec<String> = Vec::new();
        let mut dumped = Vec::with_capacity(rows.len());
        for fields in rows {
            let fields = dump_fields(adapter, model, autogenerate(adapter, model, fields)?)?;
            for (name, _) in &fields {
                if !header.contains(name) {
                    header.push(name.clone());
                }
            }
            dumped.push(fields);
        }

        let QueryResult { num_rows, .. } = adapter.insert_all(
            entry.meta(),
            &schema_meta(&entry, model),
            &header,
            dumped,
            on_conflict,
            &[],
            &self.options(&entry),
        )?;

        Ok(num_rows)
    }

    /// [`WriteOutcome::Stale`] when `filters` match no row.
    pub fn update(
        &self,
        model: &'static SchemaModel,
        fields: Fields,
        filters: Fields,
    ) -> Result<WriteOutcome, InternalError> {
        let entry = self.entry()?;
        let adapter = entry.adapter();
        let fields = dump_fields(adapter, model, fields)?;
        let filters = dump_fields(adapter, model, filters)?;

        let outcome = adapter.update(
            entry.meta(),
            &schema_meta(&entry, model),
            fields,
            filters,
            &returning(model),
            &self.options(&entry),
        )?;
        if outcome.is_stale() {
            tracing::debug!(repo = %self.id, schema = model.path, "update matched no row");
        }

        load_outcome(adapter, model, outcome)
    }

    /// [`WriteOutcome::Stale`] when `filters` match no row.
    pub fn delete(
        &self,
        model: &'static SchemaModel,
        filters: Fields,
    ) -> Result<WriteOutcome, InternalError> {
        let entry = self.entry()?;
        let adapter = entry.adapter();
        let filters = dump_fields(adapter, model, filters)?;

        let outcome = adapter.delete(
            entry.meta(),
            &schema_meta(&entry, model),
            filters,
            &returning(model),
            &self.options(&entry),
        )?;
        if outcome.is_stale() {
            tracing::debug!(repo = %self.id, schema = model.path, "delete matched no row");
        }

        load_outcome(adapter, model, outcome)
    }

    // helpers

    fn run(
        &self,
        operation: Operation,
        queryable: impl Queryable,
    ) -> Result<(RepoEntry<A>, QueryMetadata, QueryResult), InternalError> {
        let entry = self.entry()?;
        let PreparedQuery {
            plan,
            params,
            metadata,
            ..
        } = plan::prepare_with(&entry, operation, queryable)?;

        let result = entry.adapter().execute(
            entry.meta(),
            &metadata,
            plan,
            &params,
            &self.options(&entry),
        )?;
        tracing::debug!(repo = %self.id, %operation, rows = result.num_rows, "query executed");

        Ok((entry, metadata, result))
    }

    fn options(&self, entry: &RepoEntry<A>) -> ExecOptions {
        let options = ExecOptions::from_config(entry.config());
        match self.timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }
}

// Manual Copy + Clone; the handle is a registry reference plus an id.
impl<A: Adapter> Copy for Repo<A> {}

impl<A: Adapter> Clone for Repo<A> {
    fn clone(&self) -> Self {
        *self
    }
}

fn schema_meta<A: Adapter>(entry: &RepoEntry<A>, model: &SchemaModel) -> SchemaMetadata {
    SchemaMetadata::for_schema(model).with_prefix(entry.config().prefix.as_deref())
}

fn returning(model: &SchemaModel) -> Vec<String> {
    model
        .primary_key
        .iter()
        .map(|field| (*field).to_string())
        .collect()
}

/// Fill in the autogenerated key unless the caller supplied one.
fn autogenerate<A: Adapter>(
    adapter: &A,
    model: &SchemaModel,
    mut fields: Fields,
) -> Result<Fields, InternalError> {
    let Some(auto) = model.autogenerate_id else {
        return Ok(fields);
    };
    if fields
        .iter()
        .any(|(name, value)| name == auto.field && !value.is_null())
    {
        return Ok(fields);
    }

    fields.retain(|(name, _)| name != auto.field);
    if let Some(value) = adapter.autogenerate(auto.kind)? {
        fields.push((auto.field.to_string(), value));
    }

    Ok(fields)
}

fn dump_fields<A: Adapter>(
    adapter: &A,
    model: &SchemaModel,
    fields: Fields,
) -> Result<Fields, InternalError> {
    let mut out = Vec::with_capacity(fields.len());

    for (name, value) in fields {
        let kind = model
            .field_kind(&name)
            .ok_or_else(|| PlanError::UnknownField {
                table: model.source().to_string(),
                field: name.clone(),
            })?;
        let value = cast::cast_value(kind, value).map_err(|error| PlanError::InvalidValue {
            field: name.clone(),
            error,
        })?;
        out.push((name, adapter::dump_value(adapter, kind, value)?));
    }

    Ok(out)
}

fn load_outcome<A: Adapter>(
    adapter: &A,
    model: &SchemaModel,
    outcome: WriteOutcome,
) -> Result<WriteOutcome, InternalError> {
    let WriteOutcome::Ok(fields) = outcome else {
        return Ok(outcome);
    };

    let mut loaded = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        let value = match model.field_kind(&name) {
            Some(kind) => adapter::load_value(adapter, kind, value)?,
            None => value,
        };
        loaded.push((name, value));
    }

    Ok(WriteOutcome::Ok(loaded))
}

// Columns without a known kind (computed expressions) pass through as-is.
fn load_row<A: Adapter>(adapter: &A, shape: &SelectShape, row: Row) -> Result<Row, InternalError> {
    row.into_iter()
        .enumerate()
        .map(
            |(index, value)| match shape.fields.get(index).and_then(|field| field.kind) {
                Some(kind) => {
                    adapter::load_value(adapter, kind, value).map_err(InternalError::from)
                }
                None => Ok(value),
            },
        )
        .collect()
}
