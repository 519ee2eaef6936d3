//! Prepare stage: resolve every binding and field, move literals into
//! positional params (cast to the field kind, then dumped through the
//! adapter), and key the resulting shape.

use crate::{
    adapter::{self, Adapter, CoerceError},
    cast,
    db::query::{
        CompareOp, Expr, FromExpr, JoinExpr, Operation, OrderExpr, Predicate, Query, SelectItem,
        UpdateExpr,
        plan::{
            Params, PlanError, QueryError,
            fingerprint::{self, CacheKey, ParamType},
        },
    },
    model::FieldKind,
    value::Value,
};
use std::collections::BTreeSet;

///
/// Bound
/// Query with every literal replaced by a `Param`, plus its params and key.
///

pub(crate) struct Bound {
    pub(crate) query: Query,
    pub(crate) params: Params,
    pub(crate) key: CacheKey,
}

pub(crate) fn bind<A: Adapter + ?Sized>(
    query: Query,
    operation: Operation,
    adapter: &A,
) -> Result<Bound, QueryError> {
    let sources = std::iter::once(query.from.clone())
        .chain(query.joins.iter().map(|join| join.from.clone()))
        .collect();
    let mut binder = Binder {
        adapter,
        sources,
        values: Vec::new(),
        types: Vec::new(),
    };

    let Query {
        prefix,
        from,
        joins,
        filters,
        select,
        order_by,
        limit,
        offset,
        distinct,
        updates,
        preloads,
    } = query;

    // Params are numbered in statement order: select, set, join, where,
    // order by, limit, offset.
    let select = select
        .map(|items| {
            items
                .into_iter()
                .map(|item| binder.bind_select_item(item))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;
    let updates = binder.bind_updates(updates)?;

    let mut bound_joins = Vec::with_capacity(joins.len());
    for JoinExpr { kind, from, on } in joins {
        let on = binder.bind_predicate(on)?;
        bound_joins.push(JoinExpr { kind, from, on });
    }

    let filters = filters
        .into_iter()
        .map(|filter| binder.bind_predicate(filter))
        .collect::<Result<Vec<_>, _>>()?;

    let mut bound_order = Vec::with_capacity(order_by.len());
    for OrderExpr { expr, direction } in order_by {
        let expr = binder.bind_expr(expr, None, "order_by")?;
        bound_order.push(OrderExpr { expr, direction });
    }

    let limit = binder.bind_count(limit, "limit")?;
    let offset = binder.bind_count(offset, "offset")?;

    let query = Query {
        prefix,
        from,
        joins: bound_joins,
        filters,
        select,
        order_by: bound_order,
        limit,
        offset,
        distinct,
        updates,
        preloads,
    };
    let key = fingerprint::cache_key(operation, &query, &binder.types);

    Ok(Bound {
        query,
        params: Params::new(binder.values),
        key,
    })
}

///
/// Binder
///

struct Binder<'a, A: ?Sized> {
    adapter: &'a A,
    sources: Vec<FromExpr>,
    values: Vec<Value>,
    types: Vec<ParamType>,
}

impl<A: Adapter + ?Sized> Binder<'_, A> {
    /// Kind of `field` on the source at `binding`; `None` for schemaless
    /// sources, which accept any field name.
    fn resolve_field(&self, binding: usize, field: &str) -> Result<Option<FieldKind>, PlanError> {
        let source = self
            .sources
            .get(binding)
            .ok_or(PlanError::UnknownBinding {
                binding,
                sources: self.sources.len(),
            })?;

        match source.schema {
            Some(model) => model
                .field_kind(field)
                .map(Some)
                .ok_or_else(|| PlanError::UnknownField {
                    table: source.source.to_string(),
                    field: field.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn bind_value(
        &mut self,
        kind: Option<FieldKind>,
        field: &str,
        value: Value,
    ) -> Result<Expr, QueryError> {
        let invalid = |error| PlanError::InvalidValue {
            field: field.to_string(),
            error,
        };

        let (value, ty) = match kind {
            Some(kind) => {
                let value = cast::cast_value(kind, value).map_err(invalid)?;
                let value = adapter::dump_value(self.adapter, kind, value).map_err(|err| match err {
                    CoerceError::Contract(err) => QueryError::Adapter(err),
                    CoerceError::Cast(error) => QueryError::Plan(invalid(error)),
                })?;
                (value, ParamType::Kind(kind))
            }
            None => {
                let tag = value.tag();
                (value, ParamType::Untyped(tag))
            }
        };

        let index = self.values.len();
        self.values.push(value);
        self.types.push(ty);

        Ok(Expr::Param(index))
    }

    fn bind_expr(
        &mut self,
        expr: Expr,
        kind: Option<FieldKind>,
        field: &str,
    ) -> Result<Expr, QueryError> {
        match expr {
            Expr::Field { binding, field } => {
                self.resolve_field(binding, &field)?;
                Ok(Expr::Field { binding, field })
            }
            Expr::Value(value) => self.bind_value(kind, field, value),
            Expr::Param(index) => Err(PlanError::UnexpectedParam { index }.into()),
            fragment @ Expr::Fragment(_) => Ok(fragment),
        }
    }

    fn bind_predicate(&mut self, predicate: Predicate) -> Result<Predicate, QueryError> {
        match predicate {
            Predicate::Compare { left, op, right } => {
                let (kind, field) = self.comparison_context(&left, &right)?;
                let kind = match (op, kind) {
                    // Patterns are free text even against enum fields.
                    (CompareOp::Like, Some(FieldKind::Text | FieldKind::Enum(_))) => {
                        Some(FieldKind::Text)
                    }
                    (CompareOp::Like, Some(kind)) => {
                        return Err(PlanError::LikeOnNonText { field, kind }.into());
                    }
                    (_, kind) => kind,
                };

                let left = self.bind_expr(left, kind, &field)?;
                let right = self.bind_expr(right, kind, &field)?;

                Ok(Predicate::Compare { left, op, right })
            }
            Predicate::IsNull(expr) => {
                Ok(Predicate::IsNull(self.bind_expr(expr, None, "is_null")?))
            }
            Predicate::And(children) => Ok(Predicate::And(self.bind_predicates(children)?)),
            Predicate::Or(children) => Ok(Predicate::Or(self.bind_predicates(children)?)),
            Predicate::Not(inner) => Ok(Predicate::not(self.bind_predicate(*inner)?)),
        }
    }

    fn bind_predicates(&mut self, children: Vec<Predicate>) -> Result<Vec<Predicate>, QueryError> {
        children
            .into_iter()
            .map(|child| self.bind_predicate(child))
            .collect()
    }

    // The first field operand decides the kind literals are checked against.
    fn comparison_context(
        &self,
        left: &Expr,
        right: &Expr,
    ) -> Result<(Option<FieldKind>, String), PlanError> {
        for expr in [left, right] {
            if let Expr::Field { binding, field } = expr {
                return Ok((self.resolve_field(*binding, field)?, field.clone()));
            }
        }

        Ok((None, String::from("literal")))
    }

    fn bind_select_item(&mut self, item: SelectItem) -> Result<SelectItem, QueryError> {
        match item {
            SelectItem::Source(binding) if binding < self.sources.len() => Ok(item),
            SelectItem::Source(binding) => Err(PlanError::UnknownBinding {
                binding,
                sources: self.sources.len(),
            }
            .into()),
            SelectItem::Expr(expr) => Ok(SelectItem::Expr(self.bind_expr(expr, None, "select")?)),
        }
    }

    // Assignments always target the `from` source.
    fn bind_updates(&mut self, updates: Vec<UpdateExpr>) -> Result<Vec<UpdateExpr>, QueryError> {
        let mut seen = BTreeSet::new();
        let mut bound = Vec::with_capacity(updates.len());

        for UpdateExpr { field, value } in updates {
            if !seen.insert(field.clone()) {
                return Err(PlanError::DuplicateUpdate { field }.into());
            }
            let kind = self.resolve_field(0, &field)?;
            let value = self.bind_expr(value, kind, &field)?;
            bound.push(UpdateExpr { field, value });
        }

        Ok(bound)
    }

    fn bind_count(
        &mut self,
        expr: Option<Expr>,
        clause: &'static str,
    ) -> Result<Option<Expr>, QueryError> {
        let Some(expr) = expr else {
            return Ok(None);
        };

        match expr {
            Expr::Value(Value::Int(count)) if count >= 0 => self
                .bind_value(Some(FieldKind::Int), clause, Value::Int(count))
                .map(Some),
            fragment @ Expr::Fragment(_) => Ok(Some(fragment)),
            Expr::Value(value) => Err(PlanError::InvalidLimit {
                clause,
                found: format!("{value:?}"),
            }
            .into()),
            Expr::Field { field, .. } => Err(PlanError::InvalidLimit {
                clause,
                found: format!("field '{field}'"),
            }
            .into()),
            Expr::Param(index) => Err(PlanError::UnexpectedParam { index }.into()),
        }
    }
}
