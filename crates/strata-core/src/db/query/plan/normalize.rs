//! Normalize stage: operation-specific clause checks, prefix resolution,
//! filter folding and select flattening.

use crate::db::query::{
    Expr, FromExpr, JoinKind, Operation, OrderExpr, Predicate, Query, SelectItem, UpdateExpr,
    plan::{PlanError, SelectField, SelectShape},
};

///
/// PlannedQuery
///
/// Normalized query handed to [`Adapter::prepare`](crate::adapter::Adapter::prepare).
/// Every literal is a `Param`; every source carries its effective prefix.
///

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedQuery {
    pub operation: Operation,
    pub prefix: Option<String>,
    /// `from` at binding 0, joined sources after it.
    pub sources: Vec<FromExpr>,
    pub joins: Vec<PlannedJoin>,
    /// All filters AND-ed into one predicate; `None` matches every row.
    pub predicate: Option<Predicate>,
    pub select: Option<SelectShape>,
    pub order_by: Vec<OrderExpr>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub distinct: bool,
    pub updates: Vec<UpdateExpr>,
    pub preloads: Vec<String>,
}

impl PlannedQuery {
    #[must_use]
    pub fn from_source(&self) -> Option<&FromExpr> {
        self.sources.first()
    }
}

///
/// PlannedJoin
///

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedJoin {
    /// Binding of the joined source in `PlannedQuery::sources`.
    pub binding: usize,
    pub kind: JoinKind,
    pub on: Predicate,
}

pub(crate) fn normalize(query: Query, operation: Operation) -> Result<PlannedQuery, PlanError> {
    check_clauses(&query, operation)?;

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

    let mut sources = Vec::with_capacity(1 + joins.len());
    sources.push(resolve_prefix(from, prefix.as_deref()));

    let mut planned_joins = Vec::with_capacity(joins.len());
    for (index, join) in joins.into_iter().enumerate() {
        sources.push(resolve_prefix(join.from, prefix.as_deref()));
        planned_joins.push(PlannedJoin {
            binding: index + 1,
            kind: join.kind,
            on: flatten(join.on),
        });
    }

    let predicate = fold_filters(filters);
    let select = select
        .map(|items| flatten_select(items, &sources))
        .transpose()?;

    Ok(PlannedQuery {
        operation,
        prefix,
        sources,
        joins: planned_joins,
        predicate,
        select,
        order_by,
        limit,
        offset,
        distinct,
        updates,
        preloads,
    })
}

fn check_clauses(query: &Query, operation: Operation) -> Result<(), PlanError> {
    let has_updates = !query.updates.is_empty();

    match operation {
        Operation::All => {
            if has_updates {
                return Err(PlanError::UnsupportedClause {
                    operation,
                    clause: "set",
                });
            }
            return Ok(());
        }
        Operation::UpdateAll if !has_updates => return Err(PlanError::MissingUpdates),
        Operation::DeleteAll if has_updates => {
            return Err(PlanError::UnsupportedClause {
                operation,
                clause: "set",
            });
        }
        Operation::UpdateAll | Operation::DeleteAll => {}
    }

    let read_only = [
        ("select", query.select.is_some()),
        ("order_by", !query.order_by.is_empty()),
        ("limit", query.limit.is_some()),
        ("offset", query.offset.is_some()),
        ("distinct", query.distinct),
        ("preload", !query.preloads.is_empty()),
    ];
    match read_only.into_iter().find(|(_, present)| *present) {
        Some((clause, _)) => Err(PlanError::UnsupportedClause { operation, clause }),
        None => Ok(()),
    }
}

// A source without its own prefix inherits the query prefix.
fn resolve_prefix(mut from: FromExpr, prefix: Option<&str>) -> FromExpr {
    if from.source.prefix.is_none() {
        from.source.prefix = prefix.map(str::to_string);
    }

    from
}

fn fold_filters(filters: Vec<Predicate>) -> Option<Predicate> {
    let mut conjuncts = Vec::new();
    for filter in filters {
        push_conjuncts(flatten(filter), &mut conjuncts);
    }

    match <[Predicate; 1]>::try_from(conjuncts) {
        Ok([single]) => Some(single),
        Err(conjuncts) if conjuncts.is_empty() => None,
        Err(conjuncts) => Some(Predicate::And(conjuncts)),
    }
}

/// Splice nested conjunctions into their parent, recursively.
fn flatten(predicate: Predicate) -> Predicate {
    match predicate {
        Predicate::And(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                push_conjuncts(flatten(child), &mut out);
            }
            match <[Predicate; 1]>::try_from(out) {
                Ok([single]) => single,
                Err(out) => Predicate::And(out),
            }
        }
        Predicate::Or(children) => Predicate::Or(children.into_iter().map(flatten).collect()),
        Predicate::Not(inner) => Predicate::not(flatten(*inner)),
        leaf => leaf,
    }
}

fn push_conjuncts(predicate: Predicate, out: &mut Vec<Predicate>) {
    match predicate {
        Predicate::And(children) => out.extend(children),
        other => out.push(other),
    }
}

fn flatten_select(items: Vec<SelectItem>, sources: &[FromExpr]) -> Result<SelectShape, PlanError> {
    let mut fields = Vec::new();

    for item in items {
        match item {
            SelectItem::Source(binding) => {
                let source = sources.get(binding).ok_or(PlanError::UnknownBinding {
                    binding,
                    sources: sources.len(),
                })?;
                let model = source.schema.ok_or_else(|| PlanError::SchemalessSelect {
                    table: source.source.to_string(),
                })?;

                fields.extend(model.fields.iter().map(|field| SelectField {
                    binding: Some(binding),
                    name: Some(field.name.to_string()),
                    kind: Some(field.kind),
                    expr: Expr::field(binding, field.name),
                }));
            }
            SelectItem::Expr(Expr::Field { binding, field }) => {
                let kind = sources
                    .get(binding)
                    .and_then(|source| source.schema)
                    .and_then(|model| model.field_kind(&field));

                fields.push(SelectField {
                    binding: Some(binding),
                    name: Some(field.clone()),
                    kind,
                    expr: Expr::Field { binding, field },
                });
            }
            SelectItem::Expr(expr) => fields.push(SelectField {
                binding: None,
                name: None,
                kind: None,
                expr,
            }),
        }
    }

    Ok(SelectShape { fields })
}
