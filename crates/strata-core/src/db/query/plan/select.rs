use crate::db::query::{Operation, Query, SelectItem, plan::PlanError};

/// Give an `all` query without a select the whole `from` source.
///
/// Other operations are returned untouched; their select, if any, is
/// rejected later during normalization.
pub(crate) fn ensure_select(mut query: Query, operation: Operation) -> Result<Query, PlanError> {
    if operation != Operation::All || query.select.is_some() {
        return Ok(query);
    }

    if query.from.schema.is_none() {
        return Err(PlanError::SchemalessSelect {
            table: query.from.source.to_string(),
        });
    }
    query.select = Some(vec![SelectItem::Source(0)]);

    Ok(query)
}
