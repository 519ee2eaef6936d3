use crate::{
    db::query::{Expr, plan::PlannedQuery},
    model::{FieldKind, Source},
};

///
/// SelectField
///
/// One column of a flattened select. `name` and `kind` are known for
/// field references; computed expressions carry neither.
///

#[derive(Clone, Debug, PartialEq)]
pub struct SelectField {
    pub binding: Option<usize>,
    pub name: Option<String>,
    pub kind: Option<FieldKind>,
    pub expr: Expr,
}

///
/// SelectShape
///
/// Flattened select in source-declaration order; result rows are aligned
/// positionally with `fields`.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectShape {
    pub fields: Vec<SelectField>,
}

impl SelectShape {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Column index for `name`. When several selected sources expose the
    /// name, the first-declared source wins.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.name.as_deref() == Some(name))
            .min_by_key(|(_, field)| field.binding.unwrap_or(usize::MAX))
            .map(|(index, _)| index)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&SelectField> {
        self.position(name).map(|index| &self.fields[index])
    }

    pub fn names(&self) -> impl Iterator<Item = Option<&str>> {
        self.fields.iter().map(|field| field.name.as_deref())
    }
}

///
/// SourceMeta
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceMeta {
    /// Storage location with the effective prefix applied.
    pub source: Source,
    pub schema: Option<&'static str>,
}

///
/// QueryMetadata
///
/// Execution context handed to the adapter alongside the plan.
/// Carries no parameter values, so structurally identical queries share it.
///

#[derive(Clone, Debug, PartialEq)]
pub struct QueryMetadata {
    pub prefix: Option<String>,
    pub sources: Vec<SourceMeta>,
    pub preloads: Vec<String>,
    pub select: Option<SelectShape>,
}

impl QueryMetadata {
    pub(crate) fn from_planned(query: &PlannedQuery) -> Self {
        Self {
            prefix: query.prefix.clone(),
            sources: query
                .sources
                .iter()
                .map(|from| SourceMeta {
                    source: from.source.clone(),
                    schema: from.schema_path(),
                })
                .collect(),
            preloads: query.preloads.clone(),
            select: query.select.clone(),
        }
    }

    /// The `from` source.
    #[must_use]
    pub fn root(&self) -> Option<&SourceMeta> {
        self.sources.first()
    }
}
