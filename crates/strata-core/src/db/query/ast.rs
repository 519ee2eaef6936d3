use crate::{
    model::{SchemaModel, Source},
    value::Value,
};
use std::fmt;

///
/// Expr
///
/// Leaf expression inside a logical query. `Param` never comes from the
/// caller; the planner substitutes it for every bound `Value`.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Field `field` of the source at position `binding` (0 = from).
    Field { binding: usize, field: String },
    /// Caller-supplied literal, bound as a parameter during planning.
    Value(Value),
    /// Positional placeholder into the planned params.
    Param(usize),
    /// Raw backend text spliced into the statement verbatim.
    Fragment(String),
}

impl Expr {
    #[must_use]
    pub fn field(binding: usize, field: impl Into<String>) -> Self {
        Self::Field {
            binding,
            field: field.into(),
        }
    }

    #[must_use]
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    #[must_use]
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment(text.into())
    }

    #[must_use]
    pub const fn is_fragment(&self) -> bool {
        matches!(self, Self::Fragment(_))
    }
}

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
}

impl CompareOp {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Eq => 0x01,
            Self::Ne => 0x02,
            Self::Lt => 0x03,
            Self::Lte => 0x04,
            Self::Gt => 0x05,
            Self::Gte => 0x06,
            Self::Like => 0x07,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
        }
    }
}

///
/// Predicate
///

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    IsNull(Expr),
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl Predicate {
    #[must_use]
    pub const fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Self::Compare { left, op, right }
    }

    #[must_use]
    pub const fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(left, CompareOp::Eq, right)
    }

    #[must_use]
    pub const fn gt(left: Expr, right: Expr) -> Self {
        Self::compare(left, CompareOp::Gt, right)
    }

    #[must_use]
    pub const fn lt(left: Expr, right: Expr) -> Self {
        Self::compare(left, CompareOp::Lt, right)
    }

    #[must_use]
    pub const fn like(left: Expr, pattern: Expr) -> Self {
        Self::compare(left, CompareOp::Like, pattern)
    }

    #[must_use]
    pub fn not(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }
}

///
/// FromExpr
/// One query source: storage location plus the optional schema describing it.
///

#[derive(Clone, Debug)]
pub struct FromExpr {
    pub source: Source,
    pub schema: Option<&'static SchemaModel>,
}

impl FromExpr {
    #[must_use]
    pub fn schema(model: &'static SchemaModel) -> Self {
        Self {
            source: model.source(),
            schema: Some(model),
        }
    }

    #[must_use]
    pub const fn schemaless(source: Source) -> Self {
        Self {
            source,
            schema: None,
        }
    }

    #[must_use]
    pub fn schema_path(&self) -> Option<&'static str> {
        self.schema.map(|model| model.path)
    }
}

// Schema models are static; two sources match when they bind the same path.
impl PartialEq for FromExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.schema_path() == other.schema_path()
    }
}

///
/// JoinKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Inner => 0x01,
            Self::Left => 0x02,
        }
    }
}

///
/// JoinExpr
///

#[derive(Clone, Debug, PartialEq)]
pub struct JoinExpr {
    pub kind: JoinKind,
    pub from: FromExpr,
    pub on: Predicate,
}

///
/// SelectItem
///

#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    /// Every field of the source at this binding, in declaration order.
    Source(usize),
    Expr(Expr),
}

///
/// OrderDirection
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

///
/// OrderExpr
///

#[derive(Clone, Debug, PartialEq)]
pub struct OrderExpr {
    pub expr: Expr,
    pub direction: OrderDirection,
}

///
/// UpdateExpr
/// One `SET field = value` assignment of an `update_all`.
///

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateExpr {
    pub field: String,
    pub value: Expr,
}

///
/// Query
///
/// Declarative, backend-independent query. Built by the DSL layer (or the
/// builder methods below) and only validated during planning.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub prefix: Option<String>,
    pub from: FromExpr,
    pub joins: Vec<JoinExpr>,
    pub filters: Vec<Predicate>,
    pub select: Option<Vec<SelectItem>>,
    pub order_by: Vec<OrderExpr>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub distinct: bool,
    pub updates: Vec<UpdateExpr>,
    pub preloads: Vec<String>,
}

impl Query {
    #[must_use]
    pub fn new(from: FromExpr) -> Self {
        Self {
            prefix: None,
            from,
            joins: Vec::new(),
            filters: Vec::new(),
            select: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            updates: Vec::new(),
            preloads: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_schema(model: &'static SchemaModel) -> Self {
        Self::new(FromExpr::schema(model))
    }

    #[must_use]
    pub fn from_source(source: Source) -> Self {
        Self::new(FromExpr::schemaless(source))
    }

    /// Number of bindable sources (`from` plus joins).
    #[must_use]
    pub fn source_count(&self) -> usize {
        1 + self.joins.len()
    }

    /// Source at `binding`, where 0 is `from` and joins follow in order.
    #[must_use]
    pub fn binding(&self, binding: usize) -> Option<&FromExpr> {
        match binding {
            0 => Some(&self.from),
            n => self.joins.get(n - 1).map(|join| &join.from),
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn join(mut self, kind: JoinKind, model: &'static SchemaModel, on: Predicate) -> Self {
        self.joins.push(JoinExpr {
            kind,
            from: FromExpr::schema(model),
            on,
        });
        self
    }

    /// Add a filter; filters are AND-ed together.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    #[must_use]
    pub fn select(mut self, items: Vec<SelectItem>) -> Self {
        self.select = Some(items);
        self
    }

    #[must_use]
    pub fn select_fields(self, binding: usize, fields: &[&str]) -> Self {
        let items = fields
            .iter()
            .map(|field| SelectItem::Expr(Expr::field(binding, *field)))
            .collect();
        self.select(items)
    }

    #[must_use]
    pub fn order_by(mut self, expr: Expr, direction: OrderDirection) -> Self {
        self.order_by.push(OrderExpr { expr, direction });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: impl Into<Value>) -> Self {
        self.limit = Some(Expr::Value(limit.into()));
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: impl Into<Value>) -> Self {
        self.offset = Some(Expr::Value(offset.into()));
        self
    }

    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: Expr) -> Self {
        self.updates.push(UpdateExpr {
            field: field.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn preload(mut self, assoc: impl Into<String>) -> Self {
        self.preloads.push(assoc.into());
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "from {}", self.from.source)?;
        for join in &self.joins {
            write!(f, " join {}", join.from.source)?;
        }
        if !self.filters.is_empty() {
            write!(f, " where[{}]", self.filters.len())?;
        }
        Ok(())
    }
}
