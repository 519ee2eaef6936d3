use crate::{
    db::query::Query,
    model::{SchemaModel, Source},
};

///
/// Queryable
///
/// Anything that can be turned into a logical [`Query`]: a query itself, a
/// schema (selects the whole table), a source, or a bare table name
/// (schemaless).
///

pub trait Queryable {
    fn to_query(self) -> Query;
}

impl Queryable for Query {
    fn to_query(self) -> Query {
        self
    }
}

impl Queryable for &Query {
    fn to_query(self) -> Query {
        self.clone()
    }
}

impl Queryable for &'static SchemaModel {
    fn to_query(self) -> Query {
        Query::from_schema(self)
    }
}

impl Queryable for Source {
    fn to_query(self) -> Query {
        Query::from_source(self)
    }
}

impl Queryable for &str {
    fn to_query(self) -> Query {
        Query::from_source(Source::new(self))
    }
}
