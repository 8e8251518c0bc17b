use crate::repository::store::{Cursor, Filter, OrderBy, OrderType, Query};
use serde_json::Value;

/// 链式构造 Query
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new(collection: &str) -> Self {
        Self { query: Query::collection(collection) }
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn in_array<T: Into<Value>>(mut self, field: &str, values: Vec<T>) -> Self {
        let arr = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.query.filters.push(Filter::In(field.to_string(), arr));
        self
    }

    pub fn id_in(mut self, ids: Vec<String>) -> Self {
        self.query.filters.push(Filter::IdIn(ids));
        self
    }

    pub fn order_by(mut self, field: &str, direction: OrderType) -> Self {
        self.query.order_by = Some(OrderBy { field: field.to_string(), direction });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.query.start_after = cursor;
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

impl From<QueryBuilder> for Query {
    fn from(builder: QueryBuilder) -> Self {
        builder.build()
    }
}
