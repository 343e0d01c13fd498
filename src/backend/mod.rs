//! Query execution and schema building seam. The ORM only talks to a
//! [`QueryBackend`]; PostgreSQL and in-memory implementations live here.

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::{ensure_database_exists, PgBackend};

use crate::config::{SchemaChange, TableSchema};
use crate::error::OrmResult;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// One row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Equality predicates joined with AND.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `Filter::new().and(column, value)`.
    pub fn by(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().and(column, value)
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(col, expected)| {
            row.get(col)
                .map_or(expected.is_null(), |actual| values_equal(actual, expected))
        })
    }
}

/// Canonical text, e.g. `"id" = 1 AND "name" = "a"`. Used as the count cache key.
/// Column names are quoted so distinct filters never share a text.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (col, value)) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{} = {}", crate::sql::quoted(col), value)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default)]
pub struct SelectQuery {
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub filter: Filter,
    pub order_by: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Aggregate {
    Min(String),
    Max(String),
    Sum(String),
    Avg(String),
}

impl Aggregate {
    pub fn function(&self) -> &'static str {
        match self {
            Aggregate::Min(_) => "MIN",
            Aggregate::Max(_) => "MAX",
            Aggregate::Sum(_) => "SUM",
            Aggregate::Avg(_) => "AVG",
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Aggregate::Min(c) | Aggregate::Max(c) | Aggregate::Sum(c) | Aggregate::Avg(c) => c,
        }
    }
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn has_table(&self, table: &str) -> OrmResult<bool>;
    async fn create_table(&self, schema: &TableSchema) -> OrmResult<()>;
    async fn alter_table(&self, table: &str, change: &SchemaChange) -> OrmResult<()>;

    async fn select(&self, table: &str, query: &SelectQuery) -> OrmResult<Vec<Row>>;
    async fn count(&self, table: &str, filter: Option<&Filter>) -> OrmResult<u64>;
    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
        filter: Option<&Filter>,
    ) -> OrmResult<Value>;

    /// Returns the number of inserted rows.
    async fn insert(&self, table: &str, rows: &[Row]) -> OrmResult<u64>;
    /// Returns the number of updated rows.
    async fn update(&self, table: &str, filter: &Filter, patch: &Row) -> OrmResult<u64>;
    /// Returns the number of deleted rows.
    async fn delete(&self, table: &str, filter: &Filter) -> OrmResult<u64>;
    async fn truncate(&self, table: &str) -> OrmResult<()>;

    /// Run a backend-native statement and return its rows.
    async fn raw(&self, sql: &str) -> OrmResult<Vec<Row>>;
}

/// JSON equality where `1` and `1.0` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Total order over JSON values: null, bool, number, string, then arrays and objects by text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
