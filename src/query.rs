//! Per-table query capabilities. [`ReadQuery`] can only read; [`WriteQuery`]
//! adds mutations. Cached reads are handed a `ReadQuery`, so a cached read
//! cannot write.

use crate::backend::{Aggregate, Filter, QueryBackend, Row, SelectQuery};
use crate::error::{OrmError, OrmResult};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReadQuery {
    backend: Arc<dyn QueryBackend>,
    table: String,
}

impl ReadQuery {
    pub(crate) fn new(backend: Arc<dyn QueryBackend>, table: impl Into<String>) -> Self {
        Self {
            backend,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn select(&self, query: &SelectQuery) -> OrmResult<Vec<Row>> {
        self.backend.select(&self.table, query).await
    }

    pub async fn all(&self) -> OrmResult<Vec<Row>> {
        self.select(&SelectQuery::new()).await
    }

    pub async fn find(&self, filter: Filter) -> OrmResult<Vec<Row>> {
        self.select(&SelectQuery::new().filter(filter)).await
    }

    pub async fn first(&self, filter: Filter) -> OrmResult<Option<Row>> {
        let rows = self.select(&SelectQuery::new().filter(filter).limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Like [`first`](Self::first) but a missing row is [`OrmError::NotFound`].
    pub async fn one(&self, filter: Filter) -> OrmResult<Row> {
        let label = format!("{} where {}", self.table, filter);
        self.first(filter).await?.ok_or(OrmError::NotFound(label))
    }

    pub async fn count(&self, filter: Option<&Filter>) -> OrmResult<u64> {
        self.backend.count(&self.table, filter).await
    }

    pub async fn aggregate(&self, aggregate: &Aggregate, filter: Option<&Filter>) -> OrmResult<Value> {
        self.backend.aggregate(&self.table, aggregate, filter).await
    }
}

#[derive(Clone)]
pub struct WriteQuery {
    read: ReadQuery,
}

impl WriteQuery {
    pub(crate) fn new(backend: Arc<dyn QueryBackend>, table: impl Into<String>) -> Self {
        Self {
            read: ReadQuery::new(backend, table),
        }
    }

    /// Read-only view of the same table.
    pub fn read_only(&self) -> ReadQuery {
        self.read.clone()
    }

    pub async fn insert(&self, rows: &[Row]) -> OrmResult<u64> {
        self.read.backend.insert(&self.read.table, rows).await
    }

    pub async fn insert_one(&self, row: Row) -> OrmResult<u64> {
        self.insert(std::slice::from_ref(&row)).await
    }

    pub async fn update(&self, filter: &Filter, patch: &Row) -> OrmResult<u64> {
        self.read.backend.update(&self.read.table, filter, patch).await
    }

    pub async fn delete(&self, filter: &Filter) -> OrmResult<u64> {
        self.read.backend.delete(&self.read.table, filter).await
    }

    pub async fn truncate(&self) -> OrmResult<()> {
        self.read.backend.truncate(&self.read.table).await
    }
}

impl Deref for WriteQuery {
    type Target = ReadQuery;

    fn deref(&self) -> &ReadQuery {
        &self.read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::{ColumnConfig, TableSchema};
    use serde_json::json;

    async fn scores() -> WriteQuery {
        let backend: Arc<dyn QueryBackend> = Arc::new(MemoryBackend::new());
        backend
            .create_table(&TableSchema {
                name: "score".into(),
                columns: vec![ColumnConfig::new("id", "integer"), ColumnConfig::new("points", "integer")],
                primary_key: Some("id".into()),
            })
            .await
            .unwrap();
        let q = WriteQuery::new(backend, "score");
        for (id, points) in [(1, 10), (2, 30)] {
            q.insert_one(serde_json::from_value(json!({ "id": id, "points": points })).unwrap())
                .await
                .unwrap();
        }
        q
    }

    #[tokio::test]
    async fn one_reports_missing_rows() {
        let q = scores().await;
        assert_eq!(q.one(Filter::by("id", 2)).await.unwrap()["points"], json!(30));
        let err = q.one(Filter::by("id", 9)).await.unwrap_err();
        assert!(matches!(err, OrmError::NotFound(ref m) if m.starts_with("score where")));
    }

    #[tokio::test]
    async fn read_only_view_sees_writes() {
        let q = scores().await;
        let read = q.read_only();
        assert_eq!(read.aggregate(&Aggregate::Max("points".into()), None).await.unwrap(), json!(30));
        q.delete(&Filter::by("id", 2)).await.unwrap();
        assert_eq!(read.count(None).await.unwrap(), 1);
        assert_eq!(read.find(Filter::by("points", 10)).await.unwrap().len(), 1);
    }
}
