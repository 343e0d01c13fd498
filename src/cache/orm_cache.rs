//! Process-wide cache scope: the raw-query cache plus every table cache.

use super::cached_query::CachedQuery;
use super::table_cache::TableCache;
use crate::backend::{QueryBackend, Row};
use crate::error::OrmResult;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

/// Raw statement results keyed by the statement text.
pub type RawCache = CachedQuery<String, Vec<Row>>;

pub struct OrmCache {
    raw: Arc<RawCache>,
    tables: Vec<Arc<TableCache>>,
}

impl OrmCache {
    pub fn new(backend: Arc<dyn QueryBackend>, ttl: Option<Duration>) -> Self {
        let raw = CachedQuery::new(ttl, move |sql: String| {
            let backend = backend.clone();
            async move { backend.raw(&sql).await }.boxed()
        });
        Self {
            raw: Arc::new(raw),
            tables: Vec::new(),
        }
    }

    /// Shared handle given to each table cache so their writes clear it too.
    pub fn raw_cache(&self) -> Arc<RawCache> {
        self.raw.clone()
    }

    pub(crate) fn register(&mut self, table: Arc<TableCache>) {
        self.tables.push(table);
    }

    pub(crate) fn clear_tables(&mut self) {
        self.tables.clear();
    }

    /// Cached result of a raw statement. Only reads belong here; a raw write
    /// would not invalidate anything.
    pub async fn raw(&self, sql: &str) -> OrmResult<Vec<Row>> {
        self.raw.get(sql, sql.to_string()).await
    }

    /// Clear every table cache and the raw-query cache.
    pub fn invalidate(&self) {
        tracing::debug!(tables = self.tables.len(), "invalidating all caches");
        for table in &self.tables {
            table.invalidate();
        }
        self.raw.invalidate();
    }
}
