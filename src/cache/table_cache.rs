//! Read/write cache for one table.
//!
//! Reads go through two [`CachedQuery`] instances: arbitrary row-set reads keyed
//! by a caller-chosen id, and row counts keyed by the filter text. Every write
//! made through [`TableCache::set`] clears both, plus the shared raw-query cache,
//! before the write runs. Writes made through `Table::query()` bypass this and
//! leave the cache stale until the next `set` or `invalidate`.

use super::cached_query::CachedQuery;
use super::orm_cache::RawCache;
use crate::backend::Filter;
use crate::error::{OrmError, OrmResult};
use crate::query::{ReadQuery, WriteQuery};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Count cache key when no filter is given.
pub const NO_FILTER_KEY: &str = "*";

type ReadFn = Box<dyn FnOnce(ReadQuery) -> BoxFuture<'static, OrmResult<Value>> + Send>;

pub struct TableCache {
    table: String,
    query: WriteQuery,
    rows: CachedQuery<ReadFn, Value>,
    counts: CachedQuery<Option<Filter>, u64>,
    raw: Arc<RawCache>,
}

impl TableCache {
    pub fn new(query: WriteQuery, ttl: Option<Duration>, raw: Arc<RawCache>) -> Self {
        let reader = query.read_only();
        let rows = CachedQuery::new(ttl, move |read: ReadFn| read(reader.clone()));

        let counter = query.read_only();
        let counts = CachedQuery::new(ttl, move |filter: Option<Filter>| {
            let q = counter.clone();
            async move { q.count(filter.as_ref()).await }.boxed()
        });

        Self {
            table: query.table().to_string(),
            query,
            rows,
            counts,
            raw,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn wrap<T, F, Fut>(read: F) -> ReadFn
    where
        T: Serialize + Send + 'static,
        F: FnOnce(ReadQuery) -> Fut + Send + 'static,
        Fut: Future<Output = OrmResult<T>> + Send + 'static,
    {
        Box::new(move |q: ReadQuery| {
            async move {
                let value = read(q).await?;
                Ok::<Value, OrmError>(serde_json::to_value(value)?)
            }
            .boxed()
        })
    }

    /// Result of `read` for `id`, from the cache when a live entry exists.
    ///
    /// Results are stored as JSON, so `T` must round-trip through serde.
    pub async fn get<T, F, Fut>(&self, id: &str, read: F) -> OrmResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(ReadQuery) -> Fut + Send + 'static,
        Fut: Future<Output = OrmResult<T>> + Send + 'static,
    {
        let value = self.rows.get(id, Self::wrap(read)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Like [`get`](Self::get) but always runs `read` and replaces the entry.
    pub async fn fetch<T, F, Fut>(&self, id: &str, read: F) -> OrmResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(ReadQuery) -> Fut + Send + 'static,
        Fut: Future<Output = OrmResult<T>> + Send + 'static,
    {
        let value = self.rows.fetch(id, Self::wrap(read)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Clear the caches, run `write` with full mutation access, then clear
    /// them again so a read that ran during the write is not kept.
    ///
    /// A failed write leaves the cache empty; the next read recomputes from the
    /// unchanged table.
    pub async fn set<T, F, Fut>(&self, write: F) -> OrmResult<T>
    where
        F: FnOnce(WriteQuery) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        self.invalidate();
        let result = write(self.query.clone()).await;
        self.invalidate();
        result
    }

    pub async fn count(&self, filter: Option<&Filter>) -> OrmResult<u64> {
        let filter = filter.filter(|f| !f.is_empty()).cloned();
        let key = filter
            .as_ref()
            .map_or_else(|| NO_FILTER_KEY.to_string(), |f| f.to_string());
        self.counts.get(&key, filter).await
    }

    /// Drop one row-set entry.
    pub fn invalidate_entry(&self, id: &str) {
        self.rows.invalidate_key(id);
    }

    /// Clear row-set and count entries, and the raw-query cache since raw
    /// queries may read this table.
    pub fn invalidate(&self) {
        tracing::debug!(table = %self.table, "invalidating table cache");
        self.rows.invalidate();
        self.counts.invalidate();
        self.raw.invalidate();
    }

    /// Live entries as (row sets, counts).
    pub fn len(&self) -> (usize, usize) {
        (self.rows.len(), self.counts.len())
    }
}
