//! PostgreSQL backend over a sqlx pool.

use super::{Aggregate, Filter, QueryBackend, Row, SelectQuery};
use crate::config::{SchemaChange, TableSchema};
use crate::error::{OrmError, OrmResult};
use crate::sql::builder;
use crate::sql::{ColumnTypes, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, PgPool, Postgres};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

pub struct PgBackend {
    pool: PgPool,
    /// Column types per table, loaded on first use and dropped after schema changes.
    types: RwLock<HashMap<String, ColumnTypes>>,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Create the database if needed, then open a pool.
    pub async fn connect(database_url: &str) -> OrmResult<Self> {
        ensure_database_exists(database_url).await?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn column_types(&self, table: &str) -> OrmResult<ColumnTypes> {
        if let Some(t) = self.types.read().await.get(table) {
            return Ok(t.clone());
        }
        let rows: Vec<(String, String)> = sqlx::query_as(builder::column_types())
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        let types: ColumnTypes = rows.into_iter().collect();
        self.types
            .write()
            .await
            .insert(table.to_string(), types.clone());
        Ok(types)
    }

    async fn forget_types(&self, table: &str) {
        self.types.write().await.remove(table);
    }

    async fn query_rows(&self, q: &QueryBuf) -> OrmResult<Vec<Row>> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_params(&q.sql, &q.params).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, q: &QueryBuf) -> OrmResult<u64> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let done = bind_params(&q.sql, &q.params).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn execute_ddl(&self, sql: &str) -> OrmResult<()> {
        tracing::debug!(sql = %sql, "ddl");
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn bind_params<'q>(sql: &'q str, params: &[Value]) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

#[async_trait]
impl QueryBackend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn has_table(&self, table: &str) -> OrmResult<bool> {
        let exists: (bool,) = sqlx::query_as(builder::has_table())
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists.0)
    }

    async fn create_table(&self, schema: &TableSchema) -> OrmResult<()> {
        self.execute_ddl(&builder::create_table(schema)).await?;
        self.forget_types(&schema.name).await;
        Ok(())
    }

    async fn alter_table(&self, table: &str, change: &SchemaChange) -> OrmResult<()> {
        for sql in builder::alter_table(table, change) {
            self.execute_ddl(&sql).await?;
        }
        self.forget_types(table).await;
        Ok(())
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> OrmResult<Vec<Row>> {
        let types = self.column_types(table).await?;
        self.query_rows(&builder::select(table, query, &types)).await
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> OrmResult<u64> {
        let types = self.column_types(table).await?;
        let rows = self.query_rows(&builder::count(table, filter, &types)).await?;
        rows.first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| OrmError::Backend(format!("count on {} returned no value", table)))
    }

    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
        filter: Option<&Filter>,
    ) -> OrmResult<Value> {
        let types = self.column_types(table).await?;
        let rows = self
            .query_rows(&builder::aggregate(table, aggregate, filter, &types))
            .await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|mut r| r.remove("value"))
            .unwrap_or(Value::Null);
        Ok(match (aggregate, value) {
            (Aggregate::Sum(_) | Aggregate::Avg(_), Value::String(s)) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::String(s), Value::Number),
            (_, v) => v,
        })
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> OrmResult<u64> {
        let types = self.column_types(table).await?;
        let mut tx = self.pool.begin().await?;
        let mut count = 0u64;
        for row in rows {
            let q = builder::insert(table, row, &types);
            tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
            count += bind_params(&q.sql, &q.params)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: &Row) -> OrmResult<u64> {
        if patch.is_empty() {
            return Ok(0);
        }
        let types = self.column_types(table).await?;
        self.execute(&builder::update(table, filter, patch, &types)).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> OrmResult<u64> {
        let types = self.column_types(table).await?;
        self.execute(&builder::delete(table, filter, &types)).await
    }

    async fn truncate(&self, table: &str) -> OrmResult<()> {
        self.execute_ddl(&builder::truncate(table)).await
    }

    async fn raw(&self, sql: &str) -> OrmResult<Vec<Row>> {
        tracing::debug!(sql = %sql, "raw");
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> OrmResult<()> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| OrmError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", builder::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> OrmResult<(String, String)> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| OrmError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = format!("{}postgres", base);
    Ok((admin_url, db_name.to_string()))
}
