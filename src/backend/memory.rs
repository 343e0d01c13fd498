//! In-memory backend. Tables are column lists plus row vectors; schema changes
//! edit the column list and backfill existing rows. Used by tests and demos.

use super::{compare_values, values_equal, Aggregate, Filter, QueryBackend, Row, SelectQuery, SortOrder};
use crate::config::{ColumnConfig, ColumnDefaultConfig, SchemaChange, TableSchema};
use crate::error::{OrmError, OrmResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

static SELECT_ALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*select\s+\*\s+from\s+"?(\w+)"?\s*;?\s*$"#).expect("valid regex")
});
static SELECT_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*select\s+count\(\*\)\s+from\s+"?(\w+)"?\s*;?\s*$"#).expect("valid regex")
});

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<ColumnConfig>,
    primary_key: Option<String>,
    indexes: HashSet<String>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column(&self, name: &str) -> Option<&ColumnConfig> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn check_columns<'a>(&self, table: &str, names: impl Iterator<Item = &'a String>) -> OrmResult<()> {
        for name in names {
            if self.column(name).is_none() {
                return Err(OrmError::Backend(format!(
                    "column {} does not exist on table {}",
                    name, table
                )));
            }
        }
        Ok(())
    }

    /// Rejects a row whose primary key or unique columns collide with `others`.
    fn check_unique(&self, table: &str, row: &Row, others: &[&Row]) -> OrmResult<()> {
        let unique_cols = self
            .columns
            .iter()
            .filter(|c| c.unique || self.primary_key.as_deref() == Some(c.name.as_str()));
        for col in unique_cols {
            let Some(value) = row.get(&col.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = others
                .iter()
                .any(|o| o.get(&col.name).map_or(false, |v| values_equal(v, value)));
            if clash {
                return Err(OrmError::Backend(format!(
                    "duplicate value {} for {}.{}",
                    value, table, col.name
                )));
            }
        }
        Ok(())
    }

    fn check_not_null(&self, table: &str, row: &Row) -> OrmResult<()> {
        for col in self.columns.iter().filter(|c| !c.nullable) {
            if row.get(&col.name).map_or(true, Value::is_null) {
                return Err(OrmError::Backend(format!(
                    "null value in column {}.{} violates not-null constraint",
                    table, col.name
                )));
            }
        }
        Ok(())
    }
}

fn default_value(col: &ColumnConfig) -> Value {
    match &col.default {
        Some(ColumnDefaultConfig::Literal(v)) => v.clone(),
        Some(ColumnDefaultConfig::Expression { .. }) | None => Value::Null,
    }
}

fn numbers<'a>(rows: impl Iterator<Item = &'a Row>, column: &str) -> Vec<f64> {
    rows.filter_map(|r| r.get(column).and_then(Value::as_f64)).collect()
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, MemoryTable>>,
    reads: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read statements (select, count, aggregate, raw) executed so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Column names of `table` in declaration order.
    pub async fn columns(&self, table: &str) -> OrmResult<Vec<String>> {
        let tables = self.tables.read().await;
        let t = tables.get(table).ok_or_else(|| missing_table(table))?;
        Ok(t.columns.iter().map(|c| c.name.clone()).collect())
    }

    pub async fn indexes(&self, table: &str) -> OrmResult<Vec<String>> {
        let tables = self.tables.read().await;
        let t = tables.get(table).ok_or_else(|| missing_table(table))?;
        let mut names: Vec<_> = t.indexes.iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

fn missing_table(table: &str) -> OrmError {
    OrmError::Backend(format!("table {} does not exist", table))
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn has_table(&self, table: &str) -> OrmResult<bool> {
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn create_table(&self, schema: &TableSchema) -> OrmResult<()> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(&schema.name) {
            return Err(OrmError::Backend(format!("table {} already exists", schema.name)));
        }
        tables.insert(
            schema.name.clone(),
            MemoryTable {
                columns: schema.columns.clone(),
                primary_key: schema.primary_key.clone(),
                ..MemoryTable::default()
            },
        );
        Ok(())
    }

    async fn alter_table(&self, table: &str, change: &SchemaChange) -> OrmResult<()> {
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        match change {
            SchemaChange::AddColumn { column } => {
                if t.column(&column.name).is_some() {
                    return Err(OrmError::Backend(format!(
                        "column {} already exists on table {}",
                        column.name, table
                    )));
                }
                let fill = default_value(column);
                if !column.nullable && fill.is_null() && !t.rows.is_empty() {
                    return Err(OrmError::Backend(format!(
                        "column {}.{} is not null and has no default",
                        table, column.name
                    )));
                }
                for row in &mut t.rows {
                    row.insert(column.name.clone(), fill.clone());
                }
                t.columns.push(column.clone());
            }
            SchemaChange::DropColumn { name } => {
                t.check_columns(table, std::iter::once(name))?;
                t.columns.retain(|c| c.name != *name);
                for row in &mut t.rows {
                    row.remove(name);
                }
            }
            SchemaChange::RenameColumn { from, to } => {
                t.check_columns(table, std::iter::once(from))?;
                if t.column(to).is_some() {
                    return Err(OrmError::Backend(format!(
                        "column {} already exists on table {}",
                        to, table
                    )));
                }
                for c in t.columns.iter_mut().filter(|c| c.name == *from) {
                    c.name = to.clone();
                }
                if t.primary_key.as_deref() == Some(from.as_str()) {
                    t.primary_key = Some(to.clone());
                }
                for row in &mut t.rows {
                    if let Some(v) = row.remove(from) {
                        row.insert(to.clone(), v);
                    }
                }
            }
            SchemaChange::AlterColumn { column } => {
                t.check_columns(table, std::iter::once(&column.name))?;
                for c in t.columns.iter_mut().filter(|c| c.name == column.name) {
                    *c = column.clone();
                }
            }
            SchemaChange::AddIndex { name, columns, .. } => {
                t.check_columns(table, columns.iter())?;
                t.indexes.insert(name.clone());
            }
            SchemaChange::DropIndex { name } => {
                t.indexes.remove(name);
            }
            SchemaChange::Raw { sql } => {
                tracing::debug!(table = %table, sql = %sql, "raw schema change ignored by memory backend");
            }
        }
        Ok(())
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> OrmResult<Vec<Row>> {
        self.record_read();
        let tables = self.tables.read().await;
        let t = tables.get(table).ok_or_else(|| missing_table(table))?;
        t.check_columns(table, query.columns.iter())?;

        let mut rows: Vec<&Row> = t.rows.iter().filter(|r| query.filter.matches(r)).collect();
        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|(col, order)| {
                        let ord = compare_values(
                            a.get(col).unwrap_or(&Value::Null),
                            b.get(col).unwrap_or(&Value::Null),
                        );
                        match order {
                            SortOrder::Asc => ord,
                            SortOrder::Desc => ord.reverse(),
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| {
                if query.columns.is_empty() {
                    r.clone()
                } else {
                    query
                        .columns
                        .iter()
                        .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                        .collect()
                }
            })
            .collect())
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> OrmResult<u64> {
        self.record_read();
        let tables = self.tables.read().await;
        let t = tables.get(table).ok_or_else(|| missing_table(table))?;
        let n = t
            .rows
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .count();
        Ok(n as u64)
    }

    async fn aggregate(
        &self,
        table: &str,
        aggregate: &Aggregate,
        filter: Option<&Filter>,
    ) -> OrmResult<Value> {
        self.record_read();
        let tables = self.tables.read().await;
        let t = tables.get(table).ok_or_else(|| missing_table(table))?;
        let column = aggregate.column().to_string();
        t.check_columns(table, std::iter::once(&column))?;
        let rows = t.rows.iter().filter(|r| filter.map_or(true, |f| f.matches(r)));

        let value = match aggregate {
            Aggregate::Min(_) | Aggregate::Max(_) => {
                let values = rows.filter_map(|r| r.get(&column)).filter(|v| !v.is_null());
                let picked = if matches!(aggregate, Aggregate::Min(_)) {
                    values.min_by(|a, b| compare_values(a, b))
                } else {
                    values.max_by(|a, b| compare_values(a, b))
                };
                picked.cloned().unwrap_or(Value::Null)
            }
            Aggregate::Sum(_) => {
                let nums = numbers(rows, &column);
                if nums.is_empty() {
                    Value::Null
                } else {
                    number_value(nums.iter().sum())
                }
            }
            Aggregate::Avg(_) => {
                let nums = numbers(rows, &column);
                if nums.is_empty() {
                    Value::Null
                } else {
                    number_value(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
        };
        Ok(value)
    }

    async fn insert(&self, table: &str, rows: &[Row]) -> OrmResult<u64> {
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;

        let mut pending: Vec<Row> = Vec::with_capacity(rows.len());
        for input in rows {
            t.check_columns(table, input.keys())?;
            let row: Row = t
                .columns
                .iter()
                .map(|c| {
                    let v = input.get(&c.name).cloned().unwrap_or_else(|| default_value(c));
                    (c.name.clone(), v)
                })
                .collect();
            t.check_not_null(table, &row)?;
            let others: Vec<&Row> = t.rows.iter().chain(pending.iter()).collect();
            t.check_unique(table, &row, &others)?;
            pending.push(row);
        }

        let n = pending.len() as u64;
        t.rows.extend(pending);
        Ok(n)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: &Row) -> OrmResult<u64> {
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        t.check_columns(table, patch.keys())?;

        let mut next = t.rows.clone();
        let mut n = 0u64;
        for row in next.iter_mut().filter(|r| filter.matches(r)) {
            for (k, v) in patch {
                row.insert(k.clone(), v.clone());
            }
            t.check_not_null(table, row)?;
            n += 1;
        }
        for (i, row) in next.iter().enumerate() {
            let others: Vec<&Row> = next
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, r)| r)
                .collect();
            t.check_unique(table, row, &others)?;
        }
        t.rows = next;
        Ok(n)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> OrmResult<u64> {
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        let before = t.rows.len();
        t.rows.retain(|r| !filter.matches(r));
        Ok((before - t.rows.len()) as u64)
    }

    async fn truncate(&self, table: &str) -> OrmResult<()> {
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        t.rows.clear();
        Ok(())
    }

    /// Understands `SELECT * FROM <table>` and `SELECT COUNT(*) FROM <table>` only.
    async fn raw(&self, sql: &str) -> OrmResult<Vec<Row>> {
        if let Some(caps) = SELECT_COUNT.captures(sql) {
            let n = self.count(&caps[1], None).await?;
            let mut row = Row::new();
            row.insert("count".into(), Value::from(n));
            return Ok(vec![row]);
        }
        if let Some(caps) = SELECT_ALL.captures(sql) {
            return self.select(&caps[1], &SelectQuery::new()).await;
        }
        Err(OrmError::Backend(format!(
            "memory backend cannot run raw statement: {}",
            sql
        )))
    }
}
