//! CSV backup and restore of every initialised table.
//!
//! Each table is written as `<table>_chunk_<n>.csv` files holding at most
//! `backup_chunk_size` rows. The header row names the columns; every cell is
//! the JSON encoding of the value so types survive the round trip.

use crate::backend::{Row, SelectQuery, SortOrder};
use crate::error::{OrmError, OrmResult};
use crate::orm::Orm;
use crate::query::WriteQuery;
use crate::table::Table;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackupSummary {
    /// (table, rows) in initialisation order.
    pub tables: Vec<(String, usize)>,
    pub files: usize,
}

impl BackupSummary {
    pub fn rows(&self) -> usize {
        self.tables.iter().map(|(_, n)| n).sum()
    }
}

pub fn chunk_file_name(table: &str, chunk: usize) -> String {
    format!("{}_chunk_{}.csv", table, chunk)
}

fn chunk_pattern(table: &str) -> OrmResult<Regex> {
    Regex::new(&format!(r"^{}_chunk_(\d+)\.csv$", regex::escape(table)))
        .map_err(|e| OrmError::Backend(e.to_string()))
}

/// Chunk files of `table` in `dir`, ordered by chunk number.
async fn chunk_files(dir: &Path, table: &str) -> OrmResult<Vec<PathBuf>> {
    let pattern = chunk_pattern(table)?;
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = pattern.captures(name) {
            if let Ok(n) = caps[1].parse::<u64>() {
                found.push((n, entry.path()));
            }
        }
    }
    found.sort_by_key(|(n, _)| *n);
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn encode_chunk(columns: &[String], rows: &[Row]) -> OrmResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        let cells = columns
            .iter()
            .map(|c| serde_json::to_string(row.get(c).unwrap_or(&Value::Null)))
            .collect::<Result<Vec<_>, _>>()?;
        writer.write_record(&cells)?;
    }
    writer
        .into_inner()
        .map_err(|e| OrmError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
}

fn decode_chunk(bytes: &[u8]) -> OrmResult<Vec<Row>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (column, cell) in headers.iter().zip(record.iter()) {
            let value = if cell.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(cell)?
            };
            row.insert(column.to_string(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Run a write through the table cache when there is one, so it is invalidated.
async fn write_through<T, F, Fut>(table: &Table, write: F) -> OrmResult<T>
where
    F: FnOnce(WriteQuery) -> Fut,
    Fut: Future<Output = OrmResult<T>>,
{
    match table.cache() {
        Ok(cache) => cache.set(write).await,
        Err(_) => write(table.query()).await,
    }
}

/// Stable order for paging: the primary key when it still exists, otherwise
/// every column.
fn page_query(table: &Table, columns: &[String]) -> SelectQuery {
    match table.definition().primary_key.as_ref().filter(|pk| columns.contains(*pk)) {
        Some(pk) => SelectQuery::new().order_by(pk.as_str(), SortOrder::Asc),
        None => columns
            .iter()
            .fold(SelectQuery::new(), |q, c| q.order_by(c.as_str(), SortOrder::Asc)),
    }
}

/// Write every table of `orm` to `dir`, replacing chunk files of earlier backups.
pub async fn save_backup(orm: &Orm, dir: &Path) -> OrmResult<BackupSummary> {
    tokio::fs::create_dir_all(dir).await?;
    let chunk_size = orm.settings().backup_chunk_size.max(1);
    let mut summary = BackupSummary::default();

    for table in orm.tables() {
        for stale in chunk_files(dir, table.name()).await? {
            tokio::fs::remove_file(&stale).await?;
        }

        let read = table.read();
        let Some(first) = read.select(&SelectQuery::new().limit(1)).await?.pop() else {
            tracing::info!(table = %table.name(), rows = 0, "backed up table");
            summary.tables.push((table.name().to_string(), 0));
            continue;
        };
        let columns: Vec<String> = first.keys().cloned().collect();
        let page = page_query(table, &columns);

        let mut total = 0;
        for n in 0.. {
            let rows = read
                .select(&page.clone().offset((n * chunk_size) as u64).limit(chunk_size as u64))
                .await?;
            if rows.is_empty() {
                break;
            }
            let path = dir.join(chunk_file_name(table.name(), n));
            tokio::fs::write(&path, encode_chunk(&columns, &rows)?).await?;
            summary.files += 1;
            total += rows.len();
            if rows.len() < chunk_size {
                break;
            }
        }
        tracing::info!(table = %table.name(), rows = total, "backed up table");
        summary.tables.push((table.name().to_string(), total));
    }
    Ok(summary)
}

/// Replace the contents of every table with the chunks found in `dir`, then
/// clear all caches. Tables are emptied in reverse initialisation order and
/// refilled in initialisation order. A table without chunk files stays empty.
pub async fn restore_backup(orm: &Orm, dir: &Path) -> OrmResult<BackupSummary> {
    for table in orm.tables().iter().rev() {
        write_through(table, |q| async move { q.truncate().await }).await?;
    }

    let mut summary = BackupSummary::default();
    for table in orm.tables() {
        let mut restored = 0;
        for path in chunk_files(dir, table.name()).await? {
            let rows = decode_chunk(&tokio::fs::read(&path).await?)?;
            summary.files += 1;
            if rows.is_empty() {
                continue;
            }
            restored += rows.len();
            write_through(table, |q| async move { q.insert(&rows).await }).await?;
        }
        tracing::info!(table = %table.name(), rows = restored, "restored table");
        summary.tables.push((table.name().to_string(), restored));
    }

    orm.invalidate();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::{ColumnConfig, Settings, TableDefinition};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn row(v: Value) -> Row {
        serde_json::from_value(v).unwrap()
    }

    async fn orm() -> Orm {
        orm_on(Arc::new(MemoryBackend::new())).await
    }

    async fn orm_on(backend: Arc<MemoryBackend>) -> Orm {
        let settings = Settings::default().with_backup_chunk_size(2);
        let mut orm = Orm::new(backend, settings);
        orm.init(vec![
            TableDefinition::new(
                "user",
                vec![
                    ColumnConfig::new("id", "integer"),
                    ColumnConfig::new("name", "text"),
                    ColumnConfig::new("meta", "jsonb"),
                ],
            )
            .with_primary_key("id")
            .with_priority(1)
            .with_seed(vec![
                row(json!({ "id": 1, "name": "ann, \"a\"", "meta": { "k": [1, 2] } })),
                row(json!({ "id": 2, "name": null })),
                row(json!({ "id": 3, "name": "cid" })),
            ]),
            TableDefinition::new("empty", vec![ColumnConfig::new("id", "integer")])
                .with_caching(false),
        ])
        .await
        .unwrap();
        orm
    }

    #[test]
    fn chunk_names_do_not_match_other_tables() {
        let pattern = chunk_pattern("a").unwrap();
        assert!(pattern.is_match(&chunk_file_name("a", 12)));
        assert!(!pattern.is_match(&chunk_file_name("ab", 0)));
        assert!(!pattern.is_match(&chunk_file_name("a_chunk_1", 0)));
    }

    #[tokio::test]
    async fn save_then_restore_round_trips_rows() {
        let dir = TempDir::new().unwrap();
        let orm = orm().await;
        let before = orm.table("user").unwrap().read().all().await.unwrap();

        let saved = save_backup(&orm, dir.path()).await.unwrap();
        assert_eq!(saved.files, 2);
        assert_eq!(saved.rows(), 3);
        assert!(dir.path().join("user_chunk_1.csv").exists());

        let user = orm.table("user").unwrap();
        user.query().truncate().await.unwrap();
        assert_eq!(user.cache().unwrap().count(None).await.unwrap(), 0);

        let restored = restore_backup(&orm, dir.path()).await.unwrap();
        assert_eq!(restored.tables, vec![("user".to_string(), 3), ("empty".to_string(), 0)]);
        assert_eq!(user.read().all().await.unwrap(), before);
        assert_eq!(user.cache().unwrap().count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn save_removes_stale_chunks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("user_chunk_7.csv"), "id\n99\n").unwrap();
        let orm = orm().await;
        save_backup(&orm, dir.path()).await.unwrap();
        assert!(!dir.path().join("user_chunk_7.csv").exists());
        assert_eq!(chunk_files(dir.path(), "user").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn restore_without_chunks_empties_the_table() {
        let dir = TempDir::new().unwrap();
        let orm = orm().await;
        let summary = restore_backup(&orm, dir.path()).await.unwrap();
        assert_eq!(summary.rows(), 0);
        assert_eq!(orm.table("user").unwrap().read().count(None).await.unwrap(), 0);
    }

    #[test]
    fn cells_are_json_encoded() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let bytes = encode_chunk(&columns, &[row(json!({ "id": 1, "name": "x" }))]).unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "id,name\n1,\"\"\"x\"\"\"\n");
        assert_eq!(decode_chunk(&bytes).unwrap(), vec![row(json!({ "id": 1, "name": "x" }))]);
    }

    #[tokio::test]
    async fn save_reads_one_page_per_chunk() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let orm = orm_on(backend.clone()).await;

        let reads = backend.reads();
        save_backup(&orm, dir.path()).await.unwrap();
        // user: column lookup, two pages; empty: column lookup only
        assert_eq!(backend.reads(), reads + 4);

        let last = std::fs::read(dir.path().join("user_chunk_1.csv")).unwrap();
        let rows = decode_chunk(&last).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(3));
    }
}
