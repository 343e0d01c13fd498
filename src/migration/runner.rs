//! Create-or-migrate for one table, tracked by the `migration` record table.

use super::keys::{pending_migrations, sort_migration_keys, StringKeyOrder};
use crate::backend::{Filter, QueryBackend, Row};
use crate::config::{ColumnConfig, TableDefinition, TableSchema};
use crate::error::{OrmError, OrmResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table holding one [`MigrationRecord`] per table.
pub const MIGRATION_TABLE: &str = "migration";

/// Last applied migration key of a table. `version` is empty until the first
/// migration runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub table: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// The table did not exist and was created.
    pub created: bool,
    /// Keys applied during this pass, in order.
    pub applied: Vec<String>,
}

pub fn migration_table_schema() -> TableSchema {
    TableSchema {
        name: MIGRATION_TABLE.to_string(),
        columns: vec![
            ColumnConfig::new("table", "text").not_null(),
            ColumnConfig::new("version", "text")
                .not_null()
                .with_default(Value::String(String::new())),
        ],
        primary_key: Some("table".to_string()),
    }
}

pub async fn ensure_migration_table(backend: &dyn QueryBackend) -> OrmResult<()> {
    if !backend.has_table(MIGRATION_TABLE).await? {
        backend.create_table(&migration_table_schema()).await?;
        tracing::info!(table = MIGRATION_TABLE, "created migration table");
    }
    Ok(())
}

pub async fn read_migration_record(backend: &dyn QueryBackend, table: &str) -> OrmResult<MigrationRecord> {
    let rows = backend
        .select(
            MIGRATION_TABLE,
            &crate::backend::SelectQuery::new()
                .filter(Filter::by("table", table))
                .limit(1),
        )
        .await?;
    let version = rows
        .first()
        .and_then(|r| r.get("version"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(MigrationRecord {
        table: table.to_string(),
        version,
    })
}

/// Upsert the record for `record.table`.
pub async fn write_migration_record(backend: &dyn QueryBackend, record: &MigrationRecord) -> OrmResult<()> {
    let mut patch = Row::new();
    patch.insert("version".into(), Value::String(record.version.clone()));
    let updated = backend
        .update(MIGRATION_TABLE, &Filter::by("table", record.table.as_str()), &patch)
        .await?;
    if updated == 0 {
        let row = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            _ => return Err(OrmError::Backend("migration record is not an object".into())),
        };
        backend.insert(MIGRATION_TABLE, &[row]).await?;
    }
    Ok(())
}

/// Create `def`'s table when missing (inserting its seed rows), then apply the
/// migrations that come after the recorded version. The record is written after
/// each migration, so a failure keeps the last successful key.
pub async fn create_or_migrate(
    backend: &dyn QueryBackend,
    def: &TableDefinition,
    order: StringKeyOrder,
) -> OrmResult<MigrationOutcome> {
    let sorted = sort_migration_keys(&def.name, &def.migration_keys(), order)?;
    let mut outcome = MigrationOutcome::default();

    if !backend.has_table(&def.name).await? {
        backend.create_table(&def.schema()).await?;
        outcome.created = true;
        tracing::info!(table = %def.name, backend = backend.name(), "created table");
        if !def.seed.is_empty() {
            let n = backend.insert(&def.name, &def.seed).await?;
            tracing::info!(table = %def.name, rows = n, "seeded table");
        }
    }

    if sorted.is_empty() {
        return Ok(outcome);
    }

    let mut record = read_migration_record(backend, &def.name).await?;
    for key in pending_migrations(&sorted, &record.version) {
        let Some(migration) = def.migrations.iter().find(|m| &m.key == key) else {
            continue;
        };
        for change in &migration.changes {
            backend.alter_table(&def.name, change).await?;
        }
        record.version = key.clone();
        write_migration_record(backend, &record).await?;
        tracing::info!(table = %def.name, key = %key, "applied migration");
        outcome.applied.push(key.clone());
    }
    Ok(outcome)
}
