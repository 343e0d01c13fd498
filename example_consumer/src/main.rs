//! Example consumer: initialises the tables in `TABLES_DIR` and exercises the cache.
//!
//! Run from repo root: `TABLES_DIR=example_consumer/tables cargo run -p example-consumer`
//! With `DATABASE_URL` set the tables live in PostgreSQL, otherwise in memory.
//! Pass `backup` or `restore` to write or read CSV chunks in `BACKUPS_DIR`.

use serde_json::json;
use std::sync::Arc;
use table_orm::{
    init_tracing, restore_backup, save_backup, Filter, MemoryBackend, Orm, Row, Settings,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load();
    init_tracing("table_orm=info,example_consumer=info");

    let orm = if settings.database_url.is_some() {
        Orm::connect(settings).await?
    } else {
        tracing::info!("DATABASE_URL not set, using the in-memory backend");
        Orm::load(Arc::new(MemoryBackend::new()), settings).await?
    };

    for table in orm.tables() {
        let count = match table.cache() {
            Ok(cache) => cache.count(None).await?,
            Err(_) => table.read().count(None).await?,
        };
        tracing::info!(table = %table.name(), rows = count, cached = table.is_cached(), "table ready");
    }

    if orm.has_table("user") {
        let users = orm.table("user")?.cache()?;
        let first: Option<Row> = users
            .get("user 1", |q| async move { q.first(Filter::by("id", 1)).await })
            .await?;
        tracing::info!(user = ?first, "cached read");

        let mut patch = Row::new();
        patch.insert("email".into(), json!("ada@example.com"));
        users
            .set(|q| async move { q.update(&Filter::by("id", 1), &patch).await })
            .await?;
        let fresh: Option<Row> = users
            .get("user 1", |q| async move { q.first(Filter::by("id", 1)).await })
            .await?;
        tracing::info!(user = ?fresh, "read after cached write");
    }

    match std::env::args().nth(1).as_deref() {
        Some("backup") => {
            let summary = save_backup(&orm, &orm.settings().backups_dir).await?;
            tracing::info!(files = summary.files, rows = summary.rows(), "backup written");
        }
        Some("restore") => {
            let summary = restore_backup(&orm, &orm.settings().backups_dir).await?;
            tracing::info!(files = summary.files, rows = summary.rows(), "backup restored");
        }
        Some(other) => tracing::warn!(command = %other, "unknown command, expected backup or restore"),
        None => {}
    }
    Ok(())
}
