//! Load table definitions from a directory of JSON files.

use crate::config::{validate, TableDefinition};
use crate::error::ConfigError;
use std::path::Path;

/// Read every `*.json` file in `dir` as a [`TableDefinition`], validate them and
/// return them in initialization order (see [`sort_by_priority`]).
pub async fn load_tables_from_dir(dir: &Path) -> Result<Vec<TableDefinition>, ConfigError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut defs = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::debug!(path = %path.display(), "loading table definition");
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let def: TableDefinition = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        defs.push(def);
    }

    validate(&defs)?;
    sort_by_priority(&mut defs);
    Ok(defs)
}

/// Higher priority first, ties broken by name so the order is deterministic.
pub fn sort_by_priority(defs: &mut [TableDefinition]) {
    defs.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
}
