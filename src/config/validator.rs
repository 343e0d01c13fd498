//! Table definition validation: unique names, primary keys that exist, unique migration keys.

use crate::config::TableDefinition;
use crate::error::ConfigError;
use crate::migration::MIGRATION_TABLE;
use std::collections::HashSet;

pub fn validate_table(def: &TableDefinition) -> Result<(), ConfigError> {
    if def.name.trim().is_empty() {
        return Err(ConfigError::Validation("table name must not be empty".into()));
    }
    if def.name == MIGRATION_TABLE {
        return Err(ConfigError::Validation(format!(
            "table name {} is reserved",
            MIGRATION_TABLE
        )));
    }
    if def.columns.is_empty() {
        return Err(ConfigError::Validation(format!(
            "table {} has no columns",
            def.name
        )));
    }

    let mut columns = HashSet::new();
    for c in &def.columns {
        if !columns.insert(c.name.as_str()) {
            return Err(ConfigError::DuplicateColumn {
                table: def.name.clone(),
                column: c.name.clone(),
            });
        }
    }

    if let Some(pk) = &def.primary_key {
        if !columns.contains(pk.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                table: def.name.clone(),
                column: pk.clone(),
            });
        }
    }

    for row in &def.seed {
        if let Some(unknown) = row.keys().find(|k| !columns.contains(k.as_str())) {
            return Err(ConfigError::MissingReference {
                kind: "seed column",
                id: format!("{}.{}", def.name, unknown),
            });
        }
    }

    let mut keys = HashSet::new();
    for m in &def.migrations {
        if m.key.is_empty() {
            return Err(ConfigError::Validation(format!(
                "table {} has a migration with an empty key",
                def.name
            )));
        }
        if !keys.insert(m.key.as_str()) {
            return Err(ConfigError::DuplicateMigrationKey {
                table: def.name.clone(),
                key: m.key.clone(),
            });
        }
    }

    Ok(())
}

pub fn validate(defs: &[TableDefinition]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for def in defs {
        validate_table(def)?;
        if !names.insert(def.name.as_str()) {
            return Err(ConfigError::DuplicateTable(def.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnConfig, MigrationConfig};

    fn table(name: &str) -> TableDefinition {
        TableDefinition::new(name, vec![ColumnConfig::new("id", "integer")])
    }

    #[test]
    fn accepts_plain_tables() {
        assert!(validate(&[table("a"), table("b")]).is_ok());
    }

    #[test]
    fn rejects_duplicate_table_names() {
        let err = validate(&[table("a"), table("a")]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTable(ref n) if n == "a"));
    }

    #[test]
    fn rejects_unknown_primary_key() {
        let err = validate_table(&table("a").with_primary_key("missing")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrimaryKey { .. }));
    }

    #[test]
    fn rejects_duplicate_migration_keys() {
        let def = table("a")
            .with_migration(MigrationConfig::new("1", vec![]))
            .with_migration(MigrationConfig::new("1", vec![]));
        let err = validate_table(&def).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMigrationKey { ref key, .. } if key == "1"));
    }

    #[test]
    fn rejects_the_reserved_record_table() {
        let err = validate_table(&table(MIGRATION_TABLE)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_seed_rows_with_unknown_columns() {
        let seed = serde_json::from_value(serde_json::json!({ "id": 1, "nope": 2 })).unwrap();
        let err = validate_table(&table("a").with_seed(vec![seed])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { ref id, .. } if id == "a.nope"));
    }
}
