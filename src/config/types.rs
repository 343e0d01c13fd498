//! Raw table definition types matching the JSON files in the tables directory.

use crate::backend::Row;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    /// SQL type text, e.g. `text` or `varchar(64)`.
    pub fn sql(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params } => {
                let p = params
                    .as_ref()
                    .map(|v| v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                if p.is_empty() {
                    name.clone()
                } else {
                    format!("{}({})", name, p)
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    /// JSON value used as-is (quoted as a SQL literal in DDL).
    Literal(serde_json::Value),
    /// SQL expression such as `NOW()`; the in-memory backend cannot evaluate it and stores null.
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(lit) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefaultConfig::Literal(lit));
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a value, {{ \"expression\": \"...\" }}, or {{ \"value\": ... }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Ok(ColumnDefaultConfig::Literal(other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
}

impl ColumnConfig {
    pub fn new(name: impl Into<String>, type_: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_: ColumnTypeConfig::Simple(type_.into()),
            nullable: true,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(ColumnDefaultConfig::Literal(value));
        self
    }
}

fn default_true() -> bool {
    true
}

/// One unit of schema change inside a migration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    AddColumn { column: ColumnConfig },
    DropColumn { name: String },
    RenameColumn { from: String, to: String },
    AlterColumn { column: ColumnConfig },
    AddIndex {
        name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex { name: String },
    /// Backend-specific statement; the in-memory backend ignores it.
    Raw { sql: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub key: String,
    #[serde(default)]
    pub changes: Vec<SchemaChange>,
}

impl MigrationConfig {
    pub fn new(key: impl Into<String>, changes: Vec<SchemaChange>) -> Self {
        Self {
            key: key.into(),
            changes,
        }
    }
}

/// Table definition as loaded from `<tables_dir>/<name>.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Higher priority tables are created first.
    #[serde(default)]
    pub priority: i32,
    /// Overrides the ORM-wide caching switch for this table.
    #[serde(default)]
    pub caching: Option<bool>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Declaration order is kept; it is the default order for pure string keys.
    #[serde(default)]
    pub migrations: Vec<MigrationConfig>,
    /// Rows inserted right after the table is first created.
    #[serde(default)]
    pub seed: Vec<Row>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnConfig>) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority: 0,
            caching: None,
            columns,
            primary_key: None,
            migrations: Vec::new(),
            seed: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_migration(mut self, migration: MigrationConfig) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn with_seed(mut self, rows: Vec<Row>) -> Self {
        self.seed = rows;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching = Some(enabled);
        self
    }

    pub fn migration_keys(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.key.clone()).collect()
    }

    pub fn schema(&self) -> TableSchema {
        TableSchema {
            name: self.name.clone(),
            columns: self.columns.clone(),
            primary_key: self.primary_key.clone(),
        }
    }
}

/// What a backend needs to create a table.
#[derive(Clone, Debug)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnConfig>,
    pub primary_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_table_file() {
        let def: TableDefinition = serde_json::from_value(json!({
            "name": "user",
            "priority": 2,
            "columns": [
                { "name": "id", "type": "integer", "nullable": false },
                { "name": "name", "type": { "name": "varchar", "params": [64] } },
                { "name": "created", "type": "timestamptz", "default": { "expression": "NOW()" } },
                { "name": "score", "type": "integer", "default": 0 }
            ],
            "primary_key": "id",
            "migrations": [
                { "key": "001_init", "changes": [
                    { "op": "add_column", "column": { "name": "email", "type": "text" } },
                    { "op": "rename_column", "from": "name", "to": "username" }
                ] }
            ]
        }))
        .unwrap();
        assert_eq!(def.priority, 2);
        assert_eq!(def.columns[1].type_.sql(), "varchar(64)");
        assert!(def.columns[1].nullable);
        assert!(matches!(
            def.columns[2].default,
            Some(ColumnDefaultConfig::Expression { .. })
        ));
        assert!(matches!(
            def.columns[3].default,
            Some(ColumnDefaultConfig::Literal(ref v)) if *v == json!(0)
        ));
        assert_eq!(def.migration_keys(), vec!["001_init".to_string()]);
        assert!(matches!(
            def.migrations[0].changes[1],
            SchemaChange::RenameColumn { ref from, ref to } if from == "name" && to == "username"
        ));
    }
}
