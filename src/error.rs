//! Typed errors for configuration, migrations, caching and backend access.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table} column {column}")]
    InvalidPrimaryKey { table: String, column: String },
    #[error("duplicate table: {0}")]
    DuplicateTable(String),
    #[error("duplicate column: table {table} column {column}")]
    DuplicateColumn { table: String, column: String },
    #[error("duplicate migration key: table {table} key {key}")]
    DuplicateMigrationKey { table: String, key: String },
    /// Migration keys of one table span several naming conventions.
    /// `groups` lists each convention with the keys that use it.
    #[error("mixed migration key conventions in table {table}: {}; use a single convention", format_groups(.groups))]
    MixedMigrationKeys {
        table: String,
        groups: Vec<(&'static str, Vec<String>)>,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

fn format_groups(groups: &[(&'static str, Vec<String>)]) -> String {
    groups
        .iter()
        .map(|(kind, keys)| format!("{} [{}]", kind, keys.join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum OrmError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A table, cache or backend was used before initialization provided it.
    #[error("missing dependency: {0}")]
    MissingDependency(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("backend: {0}")]
    Backend(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type OrmResult<T> = Result<T, OrmError>;
