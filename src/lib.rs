//! Table ORM: JSON table definitions, ordered create-or-migrate, per-table
//! read/write caches and CSV backup over a pluggable SQL backend.

pub mod backend;
pub mod backup;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod migration;
pub mod orm;
pub mod query;
pub mod sql;
pub mod table;

pub use backend::{
    ensure_database_exists, Aggregate, Filter, MemoryBackend, PgBackend, QueryBackend, Row,
    SelectQuery, SortOrder,
};
pub use backup::{restore_backup, save_backup, BackupSummary};
pub use cache::{CachedQuery, OrmCache, TableCache};
pub use config::{load_tables_from_dir, Settings, TableDefinition};
pub use error::{ConfigError, OrmError, OrmResult};
pub use logging::init_tracing;
pub use migration::{sort_migration_keys, MigrationKeyKind, StringKeyOrder};
pub use orm::Orm;
pub use query::{ReadQuery, WriteQuery};
pub use table::Table;
