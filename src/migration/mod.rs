//! Migration key ordering and the per-table create-or-migrate pass.

pub mod keys;
pub mod runner;

pub use keys::{
    compare_migration_keys, pending_migrations, sort_migration_keys, MigrationKeyKind,
    StringKeyOrder,
};
pub use runner::{
    create_or_migrate, ensure_migration_table, read_migration_record, write_migration_record,
    MigrationOutcome, MigrationRecord, MIGRATION_TABLE,
};
