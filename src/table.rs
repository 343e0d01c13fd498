//! Table entity: definition, uncached query access and the optional cache.

use crate::backend::QueryBackend;
use crate::cache::{RawCache, TableCache};
use crate::config::{Settings, TableDefinition};
use crate::error::{OrmError, OrmResult};
use crate::migration::{create_or_migrate, MigrationOutcome};
use crate::query::{ReadQuery, WriteQuery};
use std::sync::Arc;

pub struct Table {
    definition: TableDefinition,
    query: WriteQuery,
    cache: Option<Arc<TableCache>>,
}

impl Table {
    /// Create or migrate the table, then build its cache when caching is on
    /// for it. The cache is built here once and lives as long as the table.
    pub(crate) async fn setup(
        backend: Arc<dyn QueryBackend>,
        definition: TableDefinition,
        settings: &Settings,
        raw: Arc<RawCache>,
    ) -> OrmResult<(Self, MigrationOutcome)> {
        let outcome =
            create_or_migrate(backend.as_ref(), &definition, settings.string_key_order).await?;
        let query = WriteQuery::new(backend, definition.name.clone());
        let cache = definition
            .caching
            .unwrap_or(settings.caching)
            .then(|| Arc::new(TableCache::new(query.clone(), settings.cache_ttl, raw)));
        Ok((
            Self {
                definition,
                query,
                cache,
            },
            outcome,
        ))
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn priority(&self) -> i32 {
        self.definition.priority
    }

    /// Uncached access with full mutation rights. Writes made here do not
    /// invalidate the table cache.
    pub fn query(&self) -> WriteQuery {
        self.query.clone()
    }

    pub fn read(&self) -> ReadQuery {
        self.query.read_only()
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> OrmResult<&TableCache> {
        self.cache.as_deref().ok_or_else(|| {
            OrmError::MissingDependency(format!("caching is disabled for table {}", self.name()))
        })
    }

    pub(crate) fn shared_cache(&self) -> Option<Arc<TableCache>> {
        self.cache.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::cache::OrmCache;
    use crate::config::ColumnConfig;
    use crate::migration::ensure_migration_table;

    fn definition() -> TableDefinition {
        TableDefinition::new("item", vec![ColumnConfig::new("id", "integer")]).with_primary_key("id")
    }

    #[tokio::test]
    async fn setup_builds_the_cache_when_enabled() {
        let backend: Arc<dyn QueryBackend> = Arc::new(MemoryBackend::new());
        ensure_migration_table(backend.as_ref()).await.unwrap();
        let raw = OrmCache::new(backend.clone(), None).raw_cache();

        let (table, outcome) = Table::setup(backend.clone(), definition(), &Settings::default(), raw)
            .await
            .unwrap();
        assert!(outcome.created);
        assert!(table.is_cached());
        assert_eq!(table.cache().unwrap().table(), "item");
        assert_eq!(table.read().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cache_is_a_missing_dependency_when_disabled() {
        let backend: Arc<dyn QueryBackend> = Arc::new(MemoryBackend::new());
        ensure_migration_table(backend.as_ref()).await.unwrap();
        let raw = OrmCache::new(backend.clone(), None).raw_cache();
        let settings = Settings::default().with_caching(false);

        let (table, _) = Table::setup(backend, definition().with_caching(false), &settings, raw)
            .await
            .unwrap();
        assert!(!table.is_cached());
        assert!(matches!(table.cache(), Err(OrmError::MissingDependency(_))));
    }
}
