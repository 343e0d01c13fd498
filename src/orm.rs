//! ORM entry point: owns the backend, the initialised tables and the cache scope.

use crate::backend::{PgBackend, QueryBackend, Row};
use crate::cache::OrmCache;
use crate::config::{load_tables_from_dir, sort_by_priority, validate, Settings, TableDefinition};
use crate::error::{OrmError, OrmResult};
use crate::migration::{ensure_migration_table, MigrationOutcome};
use crate::table::Table;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Orm {
    backend: Arc<dyn QueryBackend>,
    settings: Settings,
    tables: Vec<Table>,
    by_name: HashMap<String, usize>,
    cache: OrmCache,
}

impl Orm {
    pub fn new(backend: Arc<dyn QueryBackend>, settings: Settings) -> Self {
        let cache = OrmCache::new(backend.clone(), settings.cache_ttl);
        Self {
            backend,
            settings,
            tables: Vec::new(),
            by_name: HashMap::new(),
            cache,
        }
    }

    /// PostgreSQL-backed instance from `settings.database_url`, with the tables
    /// of `settings.tables_dir` initialised.
    pub async fn connect(settings: Settings) -> OrmResult<Self> {
        let url = settings
            .database_url
            .clone()
            .ok_or_else(|| OrmError::MissingDependency("DATABASE_URL is not set".into()))?;
        let backend = PgBackend::connect(&url).await?;
        Self::load(Arc::new(backend), settings).await
    }

    /// Instance over `backend` with the tables of `settings.tables_dir` initialised.
    pub async fn load(backend: Arc<dyn QueryBackend>, settings: Settings) -> OrmResult<Self> {
        let definitions = load_tables_from_dir(&settings.tables_dir).await?;
        let mut orm = Self::new(backend, settings);
        orm.init(definitions).await?;
        Ok(orm)
    }

    /// Validate `definitions`, then create or migrate each table in priority
    /// order and build its cache. Tables are handled one at a time; the first
    /// failure stops initialisation. Replaces any previously initialised tables.
    pub async fn init(
        &mut self,
        mut definitions: Vec<TableDefinition>,
    ) -> OrmResult<Vec<(String, MigrationOutcome)>> {
        validate(&definitions)?;
        sort_by_priority(&mut definitions);

        self.tables.clear();
        self.by_name.clear();
        self.cache.clear_tables();

        ensure_migration_table(self.backend.as_ref()).await?;

        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let (table, outcome) = Table::setup(
                self.backend.clone(),
                definition,
                &self.settings,
                self.cache.raw_cache(),
            )
            .await?;
            if let Some(cache) = table.shared_cache() {
                self.cache.register(cache);
            }
            outcomes.push((table.name().to_string(), outcome));
            self.by_name.insert(table.name().to_string(), self.tables.len());
            self.tables.push(table);
        }

        self.cache.invalidate();
        tracing::info!(
            tables = self.tables.len(),
            backend = self.backend.name(),
            "tables initialised"
        );
        Ok(outcomes)
    }

    pub fn table(&self, name: &str) -> OrmResult<&Table> {
        self.by_name
            .get(name)
            .map(|&i| &self.tables[i])
            .ok_or_else(|| OrmError::MissingDependency(format!("table {} is not initialised", name)))
    }

    /// Tables in initialisation order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn cache(&self) -> &OrmCache {
        &self.cache
    }

    /// Clear every table cache and the raw-query cache.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Run a raw statement without caching.
    pub async fn raw(&self, sql: &str) -> OrmResult<Vec<Row>> {
        self.backend.raw(sql).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<dyn QueryBackend> {
        &self.backend
    }
}
