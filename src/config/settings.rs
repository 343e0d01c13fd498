//! Runtime settings. Read from the environment by binaries; builder setters for library use.

use crate::migration::StringKeyOrder;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TABLES_DIR: &str = "tables";
pub const DEFAULT_BACKUPS_DIR: &str = "backups";
pub const DEFAULT_BACKUP_CHUNK_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: Option<String>,
    pub tables_dir: PathBuf,
    pub backups_dir: PathBuf,
    /// Caching switch for tables that do not set their own.
    pub caching: bool,
    /// `None` keeps cache entries until they are invalidated.
    pub cache_ttl: Option<Duration>,
    pub string_key_order: StringKeyOrder,
    pub backup_chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            tables_dir: PathBuf::from(DEFAULT_TABLES_DIR),
            backups_dir: PathBuf::from(DEFAULT_BACKUPS_DIR),
            caching: true,
            cache_ttl: None,
            string_key_order: StringKeyOrder::Insertion,
            backup_chunk_size: DEFAULT_BACKUP_CHUNK_SIZE,
        }
    }
}

impl Settings {
    /// Settings from `DATABASE_URL`, `TABLES_DIR`, `BACKUPS_DIR`, `CACHE_ENABLED`,
    /// `CACHE_TTL_MS`, `MIGRATION_KEY_ORDER` and `BACKUP_CHUNK_SIZE`. Unset or
    /// unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) after loading a `.env` file from the
    /// working directory or its parents, when there is one.
    pub fn load() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_env()
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let caching = match get("CACHE_ENABLED").as_deref().map(str::trim) {
            Some("0") | Some("false") | Some("off") => false,
            _ => defaults.caching,
        };
        let cache_ttl = get("CACHE_TTL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis);
        let string_key_order = match get("MIGRATION_KEY_ORDER").as_deref().map(str::trim) {
            Some("lexicographic") | Some("alphabetical") => StringKeyOrder::Lexicographic,
            _ => defaults.string_key_order,
        };
        let backup_chunk_size = get("BACKUP_CHUNK_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.backup_chunk_size);

        Self {
            database_url: get("DATABASE_URL"),
            tables_dir: get("TABLES_DIR").map(PathBuf::from).unwrap_or(defaults.tables_dir),
            backups_dir: get("BACKUPS_DIR").map(PathBuf::from).unwrap_or(defaults.backups_dir),
            caching,
            cache_ttl,
            string_key_order,
            backup_chunk_size,
        }
    }

    pub fn with_tables_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tables_dir = dir.into();
        self
    }

    pub fn with_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = dir.into();
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching = enabled;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_string_key_order(mut self, order: StringKeyOrder) -> Self {
        self.string_key_order = order;
        self
    }

    pub fn with_backup_chunk_size(mut self, size: usize) -> Self {
        self.backup_chunk_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let s = Settings::from_lookup(lookup(&[]));
        assert!(s.caching);
        assert_eq!(s.cache_ttl, None);
        assert_eq!(s.string_key_order, StringKeyOrder::Insertion);
        assert_eq!(s.tables_dir, PathBuf::from(DEFAULT_TABLES_DIR));
        assert_eq!(s.backup_chunk_size, DEFAULT_BACKUP_CHUNK_SIZE);
    }

    #[test]
    fn reads_overrides() {
        let s = Settings::from_lookup(lookup(&[
            ("CACHE_ENABLED", "false"),
            ("CACHE_TTL_MS", "250"),
            ("MIGRATION_KEY_ORDER", "lexicographic"),
            ("TABLES_DIR", "defs"),
            ("BACKUP_CHUNK_SIZE", "0"),
        ]));
        assert!(!s.caching);
        assert_eq!(s.cache_ttl, Some(Duration::from_millis(250)));
        assert_eq!(s.string_key_order, StringKeyOrder::Lexicographic);
        assert_eq!(s.tables_dir, PathBuf::from("defs"));
        assert_eq!(s.backup_chunk_size, DEFAULT_BACKUP_CHUNK_SIZE);
    }
}
