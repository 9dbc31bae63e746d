use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level engine configuration, usually read from a TOML file.
///
/// ```toml
/// operation_timeout_ms = 2000
///
/// [database]
/// path = "./data/taskforge.db"
/// busy_timeout_ms = 5000
///
/// [cache]
/// enabled = true
/// ttl_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    /// Applied to operations whose context carries no deadline. `None` means unbounded.
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database file. An in-memory database is used when unset.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// File-backed configuration rooted at `data_dir`.
    #[must_use]
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            database: DatabaseConfig {
                path: Some(data_dir.as_ref().join("taskforge.db")),
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.ttl_ms == 0 {
            return Err(Error::Config(
                "cache.ttl_ms must be positive when the cache is enabled".to_string(),
            ));
        }
        if self.operation_timeout_ms == Some(0) {
            return Err(Error::Config(
                "operation_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.database.path.is_none());
        assert_eq!(config.cache.ttl(), Duration::from_secs(5));
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            operation_timeout_ms = 250

            [database]
            path = "/var/lib/taskforge/db.sqlite"
            busy_timeout_ms = 100

            [cache]
            enabled = false
            ttl_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(
            config.database.path.as_deref(),
            Some(Path::new("/var/lib/taskforge/db.sqlite"))
        );
        assert_eq!(config.database.busy_timeout_ms, 100);
        assert!(!config.cache.enabled);
        assert_eq!(config.operation_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = EngineConfig::from_toml_str("[cache]\nttl_ms = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = EngineConfig::from_toml_str("operation_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = EngineConfig::from_toml_str("listen = \"0.0.0.0\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("taskforge.toml");
        fs::write(&path, "[cache]\nttl_ms = 1500\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.cache.ttl(), Duration::from_millis(1500));

        let missing = EngineConfig::load(temp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));
    }

    #[test]
    fn test_with_data_dir() {
        let config = EngineConfig::with_data_dir("./data");
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("./data").join("taskforge.db"))
        );
    }
}
