//! Connection settings.
//!
//! [`DatabaseConfig`] controls how [`Database::open`](crate::Database::open)
//! opens a store file. It can be kept next to the store as YAML.
//!
//! # Example YAML
//!
//! ```yaml
//! timeout: 5.0
//! read_only: false
//! check_exclusive: true
//! cached_statements: 100
//! ```
//!
//! Every key is optional; missing keys take their default.

use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for opening a [`Database`](crate::Database).
///
/// # Examples
///
/// ```
/// use modelstore_sqlite::DatabaseConfig;
///
/// let config = DatabaseConfig::default().read_only();
/// assert!(config.read_only);
/// assert_eq!(config.timeout, 5.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Seconds to wait on a locked store before failing.
    pub timeout: f64,
    /// Open the store read-only.
    pub read_only: bool,
    /// Refuse a read-write open while any process holds the file open.
    pub check_exclusive: bool,
    /// Capacity of the prepared statement cache.
    pub cached_statements: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            timeout: 5.0,
            read_only: false,
            check_exclusive: true,
            cached_statements: 100,
        }
    }
}

impl DatabaseConfig {
    /// Returns the configuration with read-only access enabled.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::StoreError::Io) if the file cannot be read, or
    /// [`Yaml`](crate::StoreError::Yaml) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::StoreError::Io) if the file cannot be written,
    /// or [`Yaml`](crate::StoreError::Yaml) if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_complete() {
        let yaml = r#"
timeout: 0.5
read_only: true
check_exclusive: false
cached_statements: 16
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timeout, 0.5);
        assert!(config.read_only);
        assert!(!config.check_exclusive);
        assert_eq!(config.cached_statements, 16);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: DatabaseConfig = serde_yaml::from_str("read_only: true\n").unwrap();
        assert!(config.read_only);
        assert_eq!(config.timeout, 5.0);
        assert!(config.check_exclusive);
        assert_eq!(config.cached_statements, 100);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yml");
        let config = DatabaseConfig {
            timeout: 1.5,
            ..DatabaseConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(DatabaseConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DatabaseConfig::load(dir.path().join("absent.yml")).unwrap_err();
        assert!(matches!(err, crate::StoreError::Io(_)));
    }
}
