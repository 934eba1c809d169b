//! Cleaner configuration.
//!
//! Loaded from `PROV_CLEANER_*` environment variables or a TOML file:
//!
//! ```toml
//! check_interval_secs = 600
//! cursor_path = "/var/lib/prov-cleaner/cursor.json"
//! log_rounds = true
//!
//! [engine]
//! archive_size = 500
//! cleanup_size = 20
//! archive_delay = 86400
//! ```

use prov_core::config::duration_secs;
use prov_core::{ConfigError, ProvConfig, ProvResult};
use prov_storage::{CursorStore, FileCursorStore, InMemoryCursorStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Time between archive rounds (default: 1 hour)
    #[serde(rename = "check_interval_secs", with = "duration_secs")]
    pub check_interval: Duration,

    /// Where the sweep cursor is persisted. Kept in memory when unset.
    pub cursor_path: Option<PathBuf>,

    /// Whether to log every completed round (default: true)
    pub log_rounds: bool,

    /// Engine settings: budgets, archive delay, page sizes
    pub engine: ProvConfig,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            cursor_path: None,
            log_rounds: true,
            engine: ProvConfig::default(),
        }
    }
}

impl CleanerConfig {
    /// Create CleanerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PROV_CLEANER_CHECK_INTERVAL_SECS`: Time between rounds (default: 3600)
    /// - `PROV_CLEANER_CURSOR_PATH`: Cursor file (default: in memory)
    /// - `PROV_CLEANER_LOG_ROUNDS`: Whether to log rounds (default: true)
    /// - `PROV_*`: engine settings, see [`ProvConfig::from_env`]
    pub fn from_env() -> Self {
        let check_interval = Duration::from_secs(
            std::env::var("PROV_CLEANER_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHECK_INTERVAL_SECS),
        );

        let cursor_path = std::env::var("PROV_CLEANER_CURSOR_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let log_rounds = std::env::var("PROV_CLEANER_LOG_ROUNDS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            check_interval,
            cursor_path,
            log_rounds,
            engine: ProvConfig::from_env(),
        }
    }

    /// Short interval and small budgets, cursor in memory.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            cursor_path: None,
            log_rounds: true,
            engine: ProvConfig {
                archive_size: 10,
                cleanup_size: 2,
                archive_delay: Duration::from_secs(60),
                ..ProvConfig::default()
            },
        }
    }

    /// Hourly rounds with a persisted cursor.
    pub fn production() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            cursor_path: Some(PathBuf::from("/var/lib/prov-cleaner/cursor.json")),
            log_rounds: false,
            engine: ProvConfig::default(),
        }
    }

    /// Load a TOML file. Missing keys take their defaults.
    pub fn from_path(path: &Path) -> ProvResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: CleanerConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProvResult<()> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "check_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "check interval must be greater than 0".to_string(),
            }
            .into());
        }
        self.engine.validate()
    }

    /// Cursor store named by `cursor_path`.
    pub fn cursor_store(&self) -> Arc<dyn CursorStore> {
        match &self.cursor_path {
            Some(path) => Arc::new(FileCursorStore::new(path.clone())),
            None => Arc::new(InMemoryCursorStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_core::ProvError;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = CleanerConfig::default();
        assert_eq!(
            config.check_interval,
            Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS)
        );
        assert!(config.cursor_path.is_none());
        assert!(config.log_rounds);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_development() {
        let config = CleanerConfig::development();
        assert_eq!(config.check_interval, Duration::from_secs(10));
        assert_eq!(config.engine.archive_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_production() {
        let config = CleanerConfig::production();
        assert!(config.cursor_path.is_some());
        assert!(!config.log_rounds);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = CleanerConfig::from_env();
        assert_eq!(
            config.check_interval,
            Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS)
        );
        assert!(config.log_rounds);
    }

    #[test]
    fn test_from_path_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "check_interval_secs = 30\ncursor_path = \"/tmp/c.json\"\n\n[engine]\narchive_size = 7\narchive_delay = 120"
        )
        .unwrap();
        let config = CleanerConfig::from_path(file.path()).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.cursor_path, Some(PathBuf::from("/tmp/c.json")));
        assert!(config.log_rounds);
        assert_eq!(config.engine.archive_size, 7);
        assert_eq!(config.engine.archive_delay, Duration::from_secs(120));
        assert_eq!(config.engine.cleanup_size, ProvConfig::default().cleanup_size);
    }

    #[test]
    fn test_from_path_errors() {
        let missing = CleanerConfig::from_path(Path::new("/nonexistent/cleaner.toml"));
        assert!(matches!(missing, Err(ProvError::Config(ConfigError::Io { .. }))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "check_interval_secs = \"soon\"").unwrap();
        let bad = CleanerConfig::from_path(file.path());
        assert!(matches!(bad, Err(ProvError::Config(ConfigError::Parse { .. }))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "check_interval_secs = 0").unwrap();
        let zero = CleanerConfig::from_path(file.path());
        assert!(matches!(
            zero,
            Err(ProvError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_cursor_store_selection() {
        let dir = tempfile::tempdir().unwrap();
        let config = CleanerConfig {
            cursor_path: Some(dir.path().join("cursor.json")),
            ..CleanerConfig::default()
        };
        let store = config.cursor_store();
        store
            .save(&prov_storage::ArchivalCursor::new("5__file_prov"))
            .unwrap();
        assert!(dir.path().join("cursor.json").exists());
    }
}
