//! # thinvault-config
//!
//! Configuration management for thinvault.
//!
//! Loads configuration from:
//! 1. `~/.thinvault/config.toml` (global)
//! 2. `.thinvault/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The loaded value is validated once and passed explicitly to whatever needs
//! it; nothing re-reads configuration mid-operation.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Where the archive volume has historically been mounted.
pub const DEFAULT_ARCHIVE_ROOT: &str = "/Volumes/files/thinning";

/// Root baked into stubs written by older releases.
pub const LEGACY_ARCHIVE_ROOT: &str = "/Volumes/Files/thinning";

pub const ENV_ARCHIVE_ROOT: &str = "THINVAULT_ARCHIVE_ROOT";
pub const ENV_LEGACY_ROOTS: &str = "THINVAULT_LEGACY_ROOTS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("archive directory {0:?} does not exist (is the archive volume mounted?)")]
    ArchiveRootMissing(PathBuf),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub restore: RestoreConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let project = Self::project_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(&project))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from explicit files; later files override earlier ones key by key.
    /// Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, layer);
            }
        }
        let mut config: Config = toml::Value::Table(merged).try_into()?;
        config.storage.archive_root = expand_home(&config.storage.archive_root);
        Ok(config)
    }

    /// Global config path: ~/.thinvault/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".thinvault/config.toml"))
    }

    /// Project config path: ./.thinvault/config.toml
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".thinvault/config.toml")
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ARCHIVE_ROOT).filter(|v| !v.is_empty()) {
            self.storage.archive_root = expand_home(Path::new(&root));
        }
        if let Some(roots) = lookup(ENV_LEGACY_ROOTS) {
            self.storage.legacy_roots = std::env::split_paths(&roots)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
    }

    /// Fail fast unless the archive root is an existing directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.storage.archive_root.is_dir() {
            return Err(ConfigError::ArchiveRootMissing(
                self.storage.archive_root.clone(),
            ));
        }
        Ok(())
    }

    /// Generate config TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

/// Expand a leading `~/`.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Archive root on the secondary volume
    pub archive_root: PathBuf,
    /// Former roots that old stubs may record as absolute prefixes
    pub legacy_roots: Vec<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from(DEFAULT_ARCHIVE_ROOT),
            legacy_roots: vec![PathBuf::from(LEGACY_ARCHIVE_ROOT)],
        }
    }
}

/// Restore configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Rename the archive copy to `.removable` after a restore
    pub mark_removable: bool,
    pub rename_attempts: u32,
    pub rename_delay_ms: u64,
}

impl RestoreConfig {
    pub fn rename_delay(&self) -> Duration {
        Duration::from_millis(self.rename_delay_ms)
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            mark_removable: true,
            rename_attempts: 5,
            rename_delay_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.archive_root, PathBuf::from(DEFAULT_ARCHIVE_ROOT));
        assert_eq!(config.restore.rename_attempts, 5);
        assert!(config.restore.mark_removable);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default().to_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[restore]"));
        assert!(toml_str.contains("/Volumes/files/thinning"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            ENV_ARCHIVE_ROOT => Some("/mnt/archive".to_string()),
            ENV_LEGACY_ROOTS => Some("/old/one:/old/two".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.archive_root, PathBuf::from("/mnt/archive"));
        assert_eq!(
            config.storage.legacy_roots,
            vec![PathBuf::from("/old/one"), PathBuf::from("/old/two")]
        );
    }

    #[test]
    fn test_empty_env_root_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == ENV_ARCHIVE_ROOT).then(String::new));
        assert_eq!(config.storage.archive_root, PathBuf::from(DEFAULT_ARCHIVE_ROOT));
    }

    #[test]
    fn test_validate() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();

        config.storage.archive_root = temp.path().join("missing");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ArchiveRootMissing(_))
        ));

        config.storage.archive_root = temp.path().to_path_buf();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/archive")), home.join("archive"));
        }
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
