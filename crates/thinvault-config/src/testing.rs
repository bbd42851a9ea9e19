//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary primary directory holding "resident" files
//! - A temporary archive root standing in for the archive volume
//!
//! # Usage
//!
//! ```ignore
//! use thinvault_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let file = env.create_file("docs/a.txt", b"hello").unwrap();
//!     // env.archive_root is an existing, empty directory
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated primary + archive directories, removed on drop
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Stand-in for the primary volume
    pub primary_root: PathBuf,
    /// Stand-in for the archive volume
    pub archive_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let primary_root = root.join("primary");
        let archive_root = root.join("archive");
        std::fs::create_dir_all(&primary_root)?;
        std::fs::create_dir_all(&archive_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            primary_root,
            archive_root,
            test_id,
        })
    }

    /// Create a file under the primary root
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.primary_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a file under the archive root, e.g. to fake a legacy layout
    pub fn create_archive_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.archive_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Config pointing at this environment's archive, with a fast retry
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.archive_root = self.archive_root.clone();
        cfg.storage.legacy_roots = Vec::new();
        cfg.restore.rename_delay_ms = 1;
        cfg
    }

    /// Environment variables pointing a spawned `thinvault` at this archive
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            (
                crate::ENV_ARCHIVE_ROOT.to_string(),
                self.archive_root.to_string_lossy().into_owned(),
            ),
            (crate::ENV_LEGACY_ROOTS.to_string(), String::new()),
        ]
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
