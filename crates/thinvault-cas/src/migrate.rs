//! Flat → sharded archive migration.
//!
//! Moves every `root/<digest>/<file>` to `root/ab/cd/<rest>/<file>` and removes
//! the flat directory once it is empty. Entries already in the sharded layout
//! sit three levels deep and are never visited, so re-running is a no-op.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::digest::{files_identical, Digest};
use crate::layout::shard_dir;
use crate::{CasError, Result};

/// Resource-fork / metadata files left by macOS on foreign filesystems.
pub const HIDDEN_PREFIX: &str = "._";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: usize,
    /// Destination already held identical bytes; the flat copy was dropped.
    pub deduplicated: usize,
    pub hidden_skipped: usize,
    /// Destination held different bytes; both left in place.
    pub conflicts: usize,
    /// Files under directories whose name is not a digest.
    pub foreign_skipped: usize,
    pub removed_dirs: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.moved == 0 && self.deduplicated == 0 && self.removed_dirs == 0
    }
}

pub fn migrate(root: &Path) -> Result<MigrationReport> {
    if !root.is_dir() {
        return Err(CasError::ArchiveRootMissing {
            path: root.to_path_buf(),
        });
    }
    tracing::info!("[MIGRATE] starting to clean {:?}", root);

    // Collect first: the walk must not observe our own renames
    let entries = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(io::Error::from)?;

    let mut report = MigrationReport::default();
    let mut touched: BTreeSet<PathBuf> = BTreeSet::new();

    for entry in entries.iter().filter(|e| e.file_type().is_file()) {
        let path = entry.path();
        let Some(parent) = path.parent() else {
            continue;
        };
        let digest_dir = parent
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| Digest::is_hex_digest(n));
        let Some(shard) = digest_dir.and_then(shard_dir) else {
            tracing::debug!("[MIGRATE] skipping {:?}: parent is not a digest directory", path);
            report.foreign_skipped += 1;
            continue;
        };

        let name = entry.file_name();
        if name.to_string_lossy().starts_with(HIDDEN_PREFIX) {
            tracing::debug!("[MIGRATE] skipping hidden {:?}", path);
            report.hidden_skipped += 1;
            continue;
        }

        let dest = root.join(shard).join(name);
        touched.insert(parent.to_path_buf());

        if dest.exists() {
            if files_identical(path, &dest)? {
                tracing::info!("[MIGRATE] {:?} already at {:?}, dropping flat copy", path, dest);
                fs::remove_file(path)?;
                report.deduplicated += 1;
            } else {
                tracing::warn!(
                    "[MIGRATE] {:?} conflicts with different content at {:?}, leaving both",
                    path,
                    dest
                );
                report.conflicts += 1;
            }
            continue;
        }

        if let Some(dest_parent) = dest.parent() {
            fs::create_dir_all(dest_parent)?;
        }
        tracing::info!("[MIGRATE] moving {:?} to {:?}", path, dest);
        fs::rename(path, &dest)?;
        report.moved += 1;
    }

    for dir in touched {
        if fs::read_dir(&dir)?.next().is_none() {
            tracing::info!("[MIGRATE] removing {:?}", dir);
            fs::remove_dir(&dir)?;
            report.removed_dirs += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn test_migrates_flat_entry_and_removes_dir() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(HELLO)).unwrap();
        fs::write(root.join(HELLO).join("hello.txt"), b"hello").unwrap();

        let report = migrate(root).unwrap();

        assert_eq!(report.moved, 1);
        assert_eq!(report.removed_dirs, 1);
        assert_eq!(
            fs::read(root.join("5d/41/402abc4b2a76b9719d911017c592/hello.txt")).unwrap(),
            b"hello"
        );
        assert!(!root.join(HELLO).exists());
    }

    #[test]
    fn test_second_run_is_noop() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(HELLO)).unwrap();
        fs::write(root.join(HELLO).join("hello.txt"), b"hello").unwrap();

        migrate(root).unwrap();
        let again = migrate(root).unwrap();
        assert!(again.is_noop());
        assert_eq!(again, MigrationReport::default());
    }

    #[test]
    fn test_hidden_files_stay_and_keep_dir() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let dir = root.join(HELLO);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("hello.txt"), b"hello").unwrap();
        fs::write(dir.join("._hello.txt"), b"resource fork").unwrap();

        let report = migrate(root).unwrap();

        assert_eq!(report.moved, 1);
        assert_eq!(report.hidden_skipped, 1);
        assert_eq!(report.removed_dirs, 0);
        assert!(dir.join("._hello.txt").exists());
    }

    #[test]
    fn test_non_digest_dirs_and_root_files_untouched() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("photos")).unwrap();
        fs::write(root.join("photos/cat.jpg"), b"meow").unwrap();
        fs::write(root.join("README"), b"top level").unwrap();

        let report = migrate(root).unwrap();

        assert_eq!(report.foreign_skipped, 1);
        assert!(root.join("photos/cat.jpg").exists());
        assert!(root.join("README").exists());
    }

    #[test]
    fn test_conflict_leaves_both() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(HELLO)).unwrap();
        fs::write(root.join(HELLO).join("f.txt"), b"flat").unwrap();
        let dest = root.join("5d/41/402abc4b2a76b9719d911017c592/f.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"sharded").unwrap();

        let report = migrate(root).unwrap();

        assert_eq!(report.conflicts, 1);
        assert_eq!(fs::read(root.join(HELLO).join("f.txt")).unwrap(), b"flat");
        assert_eq!(fs::read(&dest).unwrap(), b"sharded");
    }

    #[test]
    fn test_identical_destination_drops_flat_copy() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(HELLO)).unwrap();
        fs::write(root.join(HELLO).join("f.txt"), b"hello").unwrap();
        let dest = root.join("5d/41/402abc4b2a76b9719d911017c592/f.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"hello").unwrap();

        let report = migrate(root).unwrap();

        assert_eq!(report.deduplicated, 1);
        assert_eq!(report.removed_dirs, 1);
        assert!(!root.join(HELLO).exists());
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = migrate(&temp.path().join("absent"));
        assert!(matches!(result, Err(CasError::ArchiveRootMissing { .. })));
    }
}
