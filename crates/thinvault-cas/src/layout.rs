//! Archive path derivation and resolution.
//!
//! Canonical layout: `root/ab/cd/<rest-of-digest>/<basename>`.
//!
//! Stubs written by older releases may record any of:
//!
//! ```text
//! ab/cd/<rest>/<basename>                  # relative, sharded (current)
//! /old/archive/root/ab/cd/<rest>/<basename> # absolute, stale root
//! <digest>/<basename>                       # relative, flat (oldest)
//! ```
//!
//! [`PathResolver`] turns a recorded path into an ordered list of candidates
//! that covers every one of them without rewriting old stubs.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::digest::Digest;
use crate::REMOVABLE_SUFFIX;

/// Width of each shard directory name.
const SHARD_WIDTH: usize = 2;

/// Split a hex name into `ab/cd/rest`.
///
/// Returns `None` when the name is too short to leave a non-empty remainder.
/// This is the one shard-splitting rule used both for new entries and by the
/// layout migrator.
pub fn shard_dir(hex: &str) -> Option<PathBuf> {
    if hex.len() <= SHARD_WIDTH * 2 || !hex.is_ascii() {
        return None;
    }
    let l1 = &hex[..SHARD_WIDTH];
    let l2 = &hex[SHARD_WIDTH..SHARD_WIDTH * 2];
    let rest = &hex[SHARD_WIDTH * 2..];
    Some(PathBuf::from(l1).join(l2).join(rest))
}

/// Canonical sharded location for `digest` + `basename` under `root`.
pub fn derive(root: &Path, digest: &Digest, basename: &OsStr) -> PathBuf {
    let hex = digest.to_hex();
    // A 32-char digest always splits
    let shard = shard_dir(&hex).unwrap_or_else(|| PathBuf::from(&hex));
    root.join(shard).join(basename)
}

/// Oldest, unsharded location: `root/<digest>/<basename>`.
pub fn flat(root: &Path, digest: &Digest, basename: &OsStr) -> PathBuf {
    root.join(digest.to_hex()).join(basename)
}

/// `<location>.removable`
pub fn removable_path(location: &Path) -> PathBuf {
    let mut name = location.as_os_str().to_owned();
    name.push(REMOVABLE_SUFFIX);
    PathBuf::from(name)
}

pub fn is_removable(path: &Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .ends_with(REMOVABLE_SUFFIX)
}

/// Resolves recorded stub paths against the current archive root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    legacy_roots: Vec<PathBuf>,
}

impl PathResolver {
    pub fn new<P: Into<PathBuf>>(root: P, legacy_roots: Vec<PathBuf>) -> Self {
        let root = root.into();
        let legacy_roots = legacy_roots
            .into_iter()
            .filter(|legacy| legacy != &root)
            .collect();
        Self { root, legacy_roots }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn legacy_roots(&self) -> &[PathBuf] {
        &self.legacy_roots
    }

    /// Map a recorded path onto the current root.
    ///
    /// Absolute paths under a stale legacy root get that prefix swapped for the
    /// current root; other absolute paths are kept; relative paths are joined
    /// to the root.
    pub fn rebase(&self, recorded: &Path) -> PathBuf {
        if recorded.is_absolute() {
            if recorded.starts_with(&self.root) {
                return recorded.to_path_buf();
            }
            for legacy in &self.legacy_roots {
                if let Ok(rest) = recorded.strip_prefix(legacy) {
                    tracing::debug!(
                        "[RESOLVE] adjusting legacy prefix {:?} -> {:?}",
                        legacy,
                        self.root
                    );
                    return self.root.join(rest);
                }
            }
            return recorded.to_path_buf();
        }
        self.root.join(recorded)
    }

    /// Ordered, de-duplicated candidate locations for a recorded stub path.
    pub fn candidates(&self, recorded: &Path, digest: &Digest) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |p: PathBuf| {
            if !out.contains(&p) {
                out.push(p);
            }
        };

        if recorded.is_absolute() {
            push(recorded.to_path_buf());
        }

        let rebased = self.rebase(recorded);
        push(rebased.clone());

        if let Some(resharded) = self.reshard_flat(&rebased) {
            push(resharded);
        }

        if let Some(basename) = recorded.file_name() {
            push(derive(&self.root, digest, basename));
            push(flat(&self.root, digest, basename));
        }

        // An entry shared by several stubs may already be marked by an
        // earlier restore; it is still the only copy.
        let marked: Vec<PathBuf> = out.iter().map(|p| removable_path(p)).collect();
        out.extend(marked);
        out
    }

    /// First candidate that exists as a regular file.
    pub fn resolve(&self, recorded: &Path, digest: &Digest) -> Result<PathBuf, Vec<PathBuf>> {
        let candidates = self.candidates(recorded, digest);
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.clone()),
            None => Err(candidates),
        }
    }

    /// Reinterpret `root/<digest>/<basename>` as its sharded equivalent.
    fn reshard_flat(&self, path: &Path) -> Option<PathBuf> {
        let basename = path.file_name()?;
        let dir_name = path.parent()?.file_name()?.to_str()?;
        if !Digest::is_hex_digest(dir_name) {
            return None;
        }
        Some(self.root.join(shard_dir(dir_name)?).join(basename))
    }
}
