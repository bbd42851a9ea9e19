//! # thinvault-cas
//!
//! Content-addressed archive store for evicting files from a primary volume
//! to a slower archive volume, leaving a small stub behind.
//!
//! ## Directory Layout
//!
//! ```text
//! <archive root>/
//! └── 5d/
//!     └── 41/
//!         └── 402abc4b2a76b9719d911017c592/
//!             └── hello.txt            # original basename
//! ```
//!
//! The two shard levels are the first four hex characters of the file's MD5
//! digest, which keeps directory fan-out bounded. Older archives used a flat
//! `<root>/<digest>/<basename>` layout; see [`layout`] and [`migrate`].
//!
//! ## Lifecycle
//!
//! A file is either *resident* (bytes at the original path) or *evicted*
//! (a `.seagate` stub at the original path plus the bytes in the archive).
//! [`Evictor`] and [`Restorer`] move it between the two states.

pub mod digest;
pub mod evict;
pub mod layout;
pub mod metadata;
pub mod migrate;
pub mod restore;
pub mod stub;

pub use digest::{files_identical, hash_bytes, hash_file, Digest};
pub use evict::{EvictReport, Evictor};
pub use layout::PathResolver;
pub use migrate::{migrate, MigrationReport};
pub use restore::{Removable, RestoreReport, Restorer};
pub use stub::{stub_path_for, Stub, STUB_SUFFIX};

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;
use walkdir::WalkDir;

/// Suffix marking an archive entry as eligible for out-of-band cleanup.
pub const REMOVABLE_SUFFIX: &str = ".removable";

/// Errors that can occur during archive operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("archive root {path:?} does not exist or is not a directory")]
    ArchiveRootMissing { path: PathBuf },

    #[error("archive entry not found: {path:?}")]
    NotFound { path: PathBuf },

    #[error("{path:?} is already evicted (stub {stub:?} exists)")]
    AlreadyEvicted { path: PathBuf, stub: PathBuf },

    #[error("{path:?} does not exist or is not a regular file")]
    SourceMissing { path: PathBuf },

    #[error("archive entry {path:?} already exists with different content")]
    ArchiveConflict { path: PathBuf },

    #[error("copy to {path:?} failed verification: expected {expected}, got {actual}")]
    CopyVerificationFailed {
        path: PathBuf,
        expected: Digest,
        actual: Digest,
    },

    #[error("no stub found for {path:?}")]
    NoStubFound { path: PathBuf },

    #[error("{path:?} already exists, refusing to overwrite")]
    TargetAlreadyExists { path: PathBuf },

    #[error("archived file for {recorded:?} not found (tried {tried:?})")]
    ArchiveFileMissing {
        recorded: PathBuf,
        tried: Vec<PathBuf>,
    },

    #[error("malformed stub: {reason}")]
    MalformedStub { reason: String },

    #[error("{path:?} cannot be recorded in a stub: {reason}")]
    UnrepresentablePath { path: PathBuf, reason: &'static str },

    #[error("restored {path:?} does not match its archived digest: expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: Digest,
        actual: Digest,
    },

    #[error("{path:?} still failing after {attempts} attempts: {source}")]
    TransientIo {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("{error}; cleanup also failed, manual inspection needed: {cleanup}")]
    CleanupFailed {
        #[source]
        error: Box<CasError>,
        cleanup: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Attach the outcome of a best-effort cleanup to the error that triggered it.
pub(crate) fn with_cleanup(error: CasError, cleanup: io::Result<()>) -> CasError {
    match cleanup {
        Ok(()) => error,
        Err(cleanup) => CasError::CleanupFailed {
            error: Box::new(error),
            cleanup,
        },
    }
}

/// Sibling temp path used while a copy is in flight.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}.tmp", name, std::process::id()))
}

/// Retry schedule for the removable-marker rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}

/// Outcome of [`ArchiveStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored {
    /// Copied by this call.
    Created(PathBuf),
    /// Identical content was already archived at this address.
    AlreadyPresent(PathBuf),
}

impl Stored {
    pub fn path(&self) -> &Path {
        match self {
            Stored::Created(p) | Stored::AlreadyPresent(p) => p,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Stored::Created(_))
    }
}

/// Content-addressed archive store
///
/// Entries live at `root/ab/cd/<rest>/<basename>`. Each digest+basename pair
/// is written at most once.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    resolver: PathResolver,
    retry: RetryPolicy,
}

impl ArchiveStore {
    /// Open the archive at `root`.
    ///
    /// The root must already exist: a missing root usually means the archive
    /// volume is not mounted, and creating it would silently archive onto the
    /// primary disk.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(CasError::ArchiveRootMissing { path: root });
        }
        Ok(Self {
            resolver: PathResolver::new(root, Vec::new()),
            retry: RetryPolicy::default(),
        })
    }

    /// Absolute roots that historical stubs may still reference.
    pub fn with_legacy_roots(mut self, legacy_roots: Vec<PathBuf>) -> Self {
        self.resolver = PathResolver::new(self.resolver.root().to_path_buf(), legacy_roots);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the root path of the archive.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Canonical location for `digest` + `basename`.
    pub fn location_for(&self, digest: &Digest, basename: &OsStr) -> PathBuf {
        layout::derive(self.root(), digest, basename)
    }

    /// Path as recorded in stubs: relative to the root when inside it.
    pub fn relative<'a>(&self, location: &'a Path) -> &'a Path {
        location.strip_prefix(self.root()).unwrap_or(location)
    }

    /// Archive `source` under its digest.
    ///
    /// An existing entry with identical content is reused; different content
    /// at the same address is an [`CasError::ArchiveConflict`] and is never
    /// overwritten. New copies go through a temp sibling and are verified
    /// before being renamed into place.
    #[instrument(skip(self), level = "debug")]
    pub fn put(&self, source: &Path, digest: &Digest) -> Result<Stored> {
        let basename = source.file_name().ok_or_else(|| CasError::SourceMissing {
            path: source.to_path_buf(),
        })?;
        let location = self.location_for(digest, basename);

        if location.exists() {
            if files_identical(source, &location)? {
                tracing::debug!("[STORE] content already archived at {:?}", location);
                return Ok(Stored::AlreadyPresent(location));
            }
            return Err(CasError::ArchiveConflict { path: location });
        }

        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_sibling(&location);
        if let Err(e) = self.copy_verified(source, &temp_path, digest) {
            let cleanup = remove_if_exists(&temp_path);
            self.prune_empty_dirs(&location);
            return Err(with_cleanup(e, cleanup));
        }
        if let Err(e) = fs::rename(&temp_path, &location) {
            let cleanup = remove_if_exists(&temp_path);
            self.prune_empty_dirs(&location);
            return Err(with_cleanup(e.into(), cleanup));
        }

        Ok(Stored::Created(location))
    }

    fn copy_verified(&self, source: &Path, dest: &Path, digest: &Digest) -> Result<()> {
        reflink_copy::reflink_or_copy(source, dest)?;
        let actual = hash_file(dest)?;
        if actual != *digest {
            return Err(CasError::CopyVerificationFailed {
                path: dest.to_path_buf(),
                expected: *digest,
                actual,
            });
        }
        Ok(())
    }

    /// Read an entry's bytes.
    #[instrument(skip(self), level = "debug")]
    pub fn get(&self, location: &Path) -> Result<Vec<u8>> {
        if !location.is_file() {
            return Err(CasError::NotFound {
                path: location.to_path_buf(),
            });
        }
        Ok(fs::read(location)?)
    }

    /// Check if an entry exists.
    pub fn exists(&self, location: &Path) -> bool {
        location.is_file()
    }

    /// Re-hash an entry and compare against `digest`.
    pub fn verify(&self, location: &Path, digest: &Digest) -> Result<()> {
        if !location.is_file() {
            return Err(CasError::NotFound {
                path: location.to_path_buf(),
            });
        }
        let actual = hash_file(location)?;
        if actual != *digest {
            return Err(CasError::CopyVerificationFailed {
                path: location.to_path_buf(),
                expected: *digest,
                actual,
            });
        }
        Ok(())
    }

    /// Find the entry a stub refers to, across every historical layout.
    pub fn resolve(&self, recorded: &Path, digest: &Digest) -> Result<PathBuf> {
        self.resolver
            .resolve(recorded, digest)
            .map_err(|tried| CasError::ArchiveFileMissing {
                recorded: recorded.to_path_buf(),
                tried,
            })
    }

    /// Remove an entry created by this process and prune empty shard dirs.
    pub fn discard(&self, location: &Path) -> io::Result<()> {
        remove_if_exists(location)?;
        self.prune_empty_dirs(location);
        Ok(())
    }

    /// Rename `location` to `location.removable`.
    ///
    /// The archive volume may report transient busy errors, so the rename is
    /// retried per the store's [`RetryPolicy`]; the last error is returned once
    /// attempts run out.
    pub fn mark_removable(&self, location: &Path) -> Result<PathBuf> {
        let target = layout::removable_path(location);

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match fs::rename(location, &target) {
                Ok(()) => return Ok(target),
                Err(e) if attempt >= attempts => {
                    return Err(CasError::TransientIo {
                        path: location.to_path_buf(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        "[STORE] rename {:?} failed (attempt {}/{}): {}",
                        location,
                        attempt,
                        attempts,
                        e
                    );
                    std::thread::sleep(self.retry.delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Remove empty directories between `location` and the root.
    fn prune_empty_dirs(&self, location: &Path) {
        let mut dir = location.parent();
        while let Some(d) = dir {
            if d == self.root() || !d.starts_with(self.root()) {
                break;
            }
            // remove_dir only succeeds on empty directories
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }

    /// Get statistics about the archive.
    pub fn stats(&self) -> Result<ArchiveStats> {
        let mut stats = ArchiveStats::default();
        for entry in WalkDir::new(self.root()).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            // Skip temp files
            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if layout::is_removable(path) {
                stats.removable_count += 1;
            } else {
                stats.entry_count += 1;
            }
            stats.total_bytes += entry.metadata().map_err(io::Error::from)?.len();
        }
        Ok(stats)
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Statistics about the archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Live archived files
    pub entry_count: u64,
    /// Files already marked removable
    pub removable_count: u64,
    /// Bytes across both
    pub total_bytes: u64,
}
