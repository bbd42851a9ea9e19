//! Evicted → resident.
//!
//! The archived bytes are copied next to the target under a temporary name,
//! verified against the stub's digest and only then renamed onto the target.
//! The stub is deleted strictly after that, so an unverified file is never
//! left at the original path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::digest::{hash_file, Digest};
use crate::layout::is_removable;
use crate::metadata::copy_metadata;
use crate::stub::{stub_path_for, Stub};
use crate::{remove_if_exists, temp_sibling, with_cleanup, ArchiveStore, CasError, Result};

/// What happened to the archive copy after a successful restore.
#[derive(Debug)]
pub enum Removable {
    /// Renamed to this `.removable` path.
    Marked(PathBuf),
    /// Marking is turned off.
    Disabled,
    /// The rename kept failing. The restore itself still succeeded.
    Failed(CasError),
}

#[derive(Debug)]
pub struct RestoreReport {
    pub target: PathBuf,
    pub digest: Digest,
    /// Archive entry the bytes came from.
    pub location: PathBuf,
    pub removable: Removable,
}

pub struct Restorer<'a> {
    store: &'a ArchiveStore,
    mark_removable: bool,
    /// Deletes the stub, and the restored target again on rollback.
    remove: fn(&Path) -> io::Result<()>,
}

impl<'a> Restorer<'a> {
    pub fn new(store: &'a ArchiveStore) -> Self {
        Self {
            store,
            mark_removable: true,
            remove: |p| fs::remove_file(p),
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: fn(&Path) -> io::Result<()>) -> Self {
        self.remove = remove;
        self
    }

    /// Whether to rename the archive copy to `.removable` after restoring.
    pub fn mark_removable(mut self, enabled: bool) -> Self {
        self.mark_removable = enabled;
        self
    }

    pub fn download(&self, path: &Path) -> Result<RestoreReport> {
        let stub_path = stub_path_for(path);
        if !stub_path.is_file() {
            if path.symlink_metadata().is_err() {
                tracing::warn!("[RESTORE] neither {:?} nor its stub exists", path);
            }
            return Err(CasError::NoStubFound {
                path: path.to_path_buf(),
            });
        }
        if path.symlink_metadata().is_ok() {
            return Err(CasError::TargetAlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let stub = Stub::read(&stub_path)?;
        let location = self.store.resolve(&stub.archive_path, &stub.digest)?;
        if location != self.store.resolver().rebase(&stub.archive_path) {
            tracing::info!(
                "[RESTORE] stub records {:?}, found archive copy at {:?}",
                stub.archive_path,
                location
            );
        }

        let staging = temp_sibling(path);
        if let Err(e) = self.stage(&location, &staging, &stub_path, &stub.digest) {
            return Err(with_cleanup(e, remove_if_exists(&staging)));
        }
        if let Err(e) = fs::rename(&staging, path) {
            return Err(with_cleanup(e.into(), remove_if_exists(&staging)));
        }

        if let Err(e) = (self.remove)(&stub_path) {
            // Back to the evicted state rather than leaving both behind
            tracing::warn!(
                "[RESTORE] could not delete stub {:?}, rolling back: {}",
                stub_path,
                e
            );
            return Err(with_cleanup(e.into(), (self.remove)(path)));
        }
        tracing::info!("[RESTORE] {:?} <- {:?}", path, location);

        let removable = if is_removable(&location) {
            // Shared entry, already marked by an earlier restore
            Removable::Marked(location.clone())
        } else if !self.mark_removable {
            Removable::Disabled
        } else {
            match self.store.mark_removable(&location) {
                Ok(marked) => Removable::Marked(marked),
                Err(e) => {
                    tracing::warn!(
                        "[RESTORE] restored {:?} but could not mark {:?} removable: {}",
                        path,
                        location,
                        e
                    );
                    Removable::Failed(e)
                }
            }
        };

        Ok(RestoreReport {
            target: path.to_path_buf(),
            digest: stub.digest,
            location,
            removable,
        })
    }

    /// Copy, verify and apply the stub's metadata to the staging file.
    fn stage(&self, location: &Path, staging: &Path, stub_path: &Path, expected: &Digest) -> Result<()> {
        reflink_copy::reflink_or_copy(location, staging)?;

        let actual = hash_file(staging)?;
        if actual != *expected {
            return Err(CasError::IntegrityMismatch {
                path: location.to_path_buf(),
                expected: *expected,
                actual,
            });
        }

        copy_metadata(stub_path, staging)?;
        Ok(())
    }
}
