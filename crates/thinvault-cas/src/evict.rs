//! Resident → evicted.
//!
//! Order matters: the original is deleted only after the archive copy is
//! verified and the stub is on disk. Any failure before that point undoes
//! what this call created and leaves the original untouched.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::digest::{hash_file, Digest};
use crate::metadata::copy_metadata;
use crate::stub::{stub_path_for, Stub};
use crate::{with_cleanup, ArchiveStore, CasError, Result, Stored};

/// What an eviction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictReport {
    pub source: PathBuf,
    pub stub: PathBuf,
    pub digest: Digest,
    pub location: PathBuf,
    /// Identical content was already archived; nothing was copied.
    pub reused: bool,
}

pub struct Evictor<'a> {
    store: &'a ArchiveStore,
    /// Deletes the original, and the stub again on rollback.
    remove: fn(&Path) -> io::Result<()>,
}

impl<'a> Evictor<'a> {
    pub fn new(store: &'a ArchiveStore) -> Self {
        Self {
            store,
            remove: |p| fs::remove_file(p),
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: fn(&Path) -> io::Result<()>) -> Self {
        self.remove = remove;
        self
    }

    pub fn evict(&self, path: &Path) -> Result<EvictReport> {
        let stub_path = stub_path_for(path);
        if stub_path.symlink_metadata().is_ok() {
            return Err(CasError::AlreadyEvicted {
                path: path.to_path_buf(),
                stub: stub_path,
            });
        }
        if !path.is_file() {
            return Err(CasError::SourceMissing {
                path: path.to_path_buf(),
            });
        }

        let basename = path.file_name().ok_or_else(|| CasError::SourceMissing {
            path: path.to_path_buf(),
        })?;
        let digest = hash_file(path)?;
        tracing::debug!("[EVICT] {:?} has digest {}", path, digest);

        // Nothing is copied for a name the stub cannot record exactly
        let stub = Stub::new(
            self.store.relative(&self.store.location_for(&digest, basename)),
            digest,
        );
        let stub_text = stub.encode()?;

        let stored = self.store.put(path, &digest)?;
        let location = stored.path().to_path_buf();
        if !stored.was_created() {
            tracing::info!(
                "[EVICT] identical content already archived at {:?}, not copying again",
                location
            );
        }

        // Covers the reused entry too: it must still hash-match before we
        // let go of the original.
        if let Err(e) = self.store.verify(&location, &digest) {
            return Err(with_cleanup(e, self.undo_copy(&stored)));
        }

        if let Err(e) = write_stub(path, &stub_path, &stub_text) {
            return Err(with_cleanup(e, self.undo_copy(&stored)));
        }

        if let Err(e) = (self.remove)(path) {
            tracing::warn!("[EVICT] could not delete {:?}, rolling back: {}", path, e);
            // The copy stays as long as the stub pointing at it does
            let cleanup = (self.remove)(&stub_path).and_then(|()| self.undo_copy(&stored));
            return Err(with_cleanup(e.into(), cleanup));
        }

        tracing::info!("[EVICT] {:?} -> {:?}", path, location);
        Ok(EvictReport {
            source: path.to_path_buf(),
            stub: stub_path,
            digest,
            location,
            reused: !stored.was_created(),
        })
    }

    /// Remove the archive copy if, and only if, this eviction created it.
    fn undo_copy(&self, stored: &Stored) -> io::Result<()> {
        match stored {
            Stored::Created(location) => self.store.discard(location),
            Stored::AlreadyPresent(_) => Ok(()),
        }
    }
}

/// Create the stub (never replacing an existing file) and give it the
/// original's metadata. A partially written stub is removed again.
fn write_stub(source: &Path, stub_path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(stub_path)?;

    let written = file
        .write_all(text.as_bytes())
        .and_then(|()| file.sync_all());
    drop(file);

    if let Err(e) = written.and_then(|()| copy_metadata(source, stub_path)) {
        return Err(with_cleanup(e.into(), fs::remove_file(stub_path)));
    }
    Ok(())
}
