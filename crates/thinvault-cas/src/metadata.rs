//! Ownership, permission and timestamp copying between files.

use std::fs;
use std::io;
use std::path::Path;

use filetime::FileTime;

/// Copy owner/group, permission bits and access/modification times from
/// `src` onto `dst`.
///
/// Ownership goes first since `chown` may clear set-id bits. An unprivileged
/// caller cannot hand files to another user; that case is logged and skipped.
pub fn copy_metadata(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;

    #[cfg(unix)]
    copy_ownership(&meta, dst)?;

    fs::set_permissions(dst, meta.permissions())?;

    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dst, atime, mtime)?;
    Ok(())
}

#[cfg(unix)]
fn copy_ownership(meta: &fs::Metadata, dst: &Path) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::unistd::{chown, Gid, Uid};
    use std::os::unix::fs::MetadataExt;

    let uid = Uid::from_raw(meta.uid());
    let gid = Gid::from_raw(meta.gid());
    match chown(dst, Some(uid), Some(gid)) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) => {
            tracing::warn!(
                "[META] not permitted to chown {:?} to {}:{}, keeping current owner",
                dst,
                uid,
                gid
            );
            Ok(())
        }
        Err(e) => Err(io::Error::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_copies_mode_and_mtime() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::write(&src, b"a").unwrap();
        fs::write(&dst, b"b").unwrap();

        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let when = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_times(&src, when, when).unwrap();

        copy_metadata(&src, &dst).unwrap();

        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        assert_eq!(FileTime::from_last_modification_time(&meta), when);
    }

    #[test]
    fn test_missing_source_is_error() {
        let temp = TempDir::new().unwrap();
        let dst = temp.path().join("dst");
        fs::write(&dst, b"b").unwrap();
        assert!(copy_metadata(&temp.path().join("nope"), &dst).is_err());
    }
}
