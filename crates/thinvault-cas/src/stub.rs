//! Stub file codec.
//!
//! A stub sits at `<original-path>.seagate` while a file is evicted:
//!
//! ```text
//! Seagate file path: 5d/41/402abc4b2a76b9719d911017c592/hello.txt
//! MD5 hash: 5d41402abc4b2a76b9719d911017c592
//! ```
//!
//! The labels and suffix are an on-disk format shared with every stub ever
//! written, so they never change.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::digest::Digest;
use crate::{CasError, Result};

/// Suffix appended to the original file name.
pub const STUB_SUFFIX: &str = ".seagate";

const PATH_LABEL: &str = "Seagate file path: ";
const HASH_LABEL: &str = "MD5 hash: ";

/// Decoded stub contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stub {
    /// Archive location as recorded: relative to the archive root, or absolute.
    pub archive_path: PathBuf,
    pub digest: Digest,
}

impl Stub {
    pub fn new<P: Into<PathBuf>>(archive_path: P, digest: Digest) -> Self {
        Self {
            archive_path: archive_path.into(),
            digest,
        }
    }

    /// Two labeled lines, no trailing newline.
    ///
    /// Fails for paths the format cannot carry byte for byte: non-UTF-8
    /// names and names containing a line break.
    pub fn encode(&self) -> Result<String> {
        let path = self.archive_path.to_str().ok_or_else(|| CasError::UnrepresentablePath {
            path: self.archive_path.clone(),
            reason: "not valid UTF-8",
        })?;
        if path.contains(['\n', '\r']) {
            return Err(CasError::UnrepresentablePath {
                path: self.archive_path.clone(),
                reason: "contains a line break",
            });
        }
        Ok(format!("{PATH_LABEL}{path}\n{HASH_LABEL}{}", self.digest))
    }

    /// Parse stub text. The recorded path is kept exactly as written,
    /// including leading or trailing spaces.
    pub fn decode(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text
            .trim_end_matches(['\r', '\n'])
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect();

        if lines.len() != 2 {
            return Err(malformed(format!(
                "expected 2 lines, found {}",
                lines.len()
            )));
        }

        let path = field(lines[0], PATH_LABEL)?;
        let hash = field(lines[1], HASH_LABEL)?;
        let digest = hash
            .trim()
            .parse::<Digest>()
            .map_err(|e| malformed(e.to_string()))?;

        Ok(Self::new(path, digest))
    }

    /// Read and decode the stub at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| malformed(format!("stub is not valid UTF-8: {e}")))?;
        Self::decode(&text)
    }
}

fn field<'a>(line: &'a str, label: &str) -> Result<&'a str> {
    let value = line
        .strip_prefix(label)
        .ok_or_else(|| malformed(format!("expected line starting with {label:?}, got {line:?}")))?;
    if value.trim().is_empty() {
        return Err(malformed(format!("empty value for {:?}", label.trim_end())));
    }
    Ok(value)
}

fn malformed(reason: String) -> CasError {
    CasError::MalformedStub { reason }
}

/// `<path>.seagate`
pub fn stub_path_for(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(STUB_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn test_encode_exact_bytes() {
        let stub = Stub::new(
            "5d/41/402abc4b2a76b9719d911017c592/hello.txt",
            HELLO.parse().unwrap(),
        );
        assert_eq!(
            stub.encode().unwrap(),
            "Seagate file path: 5d/41/402abc4b2a76b9719d911017c592/hello.txt\n\
             MD5 hash: 5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_decode_historical_absolute_stub() {
        let text = format!(
            "Seagate file path: /Volumes/Files/thinning/{HELLO}/hello.txt\nMD5 hash: {HELLO}\n"
        );
        let stub = Stub::decode(&text).unwrap();
        assert_eq!(
            stub.archive_path,
            PathBuf::from(format!("/Volumes/Files/thinning/{HELLO}/hello.txt"))
        );
        assert_eq!(stub.digest.to_hex(), HELLO);
    }

    #[test]
    fn test_decode_crlf() {
        let text = format!("Seagate file path: a/b.txt\r\nMD5 hash: {HELLO}\r\n");
        assert_eq!(Stub::decode(&text).unwrap().archive_path, PathBuf::from("a/b.txt"));
    }

    #[test]
    fn test_decode_path_containing_separator() {
        let text = format!("Seagate file path: dir/notes: draft.txt\nMD5 hash: {HELLO}");
        assert_eq!(
            Stub::decode(&text).unwrap().archive_path,
            PathBuf::from("dir/notes: draft.txt")
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases = [
            String::new(),
            "Seagate file path: a/b.txt".to_string(),
            format!("Path: a/b.txt\nMD5 hash: {HELLO}"),
            format!("Seagate file path: a/b.txt\nSHA hash: {HELLO}"),
            format!("Seagate file path: \nMD5 hash: {HELLO}"),
            "Seagate file path: a/b.txt\nMD5 hash: ".to_string(),
            "Seagate file path: a/b.txt\nMD5 hash: not-a-digest".to_string(),
            format!("Seagate file path: a\nMD5 hash: {HELLO}\nextra: line"),
        ];
        for text in cases {
            assert!(
                matches!(Stub::decode(&text), Err(CasError::MalformedStub { .. })),
                "should reject {text:?}"
            );
        }
    }

    #[test]
    fn test_path_whitespace_survives_round_trip() {
        let stub = Stub::new("23/f9/0123456789abcdef0123456789/report.txt ", HELLO.parse().unwrap());
        let decoded = Stub::decode(&stub.encode().unwrap()).unwrap();
        assert_eq!(decoded, stub);
        assert_eq!(
            decoded.archive_path.file_name().unwrap(),
            std::ffi::OsStr::new("report.txt ")
        );

        // Same with a trailing newline and CRLF endings
        let text = format!("Seagate file path:  lead.txt \r\nMD5 hash: {HELLO}\r\n");
        assert_eq!(
            Stub::decode(&text).unwrap().archive_path,
            PathBuf::from(" lead.txt ")
        );
    }

    #[test]
    fn test_encode_rejects_line_breaks() {
        for name in ["a\nb.txt", "a\rb.txt"] {
            let stub = Stub::new(format!("5d/41/x/{name}"), HELLO.parse().unwrap());
            assert!(matches!(
                stub.encode(),
                Err(CasError::UnrepresentablePath { .. })
            ));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_encode_rejects_non_utf8() {
        use std::os::unix::ffi::OsStrExt;

        let name = std::ffi::OsStr::from_bytes(b"caf\xe9.txt");
        let stub = Stub::new(Path::new("5d/41/x").join(name), HELLO.parse().unwrap());
        assert!(matches!(
            stub.encode(),
            Err(CasError::UnrepresentablePath { .. })
        ));
    }

    #[test]
    fn test_read_non_utf8_stub_is_malformed() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("bad.txt.seagate");
        std::fs::write(&path, b"Seagate file path: caf\xe9.txt\nMD5 hash: x").unwrap();
        assert!(matches!(
            Stub::read(&path),
            Err(CasError::MalformedStub { .. })
        ));
    }

    #[test]
    fn test_stub_path_for() {
        assert_eq!(
            stub_path_for(Path::new("/data/report.tar.gz")),
            PathBuf::from("/data/report.tar.gz.seagate")
        );
    }
}
