//! MD5 content digests.
//!
//! A [`Digest`] identifies file *content*, not identity: two files with
//! identical bytes share a digest and therefore an archive directory.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// Read buffer for streaming hashes and comparisons.
const CHUNK_SIZE: usize = 64 * 1024;

/// Length of a digest rendered as hex.
pub const DIGEST_HEX_LEN: usize = 32;

/// 128-bit MD5 digest of a file's full byte content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 16]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase 32-character hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True when `name` looks like a hex digest (32 hex chars, any case).
    pub fn is_hex_digest(name: &str) -> bool {
        name.len() == DIGEST_HEX_LEN && name.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest {0:?}: expected {DIGEST_HEX_LEN} hex characters")]
pub struct ParseDigestError(pub String);

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::is_hex_digest(s) {
            return Err(ParseDigestError(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseDigestError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Digest of an in-memory buffer.
#[inline]
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest(md5::compute(data).0)
}

/// Digest of everything readable from `reader`, streamed in chunks.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        ctx.consume(&buf[..n]);
    }
    Ok(Digest(ctx.compute().0))
}

/// Digest of a file's content. Memory use is bounded by [`CHUNK_SIZE`].
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<Digest> {
    let file = File::open(path.as_ref())?;
    hash_reader(BufReader::with_capacity(CHUNK_SIZE, file))
}

/// Exact content comparison.
///
/// Digest first (cheap filter), then size, then a full byte comparison.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    if hash_file(a)? != hash_file(b)? {
        return Ok(false);
    }
    if a.metadata()?.len() != b.metadata()?.len() {
        return Ok(false);
    }

    let mut ra = BufReader::with_capacity(CHUNK_SIZE, File::open(a)?);
    let mut rb = BufReader::with_capacity(CHUNK_SIZE, File::open(b)?);
    let mut buf_a = vec![0u8; CHUNK_SIZE];
    let mut buf_b = vec![0u8; CHUNK_SIZE];
    loop {
        let n = read_full(&mut ra, &mut buf_a)?;
        let m = read_full(&mut rb, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows; returns bytes read (0 at EOF).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
