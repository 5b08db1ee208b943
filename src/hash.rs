//! Content hashing for library files
//!
//! Every file the scanner records is identified by the SHA-256 digest of its
//! content. Multi-file models are identified by a composite digest over the
//! names and contents of all files their marker references.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{LibraryError, Result};

/// Length of a content hash in bytes
pub const HASH_LEN: usize = 32;

/// Default chunk size used when streaming file content into the digest
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// SHA-256 digest of a file's content
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a byte slice, as read back from the database
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; HASH_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex form, used in logs and CLI output
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Stream `reader` into `hasher` through `buffer`
fn feed<R: Read>(hasher: &mut Sha256, reader: &mut R, buffer: &mut [u8]) -> std::io::Result<u64> {
    let mut total = 0u64;
    loop {
        let bytes_read = reader.read(buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }
    Ok(total)
}

/// Hash a whole file in bounded-size chunks
pub fn hash_file(path: &Path, chunk_size: usize) -> Result<ContentHash> {
    let mut file = File::open(path).map_err(|e| LibraryError::io_with_path(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    feed(&mut hasher, &mut file, &mut buffer).map_err(|e| LibraryError::io_with_path(e, path))?;
    Ok(ContentHash(hasher.finalize().into()))
}

/// Hash an ordered sequence of `(normalized name, file)` pairs into one digest.
///
/// For each entry the UTF-8 bytes of the name are fed first, then the file's
/// content. Order matters: the same files in a different order produce a
/// different hash.
pub fn hash_composite(entries: &[(String, PathBuf)], chunk_size: usize) -> Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    for (name, path) in entries {
        log::trace!("Hashing marker resource {}", name);
        hasher.update(name.as_bytes());
        let mut file = File::open(path).map_err(|e| LibraryError::io_with_path(e, path))?;
        feed(&mut hasher, &mut file, &mut buffer)
            .map_err(|e| LibraryError::io_with_path(e, path))?;
    }
    Ok(ContentHash(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_hash_file_matches_one_shot_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vrm");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        // Small chunk size forces many reads
        let hash = hash_file(&path, 7).unwrap();
        let expected: [u8; HASH_LEN] = Sha256::digest(&content).into();
        assert_eq!(hash, ContentHash::new(expected));
    }

    #[test]
    fn test_hex_form() {
        let hash = ContentHash::new([0xab; HASH_LEN]);
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_string().starts_with("abab"));
        assert_eq!(hash.to_hex().parse::<ContentHash>().unwrap(), hash);
        assert!("xyz".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_composite_includes_names_and_order() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.png");
        fs::write(&a, b"{}").unwrap();
        fs::write(&b, b"png").unwrap();

        let forward = vec![("a.json".to_string(), a.clone()), ("b.png".to_string(), b.clone())];
        let backward = vec![("b.png".to_string(), b.clone()), ("a.json".to_string(), a.clone())];
        let renamed = vec![("x.json".to_string(), a.clone()), ("b.png".to_string(), b.clone())];

        let h1 = hash_composite(&forward, 4).unwrap();
        assert_ne!(h1, hash_composite(&backward, 4).unwrap());
        assert_ne!(h1, hash_composite(&renamed, 4).unwrap());

        let mut expected = Sha256::new();
        expected.update(b"a.json");
        expected.update(b"{}");
        expected.update(b"b.png");
        expected.update(b"png");
        let expected: [u8; HASH_LEN] = expected.finalize().into();
        assert_eq!(h1, ContentHash::new(expected));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = hash_file(&dir.path().join("missing.vrm"), DEFAULT_CHUNK_SIZE).unwrap_err();
        assert_eq!(err.kind, crate::error::LibraryErrorKind::NotFound);
    }
}
