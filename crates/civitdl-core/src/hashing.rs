//! Streaming hash computation for model files.
//!
//! SHA256 and BLAKE3 are computed in a single pass over the file.

use crate::error::{CivitdlError, Result};
use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Chunk size for reading files (8MB, optimal for SSDs).
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Dual hash result containing both SHA256 and BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualHash {
    /// SHA256 hash as lowercase hex string
    pub sha256: String,
    /// BLAKE3 hash as lowercase hex string
    pub blake3: String,
}

impl DualHash {
    /// Hashes keyed the way the remote API names them.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("SHA256".to_string(), self.sha256.to_uppercase()),
            ("BLAKE3".to_string(), self.blake3.to_uppercase()),
        ])
    }
}

/// Compute both SHA256 and BLAKE3 hashes in a single pass.
pub fn compute_dual_hash(path: impl AsRef<Path>) -> Result<DualHash> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| CivitdlError::io_with_path(e, path))?;

    let mut sha256_hasher = Sha256::new();
    let mut blake3_hasher = Blake3Hasher::new();

    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| CivitdlError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }

        sha256_hasher.update(&buffer[..bytes_read]);
        blake3_hasher.update(&buffer[..bytes_read]);
    }

    let sha256 = hex::encode(sha256_hasher.finalize());
    let blake3 = blake3_hasher.finalize().to_hex().to_string();

    Ok(DualHash { sha256, blake3 })
}

/// Compute the dual hash on the blocking pool.
pub async fn compute_dual_hash_async(path: impl AsRef<Path>) -> Result<DualHash> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || compute_dual_hash(&path))
        .await
        .map_err(|e| CivitdlError::unexpected(format!("Hash task failed: {}", e)))?
}

/// Whether the file's SHA256 matches `expected` (case-insensitive hex).
pub fn verify_sha256(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let actual = compute_dual_hash(path)?.sha256;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn hello_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_dual_hash() {
        let file = hello_file();
        let hash = compute_dual_hash(file.path()).unwrap();
        assert_eq!(hash.sha256, HELLO_SHA256);
        assert_eq!(hash.blake3, blake3::hash(b"hello").to_hex().to_string());
        assert_eq!(hash.to_map()["SHA256"], HELLO_SHA256.to_uppercase());
    }

    #[test]
    fn test_verify_sha256_ignores_case() {
        let file = hello_file();
        assert!(verify_sha256(file.path(), &HELLO_SHA256.to_uppercase()).unwrap());
        assert!(!verify_sha256(file.path(), "abc").unwrap());
    }

    #[tokio::test]
    async fn test_async_hash_matches_sync() {
        let file = hello_file();
        let hash = compute_dual_hash_async(file.path()).await.unwrap();
        assert_eq!(hash.sha256, HELLO_SHA256);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = compute_dual_hash("/definitely/not/here").unwrap_err();
        assert!(matches!(err, CivitdlError::Io { .. }));
    }
}
