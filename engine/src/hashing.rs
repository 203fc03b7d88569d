//! Checksum parsing and file digests
//!
//! Expected checksums arrive in three spellings:
//!
//! - `sha256:<hex>`
//! - `blake3:<hex>`
//! - `<hex>` (taken as SHA-256)
//!
//! The cache always records the SHA-256 of an artifact. A BLAKE3 expectation
//! is checked by hashing the file again with BLAKE3.

use sdk::errors::{AcquireError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

const READ_CHUNK: usize = 64 * 1024;

/// Digest algorithm of an expected checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn prefix(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

/// A parsed expected checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub hex: String,
}

impl Checksum {
    /// Parse a checksum string in any accepted spelling
    ///
    /// # Errors
    ///
    /// Returns `AcquireError::InvalidArgument` for an unknown prefix, an empty
    /// digest, or non-hex characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (algorithm, hex) = if let Some(hex) = raw.strip_prefix("sha256:") {
            (HashAlgorithm::Sha256, hex)
        } else if let Some(hex) = raw.strip_prefix("blake3:") {
            (HashAlgorithm::Blake3, hex)
        } else if let Some((prefix, _)) = raw.split_once(':') {
            return Err(AcquireError::InvalidArgument(format!(
                "Unsupported checksum algorithm '{}'",
                prefix
            )));
        } else {
            (HashAlgorithm::Sha256, raw)
        };

        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AcquireError::InvalidArgument(format!(
                "Invalid checksum digest '{}'",
                raw
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Check `path` against this checksum.
    ///
    /// `known_sha256` short-circuits SHA-256 expectations when the caller
    /// already hashed the file. Returns the actual digest on mismatch.
    pub fn verify_file(&self, path: &Path, known_sha256: Option<&str>) -> Result<Option<String>> {
        let actual = match (self.algorithm, known_sha256) {
            (HashAlgorithm::Sha256, Some(known)) => known.to_ascii_lowercase(),
            (HashAlgorithm::Sha256, None) => sha256_file(path)?,
            (HashAlgorithm::Blake3, _) => blake3_file(path)?,
        };
        if actual == self.hex {
            Ok(None)
        } else {
            Ok(Some(actual))
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.hex)
    }
}

/// SHA-256 of a byte slice as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();

    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// BLAKE3 of a file as lowercase hex
pub fn blake3_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();

    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// SHA-256 of a file, computed off the async runtime
pub async fn sha256_file_async(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(|e| AcquireError::Io(format!("Hashing task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // sha256("hello world")
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_parse_spellings() {
        let bare = Checksum::parse("ABC123").unwrap();
        assert_eq!(bare.algorithm, HashAlgorithm::Sha256);
        assert_eq!(bare.hex, "abc123");

        let blake = Checksum::parse("blake3:00ff").unwrap();
        assert_eq!(blake.algorithm, HashAlgorithm::Blake3);
        assert_eq!(blake.to_string(), "blake3:00ff");

        assert!(Checksum::parse("md5:abcd").is_err());
        assert!(Checksum::parse("sha256:").is_err());
        assert!(Checksum::parse("not-hex").is_err());
    }

    #[test]
    fn test_sha256_file_matches_slice() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(sha256_hex(b"hello world"), HELLO_SHA256);
        assert_eq!(sha256_file(temp_file.path()).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_verify_file_reports_actual_digest() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"hello world").unwrap();
        temp_file.flush().unwrap();

        let good = Checksum::parse(&format!("sha256:{}", HELLO_SHA256)).unwrap();
        assert_eq!(good.verify_file(temp_file.path(), None).unwrap(), None);

        let blake = blake3::hash(b"hello world").to_hex().to_string();
        let good_blake = Checksum::parse(&format!("blake3:{}", blake)).unwrap();
        assert_eq!(good_blake.verify_file(temp_file.path(), None).unwrap(), None);

        let bad = Checksum::parse("abc123").unwrap();
        assert_eq!(
            bad.verify_file(temp_file.path(), None).unwrap(),
            Some(HELLO_SHA256.to_string())
        );
    }
}
