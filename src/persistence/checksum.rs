//! Content checksums for deal files and snapshot bodies.
//!
//! Checksums are lowercase hex-encoded SHA-256 digests. Files are hashed in
//! fixed-size chunks so large documents never need to fit in memory.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Read buffer size for file hashing.
const CHUNK_SIZE: usize = 64 * 1024;

/// Returns the hex SHA-256 digest of `bytes`.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Returns the hex SHA-256 digest of the file at `path`.
///
/// Blocking; call from `spawn_blocking` when on the async runtime.
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    checksum_reader(&mut file)
}

/// Returns the hex SHA-256 digest of everything readable from `reader`.
pub fn checksum_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn empty_input_has_known_digest() {
        assert_eq!(
            checksum_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_checksum_matches_bytes_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        std::fs::write(&path, b"quarterly numbers").unwrap();

        assert_eq!(
            checksum_file(&path).unwrap(),
            checksum_bytes(b"quarterly numbers")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(checksum_file(&dir.path().join("missing.pdf")).is_err());
    }

    proptest! {
        /// Chunked hashing agrees with one-shot hashing across chunk boundaries.
        #[test]
        fn chunked_equals_one_shot(data in prop::collection::vec(any::<u8>(), 0..(CHUNK_SIZE * 2 + 17))) {
            let mut cursor = std::io::Cursor::new(data.clone());
            prop_assert_eq!(checksum_reader(&mut cursor).unwrap(), checksum_bytes(&data));
        }

        #[test]
        fn different_content_different_checksum(a in ".{1,64}", b in ".{1,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(checksum_bytes(a.as_bytes()), checksum_bytes(b.as_bytes()));
        }
    }
}
