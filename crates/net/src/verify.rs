//! SHA-256 verification of fetched artifacts

use orchard_errors::{Error, NetworkError};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Lower-case hex SHA-256 of a file
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn sha256_file(path: &Path) -> Result<String, Error> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against its expected digest (case-insensitive)
///
/// # Errors
///
/// Returns `NetworkError::ChecksumMismatch` on mismatch, or an I/O error.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), Error> {
    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(NetworkError::ChecksumMismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sha256_known_value() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"abc").unwrap();
        let digest = sha256_file(temp.path()).await.unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(verify_sha256(temp.path(), &digest.to_uppercase()).await.is_ok());
        assert!(verify_sha256(temp.path(), "00").await.is_err());
    }
}
