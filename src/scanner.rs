//! Byte signature search over local files.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Signature scan errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("File {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("Invalid signature: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("Invalid signature: signature is empty")]
    EmptySignature,
    #[error("Failed to read {}: {}", .0.display(), .1)]
    Read(PathBuf, io::Error),
}

/// Scan `path` for every occurrence of the hex-encoded `signature`.
///
/// Returns 0-based start offsets in ascending order. Overlapping matches are
/// all reported and a file shorter than the signature yields no offsets.
pub async fn scan(path: &Path, signature: &str) -> Result<Vec<usize>, ScanError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ScanError::NotFound(path.to_path_buf()));
    }

    let pattern = decode_signature(signature)?;

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
    debug!(path = %path.display(), size = data.len(), "Scanning file");

    let offsets = find_offsets(&data, &pattern);
    info!(
        path = %path.display(),
        matches = offsets.len(),
        "Signature scan complete"
    );
    Ok(offsets)
}

/// Decode a hex signature into raw bytes.
///
/// Whitespace may separate byte pairs (`"de ad be ef"`) but not split one.
pub fn decode_signature(signature: &str) -> Result<Vec<u8>, ScanError> {
    let mut pattern = Vec::with_capacity(signature.len() / 2);
    for group in signature.split_ascii_whitespace() {
        pattern.extend(hex::decode(group)?);
    }
    if pattern.is_empty() {
        return Err(ScanError::EmptySignature);
    }
    Ok(pattern)
}

/// Every offset at which `pattern` occurs in `data`.
pub fn find_offsets(data: &[u8], pattern: &[u8]) -> Vec<usize> {
    if pattern.is_empty() || pattern.len() > data.len() {
        return Vec::new();
    }

    data.windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| *window == pattern)
        .map(|(offset, _)| offset)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_find_offsets_overlapping() {
        assert_eq!(find_offsets(b"aaa", b"aa"), vec![0, 1]);
        assert_eq!(find_offsets(b"abababa", b"aba"), vec![0, 2, 4]);
    }

    #[test]
    fn test_find_offsets_edges() {
        assert_eq!(find_offsets(b"abc", b"abc"), vec![0]);
        assert_eq!(find_offsets(b"abc", b"c"), vec![2]);
        assert!(find_offsets(b"abc", b"abcd").is_empty());
        assert!(find_offsets(b"", b"a").is_empty());
        assert!(find_offsets(b"abc", b"x").is_empty());
    }

    #[test]
    fn test_find_offsets_matches_are_real_and_exhaustive() {
        let data: Vec<u8> = (0..512u32).map(|i| (i * 7 % 5) as u8).collect();
        let pattern = [2u8, 4];
        let offsets = find_offsets(&data, &pattern);

        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        for &offset in &offsets {
            assert_eq!(&data[offset..offset + 2], &pattern);
        }
        let expected = (0..data.len() - 1)
            .filter(|&i| data[i..i + 2] == pattern)
            .count();
        assert_eq!(offsets.len(), expected);
    }

    #[test]
    fn test_decode_signature() {
        assert_eq!(decode_signature("deadBEEF").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(decode_signature("abc"), Err(ScanError::InvalidHex(_))));
        assert!(matches!(decode_signature("zz"), Err(ScanError::InvalidHex(_))));
        assert!(matches!(decode_signature(""), Err(ScanError::EmptySignature)));
    }

    #[test]
    fn test_decode_signature_with_spaces() {
        assert_eq!(decode_signature("de ad be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_signature(" dead\tbeef\n").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(decode_signature("d ead"), Err(ScanError::InvalidHex(_))));
        assert!(matches!(decode_signature("   "), Err(ScanError::EmptySignature)));
    }

    #[tokio::test]
    async fn test_scan_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut content = vec![0u8; 10];
        content.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        content.extend_from_slice(b"tail");
        file.write_all(&content).unwrap();

        let offsets = scan(file.path(), "deadbeef").await.unwrap();
        assert_eq!(offsets, vec![10]);

        let none = scan(file.path(), "cafebabe").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_scan_pattern_longer_than_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ab").unwrap();

        let offsets = scan(file.path(), "616263").await.unwrap();
        assert!(offsets.is_empty());
    }

    #[tokio::test]
    async fn test_scan_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let err = scan(&path, "00").await.unwrap_err();
        assert_eq!(err.to_string(), format!("File {} not found", path.display()));
    }

    #[tokio::test]
    async fn test_scan_missing_file_checked_before_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let err = scan(&path, "not hex").await.unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }
}
