//! Content fingerprints for change detection.
//!
//! A fingerprint is the MD5 digest of a file's full content rendered as
//! lowercase hex. It only has to be stable and collision resistant enough to
//! notice that a file changed between two deployments.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size used while streaming a file through the hasher (64KB)
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the fingerprint of a file by streaming its content.
///
/// # Errors
/// Returns the underlying I/O error if the file cannot be opened or read.
/// Local I/O errors are never transient, so callers must not retry them.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the fingerprint of an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_digest() {
        assert_eq!(fingerprint_bytes(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(fingerprint_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_file_matches_bytes() -> io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"hello")?;
        temp_file.flush()?;

        assert_eq!(fingerprint_file(temp_file.path())?, fingerprint_bytes(b"hello"));
        Ok(())
    }

    #[test]
    fn test_large_file_spans_buffers() -> io::Result<()> {
        let data: Vec<u8> = (0..(READ_BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(&data)?;
        temp_file.flush()?;

        assert_eq!(fingerprint_file(temp_file.path())?, fingerprint_bytes(&data));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = fingerprint_file(Path::new("/nonexistent/hashdeploy/file.txt"));
        assert!(result.is_err());
    }
}
