use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_BUFFER_SIZE as BUFFER_SIZE;
use crate::errors::Result;

/// Calculate the lowercase hex SHA-256 of a file's contents.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_small_file() {
        let content = b"Hello, World!";
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content).unwrap();
        temp_file.flush().unwrap();

        let result = sha256_hex(temp_file.path()).unwrap();

        // Expected SHA-256 hash of "Hello, World!"
        let expected = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
        assert_eq!(result, expected);
    }

    #[test]
    fn test_sha256_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();

        let result = sha256_hex(temp_file.path()).unwrap();

        // Expected SHA-256 hash of the empty string
        let expected = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(result, expected);
    }

    #[test]
    fn test_sha256_chunked_reads() {
        // larger than the read buffer to exercise chunked hashing
        let mut data = Vec::new();
        while data.len() < 2 * BUFFER_SIZE {
            data.extend_from_slice(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        }
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let first = sha256_hex(temp_file.path()).unwrap();
        let second = sha256_hex(temp_file.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_sha256_nonexistent_file() {
        let result = sha256_hex(Path::new("/nonexistent/file.txt"));
        assert!(result.is_err());
    }
}
