//! SHA-256 helpers used to verify downloaded libraries.

use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes, returning lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Hash a file's contents, returning lowercase hex.
///
/// The file is streamed so large archives are not read into memory at once.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 64 * 1024];
  loop {
    let read = file.read(&mut buf)?;
    if read == 0 {
      break;
    }
    hasher.update(&buf[..read]);
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Compare a computed digest against an expected one, ignoring case.
pub fn digest_matches(actual: &str, expected: &str) -> bool {
  actual.eq_ignore_ascii_case(expected.trim())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

  #[test]
  fn hashes_bytes_and_files_identically() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hello.txt");
    fs::write(&path, "hello").unwrap();

    assert_eq!(hash_bytes(b"hello"), HELLO_SHA256);
    assert_eq!(hash_file(&path).unwrap(), HELLO_SHA256);
  }

  #[test]
  fn digest_comparison_ignores_case_and_whitespace() {
    assert!(digest_matches(HELLO_SHA256, &format!(" {} ", HELLO_SHA256.to_uppercase())));
    assert!(!digest_matches(HELLO_SHA256, "deadbeef"));
  }

  #[test]
  fn missing_file_is_an_error() {
    let temp = TempDir::new().unwrap();
    assert!(hash_file(&temp.path().join("missing")).is_err());
  }
}
