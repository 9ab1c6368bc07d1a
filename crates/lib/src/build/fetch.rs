//! Library downloads with SHA-256 verification.

use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::TaskError;
use crate::util::hash::{digest_matches, hash_bytes};

/// Download a library to `dest` from the first of `urls` that works.
///
/// `file://` URLs are read from disk. The content is verified against
/// `sha256` (when given) before `dest` is replaced, so a failed or corrupt
/// download never leaves a partial file behind.
pub async fn download(urls: &[String], sha256: Option<&str>, dest: &Path) -> Result<(), TaskError> {
  let mut failures = Vec::new();
  for url in urls {
    info!(url = %url, dest = ?dest, "fetching library");
    let bytes = match fetch_bytes(url).await {
      Ok(bytes) => bytes,
      Err(message) => {
        warn!(url = %url, error = %message, "download failed");
        failures.push(format!("{url}: {message}"));
        continue;
      }
    };

    let actual = hash_bytes(&bytes);
    if let Some(expected) = sha256
      && !digest_matches(&actual, expected)
    {
      return Err(TaskError::HashMismatch {
        url: url.clone(),
        expected: expected.trim().to_string(),
        actual,
      });
    }

    let parent = dest.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;
    let staged = NamedTempFile::new_in(parent)?;
    tokio::fs::write(staged.path(), &bytes).await?;
    staged.persist(dest).map_err(|e| e.error)?;

    debug!(path = ?dest, size = bytes.len(), "download complete");
    return Ok(());
  }

  Err(TaskError::DownloadFailed {
    dest: dest.to_path_buf(),
    message: if failures.is_empty() {
      "no download URL".to_string()
    } else {
      failures.join("; ")
    },
  })
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>, String> {
  if let Some(path) = url.strip_prefix("file://") {
    return tokio::fs::read(path).await.map_err(|e| e.to_string());
  }

  let response = reqwest::get(url).await.map_err(|e| e.to_string())?;
  if !response.status().is_success() {
    return Err(format!("HTTP {}", response.status()));
  }
  let bytes = response.bytes().await.map_err(|e| e.to_string())?;
  Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_file;
  use tempfile::TempDir;

  fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
  }

  #[tokio::test]
  async fn falls_back_to_later_urls() {
    let temp = TempDir::new().unwrap();
    let source = write_file(temp.path(), "mirror/lib.jar", "library bytes");
    let dest = temp.path().join("lib/lib.jar");
    let urls = vec![file_url(&temp.path().join("gone.jar")), file_url(&source)];
    let digest = hash_bytes(b"library bytes");

    download(&urls, Some(&digest.to_uppercase()), &dest).await.unwrap();
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "library bytes");
  }

  #[tokio::test]
  async fn hash_mismatch_leaves_destination_untouched() {
    let temp = TempDir::new().unwrap();
    let source = write_file(temp.path(), "lib.jar", "tampered");
    let dest = write_file(temp.path(), "out/lib.jar", "previous");

    let err = download(&[file_url(&source)], Some(&hash_bytes(b"original")), &dest)
      .await
      .unwrap_err();
    assert!(matches!(err, TaskError::HashMismatch { .. }));
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "previous");
  }

  #[tokio::test]
  async fn reports_every_failed_url() {
    let temp = TempDir::new().unwrap();
    let urls = vec![file_url(&temp.path().join("a.jar")), file_url(&temp.path().join("b.jar"))];

    let err = download(&urls, None, &temp.path().join("lib.jar")).await.unwrap_err();
    let TaskError::DownloadFailed { message, .. } = err else {
      panic!("expected download failure");
    };
    assert!(message.contains("a.jar") && message.contains("b.jar"));
  }
}
