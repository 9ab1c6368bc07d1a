//! File modification times used to decide whether a build output is stale.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::consts::BUILD_STAMP;

/// A path and its modification time at the moment it was observed.
///
/// A path that did not exist has no timestamp. It is older than everything
/// and newer than nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFile {
  pub path: PathBuf,
  pub modified: Option<SystemTime>,
}

impl TimestampFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok();
    Self { path, modified }
  }

  /// The most recently modified existing path among `paths`.
  pub fn newest<I, P>(paths: I) -> Option<Self>
  where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
  {
    paths
      .into_iter()
      .map(Self::new)
      .filter(Self::exists)
      .max_by_key(|ts| ts.modified)
  }

  /// The most recently modified regular file anywhere under `dir`.
  pub fn newest_in(dir: &Path) -> Option<Self> {
    if dir.is_file() {
      return Some(Self::new(dir)).filter(Self::exists);
    }
    if !dir.is_dir() {
      return None;
    }
    Self::newest(
      WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path()),
    )
  }

  /// Newest file across several source roots, skipping build stamps.
  pub fn newest_source<'a>(dirs: impl IntoIterator<Item = &'a Path>) -> Option<Self> {
    dirs
      .into_iter()
      .filter_map(|dir| {
        if dir.is_file() {
          return Some(Self::new(dir));
        }
        Self::newest(
          WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && entry.file_name() != BUILD_STAMP)
            .map(|entry| entry.into_path()),
        )
      })
      .filter(Self::exists)
      .max_by_key(|ts| ts.modified)
  }

  pub fn exists(&self) -> bool {
    self.modified.is_some()
  }

  pub fn is_newer_than(&self, other: &TimestampFile) -> bool {
    match (self.modified, other.modified) {
      (Some(mine), Some(theirs)) => mine > theirs,
      (Some(_), None) => true,
      (None, _) => false,
    }
  }

  pub fn is_older_than(&self, other: &TimestampFile) -> bool {
    other.is_newer_than(self)
  }
}

impl fmt::Display for TimestampFile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.modified {
      Some(modified) => write!(
        f,
        "{} ({})",
        self.path.display(),
        humantime::format_rfc3339_seconds(modified)
      ),
      None => write!(f, "{} (missing)", self.path.display()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{set_modified_offset, write_file};
  use tempfile::TempDir;

  mod comparison_tests {
    use super::*;

    #[test]
    fn missing_file_is_older_than_everything() {
      let temp = TempDir::new().unwrap();
      let present = write_file(temp.path(), "a.txt", "a");
      let missing = TimestampFile::new(temp.path().join("nope"));
      let present = TimestampFile::new(present);

      assert!(!missing.exists());
      assert!(missing.is_older_than(&present));
      assert!(present.is_newer_than(&missing));
      assert!(!missing.is_newer_than(&present));
    }

    #[test]
    fn later_modification_is_newer() {
      let temp = TempDir::new().unwrap();
      let old = write_file(temp.path(), "old.txt", "old");
      let new = write_file(temp.path(), "new.txt", "new");
      set_modified_offset(&old, -60);

      let old = TimestampFile::new(old);
      let new = TimestampFile::new(new);
      assert!(new.is_newer_than(&old));
      assert!(old.is_older_than(&new));
    }
  }

  mod newest_tests {
    use super::*;

    #[test]
    fn newest_in_walks_nested_directories() {
      let temp = TempDir::new().unwrap();
      write_file(temp.path(), "a.txt", "a");
      let nested = write_file(temp.path(), "deep/er/b.txt", "b");
      set_modified_offset(&nested, 60);

      let newest = TimestampFile::newest_in(temp.path()).unwrap();
      assert_eq!(newest.path, nested);
    }

    #[test]
    fn newest_in_missing_directory_is_none() {
      let temp = TempDir::new().unwrap();
      assert!(TimestampFile::newest_in(&temp.path().join("missing")).is_none());
    }

    #[test]
    fn newest_source_ignores_build_stamps() {
      let temp = TempDir::new().unwrap();
      let source = write_file(temp.path(), "src/main.c", "int main;");
      let stamp = write_file(temp.path(), &format!("src/{BUILD_STAMP}"), "");
      set_modified_offset(&stamp, 120);

      let newest = TimestampFile::newest_source([temp.path().join("src").as_path()]).unwrap();
      assert_eq!(newest.path, source);
    }
  }

  #[test]
  fn display_marks_missing_paths() {
    let ts = TimestampFile::new("/definitely/not/here");
    assert!(ts.to_string().ends_with("(missing)"));
  }
}
