//! The dependency list a task was last built against.
//!
//! When the list changes (a dependency added, removed or re-ordered) the task is
//! stale even if every timestamp says otherwise.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::TaskError;
use crate::consts::SAVED_DEPS_VERSION;

#[derive(Debug, Serialize, Deserialize)]
struct SavedDeps {
  version: u32,
  dependencies: Vec<String>,
}

/// The persisted list, or `None` if there is none or it was written by an incompatible version.
pub fn load(path: &Path) -> Result<Option<Vec<String>>, TaskError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e.into()),
  };
  let saved: SavedDeps = serde_json::from_str(&content).map_err(|source| TaskError::SavedDeps {
    path: path.to_path_buf(),
    source,
  })?;
  if saved.version != SAVED_DEPS_VERSION {
    debug!(path = ?path, version = saved.version, "ignoring saved dependencies from another version");
    return Ok(None);
  }
  Ok(Some(saved.dependencies))
}

/// Whether `current` differs from what was persisted. Without a persisted list
/// nothing is known to have changed; an unreadable one counts as changed.
pub fn changed(path: &Path, current: &[String]) -> bool {
  match load(path) {
    Ok(Some(saved)) => saved != current,
    Ok(None) => false,
    Err(e) => {
      warn!(path = ?path, error = %e, "unreadable saved dependencies");
      true
    }
  }
}

/// Record `current` for the next run. An empty list removes the file.
pub fn persist(path: &Path, current: &[String]) -> Result<(), TaskError> {
  if current.is_empty() {
    return match fs::remove_file(path) {
      Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
      _ => Ok(()),
    };
  }
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let saved = SavedDeps {
    version: SAVED_DEPS_VERSION,
    dependencies: current.to_vec(),
  };
  let json = serde_json::to_string_pretty(&saved).map_err(|source| TaskError::SavedDeps {
    path: path.to_path_buf(),
    source,
  })?;
  fs::write(path, json)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_file;
  use tempfile::TempDir;

  fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn detects_reordering() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("saved-deps/project/app.json");

    persist(&path, &names(&["a", "b"])).unwrap();
    assert!(!changed(&path, &names(&["a", "b"])));
    assert!(changed(&path, &names(&["b", "a"])));
    assert!(changed(&path, &names(&["a"])));
  }

  #[test]
  fn empty_list_removes_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("app.json");

    persist(&path, &names(&["a"])).unwrap();
    persist(&path, &[]).unwrap();
    assert!(!path.exists());
    assert!(!changed(&path, &[]));
  }

  #[test]
  fn missing_file_is_not_a_change() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("saved-deps/project/app.json");
    assert!(!changed(&path, &names(&["a", "b"])));

    let old = write_file(temp.path(), "old.json", r#"{"version": 0, "dependencies": ["a"]}"#);
    assert!(!changed(&old, &names(&["b"])));
  }

  #[test]
  fn other_versions_and_garbage_are_not_trusted() {
    let temp = TempDir::new().unwrap();
    let old = write_file(temp.path(), "old.json", r#"{"version": 0, "dependencies": ["a"]}"#);
    assert_eq!(load(&old).unwrap(), None);

    let garbage = write_file(temp.path(), "garbage.json", "not json");
    assert!(load(&garbage).is_err());
    assert!(changed(&garbage, &names(&["a"])));
  }
}
