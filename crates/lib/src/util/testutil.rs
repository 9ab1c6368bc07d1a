//! Test utilities for suitebuild-lib.
//!
//! Helpers for laying out suites and source trees on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::consts::DECL_FILENAME;
use crate::graph::{GraphError, Workspace, WorkspaceOptions};
use crate::suite::{Resolution, ResolutionStats, Suite, SuiteDecl};

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) -> PathBuf {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(&path, contents).unwrap();
  path
}

/// Shift a file's modification time by `seconds` relative to now.
pub fn set_modified_offset(path: &Path, seconds: i64) {
  let now = SystemTime::now();
  let delta = Duration::from_secs(seconds.unsigned_abs());
  let time = if seconds >= 0 { now + delta } else { now - delta };
  fs::File::options()
    .write(true)
    .open(path)
    .unwrap()
    .set_modified(time)
    .unwrap();
}

/// Shell command that appends a line to `log`, used to observe execution order.
#[cfg(unix)]
pub fn append_line(log: &Path, line: &str) -> String {
  format!("echo '{}' >> '{}'", line, log.display())
}

/// Lay out one suite per `(name, declaration)` pair under `root` and load them as a workspace.
///
/// The first suite is the primary one.
pub fn workspace(root: &Path, suites: &[(&str, &str)]) -> Result<Workspace, GraphError> {
  workspace_with(root, suites, &WorkspaceOptions::default())
}

pub fn workspace_with(root: &Path, suites: &[(&str, &str)], options: &WorkspaceOptions) -> Result<Workspace, GraphError> {
  let mut resolution = Resolution {
    primary: suites[0].0.to_string(),
    suites: BTreeMap::new(),
    stats: ResolutionStats::default(),
  };
  for (i, (name, toml)) in suites.iter().enumerate() {
    let dir = root.join(name);
    let path = write_file(&dir, DECL_FILENAME, toml);
    let decl = SuiteDecl::parse(toml, &path).unwrap();
    let suite = Suite::from_decl(decl, dir, None, i == 0).unwrap();
    resolution.suites.insert(name.to_string(), suite);
  }
  Workspace::load(resolution, options)
}
