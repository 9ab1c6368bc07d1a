//! Build tasks.
//!
//! Every live dependency in a run gets one [`BuildTask`]. The task decides whether
//! its output is stale and, if so, rebuilds it:
//!
//! - **Projects** run their build command (or copy their sources) into the
//!   project's output directory and drop a stamp file there
//! - **Libraries** are downloaded and verified when missing
//! - **Distributions** gather the outputs of their constituents
//! - **Platform libraries** need no work once their presence is confirmed
//!
//! # Submodules
//!
//! - [`cmd`] - Shell runner for build commands
//! - [`fetch`] - Library downloads
//! - [`saved_deps`] - Dependency list persisted between runs

pub mod cmd;
mod distribution;
pub mod fetch;
mod library;
mod project;
pub mod saved_deps;
mod task;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::config::Config;
use crate::graph::{Dependency, DependencyKind, Workspace};
use crate::util::hash::hash_file;

pub use distribution::DistributionTask;
pub use library::LibraryTask;
pub use project::ProjectTask;
pub use task::{BuildTask, TaskBody, TaskJob, TaskReport, TaskStatus};

/// Outcome of a task's own staleness check, with the reason either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
  Stale(String),
  Current(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
  #[error("command failed with exit code {code:?}: {cmd}{}", stderr_suffix(.stderr))]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("could not download {}: {message}", .dest.display())]
  DownloadFailed { dest: PathBuf, message: String },

  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("invalid saved dependencies {}: {source}", .path.display())]
  SavedDeps {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
  match stderr.lines().last() {
    Some(line) => format!(" ({line})"),
    None => String::new(),
  }
}

/// Options that apply to every task of a run.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Rebuild even if up to date.
  pub force: bool,
  /// Remove prior output before building.
  pub clean: bool,
  /// Only these tasks may execute; the rest are wired in but skipped.
  pub only: Option<BTreeSet<String>>,
  /// Ignore dependency outputs' timestamps when probing staleness.
  pub shallow_dependency_checks: bool,
  pub shell: Option<String>,
}

impl BuildOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      shallow_dependency_checks: config.shallow_dependency_checks,
      ..Self::default()
    }
  }
}

/// Create the build task for `dep`.
pub fn build_task(ws: &Workspace, dep: &Dependency, options: &BuildOptions) -> BuildTask {
  let body = match &dep.kind {
    DependencyKind::Project(project) => TaskBody::Project(ProjectTask {
      dir: project.dir.clone(),
      source_dirs: project.source_dirs.clone(),
      output_dir: project.output_dir.clone(),
      build_command: project.build_command.clone(),
      daemon: project.daemon.clone(),
    }),
    DependencyKind::Library(library) => TaskBody::Library(LibraryTask {
      path: library.path.clone(),
      urls: library.urls.clone(),
      sha256: library.sha256.clone(),
    }),
    DependencyKind::RuntimeLibrary(library) | DependencyKind::ToolchainLibrary(library) => {
      TaskBody::NoOp {
        output: library.path.clone(),
      }
    }
    DependencyKind::Distribution(dist) => TaskBody::Distribution(DistributionTask {
      output_dir: dist.output_dir.clone(),
      constituents: distribution::constituents(ws, dep),
    }),
  };
  let parallelism = match &dep.kind {
    DependencyKind::Project(project) => project.parallelism,
    _ => 1,
  };

  BuildTask {
    name: dep.name.clone(),
    kind: dep.kind_name(),
    deps: Vec::new(),
    parallelism,
    build_time: dep.build_time,
    forbidden: options.only.as_ref().is_some_and(|only| !only.contains(&dep.name)),
    built: false,
    newest_output: body.newest_output(),
    saved_deps_path: dep
      .output_root
      .join("saved-deps")
      .join(dep.kind_name())
      .join(format!("{}.json", dep.name)),
    body,
  }
}

/// Copy a file or directory tree to `dest`, skipping files whose content is
/// already there. Returns how many files were written.
fn copy_tree(src: &Path, dest: &Path) -> io::Result<usize> {
  if src.is_file() {
    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent)?;
    }
    return Ok(usize::from(copy_if_changed(src, dest)?));
  }
  let mut written = 0;
  for entry in WalkDir::new(src) {
    let entry = entry.map_err(io::Error::other)?;
    let Ok(relative) = entry.path().strip_prefix(src) else {
      continue;
    };
    let target = dest.join(relative);
    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if entry.file_type().is_file() && copy_if_changed(entry.path(), &target)? {
      written += 1;
    }
  }
  Ok(written)
}

fn copy_if_changed(src: &Path, dest: &Path) -> io::Result<bool> {
  if dest.is_file() && hash_file(src)? == hash_file(dest)? {
    return Ok(false);
  }
  std::fs::copy(src, dest)?;
  Ok(true)
}

async fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
  match tokio::fs::remove_dir_all(dir).await {
    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
    _ => Ok(()),
  }
}
