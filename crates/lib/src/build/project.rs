//! Projects: a build command (or a plain copy of the sources) producing one output directory.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::cmd::run_shell;
use super::{Staleness, TaskError, copy_tree, remove_dir_if_exists};
use crate::consts::{BUILD_STAMP, DAEMON_PID_ENV};
use crate::util::timestamp::TimestampFile;

#[derive(Debug, Clone)]
pub struct ProjectTask {
  pub dir: PathBuf,
  pub source_dirs: Vec<PathBuf>,
  pub output_dir: PathBuf,
  pub build_command: Option<String>,
  /// Command line of the shared helper process this project's build talks to.
  pub daemon: Option<String>,
}

impl ProjectTask {
  fn stamp(&self) -> PathBuf {
    self.output_dir.join(BUILD_STAMP)
  }

  /// Stale when the stamp is missing or older than any source file or `newest_input`.
  pub fn needs_build(&self, newest_input: Option<&TimestampFile>) -> Staleness {
    let stamp = TimestampFile::new(self.stamp());
    if !stamp.exists() {
      return Staleness::Stale(format!("{} does not exist", stamp.path.display()));
    }
    if let Some(source) = TimestampFile::newest_source(self.source_dirs.iter().map(PathBuf::as_path))
      && source.is_newer_than(&stamp)
    {
      return Staleness::Stale(format!("{source} is newer than {stamp}"));
    }
    if let Some(input) = newest_input
      && input.is_newer_than(&stamp)
    {
      return Staleness::Stale(format!("{input} is newer than {stamp}"));
    }
    Staleness::Current(format!("{stamp} is newer than all sources and inputs"))
  }

  /// Returns whether the output changed. A build command is opaque, so running
  /// one always counts as a change; copying counts only if a file was written.
  pub async fn build(&self, daemon_pid: Option<u32>, shell: Option<&str>) -> Result<bool, TaskError> {
    let first_build = !self.stamp().exists();
    tokio::fs::create_dir_all(&self.output_dir).await?;
    let changed = match &self.build_command {
      Some(cmd) => {
        let mut env = BTreeMap::new();
        if let Some(pid) = daemon_pid {
          env.insert(DAEMON_PID_ENV.to_string(), pid.to_string());
        }
        run_shell(cmd, &self.dir, &self.output_dir, &env, shell).await?;
        true
      }
      None => {
        let sources = self.source_dirs.clone();
        let output_dir = self.output_dir.clone();
        debug!(output = ?output_dir, "copying sources");
        let written = tokio::task::spawn_blocking(move || -> io::Result<usize> {
          let mut written = 0;
          for source in sources.iter().filter(|s| s.exists()) {
            written += copy_tree(source, &output_dir)?;
          }
          Ok(written)
        })
        .await
        .map_err(io::Error::other)??;
        debug!(output = ?self.output_dir, written, "sources copied");
        first_build || written > 0
      }
    };
    tokio::fs::write(self.stamp(), b"").await?;
    Ok(changed)
  }

  pub async fn clean(&self) -> Result<(), TaskError> {
    remove_dir_if_exists(&self.output_dir).await?;
    Ok(())
  }

  /// The newest file the build produced, or the stamp if it produced none.
  ///
  /// The stamp is rewritten by every build, so dependents only see an older
  /// time here when a rebuild left the produced files untouched.
  pub fn newest_output(&self) -> Option<TimestampFile> {
    TimestampFile::newest_source([self.output_dir.as_path()])
      .or_else(|| Some(TimestampFile::new(self.stamp())).filter(TimestampFile::exists))
  }
}
