//! Version-control operations needed to materialize suite repositories.
//!
//! The resolver only talks to the [`Vcs`] trait, so resolution logic can be tested
//! against an in-memory backend while real workspaces use [`git::GitVcs`].

pub mod git;
#[cfg(test)]
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Version-control system backing a source location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
  #[default]
  Git,
}

impl fmt::Display for VcsKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VcsKind::Git => write!(f, "git"),
    }
  }
}

#[derive(Debug, Error)]
pub enum VcsError {
  /// The remote could not be reached or the transfer broke off.
  #[error("network failure talking to '{url}': {message}")]
  Network { url: String, message: String },

  /// The remote does not have a repository at this URL.
  #[error("repository not found: {url}")]
  NotFound { url: String },

  #[error("revision '{rev}' not found in '{dir}'")]
  RevisionNotFound { rev: String, dir: PathBuf },

  #[error("failed to open repository at '{path}': {message}")]
  Open { path: PathBuf, message: String },

  #[error("'git {args}' failed in '{dir}': {stderr}")]
  Command { args: String, dir: PathBuf, stderr: String },

  #[error("failed to run git: {0}")]
  Spawn(#[source] std::io::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl VcsError {
  /// Whether retrying the same operation might succeed.
  ///
  /// Hosting services answer "not found" for repositories they are still
  /// replicating, so that is retried along with plain network failures.
  pub fn is_retryable(&self) -> bool {
    matches!(self, VcsError::Network { .. } | VcsError::NotFound { .. })
  }
}

/// Operations the suite resolver performs on working copies.
pub trait Vcs {
  /// Clone `url` into `dest`, checking out `rev` when given and the default branch otherwise.
  fn clone_repo(&self, url: &str, dest: &Path, rev: Option<&str>) -> Result<(), VcsError>;

  /// Move the working copy at `dir` to `rev`. When `may_fetch` is set, the remote
  /// is consulted if `rev` is not known locally.
  fn update(&self, dir: &Path, rev: &str, may_fetch: bool) -> Result<(), VcsError>;

  /// Bring remote revisions into the local working copy without moving its checkout.
  fn fetch(&self, dir: &Path) -> Result<(), VcsError>;

  /// Full identifier of the revision currently checked out.
  fn current_revision(&self, dir: &Path) -> Result<String, VcsError>;

  /// Branch currently checked out, or `None` when detached.
  fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError>;

  /// Resolve a revision expression to a full identifier, if it is known locally.
  fn rev_parse(&self, dir: &Path, rev: &str) -> Result<Option<String>, VcsError>;

  /// Whether `ancestor` is reachable from `descendant`. A revision is its own ancestor.
  fn is_ancestor(&self, dir: &Path, ancestor: &str, descendant: &str) -> Result<bool, VcsError>;

  /// Whether the working copy has uncommitted changes.
  fn is_dirty(&self, dir: &Path) -> Result<bool, VcsError>;

  /// Root of the working copy containing `dir`, if any.
  fn repository_root(&self, dir: &Path) -> Option<PathBuf>;

  fn is_repository(&self, dir: &Path) -> bool {
    self.repository_root(dir).as_deref() == Some(dir)
  }
}

/// Clone with exponential backoff on retryable failures.
///
/// Makes at most `retries + 1` attempts, sleeping `backoff`, `2 * backoff`, ... between them.
pub fn clone_with_retries(
  vcs: &dyn Vcs,
  url: &str,
  dest: &Path,
  rev: Option<&str>,
  retries: u32,
  backoff: Duration,
) -> Result<(), VcsError> {
  let mut attempt = 0;
  loop {
    match vcs.clone_repo(url, dest, rev) {
      Ok(()) => return Ok(()),
      Err(e) if e.is_retryable() && attempt < retries => {
        let delay = backoff * 2u32.saturating_pow(attempt);
        warn!(url, attempt = attempt + 1, delay = ?delay, error = %e, "clone failed, retrying");
        if dest.exists() {
          std::fs::remove_dir_all(dest)?;
        }
        std::thread::sleep(delay);
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

/// Two revision identifiers name the same revision if equal, or if one is an
/// abbreviation (at least 7 characters) of the other.
pub fn same_revision(a: &str, b: &str) -> bool {
  if a == b {
    return true;
  }
  let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
  short.len() >= 7 && long.starts_with(short)
}

#[cfg(test)]
mod tests {
  use super::memory::MemoryVcs;
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn abbreviated_revisions_match() {
    assert!(same_revision("a1b2c3d4e5", "a1b2c3d"));
    assert!(same_revision("tip", "tip"));
    assert!(!same_revision("a1b2c3d4e5", "a1b2c3e"));
    assert!(!same_revision("a1b", "a1b2c3d4e5"));
  }

  #[test]
  fn only_transient_failures_are_retryable() {
    let network = VcsError::Network {
      url: "u".into(),
      message: "reset".into(),
    };
    let missing_rev = VcsError::RevisionNotFound {
      rev: "r".into(),
      dir: PathBuf::from("/x"),
    };
    assert!(network.is_retryable());
    assert!(!missing_rev.is_retryable());
  }

  mod retry_tests {
    use super::*;

    #[test]
    fn transient_failures_are_retried() {
      let temp = TempDir::new().unwrap();
      let vcs = MemoryVcs::new();
      vcs.add_commit("mem://lib", "r1", &[], &[("suite.toml", "name = \"lib\"\n")]);
      vcs.fail_next_clones("mem://lib", 2);

      let dest = temp.path().join("lib");
      clone_with_retries(&vcs, "mem://lib", &dest, None, 3, Duration::ZERO).unwrap();
      assert_eq!(vcs.current_revision(&dest).unwrap(), "r1");
    }

    #[test]
    fn gives_up_after_configured_retries() {
      let temp = TempDir::new().unwrap();
      let vcs = MemoryVcs::new();
      vcs.add_commit("mem://lib", "r1", &[], &[]);
      vcs.fail_next_clones("mem://lib", 5);

      let dest = temp.path().join("lib");
      let err = clone_with_retries(&vcs, "mem://lib", &dest, None, 2, Duration::ZERO).unwrap_err();
      assert!(err.is_retryable());
    }

    #[test]
    fn permanent_failures_are_not_retried() {
      let temp = TempDir::new().unwrap();
      let vcs = MemoryVcs::new();
      vcs.add_commit("mem://lib", "r1", &[], &[]);

      let dest = temp.path().join("lib");
      let err = clone_with_retries(&vcs, "mem://lib", &dest, Some("nope"), 3, Duration::ZERO).unwrap_err();
      assert!(matches!(err, VcsError::RevisionNotFound { .. }));
      assert_eq!(vcs.clone_attempts("mem://lib"), 1);
    }
  }
}
