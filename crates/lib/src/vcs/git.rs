//! Git backend.
//!
//! Clone, fetch and revision lookup go through gix. Working-tree operations that
//! gix does not cover (checkout of an arbitrary revision, ancestry, status) shell
//! out to the `git` CLI so user credentials and config apply as usual.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use gix::remote::Direction;
use tracing::{debug, info};

use super::{Vcs, VcsError};

#[derive(Debug, Clone, Copy, Default)]
pub struct GitVcs;

impl GitVcs {
  pub fn new() -> Self {
    Self
  }

  fn open(&self, dir: &Path) -> Result<gix::Repository, VcsError> {
    gix::open(dir).map_err(|e| VcsError::Open {
      path: dir.to_path_buf(),
      message: e.to_string(),
    })
  }
}

fn network(url: &str, e: impl std::fmt::Display) -> VcsError {
  let message = e.to_string();
  if message.contains("not found") || message.contains("does not exist") {
    VcsError::NotFound { url: url.to_string() }
  } else {
    VcsError::Network {
      url: url.to_string(),
      message,
    }
  }
}

/// Run `git` in `dir`, returning the raw output.
fn git(dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
  Command::new("git")
    .args(args)
    .current_dir(dir)
    .output()
    .map_err(VcsError::Spawn)
}

/// Run `git` in `dir`, failing on a non-zero exit and returning trimmed stdout.
fn git_stdout(dir: &Path, args: &[&str]) -> Result<String, VcsError> {
  let output = git(dir, args)?;
  if !output.status.success() {
    return Err(command_failed(dir, args, &output));
  }
  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn command_failed(dir: &Path, args: &[&str], output: &Output) -> VcsError {
  VcsError::Command {
    args: args.join(" "),
    dir: dir.to_path_buf(),
    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
  }
}

impl Vcs for GitVcs {
  fn clone_repo(&self, url: &str, dest: &Path, rev: Option<&str>) -> Result<(), VcsError> {
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent)?;
    }
    info!(url, dest = %dest.display(), "cloning repository");

    let mut prepared = gix::prepare_clone(url, dest).map_err(|e| VcsError::Command {
      args: format!("clone {url}"),
      dir: dest.to_path_buf(),
      stderr: e.to_string(),
    })?;
    let (mut checkout, _outcome) = prepared
      .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
      .map_err(|e| network(url, e))?;
    checkout
      .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
      .map_err(|e| VcsError::Command {
        args: "checkout HEAD".to_string(),
        dir: dest.to_path_buf(),
        stderr: e.to_string(),
      })?;

    if let Some(rev) = rev {
      self.update(dest, rev, false)?;
    }
    Ok(())
  }

  fn update(&self, dir: &Path, rev: &str, may_fetch: bool) -> Result<(), VcsError> {
    if self.rev_parse(dir, rev)?.is_none() {
      if !may_fetch {
        return Err(VcsError::RevisionNotFound {
          rev: rev.to_string(),
          dir: dir.to_path_buf(),
        });
      }
      self.fetch(dir)?;
      if self.rev_parse(dir, rev)?.is_none() {
        return Err(VcsError::RevisionNotFound {
          rev: rev.to_string(),
          dir: dir.to_path_buf(),
        });
      }
    }
    debug!(dir = %dir.display(), rev, "checking out");
    git_stdout(dir, &["checkout", "--quiet", rev])?;
    Ok(())
  }

  fn fetch(&self, dir: &Path) -> Result<(), VcsError> {
    let repo = self.open(dir)?;
    let url = dir.display().to_string();
    debug!(dir = %dir.display(), "fetching updates");

    let remote = repo
      .find_default_remote(Direction::Fetch)
      .ok_or_else(|| VcsError::Open {
        path: dir.to_path_buf(),
        message: "no remote configured".to_string(),
      })?
      .map_err(|e| network(&url, e))?;

    let connection = remote.connect(Direction::Fetch).map_err(|e| network(&url, e))?;
    connection
      .prepare_fetch(gix::progress::Discard, Default::default())
      .map_err(|e| network(&url, e))?
      .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
      .map_err(|e| network(&url, e))?;
    Ok(())
  }

  fn current_revision(&self, dir: &Path) -> Result<String, VcsError> {
    let repo = self.open(dir)?;
    let mut head = repo.head().map_err(|e| VcsError::Open {
      path: dir.to_path_buf(),
      message: e.to_string(),
    })?;
    let commit = head.peel_to_commit().map_err(|e| VcsError::RevisionNotFound {
      rev: format!("HEAD ({e})"),
      dir: dir.to_path_buf(),
    })?;
    Ok(commit.id.to_string())
  }

  fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError> {
    let args = ["symbolic-ref", "--quiet", "--short", "HEAD"];
    let output = git(dir, &args)?;
    match output.status.code() {
      Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string())),
      Some(1) => Ok(None),
      _ => Err(command_failed(dir, &args, &output)),
    }
  }

  fn rev_parse(&self, dir: &Path, rev: &str) -> Result<Option<String>, VcsError> {
    let repo = self.open(dir)?;
    let spec = format!("{rev}^{{commit}}");
    Ok(repo.rev_parse_single(spec.as_str()).ok().map(|id| id.to_string()))
  }

  fn is_ancestor(&self, dir: &Path, ancestor: &str, descendant: &str) -> Result<bool, VcsError> {
    let args = ["merge-base", "--is-ancestor", ancestor, descendant];
    let output = git(dir, &args)?;
    match output.status.code() {
      Some(0) => Ok(true),
      Some(1) => Ok(false),
      _ => Err(command_failed(dir, &args, &output)),
    }
  }

  fn is_dirty(&self, dir: &Path) -> Result<bool, VcsError> {
    let status = git_stdout(dir, &["status", "--porcelain", "--untracked-files=no"])?;
    Ok(!status.is_empty())
  }

  fn repository_root(&self, dir: &Path) -> Option<PathBuf> {
    dir
      .ancestors()
      .find(|candidate| candidate.join(".git").exists())
      .map(Path::to_path_buf)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::write_file;
  use tempfile::TempDir;

  fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
  }

  fn commit_all(dir: &Path, message: &str) -> String {
    git_stdout(dir, &["add", "-A"]).unwrap();
    git_stdout(
      dir,
      &[
        "-c",
        "user.name=test",
        "-c",
        "user.email=test@example.com",
        "commit",
        "--quiet",
        "-m",
        message,
      ],
    )
    .unwrap();
    git_stdout(dir, &["rev-parse", "HEAD"]).unwrap()
  }

  fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git_stdout(dir, &["init", "--quiet", "--initial-branch=main"]).unwrap();
  }

  #[test]
  fn ancestry_and_checkout_follow_history() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    write_file(&repo, "suite.toml", "name = \"a\"\n");
    let first = commit_all(&repo, "first");
    write_file(&repo, "suite.toml", "name = \"a\"\n# second\n");
    let second = commit_all(&repo, "second");

    let vcs = GitVcs::new();
    assert_eq!(vcs.current_revision(&repo).unwrap(), second);
    assert_eq!(vcs.current_branch(&repo).unwrap().as_deref(), Some("main"));
    assert!(vcs.is_ancestor(&repo, &first, &second).unwrap());
    assert!(!vcs.is_ancestor(&repo, &second, &first).unwrap());

    vcs.update(&repo, &first, false).unwrap();
    assert_eq!(vcs.current_revision(&repo).unwrap(), first);
    assert_eq!(vcs.current_branch(&repo).unwrap(), None);

    vcs.update(&repo, "main", false).unwrap();
    assert_eq!(vcs.current_branch(&repo).unwrap().as_deref(), Some("main"));
  }

  #[test]
  fn rev_parse_resolves_abbreviations_and_rejects_unknown() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    write_file(&repo, "a.txt", "a");
    let head = commit_all(&repo, "only");

    let vcs = GitVcs::new();
    assert_eq!(vcs.rev_parse(&repo, &head[..10]).unwrap(), Some(head.clone()));
    assert_eq!(vcs.rev_parse(&repo, "no-such-branch").unwrap(), None);
    assert!(matches!(
      vcs.update(&repo, "no-such-branch", false),
      Err(VcsError::RevisionNotFound { .. })
    ));
  }

  #[test]
  fn dirty_tracks_modified_files() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    init_repo(&repo);
    write_file(&repo, "a.txt", "a");
    commit_all(&repo, "only");

    let vcs = GitVcs::new();
    assert!(!vcs.is_dirty(&repo).unwrap());
    write_file(&repo, "a.txt", "changed");
    assert!(vcs.is_dirty(&repo).unwrap());
  }

  #[test]
  fn repository_root_walks_up() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::create_dir_all(repo.join("nested/suite")).unwrap();

    let vcs = GitVcs::new();
    assert_eq!(vcs.repository_root(&repo.join("nested/suite")), Some(repo.clone()));
    assert!(vcs.is_repository(&repo));
    assert!(!vcs.is_repository(&repo.join("nested")));
  }
}
