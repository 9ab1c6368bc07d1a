//! In-memory version control used by resolver tests.
//!
//! Each remote is a commit DAG keyed by URL. Cloning or updating writes the files
//! recorded for the target commit into the working directory, so declarations are
//! read from disk exactly as with a real backend.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use super::{Vcs, VcsError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOp {
  Clone { url: String, dest: PathBuf },
  Update { dir: PathBuf, rev: String },
}

#[derive(Debug, Default)]
struct Remote {
  commits: BTreeMap<String, Commit>,
  branches: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Commit {
  parents: Vec<String>,
  files: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Checkout {
  url: String,
  rev: String,
  branch: Option<String>,
}

#[derive(Debug, Default)]
struct State {
  remotes: BTreeMap<String, Remote>,
  checkouts: BTreeMap<PathBuf, Checkout>,
  failing_clones: BTreeMap<String, u32>,
  clone_attempts: BTreeMap<String, u32>,
  dirty: BTreeSet<PathBuf>,
  ops: Vec<VcsOp>,
}

#[derive(Debug, Default)]
pub struct MemoryVcs {
  state: RefCell<State>,
}

const DEFAULT_BRANCH: &str = "master";

impl MemoryVcs {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a commit on the remote at `url` and advance its default branch to it.
  pub fn add_commit(&self, url: &str, id: &str, parents: &[&str], files: &[(&str, &str)]) {
    let mut state = self.state.borrow_mut();
    let remote = state.remotes.entry(url.to_string()).or_default();
    remote.commits.insert(
      id.to_string(),
      Commit {
        parents: parents.iter().map(|p| p.to_string()).collect(),
        files: files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
      },
    );
    remote.branches.insert(DEFAULT_BRANCH.to_string(), id.to_string());
  }

  pub fn set_branch(&self, url: &str, branch: &str, id: &str) {
    let mut state = self.state.borrow_mut();
    let remote = state.remotes.entry(url.to_string()).or_default();
    remote.branches.insert(branch.to_string(), id.to_string());
  }

  /// Make the next `count` clones of `url` fail with a network error.
  pub fn fail_next_clones(&self, url: &str, count: u32) {
    self.state.borrow_mut().failing_clones.insert(url.to_string(), count);
  }

  pub fn clone_attempts(&self, url: &str) -> u32 {
    self.state.borrow().clone_attempts.get(url).copied().unwrap_or(0)
  }

  /// Materialize a working copy that already existed before resolution started.
  pub fn checkout_existing(&self, url: &str, dest: &Path, rev: &str) {
    let mut state = self.state.borrow_mut();
    let (id, branch) = resolve(&state, url, rev).unwrap();
    materialize(&state, url, &id, dest).unwrap();
    state.checkouts.insert(
      dest.to_path_buf(),
      Checkout {
        url: url.to_string(),
        rev: id,
        branch,
      },
    );
  }

  pub fn mark_dirty(&self, dir: &Path) {
    self.state.borrow_mut().dirty.insert(dir.to_path_buf());
  }

  pub fn ops(&self) -> Vec<VcsOp> {
    self.state.borrow().ops.clone()
  }

  pub fn clear_ops(&self) {
    self.state.borrow_mut().ops.clear();
  }

  pub fn updates(&self) -> usize {
    self.ops().iter().filter(|op| matches!(op, VcsOp::Update { .. })).count()
  }

  pub fn clones(&self) -> usize {
    self.ops().iter().filter(|op| matches!(op, VcsOp::Clone { .. })).count()
  }

  fn checkout_of(&self, dir: &Path) -> Result<Checkout, VcsError> {
    self
      .state
      .borrow()
      .checkouts
      .get(dir)
      .cloned()
      .ok_or_else(|| VcsError::Open {
        path: dir.to_path_buf(),
        message: "not a working copy".to_string(),
      })
  }
}

/// Resolve a commit id or branch name, returning the commit and the branch if one was named.
fn resolve(state: &State, url: &str, rev: &str) -> Option<(String, Option<String>)> {
  let remote = state.remotes.get(url)?;
  if let Some(id) = remote.branches.get(rev) {
    return Some((id.clone(), Some(rev.to_string())));
  }
  if remote.commits.contains_key(rev) {
    return Some((rev.to_string(), None));
  }
  None
}

fn materialize(state: &State, url: &str, id: &str, dest: &Path) -> std::io::Result<()> {
  if dest.exists() {
    fs::remove_dir_all(dest)?;
  }
  fs::create_dir_all(dest)?;
  let Some(commit) = state.remotes.get(url).and_then(|r| r.commits.get(id)) else {
    return Ok(());
  };
  for (relative, contents) in &commit.files {
    let path = dest.join(relative);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
  }
  Ok(())
}

impl Vcs for MemoryVcs {
  fn clone_repo(&self, url: &str, dest: &Path, rev: Option<&str>) -> Result<(), VcsError> {
    let mut state = self.state.borrow_mut();
    *state.clone_attempts.entry(url.to_string()).or_default() += 1;
    if let Some(remaining) = state.failing_clones.get_mut(url)
      && *remaining > 0
    {
      *remaining -= 1;
      return Err(VcsError::Network {
        url: url.to_string(),
        message: "connection reset".to_string(),
      });
    }
    if !state.remotes.contains_key(url) {
      return Err(VcsError::Command {
        args: format!("clone {url}"),
        dir: dest.to_path_buf(),
        stderr: "no such remote".to_string(),
      });
    }
    let (id, branch) = resolve(&state, url, rev.unwrap_or(DEFAULT_BRANCH)).ok_or_else(|| VcsError::RevisionNotFound {
      rev: rev.unwrap_or(DEFAULT_BRANCH).to_string(),
      dir: dest.to_path_buf(),
    })?;
    materialize(&state, url, &id, dest)?;
    state.checkouts.insert(
      dest.to_path_buf(),
      Checkout {
        url: url.to_string(),
        rev: id,
        branch,
      },
    );
    state.ops.push(VcsOp::Clone {
      url: url.to_string(),
      dest: dest.to_path_buf(),
    });
    Ok(())
  }

  fn update(&self, dir: &Path, rev: &str, _may_fetch: bool) -> Result<(), VcsError> {
    let checkout = self.checkout_of(dir)?;
    let mut state = self.state.borrow_mut();
    let (id, branch) = resolve(&state, &checkout.url, rev).ok_or_else(|| VcsError::RevisionNotFound {
      rev: rev.to_string(),
      dir: dir.to_path_buf(),
    })?;
    materialize(&state, &checkout.url, &id, dir)?;
    state.checkouts.insert(
      dir.to_path_buf(),
      Checkout {
        url: checkout.url,
        rev: id,
        branch,
      },
    );
    state.ops.push(VcsOp::Update {
      dir: dir.to_path_buf(),
      rev: rev.to_string(),
    });
    Ok(())
  }

  fn fetch(&self, dir: &Path) -> Result<(), VcsError> {
    self.checkout_of(dir).map(|_| ())
  }

  fn current_revision(&self, dir: &Path) -> Result<String, VcsError> {
    Ok(self.checkout_of(dir)?.rev)
  }

  fn current_branch(&self, dir: &Path) -> Result<Option<String>, VcsError> {
    Ok(self.checkout_of(dir)?.branch)
  }

  fn rev_parse(&self, dir: &Path, rev: &str) -> Result<Option<String>, VcsError> {
    let checkout = self.checkout_of(dir)?;
    Ok(resolve(&self.state.borrow(), &checkout.url, rev).map(|(id, _)| id))
  }

  fn is_ancestor(&self, dir: &Path, ancestor: &str, descendant: &str) -> Result<bool, VcsError> {
    let checkout = self.checkout_of(dir)?;
    let state = self.state.borrow();
    let Some(remote) = state.remotes.get(&checkout.url) else {
      return Ok(false);
    };
    let mut queue = VecDeque::from([descendant.to_string()]);
    let mut seen = BTreeSet::new();
    while let Some(id) = queue.pop_front() {
      if id == ancestor {
        return Ok(true);
      }
      if !seen.insert(id.clone()) {
        continue;
      }
      if let Some(commit) = remote.commits.get(&id) {
        queue.extend(commit.parents.iter().cloned());
      }
    }
    Ok(false)
  }

  fn is_dirty(&self, dir: &Path) -> Result<bool, VcsError> {
    Ok(self.state.borrow().dirty.contains(dir))
  }

  fn repository_root(&self, dir: &Path) -> Option<PathBuf> {
    let state = self.state.borrow();
    dir
      .ancestors()
      .find(|candidate| state.checkouts.contains_key(*candidate))
      .map(Path::to_path_buf)
  }
}
