//! Suites and the imports between them.
//!
//! A suite is a directory with a `suite.toml` declaration, usually living in a
//! version-controlled repository (possibly alongside other suites). Suites import
//! other suites at specific revisions; [`resolve`] turns the import graph rooted at
//! the primary suite into one consistent set of working copies.

pub mod decl;
pub mod resolve;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use decl::{DeclError, DeclarationLoader, Origin, SuiteDecl, TomlLoader};
pub use resolve::{Resolution, ResolutionStats, ResolveError, ResolveOptions, resolve_suites};

use crate::vcs::VcsKind;

/// How to proceed when two imports ask for different revisions of one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
  /// Refuse and report the conflict.
  #[default]
  None,
  /// Keep the revision already checked out and warn.
  Ignore,
  /// Defer to the policy declared by the importing suite.
  Suite,
  /// Move to whichever revision is later in history.
  Latest,
  /// Like `Latest`, and dynamic imports may also move repositories.
  LatestAll,
}

impl ConflictPolicy {
  pub fn as_str(&self) -> &'static str {
    match self {
      ConflictPolicy::None => "none",
      ConflictPolicy::Ignore => "ignore",
      ConflictPolicy::Suite => "suite",
      ConflictPolicy::Latest => "latest",
      ConflictPolicy::LatestAll => "latest_all",
    }
  }

  pub fn prefers_latest(&self) -> bool {
    matches!(self, ConflictPolicy::Latest | ConflictPolicy::LatestAll)
  }
}

impl fmt::Display for ConflictPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ConflictPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" => Ok(ConflictPolicy::None),
      "ignore" => Ok(ConflictPolicy::Ignore),
      "suite" => Ok(ConflictPolicy::Suite),
      "latest" => Ok(ConflictPolicy::Latest),
      "latest_all" | "latest-all" => Ok(ConflictPolicy::LatestAll),
      other => Err(format!(
        "unknown conflict policy '{other}' (expected none, ignore, suite, latest or latest_all)"
      )),
    }
  }
}

/// Revision an import asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedVersion {
  Revision(String),
  /// Use whatever revision the named suite imports the target at.
  From(String),
  /// Any revision; never conflicts.
  Unspecified,
}

/// Whether a source location hosts sources or prebuilt binaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  #[default]
  Source,
  Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
  pub url: String,
  pub kind: SourceKind,
  pub vcs: VcsKind,
}

/// A directed import edge as declared by the importing suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteImport {
  pub target_name: String,
  pub version: RequestedVersion,
  /// Candidate locations, tried in order.
  pub sources: Vec<SourceLocation>,
  /// Added by the user for this invocation rather than declared.
  pub is_dynamic: bool,
  /// The target lives in a subdirectory named after it inside its repository.
  pub is_subdir: bool,
}

impl SuiteImport {
  pub fn revision(&self) -> Option<&str> {
    match &self.version {
      RequestedVersion::Revision(rev) => Some(rev),
      _ => None,
    }
  }

  /// Directory name a clone of this import's repository gets under the suites root.
  pub fn repository_name(&self) -> Option<String> {
    let url = &self.sources.first()?.url;
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
  }
}

/// A discovered suite.
#[derive(Debug, Clone)]
pub struct Suite {
  pub name: String,
  pub dir: PathBuf,
  /// Root of the working copy the suite lives in, if it is under version control.
  pub repo_dir: Option<PathBuf>,
  pub is_primary: bool,
  pub imports: Vec<SuiteImport>,
  /// Set once the suite's dependencies have been registered in the graph.
  pub loaded: bool,
  pub policy: Option<ConflictPolicy>,
  pub decl: SuiteDecl,
}

impl Suite {
  pub fn from_decl(decl: SuiteDecl, dir: PathBuf, repo_dir: Option<PathBuf>, is_primary: bool) -> Result<Self, DeclError> {
    let imports = decl.imports()?;
    Ok(Self {
      name: decl.name.clone(),
      dir,
      repo_dir,
      is_primary,
      imports,
      loaded: false,
      policy: decl.version_conflict_resolution,
      decl,
    })
  }

  /// Directory this suite's build outputs go to.
  pub fn output_root(&self, output_dir: &str) -> PathBuf {
    self.dir.join(output_dir)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn import_from(url: &str) -> SuiteImport {
    SuiteImport {
      target_name: "x".to_string(),
      version: RequestedVersion::Unspecified,
      sources: vec![SourceLocation {
        url: url.to_string(),
        kind: SourceKind::Source,
        vcs: VcsKind::Git,
      }],
      is_dynamic: false,
      is_subdir: false,
    }
  }

  #[test]
  fn repository_name_strips_git_suffix() {
    assert_eq!(
      import_from("https://example.com/org/compiler.git").repository_name().as_deref(),
      Some("compiler")
    );
    assert_eq!(import_from("git@example.com:org/tools/").repository_name().as_deref(), Some("tools"));
    assert_eq!(import_from("file:///srv/repos/sdk").repository_name().as_deref(), Some("sdk"));
  }

  #[test]
  fn policy_parses_both_spellings() {
    assert_eq!("latest_all".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::LatestAll);
    assert_eq!("latest-all".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::LatestAll);
    assert!("newest".parse::<ConflictPolicy>().is_err());
    assert_eq!(ConflictPolicy::LatestAll.to_string(), "latest_all");
  }
}
