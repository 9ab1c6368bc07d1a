//! Suite declaration files.
//!
//! A declaration is a `suite.toml`:
//!
//! ```toml
//! name = "compiler"
//! version_conflict_resolution = "latest"
//!
//! [[imports]]
//! name = "sdk"
//! version = "4f2a9c1"
//! urls = [{ url = "https://example.com/org/sdk.git" }]
//!
//! [projects.compiler-core]
//! source_dirs = ["src"]
//! dependencies = ["sdk:sdk-api", "GUAVA"]
//! build_command = "make -C native OUT=$out"
//!
//! [libraries.GUAVA]
//! path = "lib/guava.jar"
//! urls = ["https://repo.example.com/guava-33.jar"]
//! sha256 = "..."
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::{ConflictPolicy, RequestedVersion, SourceKind, SourceLocation, SuiteImport};
use crate::consts::DECL_FILENAME;
use crate::vcs::VcsKind;

#[derive(Debug, Error)]
pub enum DeclError {
  #[error("no suite declaration at '{0}'")]
  Missing(PathBuf),

  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("{origin}: {message}")]
  Invalid { origin: Origin, message: String },
}

/// Where something was declared: the declaration file and the line of its table header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
  pub path: PathBuf,
  pub line: usize,
}

impl fmt::Display for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "File \"{}\", line {}", self.path.display(), self.line)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteDecl {
  pub name: String,
  #[serde(default)]
  pub version_conflict_resolution: Option<ConflictPolicy>,
  #[serde(default)]
  pub imports: Vec<ImportDecl>,
  #[serde(default)]
  pub projects: BTreeMap<String, ProjectDecl>,
  #[serde(default)]
  pub libraries: BTreeMap<String, LibraryDecl>,
  #[serde(default)]
  pub runtime_libraries: BTreeMap<String, PlatformLibraryDecl>,
  #[serde(default)]
  pub toolchain_libraries: BTreeMap<String, PlatformLibraryDecl>,
  #[serde(default)]
  pub distributions: BTreeMap<String, DistributionDecl>,

  /// Declaration file this was read from.
  #[serde(skip)]
  pub path: PathBuf,
  /// Header line of each named table, keyed by `<section>.<name>`.
  #[serde(skip)]
  pub lines: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportDecl {
  pub name: String,
  pub version: Option<String>,
  pub version_from: Option<String>,
  #[serde(default)]
  pub subdir: bool,
  #[serde(default)]
  pub urls: Vec<UrlDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlDecl {
  pub url: String,
  #[serde(default)]
  pub kind: SourceKind,
  #[serde(default)]
  pub vcs: VcsKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDecl {
  /// Source roots relative to the project directory.
  #[serde(default = "default_source_dirs")]
  pub source_dirs: Vec<String>,
  /// Project directory relative to the suite, defaulting to the project's name.
  pub dir: Option<String>,
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub build_dependencies: Vec<String>,
  #[serde(default)]
  pub annotation_processors: Vec<String>,
  pub build_command: Option<String>,
  pub parallelism: Option<usize>,
  pub build_time: Option<u32>,
  /// Command starting a helper process shared by all tasks naming the same command.
  pub daemon: Option<String>,
  #[serde(default)]
  pub license: Vec<String>,
  /// Whether the project is part of a default build. Opted-out projects are still
  /// built when something that is built depends on them.
  #[serde(default = "default_true")]
  pub build: bool,
}

fn default_source_dirs() -> Vec<String> {
  vec!["src".to_string()]
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryDecl {
  /// Local file, relative to the suite directory.
  pub path: String,
  #[serde(default)]
  pub urls: Vec<String>,
  pub sha256: Option<String>,
  #[serde(default)]
  pub optional: bool,
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub license: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformLibraryDecl {
  /// File relative to the runtime or toolchain home.
  pub path: String,
  #[serde(default)]
  pub optional: bool,
  #[serde(default)]
  pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionDecl {
  #[serde(default)]
  pub dependencies: Vec<String>,
  /// Dependencies left out of the layout, along with everything only they pull in.
  #[serde(default)]
  pub exclude: Vec<String>,
  #[serde(default)]
  pub build_dependencies: Vec<String>,
  #[serde(default)]
  pub license: Vec<String>,
}

impl SuiteDecl {
  /// Parse a declaration, recording table header lines for error reporting.
  pub fn parse(content: &str, path: &Path) -> Result<Self, DeclError> {
    let mut decl: SuiteDecl = toml::from_str(content).map_err(|source| DeclError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    decl.path = path.to_path_buf();
    decl.lines = scan_table_headers(content);
    Ok(decl)
  }

  /// Origin of `[<section>.<name>]`, or of the file itself when the header is not found.
  pub fn origin(&self, section: &str, name: &str) -> Origin {
    let line = self.lines.get(&format!("{section}.{name}")).copied().unwrap_or(1);
    Origin {
      path: self.path.clone(),
      line,
    }
  }

  /// Convert declared imports into resolver edges.
  pub fn imports(&self) -> Result<Vec<SuiteImport>, DeclError> {
    self
      .imports
      .iter()
      .map(|import| {
        let version = match (&import.version, &import.version_from) {
          (Some(_), Some(_)) => {
            return Err(DeclError::Invalid {
              origin: self.origin("imports", &import.name),
              message: format!("import of '{}' sets both version and version_from", import.name),
            });
          }
          (Some(rev), None) => RequestedVersion::Revision(rev.clone()),
          (None, Some(from)) => RequestedVersion::From(from.clone()),
          (None, None) => RequestedVersion::Unspecified,
        };
        Ok(SuiteImport {
          target_name: import.name.clone(),
          version,
          sources: import
            .urls
            .iter()
            .map(|u| SourceLocation {
              url: u.url.clone(),
              kind: u.kind,
              vcs: u.vcs,
            })
            .collect(),
          is_dynamic: false,
          is_subdir: import.subdir,
        })
      })
      .collect()
  }
}

/// Map `section.name` to the 1-based line of its `[section.name]` header.
///
/// `[[imports]]` entries are keyed by the `name = "..."` line that follows them.
fn scan_table_headers(content: &str) -> BTreeMap<String, usize> {
  let mut lines = BTreeMap::new();
  let mut pending_import: Option<usize> = None;
  for (idx, raw) in content.lines().enumerate() {
    let line = raw.trim();
    let number = idx + 1;
    if line == "[[imports]]" {
      pending_import = Some(number);
      continue;
    }
    if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
      pending_import = None;
      if let Some((section, name)) = header.split_once('.') {
        let name = name.trim().trim_matches('"');
        lines.entry(format!("{}.{}", section.trim(), name)).or_insert(number);
      }
      continue;
    }
    if let Some(start) = pending_import
      && let Some((key, value)) = line.split_once('=')
      && key.trim() == "name"
    {
      let name = value.trim().trim_matches('"');
      lines.entry(format!("imports.{name}")).or_insert(start);
      pending_import = None;
    }
  }
  lines
}

/// Source of suite declarations.
pub trait DeclarationLoader {
  fn load(&self, suite_dir: &Path) -> Result<SuiteDecl, DeclError>;

  fn exists(&self, suite_dir: &Path) -> bool;
}

/// Reads `suite.toml` from the suite directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlLoader;

impl DeclarationLoader for TomlLoader {
  fn load(&self, suite_dir: &Path) -> Result<SuiteDecl, DeclError> {
    let path = suite_dir.join(DECL_FILENAME);
    if !path.exists() {
      return Err(DeclError::Missing(path));
    }
    let content = std::fs::read_to_string(&path).map_err(|source| DeclError::Read {
      path: path.clone(),
      source,
    })?;
    SuiteDecl::parse(&content, &path)
  }

  fn exists(&self, suite_dir: &Path) -> bool {
    suite_dir.join(DECL_FILENAME).is_file()
  }
}
