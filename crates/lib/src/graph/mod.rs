//! The dependency graph shared by all suites of a workspace.
//!
//! Every suite's declaration contributes projects, libraries, platform libraries
//! and distributions to one [`Workspace`]. Names are unique across the whole
//! workspace. Loading binds every name reference to a live dependency, removes
//! optional dependencies that are unavailable (along with everything that needs
//! them) and rejects cycles.

pub mod walk;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::suite::{Origin, Resolution, Suite};
pub use walk::{CycleDetector, Visitor};

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("{second} in definition of {name}: '{name}' is already defined at {first}")]
  DuplicateName { name: String, first: Origin, second: Origin },

  #[error("{origin} in definition of {name}: unknown dependency '{reference}'")]
  UnknownDependency {
    name: String,
    reference: String,
    origin: Origin,
  },

  #[error(
    "{origin} in definition of {name}: project '{name}' of suite '{suite}' cannot depend on project '{target}' of suite '{target_suite}'"
  )]
  CrossSuiteProject {
    name: String,
    suite: String,
    target: String,
    target_suite: String,
    origin: Origin,
  },

  #[error("dependency cycle: {}", .cycle.join(" -> "))]
  DependencyCycle { cycle: Vec<String> },

  #[error("{origin} in definition of {name}: required library is unavailable: {reason}")]
  UnavailableLibrary { name: String, reason: String, origin: Origin },
}

/// Index of a dependency in its [`Workspace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
  Standard,
  /// Needed to build the source but not part of its output.
  BuildOnly,
  AnnotationProcessor,
  /// Left out of a distribution's layout.
  Excluded,
}

impl fmt::Display for EdgeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      EdgeKind::Standard => "standard",
      EdgeKind::BuildOnly => "build-only",
      EdgeKind::AnnotationProcessor => "annotation-processor",
      EdgeKind::Excluded => "excluded",
    })
  }
}

/// Edge kinds a walk skips unless the caller asks for them.
pub const DEFAULT_IGNORED_EDGES: &[EdgeKind] = &[EdgeKind::AnnotationProcessor, EdgeKind::Excluded, EdgeKind::BuildOnly];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepEdge {
  pub kind: EdgeKind,
  pub target: DepId,
}

#[derive(Debug, Clone)]
pub struct Dependency {
  pub id: DepId,
  pub name: String,
  pub suite: String,
  pub origin: Origin,
  /// Output directory of the owning suite.
  pub output_root: PathBuf,
  pub license: Vec<String>,
  /// Relative estimate used to start long tasks first.
  pub build_time: u32,
  /// Part of a build that names no roots.
  pub default_build: bool,
  pub edges: Vec<DepEdge>,
  pub kind: DependencyKind,
}

#[derive(Debug, Clone)]
pub enum DependencyKind {
  Project(Project),
  Library(Library),
  RuntimeLibrary(PlatformLibrary),
  ToolchainLibrary(PlatformLibrary),
  Distribution(Distribution),
}

#[derive(Debug, Clone)]
pub struct Project {
  pub dir: PathBuf,
  pub source_dirs: Vec<PathBuf>,
  pub output_dir: PathBuf,
  pub build_command: Option<String>,
  pub parallelism: usize,
  pub daemon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Library {
  pub path: PathBuf,
  pub urls: Vec<String>,
  pub sha256: Option<String>,
  pub optional: bool,
}

/// A library shipped with the runtime or toolchain rather than downloaded.
#[derive(Debug, Clone)]
pub struct PlatformLibrary {
  /// `None` when the corresponding home directory is not configured.
  pub path: Option<PathBuf>,
  pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct Distribution {
  pub output_dir: PathBuf,
}

impl Dependency {
  pub fn kind_name(&self) -> &'static str {
    match self.kind {
      DependencyKind::Project(_) => "project",
      DependencyKind::Library(_) => "library",
      DependencyKind::RuntimeLibrary(_) => "runtime-library",
      DependencyKind::ToolchainLibrary(_) => "toolchain-library",
      DependencyKind::Distribution(_) => "distribution",
    }
  }

  pub fn qualified_name(&self) -> String {
    format!("{}:{}", self.suite, self.name)
  }

  pub fn is_project(&self) -> bool {
    matches!(self.kind, DependencyKind::Project(_))
  }

  pub fn is_distribution(&self) -> bool {
    matches!(self.kind, DependencyKind::Distribution(_))
  }

  pub fn is_platform_library(&self) -> bool {
    matches!(
      self.kind,
      DependencyKind::RuntimeLibrary(_) | DependencyKind::ToolchainLibrary(_)
    )
  }

  /// Targets of edges of the given kind.
  pub fn targets(&self, kind: EdgeKind) -> impl Iterator<Item = DepId> + '_ {
    self.edges.iter().filter(move |e| e.kind == kind).map(|e| e.target)
  }
}

/// A dependency taken out of the graph, and why.
#[derive(Debug, Clone)]
pub struct Removed {
  pub id: DepId,
  pub reason: String,
}

/// Settings that affect how declarations become dependencies.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
  pub output_dir: String,
  pub runtime_home: Option<PathBuf>,
  pub toolchain_home: Option<PathBuf>,
  pub platform_provided_suites: BTreeSet<String>,
}

impl Default for WorkspaceOptions {
  fn default() -> Self {
    Self {
      output_dir: "sbuild".to_string(),
      runtime_home: None,
      toolchain_home: None,
      platform_provided_suites: BTreeSet::new(),
    }
  }
}

impl WorkspaceOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      output_dir: config.output_dir.clone(),
      runtime_home: config.runtime_home.clone(),
      toolchain_home: config.toolchain_home.clone(),
      platform_provided_suites: config.platform_provided_suites.clone(),
    }
  }
}

/// All suites of a run and the dependencies they declare.
#[derive(Debug)]
pub struct Workspace {
  primary: String,
  suites: BTreeMap<String, Suite>,
  deps: Vec<Dependency>,
  by_name: BTreeMap<String, DepId>,
  removed: BTreeMap<String, Removed>,
  output_dir: String,
}

/// A declared dependency whose references are not bound yet.
struct Unbound {
  dep: Dependency,
  refs: Vec<(EdgeKind, String)>,
  unavailable: Option<String>,
}

impl Workspace {
  /// Register the dependencies of every resolved suite and bind their references.
  pub fn load(resolution: Resolution, options: &WorkspaceOptions) -> Result<Self, GraphError> {
    let Resolution { primary, mut suites, .. } = resolution;

    let mut unbound: Vec<Unbound> = Vec::new();
    let mut by_name: BTreeMap<String, DepId> = BTreeMap::new();
    for suite in suites.values() {
      for item in declared(suite, options) {
        if let Some(existing) = by_name.get(&item.dep.name) {
          return Err(GraphError::DuplicateName {
            name: item.dep.name.clone(),
            first: unbound[existing.0].dep.origin.clone(),
            second: item.dep.origin.clone(),
          });
        }
        let id = DepId(unbound.len());
        by_name.insert(item.dep.name.clone(), id);
        unbound.push(Unbound {
          dep: Dependency { id, ..item.dep },
          ..item
        });
      }
    }

    let mut deps = Vec::with_capacity(unbound.len());
    let mut unavailable: BTreeMap<DepId, String> = BTreeMap::new();
    for item in &unbound {
      let mut dep = item.dep.clone();
      for (kind, reference) in &item.refs {
        let (suite_part, name) = match reference.split_once(':') {
          Some((suite, name)) => (Some(suite), name),
          None => (None, reference.as_str()),
        };
        if suite_part.is_some_and(|s| options.platform_provided_suites.contains(s)) {
          debug!(dependency = %dep.name, reference = %reference, "reference satisfied by the platform");
          continue;
        }
        let target = by_name
          .get(name)
          .copied()
          .filter(|id| suite_part.is_none_or(|s| unbound[id.0].dep.suite == s))
          .ok_or_else(|| GraphError::UnknownDependency {
            name: dep.name.clone(),
            reference: reference.clone(),
            origin: dep.origin.clone(),
          })?;
        let target_dep = &unbound[target.0].dep;
        if dep.is_project() && target_dep.is_project() && target_dep.suite != dep.suite {
          return Err(GraphError::CrossSuiteProject {
            name: dep.name.clone(),
            suite: dep.suite.clone(),
            target: target_dep.name.clone(),
            target_suite: target_dep.suite.clone(),
            origin: dep.origin.clone(),
          });
        }
        dep.edges.push(DepEdge { kind: *kind, target });
      }
      if let Some(reason) = &item.unavailable {
        if !is_optional(&dep) {
          return Err(GraphError::UnavailableLibrary {
            name: dep.name.clone(),
            reason: reason.clone(),
            origin: dep.origin.clone(),
          });
        }
        unavailable.insert(dep.id, reason.clone());
      }
      deps.push(dep);
    }

    let mut workspace = Workspace {
      primary,
      suites: BTreeMap::new(),
      deps,
      by_name,
      removed: BTreeMap::new(),
      output_dir: options.output_dir.clone(),
    };
    workspace.remove_unavailable(unavailable);
    workspace.check_acyclic()?;

    for suite in suites.values_mut() {
      suite.loaded = true;
    }
    workspace.suites = suites;
    info!(
      dependencies = workspace.by_name.len(),
      removed = workspace.removed.len(),
      suites = workspace.suites.len(),
      "workspace loaded"
    );
    Ok(workspace)
  }

  /// Remove unavailable dependencies, then everything that needs a removed one.
  fn remove_unavailable(&mut self, mut unavailable: BTreeMap<DepId, String>) {
    loop {
      for (id, reason) in std::mem::take(&mut unavailable) {
        let name = self.deps[id.0].name.clone();
        warn!(dependency = %name, reason = %reason, "removing unavailable dependency");
        self.by_name.remove(&name);
        self.removed.insert(name, Removed { id, reason });
      }
      let removed_ids: BTreeSet<DepId> = self.removed.values().map(|r| r.id).collect();
      for dep in &mut self.deps {
        dep
          .edges
          .retain(|e| e.kind != EdgeKind::Excluded || !removed_ids.contains(&e.target));
      }
      for dep in self.dependencies() {
        if let Some(edge) = dep.edges.iter().find(|e| removed_ids.contains(&e.target)) {
          let reason = format!("depends on removed '{}'", self.deps[edge.target.0].name);
          unavailable.insert(dep.id, reason);
        }
      }
      if unavailable.is_empty() {
        break;
      }
    }
  }

  fn check_acyclic(&self) -> Result<(), GraphError> {
    let mut detector = CycleDetector::default();
    self.walk(None, &[EdgeKind::Excluded], &mut detector)
  }

  pub fn primary(&self) -> &str {
    &self.primary
  }

  pub fn suites(&self) -> &BTreeMap<String, Suite> {
    &self.suites
  }

  pub fn suite(&self, name: &str) -> Option<&Suite> {
    self.suites.get(name)
  }

  /// Per-suite output directory name.
  pub fn output_dir(&self) -> &str {
    &self.output_dir
  }

  pub fn get(&self, id: DepId) -> &Dependency {
    &self.deps[id.0]
  }

  /// Look up a live dependency by `name` or `suite:name`.
  pub fn lookup(&self, reference: &str) -> Option<&Dependency> {
    let (suite, name) = match reference.split_once(':') {
      Some((suite, name)) => (Some(suite), name),
      None => (None, reference),
    };
    self
      .by_name
      .get(name)
      .map(|id| self.get(*id))
      .filter(|dep| suite.is_none_or(|s| dep.suite == s))
  }

  /// Live dependencies in registration order.
  pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
    self.deps.iter().filter(|dep| self.is_live(dep.id))
  }

  pub fn is_live(&self, id: DepId) -> bool {
    self.by_name.get(&self.deps[id.0].name) == Some(&id)
  }

  pub fn removed(&self) -> &BTreeMap<String, Removed> {
    &self.removed
  }

  /// Why `name` was removed, if it was.
  pub fn removal_reason(&self, name: &str) -> Option<&str> {
    self.removed.get(name).map(|r| r.reason.as_str())
  }

  /// Roots of a build that names none: every live dependency not opted out.
  pub fn default_roots(&self) -> Vec<DepId> {
    self
      .dependencies()
      .filter(|dep| dep.default_build)
      .map(|dep| dep.id)
      .collect()
  }
}

fn is_optional(dep: &Dependency) -> bool {
  match &dep.kind {
    DependencyKind::Library(lib) => lib.optional,
    DependencyKind::RuntimeLibrary(lib) | DependencyKind::ToolchainLibrary(lib) => lib.optional,
    _ => false,
  }
}

/// Everything a suite declares, with unbound references and availability.
fn declared(suite: &Suite, options: &WorkspaceOptions) -> Vec<Unbound> {
  let decl = &suite.decl;
  let output_root = suite.output_root(&options.output_dir);
  let mut items = Vec::new();
  let new_dep = |name: &str, section: &str, kind: DependencyKind| Dependency {
    id: DepId(0),
    name: name.to_string(),
    suite: suite.name.clone(),
    origin: decl.origin(section, name),
    output_root: output_root.clone(),
    license: Vec::new(),
    build_time: 1,
    default_build: true,
    edges: Vec::new(),
    kind,
  };

  for (name, project) in &decl.projects {
    let dir = suite.dir.join(project.dir.as_deref().unwrap_or(name));
    let kind = DependencyKind::Project(Project {
      source_dirs: project.source_dirs.iter().map(|s| dir.join(s)).collect(),
      output_dir: output_root.join(name),
      dir,
      build_command: project.build_command.clone(),
      parallelism: project.parallelism.unwrap_or(1).max(1),
      daemon: project.daemon.clone(),
    });
    let mut refs = edges_of(EdgeKind::Standard, &project.dependencies);
    refs.extend(edges_of(EdgeKind::BuildOnly, &project.build_dependencies));
    refs.extend(edges_of(EdgeKind::AnnotationProcessor, &project.annotation_processors));
    items.push(Unbound {
      dep: Dependency {
        license: project.license.clone(),
        build_time: project.build_time.unwrap_or(1),
        default_build: project.build,
        ..new_dep(name, "projects", kind)
      },
      refs,
      unavailable: None,
    });
  }

  for (name, library) in &decl.libraries {
    let path = suite.dir.join(&library.path);
    let unavailable =
      (!path.exists() && library.urls.is_empty()).then(|| format!("'{}' does not exist and has no download URL", path.display()));
    let kind = DependencyKind::Library(Library {
      path,
      urls: library.urls.clone(),
      sha256: library.sha256.clone(),
      optional: library.optional,
    });
    items.push(Unbound {
      dep: Dependency {
        license: library.license.clone(),
        ..new_dep(name, "libraries", kind)
      },
      refs: edges_of(EdgeKind::Standard, &library.dependencies),
      unavailable,
    });
  }

  let platform = [
    ("runtime_libraries", &decl.runtime_libraries, &options.runtime_home, "runtime"),
    ("toolchain_libraries", &decl.toolchain_libraries, &options.toolchain_home, "toolchain"),
  ];
  for (section, libraries, home, label) in platform {
    for (name, library) in libraries {
      let path = home.as_ref().map(|home| home.join(&library.path));
      let unavailable = match &path {
        None => Some(format!("no {label} home configured")),
        Some(path) if !path.exists() => Some(format!("'{}' is not part of the {label}", path.display())),
        Some(_) => None,
      };
      let lib = PlatformLibrary {
        path,
        optional: library.optional,
      };
      let kind = if label == "runtime" {
        DependencyKind::RuntimeLibrary(lib)
      } else {
        DependencyKind::ToolchainLibrary(lib)
      };
      items.push(Unbound {
        dep: new_dep(name, section, kind),
        refs: edges_of(EdgeKind::Standard, &library.dependencies),
        unavailable,
      });
    }
  }

  for (name, dist) in &decl.distributions {
    let kind = DependencyKind::Distribution(Distribution {
      output_dir: output_root.join("dists").join(name),
    });
    let mut refs = edges_of(EdgeKind::Standard, &dist.dependencies);
    refs.extend(edges_of(EdgeKind::BuildOnly, &dist.build_dependencies));
    refs.extend(edges_of(EdgeKind::Excluded, &dist.exclude));
    items.push(Unbound {
      dep: Dependency {
        license: dist.license.clone(),
        ..new_dep(name, "distributions", kind)
      },
      refs,
      unavailable: None,
    });
  }
  items
}

fn edges_of(kind: EdgeKind, names: &[String]) -> Vec<(EdgeKind, String)> {
  names.iter().map(|n| (kind, n.clone())).collect()
}
