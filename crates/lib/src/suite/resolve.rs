//! Transitive suite discovery.
//!
//! Starting from the primary suite, import edges are processed from a worklist.
//! Each target suite is located on disk or cloned, and every repository is pinned
//! to exactly one revision: the first versioned import to reach it decides, and
//! later imports asking for something else go through the conflict policy.
//!
//! When the `latest` policies move a repository, every suite already discovered in
//! it is forgotten and the edges pointing at those suites are queued again, so
//! imports and declarations are re-read at the new revision.
//!
//! Any error undoes the run's effect on disk: fresh clones are deleted and moved
//! working copies go back to the branch or revision they started at.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::decl::{DeclError, DeclarationLoader};
use super::{ConflictPolicy, RequestedVersion, SourceKind, Suite, SuiteImport};
use crate::config::Config;
use crate::vcs::{Vcs, VcsError, clone_with_retries, same_revision};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("import cycle: {}", .cycle.join(" -> "))]
  ImportCycle { cycle: Vec<String> },

  #[error(
    "version conflict on suite '{suite}' in '{repo}': '{existing_importer}' imports revision {existing_version} but '{importer}' imports revision {version}"
  )]
  VersionConflict {
    suite: String,
    repo: PathBuf,
    existing_importer: String,
    existing_version: String,
    importer: String,
    version: String,
  },

  #[error("revisions {first} and {second} of '{repo}' have diverged")]
  DivergentRevisions { repo: PathBuf, first: String, second: String },

  #[error("suite '{name}' imported by '{importer}' not found (looked in {})", display_paths(.searched))]
  SuiteNotFound {
    name: String,
    importer: String,
    searched: Vec<PathBuf>,
  },

  #[error("'{path}' declares suite '{found}' but '{importer}' imports it as '{expected}'")]
  NameMismatch {
    expected: String,
    found: String,
    importer: String,
    path: PathBuf,
  },

  #[error("'{importer}' takes the version of '{target}' from '{source_suite}', which {reason}")]
  UnresolvedVersionFrom {
    target: String,
    importer: String,
    source_suite: String,
    reason: String,
  },

  #[error("refusing to update '{repo}': working copy has uncommitted changes")]
  DirtyWorkingCopy { repo: PathBuf },

  #[error("failed to clone suite '{name}': {source}")]
  Clone {
    name: String,
    #[source]
    source: VcsError,
  },

  #[error(transparent)]
  Vcs(#[from] VcsError),

  #[error(transparent)]
  Decl(#[from] DeclError),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| p.display().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

/// Inputs to one resolution run.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
  pub policy: ConflictPolicy,
  /// Allow fetching revisions that are not present locally.
  pub fetch: bool,
  pub clone_retries: u32,
  /// Delay before the first clone retry; doubled for each further attempt.
  pub retry_backoff: Duration,
  /// Where new repositories are cloned. Defaults to the parent of the primary repository.
  pub suites_root: Option<PathBuf>,
  pub platform_provided_suites: BTreeSet<String>,
  /// Extra imports of the primary suite, as `name` or `name@revision`.
  pub dynamic_imports: Vec<String>,
  /// When a `version_from` delegation is registered after its target was already
  /// pinned by someone else, move the target to the delegation source's revision.
  pub retroactive_version_from: bool,
}

impl Default for ResolveOptions {
  fn default() -> Self {
    Self {
      policy: ConflictPolicy::None,
      fetch: true,
      clone_retries: 3,
      retry_backoff: Duration::from_secs(1),
      suites_root: None,
      platform_provided_suites: BTreeSet::new(),
      dynamic_imports: Vec::new(),
      retroactive_version_from: false,
    }
  }
}

impl ResolveOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      policy: config.conflict_policy,
      fetch: config.fetch,
      clone_retries: config.clone_retries,
      suites_root: config.suites_root.clone(),
      platform_provided_suites: config.platform_provided_suites.clone(),
      ..Self::default()
    }
  }
}

/// Counters describing what a resolution run did to the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
  pub clones: usize,
  pub updates: usize,
  pub forgets: usize,
}

/// The consistent set of suites reachable from the primary suite.
#[derive(Debug)]
pub struct Resolution {
  pub primary: String,
  pub suites: BTreeMap<String, Suite>,
  pub stats: ResolutionStats,
}

impl Resolution {
  pub fn primary_suite(&self) -> Option<&Suite> {
    self.suites.get(&self.primary)
  }
}

/// Discover every suite reachable from the suite in `primary_dir`.
pub fn resolve_suites(
  primary_dir: &Path,
  vcs: &dyn Vcs,
  loader: &dyn DeclarationLoader,
  options: &ResolveOptions,
) -> Result<Resolution, ResolveError> {
  let mut resolver = Resolver::new(vcs, loader, options);
  match resolver.run(primary_dir) {
    Ok(()) => {
      let resolution = resolver.finish();
      info!(
        suites = resolution.suites.len(),
        clones = resolution.stats.clones,
        updates = resolution.stats.updates,
        forgets = resolution.stats.forgets,
        "suite resolution complete"
      );
      Ok(resolution)
    }
    Err(e) => {
      error!(error = %e, "suite resolution failed, rolling back workspace changes");
      resolver.rollback();
      Err(e)
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscoveryState {
  /// An edge to the suite is queued.
  Pending,
  Discovered,
  /// Evicted after its repository moved; waits for an edge to re-discover it.
  Forgotten,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportEdge {
  importer: String,
  import: SuiteImport,
}

/// The revision a repository is held at for the rest of the run, and who asked for it.
#[derive(Debug, Clone)]
struct Pin {
  requested_by: String,
  rev: String,
  dynamic: bool,
}

/// Working-copy state before this run touched a repository.
#[derive(Debug, Clone)]
enum OriginalVersion {
  Cloned,
  At { rev: String, branch: Option<String> },
}

enum Location {
  Present { suite_dir: PathBuf, repo_dir: Option<PathBuf> },
  Missing { suite_dir: PathBuf, repo_dir: PathBuf },
}

struct Resolver<'a> {
  vcs: &'a dyn Vcs,
  loader: &'a dyn DeclarationLoader,
  options: &'a ResolveOptions,
  root: PathBuf,
  primary: String,
  suites: BTreeMap<String, Suite>,
  states: BTreeMap<String, DiscoveryState>,
  worklist: VecDeque<ImportEdge>,
  /// Direct importers of each suite.
  importers: BTreeMap<String, BTreeSet<String>>,
  /// Every edge processed so far, by target, for re-discovery after a forget.
  incoming: BTreeMap<String, Vec<ImportEdge>>,
  collocated: BTreeMap<PathBuf, BTreeSet<String>>,
  pins: BTreeMap<PathBuf, Pin>,
  originals: BTreeMap<PathBuf, OriginalVersion>,
  /// Delegated suite -> suite whose import decides its version.
  delegations: BTreeMap<String, String>,
  pending_delegations: Vec<ImportEdge>,
  stats: ResolutionStats,
}

impl<'a> Resolver<'a> {
  fn new(vcs: &'a dyn Vcs, loader: &'a dyn DeclarationLoader, options: &'a ResolveOptions) -> Self {
    Self {
      vcs,
      loader,
      options,
      root: PathBuf::new(),
      primary: String::new(),
      suites: BTreeMap::new(),
      states: BTreeMap::new(),
      worklist: VecDeque::new(),
      importers: BTreeMap::new(),
      incoming: BTreeMap::new(),
      collocated: BTreeMap::new(),
      pins: BTreeMap::new(),
      originals: BTreeMap::new(),
      delegations: BTreeMap::new(),
      pending_delegations: Vec::new(),
      stats: ResolutionStats::default(),
    }
  }

  fn run(&mut self, primary_dir: &Path) -> Result<(), ResolveError> {
    self.discover_primary(primary_dir)?;
    while let Some(edge) = self.worklist.pop_front() {
      self.process(edge)?;
    }
    self.check_delegations()
  }

  fn finish(self) -> Resolution {
    Resolution {
      primary: self.primary,
      suites: self.suites,
      stats: self.stats,
    }
  }

  fn is_discovered(&self, name: &str) -> bool {
    self.states.get(name) == Some(&DiscoveryState::Discovered)
  }

  fn discover_primary(&mut self, primary_dir: &Path) -> Result<(), ResolveError> {
    let dir = dunce::canonicalize(primary_dir)?;
    let decl = self.loader.load(&dir)?;
    let repo_dir = self.vcs.repository_root(&dir);
    self.root = match &self.options.suites_root {
      Some(root) => root.clone(),
      None => {
        let base = repo_dir.as_deref().unwrap_or(&dir);
        base.parent().map(Path::to_path_buf).unwrap_or_else(|| base.to_path_buf())
      }
    };

    let mut suite = Suite::from_decl(decl, dir, repo_dir.clone(), true)?;
    for spec in &self.options.dynamic_imports {
      let (name, version) = match spec.split_once('@') {
        Some((name, rev)) => (name, RequestedVersion::Revision(rev.to_string())),
        None => (spec.as_str(), RequestedVersion::Unspecified),
      };
      if name == suite.name || suite.imports.iter().any(|i| i.target_name == name) {
        debug!(suite = name, "dynamic import already declared");
        continue;
      }
      suite.imports.push(SuiteImport {
        target_name: name.to_string(),
        version,
        sources: Vec::new(),
        is_dynamic: true,
        is_subdir: false,
      });
    }

    if let Some(repo) = &repo_dir {
      let rev = self.vcs.current_revision(repo)?;
      self.pins.insert(
        repo.clone(),
        Pin {
          requested_by: suite.name.clone(),
          rev,
          dynamic: false,
        },
      );
    }
    info!(suite = %suite.name, dir = %suite.dir.display(), root = %self.root.display(), "resolving imports of primary suite");
    self.primary = suite.name.clone();
    self.register(suite);
    Ok(())
  }

  /// Add a discovered suite to the working set and queue its imports.
  fn register(&mut self, suite: Suite) {
    let name = suite.name.clone();
    if let Some(repo) = &suite.repo_dir {
      self.collocated.entry(repo.clone()).or_default().insert(name.clone());
    }
    for import in &suite.imports {
      if self.options.platform_provided_suites.contains(&import.target_name) {
        debug!(suite = %name, import = %import.target_name, "skipping import provided by the platform");
        continue;
      }
      if !self.states.contains_key(&import.target_name) {
        self.states.insert(import.target_name.clone(), DiscoveryState::Pending);
      }
      self.worklist.push_back(ImportEdge {
        importer: name.clone(),
        import: import.clone(),
      });
    }
    self.states.insert(name.clone(), DiscoveryState::Discovered);
    self.suites.insert(name, suite);
  }

  fn process(&mut self, edge: ImportEdge) -> Result<(), ResolveError> {
    if !self.is_discovered(&edge.importer) {
      debug!(importer = %edge.importer, target = %edge.import.target_name, "dropping edge from forgotten suite");
      return Ok(());
    }
    let target = edge.import.target_name.clone();
    self.check_cycle(&edge.importer, &target)?;
    self.record_edge(&edge);

    if let RequestedVersion::From(source) = &edge.import.version {
      let source = source.clone();
      self.register_delegation(&target, &source)?;
      if !self.is_discovered(&target) {
        self.pending_delegations.push(edge);
        self.retry_delegations()?;
      }
      return Ok(());
    }

    if self.is_discovered(&target) {
      return self.check_conflict(&edge);
    }
    self.discover(&edge)
  }

  /// Fail if `target` is `importer` itself or one of its ancestors.
  fn check_cycle(&self, importer: &str, target: &str) -> Result<(), ResolveError> {
    if importer == target {
      return Err(ResolveError::ImportCycle {
        cycle: vec![target.to_string(), target.to_string()],
      });
    }
    // Walk up the importer relation, remembering which suite each ancestor imports
    // on the way down, so the cycle can be reported in import order.
    let mut imports_toward: BTreeMap<String, String> = BTreeMap::new();
    let mut seen = BTreeSet::from([importer.to_string()]);
    let mut queue = VecDeque::from([importer.to_string()]);
    while let Some(current) = queue.pop_front() {
      for up in self.importers.get(&current).into_iter().flatten() {
        if !seen.insert(up.clone()) {
          continue;
        }
        imports_toward.insert(up.clone(), current.clone());
        if up == target {
          let mut cycle = vec![target.to_string()];
          let mut at = target;
          while let Some(next) = imports_toward.get(at) {
            cycle.push(next.clone());
            at = next;
          }
          cycle.push(target.to_string());
          return Err(ResolveError::ImportCycle { cycle });
        }
        queue.push_back(up.clone());
      }
    }
    Ok(())
  }

  fn record_edge(&mut self, edge: &ImportEdge) {
    let target = &edge.import.target_name;
    self
      .importers
      .entry(target.clone())
      .or_default()
      .insert(edge.importer.clone());
    let incoming = self.incoming.entry(target.clone()).or_default();
    if !incoming.contains(edge) {
      incoming.push(edge.clone());
    }
  }

  fn ancestors_of(&self, name: &str) -> BTreeSet<String> {
    let mut ancestors = BTreeSet::new();
    let mut queue = VecDeque::from([name.to_string()]);
    while let Some(current) = queue.pop_front() {
      for up in self.importers.get(&current).into_iter().flatten() {
        if ancestors.insert(up.clone()) {
          queue.push_back(up.clone());
        }
      }
    }
    ancestors
  }

  fn register_delegation(&mut self, target: &str, source: &str) -> Result<(), ResolveError> {
    match self.delegations.get(target) {
      Some(existing) if existing == source => Ok(()),
      Some(existing) => {
        warn!(suite = target, kept = %existing, dropped = source, "conflicting version_from ignored");
        Ok(())
      }
      None => {
        debug!(suite = target, source, "version delegated");
        self.delegations.insert(target.to_string(), source.to_string());
        if self.options.retroactive_version_from {
          self.enforce_delegation(target, source)?;
        }
        Ok(())
      }
    }
  }

  /// Move an already pinned delegated suite to the revision its delegation source imports.
  fn enforce_delegation(&mut self, target: &str, source: &str) -> Result<(), ResolveError> {
    let Some(edge) = self
      .incoming
      .get(target)
      .and_then(|edges| edges.iter().find(|e| e.importer == source))
      .cloned()
    else {
      return Ok(());
    };
    let Some(requested) = edge.import.revision() else {
      return Ok(());
    };
    let Some(repo) = self.suites.get(target).and_then(|s| s.repo_dir.clone()) else {
      return Ok(());
    };
    let Some(pin) = self.pins.get(&repo).cloned() else {
      return Ok(());
    };
    let wanted = self.resolve_rev(&repo, requested)?;
    if same_revision(&pin.rev, &wanted) {
      return Ok(());
    }
    info!(suite = target, source, rev = requested, "applying delegated version to pinned suite");
    self.move_repository(&repo, &edge)
  }

  /// Whether a `version_from` delegation takes version authority away from `importer`.
  fn suppressed_by_delegation(&self, importer: &str, target: &str) -> bool {
    self.delegations.iter().any(|(delegated, source)| {
      let points_at_delegated = target == delegated || self.ancestors_of(delegated).contains(target);
      points_at_delegated && importer != source && !self.ancestors_of(source).contains(importer)
    })
  }

  fn retry_delegations(&mut self) -> Result<(), ResolveError> {
    let pending = std::mem::take(&mut self.pending_delegations);
    for edge in pending {
      let RequestedVersion::From(source) = &edge.import.version else {
        continue;
      };
      let target = &edge.import.target_name;
      if self.is_discovered(target) {
        continue;
      }
      if self.is_discovered(source) {
        let source_imports_target = self
          .suites
          .get(source)
          .is_some_and(|s| s.imports.iter().any(|i| &i.target_name == target));
        if !source_imports_target {
          return Err(ResolveError::UnresolvedVersionFrom {
            target: target.clone(),
            importer: edge.importer.clone(),
            source_suite: source.clone(),
            reason: "does not import it".to_string(),
          });
        }
      }
      self.pending_delegations.push(edge);
    }
    Ok(())
  }

  fn check_delegations(&self) -> Result<(), ResolveError> {
    for edge in &self.pending_delegations {
      let RequestedVersion::From(source) = &edge.import.version else {
        continue;
      };
      if self.is_discovered(&edge.import.target_name) {
        continue;
      }
      let reason = if self.is_discovered(source) {
        "does not import it"
      } else {
        "is never imported"
      };
      return Err(ResolveError::UnresolvedVersionFrom {
        target: edge.import.target_name.clone(),
        importer: edge.importer.clone(),
        source_suite: source.clone(),
        reason: reason.to_string(),
      });
    }
    Ok(())
  }

  fn check_conflict(&mut self, edge: &ImportEdge) -> Result<(), ResolveError> {
    let target = &edge.import.target_name;
    let Some(repo) = self.suites.get(target).and_then(|s| s.repo_dir.clone()) else {
      return Ok(());
    };
    let Some(requested) = edge.import.revision() else {
      return Ok(());
    };
    if self.suppressed_by_delegation(&edge.importer, target) {
      debug!(importer = %edge.importer, suite = %target, "version decided by delegation, skipping conflict check");
      return Ok(());
    }
    self.reconcile(&repo, edge, requested)
  }

  fn resolve_rev(&self, repo: &Path, requested: &str) -> Result<String, ResolveError> {
    if let Some(rev) = self.vcs.rev_parse(repo, requested)? {
      return Ok(rev);
    }
    if self.options.fetch {
      self.vcs.fetch(repo)?;
      if let Some(rev) = self.vcs.rev_parse(repo, requested)? {
        return Ok(rev);
      }
    }
    Err(ResolveError::Vcs(VcsError::RevisionNotFound {
      rev: requested.to_string(),
      dir: repo.to_path_buf(),
    }))
  }

  /// Make `repo` satisfy `edge`'s requested revision, or apply the conflict policy.
  fn reconcile(&mut self, repo: &Path, edge: &ImportEdge, requested: &str) -> Result<(), ResolveError> {
    let wanted = self.resolve_rev(repo, requested)?;
    let Some(pin) = self.pins.get(repo).cloned() else {
      return self.pin_repository(repo, edge, &wanted);
    };
    if same_revision(&pin.rev, &wanted) {
      return Ok(());
    }

    let policy = self.policy_for(&edge.importer);
    if edge.import.is_dynamic && !pin.dynamic && policy != ConflictPolicy::LatestAll {
      debug!(suite = %edge.import.target_name, "dynamic import does not override a declared revision");
      return Ok(());
    }
    match policy {
      ConflictPolicy::Ignore => {
        warn!(
          suite = %edge.import.target_name,
          kept = %pin.rev,
          kept_for = %pin.requested_by,
          ignored = requested,
          importer = %edge.importer,
          "version conflict ignored, keeping current checkout"
        );
        Ok(())
      }
      ConflictPolicy::Latest | ConflictPolicy::LatestAll => self.keep_latest(repo, edge, &pin, requested, &wanted),
      ConflictPolicy::None | ConflictPolicy::Suite => Err(conflict(repo, edge, &pin, requested)),
    }
  }

  fn policy_for(&self, importer: &str) -> ConflictPolicy {
    match self.options.policy {
      ConflictPolicy::Suite => self
        .suites
        .get(importer)
        .and_then(|s| s.policy)
        .filter(|p| *p != ConflictPolicy::Suite)
        .unwrap_or(ConflictPolicy::None),
      global => global,
    }
  }

  fn keep_latest(
    &mut self,
    repo: &Path,
    edge: &ImportEdge,
    pin: &Pin,
    requested: &str,
    wanted: &str,
  ) -> Result<(), ResolveError> {
    if self.vcs.is_ancestor(repo, wanted, &pin.rev)? {
      debug!(repo = %repo.display(), kept = %pin.rev, older = wanted, "checkout already at the later revision");
      return Ok(());
    }
    if !self.vcs.is_ancestor(repo, &pin.rev, wanted)? {
      return Err(ResolveError::DivergentRevisions {
        repo: repo.to_path_buf(),
        first: pin.rev.clone(),
        second: wanted.to_string(),
      });
    }
    if self.hosts_primary(repo) {
      return Err(conflict(repo, edge, pin, requested));
    }
    info!(
      repo = %repo.display(),
      from = %pin.rev,
      to = wanted,
      importer = %edge.importer,
      "moving repository to later revision"
    );
    self.move_repository(repo, edge)
  }

  fn hosts_primary(&self, repo: &Path) -> bool {
    self
      .suites
      .get(&self.primary)
      .and_then(|s| s.repo_dir.as_deref())
      .is_some_and(|primary_repo| primary_repo == repo)
  }

  /// First versioned import to reach an existing repository: check it out as requested.
  ///
  /// Under the `latest` policies a checkout that already descends from the requested
  /// revision is left alone, so resolving an already resolved workspace moves nothing.
  fn pin_repository(&mut self, repo: &Path, edge: &ImportEdge, wanted: &str) -> Result<(), ResolveError> {
    let current = self.vcs.current_revision(repo)?;
    let mut moved = false;
    if !same_revision(&current, wanted) {
      let keep = self.policy_for(&edge.importer).prefers_latest() && self.vcs.is_ancestor(repo, wanted, &current)?;
      if keep {
        debug!(repo = %repo.display(), current = %current, requested = wanted, "checkout already past requested revision");
      } else {
        info!(repo = %repo.display(), rev = wanted, importer = %edge.importer, "updating repository");
        self.update_repository(repo, wanted)?;
        moved = true;
      }
    }
    let rev = self.vcs.current_revision(repo)?;
    self.pins.insert(
      repo.to_path_buf(),
      Pin {
        requested_by: edge.importer.clone(),
        rev,
        dynamic: edge.import.is_dynamic,
      },
    );
    if moved {
      self.forget_repository(repo);
    }
    Ok(())
  }

  fn move_repository(&mut self, repo: &Path, edge: &ImportEdge) -> Result<(), ResolveError> {
    let requested = edge.import.revision().unwrap_or_default().to_string();
    self.update_repository(repo, &requested)?;
    let rev = self.vcs.current_revision(repo)?;
    self.pins.insert(
      repo.to_path_buf(),
      Pin {
        requested_by: edge.importer.clone(),
        rev,
        dynamic: edge.import.is_dynamic,
      },
    );
    self.forget_repository(repo);
    Ok(())
  }

  fn update_repository(&mut self, repo: &Path, rev: &str) -> Result<(), ResolveError> {
    if self.vcs.is_dirty(repo)? {
      return Err(ResolveError::DirtyWorkingCopy {
        repo: repo.to_path_buf(),
      });
    }
    if !self.originals.contains_key(repo) {
      let original = OriginalVersion::At {
        rev: self.vcs.current_revision(repo)?,
        branch: self.vcs.current_branch(repo)?,
      };
      self.originals.insert(repo.to_path_buf(), original);
    }
    self.vcs.update(repo, rev, self.options.fetch)?;
    self.stats.updates += 1;
    Ok(())
  }

  /// Evict every suite discovered in `repo` and queue the edges that led to them.
  fn forget_repository(&mut self, repo: &Path) {
    let names = self.collocated.remove(repo).unwrap_or_default();
    if names.is_empty() {
      return;
    }
    info!(repo = %repo.display(), suites = ?names, "forgetting suites in moved repository");
    for name in &names {
      self.suites.remove(name);
      self.states.insert(name.clone(), DiscoveryState::Forgotten);
    }
    for importers in self.importers.values_mut() {
      importers.retain(|i| !names.contains(i));
    }
    for edges in self.incoming.values_mut() {
      edges.retain(|e| !names.contains(&e.importer));
    }
    self.worklist.retain(|e| !names.contains(&e.importer));
    self.pending_delegations.retain(|e| !names.contains(&e.importer));

    // Pins asked for by the evicted suites stop binding. The remaining importers
    // of the suites in those repositories state their revisions again.
    let released: Vec<PathBuf> = self
      .pins
      .iter()
      .filter(|(pinned, pin)| pinned.as_path() != repo && names.contains(&pin.requested_by))
      .map(|(pinned, _)| pinned.clone())
      .collect();
    for pinned in released {
      if let Some(pin) = self.pins.remove(&pinned) {
        debug!(repo = %pinned.display(), rev = %pin.rev, requested_by = %pin.requested_by, "releasing pin of forgotten suite");
      }
      for suite in self.collocated.get(&pinned).into_iter().flatten() {
        let edges = self.incoming.get(suite).cloned().unwrap_or_default();
        self.worklist.extend(edges);
      }
    }

    for name in &names {
      let edges = self.incoming.get(name).cloned().unwrap_or_default();
      if !edges.is_empty() {
        self.states.insert(name.clone(), DiscoveryState::Pending);
      }
      self.worklist.extend(edges);
    }
    self.stats.forgets += 1;
  }

  fn discover(&mut self, edge: &ImportEdge) -> Result<(), ResolveError> {
    let target = edge.import.target_name.clone();
    let (suite_dir, repo_dir) = match self.locate(edge)? {
      Location::Present { suite_dir, repo_dir } => {
        if let (Some(repo), Some(requested)) = (&repo_dir, edge.import.revision())
          && !self.suppressed_by_delegation(&edge.importer, &target)
        {
          self.reconcile(repo, edge, requested)?;
          if !self.is_discovered(&edge.importer) {
            // The importer lived in the repository that just moved; the edge is
            // queued again with it.
            return Ok(());
          }
        }
        (suite_dir, repo_dir)
      }
      Location::Missing { suite_dir, repo_dir } => {
        self.clone_repository(&repo_dir, edge)?;
        (suite_dir, Some(repo_dir))
      }
    };

    let decl = match self.loader.load(&suite_dir) {
      Ok(decl) => decl,
      Err(DeclError::Missing(_)) => {
        return Err(ResolveError::SuiteNotFound {
          name: target,
          importer: edge.importer.clone(),
          searched: vec![suite_dir],
        });
      }
      Err(e) => return Err(e.into()),
    };
    if decl.name != target {
      return Err(ResolveError::NameMismatch {
        expected: target,
        found: decl.name,
        importer: edge.importer.clone(),
        path: decl.path,
      });
    }
    let suite = Suite::from_decl(decl, suite_dir, repo_dir, false)?;
    info!(suite = %suite.name, importer = %edge.importer, dir = %suite.dir.display(), "discovered suite");
    self.register(suite);
    self.retry_delegations()
  }

  fn locate(&self, edge: &ImportEdge) -> Result<Location, ResolveError> {
    let import = &edge.import;
    let name = &import.target_name;
    let importer = self.suites.get(&edge.importer);

    if import.is_subdir && import.sources.is_empty() {
      let importer_repo = importer.and_then(|s| s.repo_dir.clone());
      let base = importer_repo
        .clone()
        .or_else(|| importer.and_then(|s| s.dir.parent().map(Path::to_path_buf)));
      if let Some(base) = base {
        let suite_dir = base.join(name);
        if self.loader.exists(&suite_dir) {
          return Ok(Location::Present {
            suite_dir,
            repo_dir: importer_repo,
          });
        }
        return Err(self.not_found(edge, vec![suite_dir]));
      }
    }

    if let Some(repo_name) = import.repository_name() {
      let repo_dir = self.root.join(repo_name);
      let suite_dir = if import.is_subdir {
        repo_dir.join(name)
      } else {
        repo_dir.clone()
      };
      if self.vcs.is_repository(&repo_dir) {
        return Ok(Location::Present {
          suite_dir,
          repo_dir: Some(repo_dir),
        });
      }
      if let Some(found) = self.search(name) {
        return Ok(found);
      }
      if repo_dir.exists() {
        return Err(self.not_found(edge, vec![repo_dir]));
      }
      return Ok(Location::Missing { suite_dir, repo_dir });
    }

    self
      .search(name)
      .ok_or_else(|| self.not_found(edge, vec![self.root.join(name), self.root.join("*").join(name)]))
  }

  /// Look for an existing copy at `<root>/<name>` or `<root>/*/<name>`.
  fn search(&self, name: &str) -> Option<Location> {
    let direct = self.root.join(name);
    if self.loader.exists(&direct) {
      return Some(Location::Present {
        repo_dir: self.vcs.repository_root(&direct),
        suite_dir: direct,
      });
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(&self.root)
      .ok()?
      .filter_map(Result::ok)
      .map(|entry| entry.path().join(name))
      .filter(|dir| self.loader.exists(dir))
      .collect();
    candidates.sort();
    candidates.into_iter().next().map(|suite_dir| Location::Present {
      repo_dir: self.vcs.repository_root(&suite_dir),
      suite_dir,
    })
  }

  fn not_found(&self, edge: &ImportEdge, searched: Vec<PathBuf>) -> ResolveError {
    ResolveError::SuiteNotFound {
      name: edge.import.target_name.clone(),
      importer: edge.importer.clone(),
      searched,
    }
  }

  fn clone_repository(&mut self, repo_dir: &Path, edge: &ImportEdge) -> Result<(), ResolveError> {
    let name = &edge.import.target_name;
    let rev = edge.import.revision();
    let mut last_error = None;
    for source in edge.import.sources.iter().filter(|s| s.kind == SourceKind::Source) {
      info!(suite = %name, url = %source.url, rev, "cloning suite repository");
      match clone_with_retries(
        self.vcs,
        &source.url,
        repo_dir,
        rev,
        self.options.clone_retries,
        self.options.retry_backoff,
      ) {
        Ok(()) => {
          self.originals.insert(repo_dir.to_path_buf(), OriginalVersion::Cloned);
          self.stats.clones += 1;
          if rev.is_some() {
            let current = self.vcs.current_revision(repo_dir)?;
            self.pins.insert(
              repo_dir.to_path_buf(),
              Pin {
                requested_by: edge.importer.clone(),
                rev: current,
                dynamic: edge.import.is_dynamic,
              },
            );
          }
          return Ok(());
        }
        Err(e) => {
          warn!(suite = %name, url = %source.url, error = %e, "clone failed");
          if repo_dir.exists() {
            fs::remove_dir_all(repo_dir)?;
          }
          last_error = Some(e);
        }
      }
    }
    match last_error {
      Some(source) => Err(ResolveError::Clone {
        name: name.clone(),
        source,
      }),
      None => Err(self.not_found(edge, vec![repo_dir.to_path_buf()])),
    }
  }

  /// Undo every working-copy change made during this run.
  fn rollback(&mut self) {
    for (repo, original) in std::mem::take(&mut self.originals) {
      match original {
        OriginalVersion::Cloned => {
          info!(repo = %repo.display(), "removing repository cloned by failed resolution");
          if let Err(e) = fs::remove_dir_all(&repo) {
            error!(repo = %repo.display(), error = %e, "failed to remove clone");
          }
        }
        OriginalVersion::At { rev, branch } => {
          let target = branch.as_deref().unwrap_or(&rev);
          info!(repo = %repo.display(), rev = target, "restoring repository");
          if let Err(e) = self.vcs.update(&repo, target, false) {
            error!(repo = %repo.display(), error = %e, "failed to restore repository");
          }
        }
      }
    }
  }
}

fn conflict(repo: &Path, edge: &ImportEdge, pin: &Pin, requested: &str) -> ResolveError {
  ResolveError::VersionConflict {
    suite: edge.import.target_name.clone(),
    repo: repo.to_path_buf(),
    existing_importer: pin.requested_by.clone(),
    existing_version: pin.rev.clone(),
    importer: edge.importer.clone(),
    version: requested.to_string(),
  }
}
