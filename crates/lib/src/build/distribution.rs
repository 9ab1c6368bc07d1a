//! Distributions: the outputs of their constituents laid out in one directory.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::io;
use std::path::PathBuf;

use super::{Staleness, TaskError, copy_tree, remove_dir_if_exists};
use crate::consts::BUILD_STAMP;
use crate::graph::walk::Edge;
use crate::graph::{DEFAULT_IGNORED_EDGES, DepId, Dependency, DependencyKind, EdgeKind, Visitor, Workspace};
use crate::util::timestamp::TimestampFile;

#[derive(Debug, Clone)]
pub struct DistributionTask {
  pub output_dir: PathBuf,
  /// Project output directories and library files, copied in by file name.
  pub constituents: Vec<PathBuf>,
}

impl DistributionTask {
  fn stamp(&self) -> PathBuf {
    self.output_dir.join(BUILD_STAMP)
  }

  pub fn needs_build(&self, newest_input: Option<&TimestampFile>) -> Staleness {
    let stamp = TimestampFile::new(self.stamp());
    if !stamp.exists() {
      return Staleness::Stale(format!("{} does not exist", self.output_dir.display()));
    }
    if let Some(input) = newest_input
      && input.is_newer_than(&stamp)
    {
      return Staleness::Stale(format!("{input} is newer than {stamp}"));
    }
    Staleness::Current(format!("{stamp} is newer than all constituents"))
  }

  /// The layout is rebuilt from scratch, so it always counts as changed.
  pub async fn build(&self) -> Result<bool, TaskError> {
    remove_dir_if_exists(&self.output_dir).await?;
    let output_dir = self.output_dir.clone();
    let constituents = self.constituents.clone();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
      std::fs::create_dir_all(&output_dir)?;
      for constituent in &constituents {
        let Some(file_name) = constituent.file_name() else {
          continue;
        };
        copy_tree(constituent, &output_dir.join(file_name))?;
        // a project's stamp is not part of the layout
        let _ = std::fs::remove_file(output_dir.join(file_name).join(BUILD_STAMP));
      }
      Ok(())
    })
    .await
    .map_err(io::Error::other)??;
    tokio::fs::write(self.stamp(), b"").await?;
    Ok(true)
  }

  pub async fn clean(&self) -> Result<(), TaskError> {
    remove_dir_if_exists(&self.output_dir).await?;
    Ok(())
  }

  pub fn newest_output(&self) -> Option<TimestampFile> {
    Some(TimestampFile::new(self.stamp())).filter(TimestampFile::exists)
  }
}

/// Everything a distribution ships: reachable projects and libraries, minus
/// excluded dependencies and anything that belongs to a nested distribution.
pub(super) fn constituents(ws: &Workspace, dist: &Dependency) -> Vec<PathBuf> {
  let mut collector = Constituents {
    root: dist.id,
    excluded: dist.targets(EdgeKind::Excluded).collect(),
    paths: Vec::new(),
  };
  let Ok(()) = ws.walk(Some(&[dist.id]), DEFAULT_IGNORED_EDGES, &mut collector);
  collector.paths
}

struct Constituents {
  root: DepId,
  excluded: BTreeSet<DepId>,
  paths: Vec<PathBuf>,
}

impl Visitor for Constituents {
  type Error = Infallible;

  fn pre_visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<bool, Infallible> {
    if dep.id == self.root {
      return Ok(true);
    }
    Ok(!self.excluded.contains(&dep.id) && !dep.is_distribution())
  }

  fn visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<(), Infallible> {
    match &dep.kind {
      DependencyKind::Project(project) => self.paths.push(project.output_dir.clone()),
      DependencyKind::Library(library) => self.paths.push(library.path.clone()),
      _ => {}
    }
    Ok(())
  }
}
