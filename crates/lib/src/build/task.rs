//! The build task record and its execution.
//!
//! [`BuildTask`] lives in the scheduler for the whole run. For execution it is
//! turned into a self-contained [`TaskJob`] that runs on a worker and hands back
//! a [`TaskReport`]; the scheduler copies the built flag and newest output from
//! the report back onto the task.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use super::{BuildOptions, DistributionTask, LibraryTask, ProjectTask, Staleness, TaskError, saved_deps};
use crate::util::timestamp::TimestampFile;

/// The variant-specific part of a task.
#[derive(Debug, Clone)]
pub enum TaskBody {
  Project(ProjectTask),
  Library(LibraryTask),
  Distribution(DistributionTask),
  /// Nothing to do; `output` is what dependents see as this task's output.
  NoOp { output: Option<PathBuf> },
}

impl TaskBody {
  pub fn needs_build(&self, newest_input: Option<&TimestampFile>) -> Staleness {
    match self {
      TaskBody::Project(project) => project.needs_build(newest_input),
      TaskBody::Library(library) => library.needs_build(),
      TaskBody::Distribution(dist) => dist.needs_build(newest_input),
      TaskBody::NoOp { .. } => Staleness::Current("provided by the platform".to_string()),
    }
  }

  /// Build the output. Returns whether it changed, which is what marks the task
  /// as built for its dependents.
  pub async fn build(&self, daemon_pid: Option<u32>, shell: Option<&str>) -> Result<bool, TaskError> {
    match self {
      TaskBody::Project(project) => project.build(daemon_pid, shell).await,
      TaskBody::Library(library) => library.build().await,
      TaskBody::Distribution(dist) => dist.build().await,
      TaskBody::NoOp { .. } => Ok(false),
    }
  }

  pub async fn clean(&self) -> Result<(), TaskError> {
    match self {
      TaskBody::Project(project) => project.clean().await,
      TaskBody::Distribution(dist) => dist.clean().await,
      TaskBody::Library(_) | TaskBody::NoOp { .. } => Ok(()),
    }
  }

  /// Downloaded and platform-provided files are never cleaned or force-rebuilt.
  pub fn clean_forbidden(&self) -> bool {
    matches!(self, TaskBody::Library(_) | TaskBody::NoOp { .. })
  }

  /// Whether a change in the dependency list makes this task stale.
  pub fn tracks_dependencies(&self) -> bool {
    matches!(self, TaskBody::Project(_) | TaskBody::Distribution(_))
  }

  pub fn newest_output(&self) -> Option<TimestampFile> {
    match self {
      TaskBody::Project(project) => project.newest_output(),
      TaskBody::Library(library) => library.newest_output(),
      TaskBody::Distribution(dist) => dist.newest_output(),
      TaskBody::NoOp { output } => output.as_ref().map(TimestampFile::new).filter(TimestampFile::exists),
    }
  }

  /// Key of the shared daemon this task needs, if any.
  pub fn daemon_key(&self) -> Option<&str> {
    match self {
      TaskBody::Project(project) => project.daemon.as_deref(),
      _ => None,
    }
  }
}

/// One dependency's unit of work in a run.
#[derive(Debug, Clone)]
pub struct BuildTask {
  pub name: String,
  pub kind: &'static str,
  /// Indices of the tasks this one waits for, in declaration order.
  pub deps: Vec<usize>,
  /// CPU units the task occupies while running.
  pub parallelism: usize,
  pub build_time: u32,
  /// Excluded from execution by `--only`.
  pub forbidden: bool,
  pub built: bool,
  pub newest_output: Option<TimestampFile>,
  pub saved_deps_path: PathBuf,
  pub body: TaskBody,
}

impl BuildTask {
  /// Snapshot everything execution needs from this task and its finished dependencies.
  pub fn job(&self, tasks: &[BuildTask], options: &BuildOptions, daemon_pid: Option<u32>) -> TaskJob {
    let deps = self.deps.iter().map(|&i| &tasks[i]);
    let newest_input = if options.shallow_dependency_checks {
      None
    } else {
      deps
        .clone()
        .filter_map(|dep| dep.newest_output.clone())
        .max_by_key(|ts| ts.modified)
    };
    TaskJob {
      name: self.name.clone(),
      body: self.body.clone(),
      dep_names: deps.clone().map(|dep| dep.name.clone()).collect(),
      saved_deps_path: self.saved_deps_path.clone(),
      forbidden: self.forbidden,
      force: options.force,
      clean: options.clean,
      rebuilt_dependency: deps.filter(|dep| dep.built).map(|dep| dep.name.clone()).next(),
      newest_input,
      daemon_pid,
      shell: options.shell.clone(),
    }
  }

  /// Take over what a worker reported.
  pub fn complete(&mut self, report: &TaskReport) {
    self.built = report.status == TaskStatus::Built;
    if report.newest_output.is_some() {
      self.newest_output = report.newest_output.clone();
    }
  }
}

/// A task ready to run on a worker, detached from the scheduler's state.
#[derive(Debug, Clone)]
pub struct TaskJob {
  pub name: String,
  pub body: TaskBody,
  pub dep_names: Vec<String>,
  pub saved_deps_path: PathBuf,
  pub forbidden: bool,
  pub force: bool,
  pub clean: bool,
  /// A dependency that was rebuilt earlier in this run.
  pub rebuilt_dependency: Option<String>,
  /// Newest output among the dependencies, unless checks are shallow.
  pub newest_input: Option<TimestampFile>,
  pub daemon_pid: Option<u32>,
  pub shell: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Built,
  UpToDate,
  Forbidden,
}

/// What a worker hands back to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
  pub name: String,
  pub status: TaskStatus,
  pub reason: String,
  pub newest_output: Option<TimestampFile>,
  #[serde(rename = "duration_ms", serialize_with = "as_millis")]
  pub duration: Duration,
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u128(duration.as_millis())
}

impl TaskJob {
  pub async fn execute(self) -> Result<TaskReport, TaskError> {
    let started = Instant::now();
    if self.forbidden {
      debug!(task = %self.name, "not selected for this run");
      return Ok(self.report(TaskStatus::Forbidden, "not selected".to_string(), started));
    }

    let reason = match self.staleness() {
      Staleness::Stale(reason) => reason,
      Staleness::Current(reason) => {
        debug!(task = %self.name, reason = %reason, "up to date");
        return Ok(self.report(TaskStatus::UpToDate, reason, started));
      }
    };

    info!(task = %self.name, reason = %reason, "building");
    if self.clean && !self.body.clean_forbidden() {
      self.body.clean().await?;
    }
    let changed = self.body.build(self.daemon_pid, self.shell.as_deref()).await?;
    if self.body.tracks_dependencies() {
      saved_deps::persist(&self.saved_deps_path, &self.dep_names)?;
    }
    if !changed {
      debug!(task = %self.name, reason = %reason, "rebuilt without changing its output");
      return Ok(self.report(TaskStatus::UpToDate, format!("{reason}, output unchanged"), started));
    }
    Ok(self.report(TaskStatus::Built, reason, started))
  }

  fn staleness(&self) -> Staleness {
    let rebuild_allowed = !self.body.clean_forbidden();
    if self.force && rebuild_allowed {
      return Staleness::Stale("forced build".to_string());
    }
    if self.clean && rebuild_allowed {
      return Staleness::Stale("clean build".to_string());
    }
    if let Some(dep) = &self.rebuilt_dependency
      && self.body.tracks_dependencies()
    {
      return Staleness::Stale(format!("dependency {dep} updated"));
    }
    if self.body.tracks_dependencies() && saved_deps::changed(&self.saved_deps_path, &self.dep_names) {
      return Staleness::Stale("dependencies were added, removed or re-ordered".to_string());
    }
    self.body.needs_build(self.newest_input.as_ref())
  }

  fn report(&self, status: TaskStatus, reason: String, started: Instant) -> TaskReport {
    TaskReport {
      name: self.name.clone(),
      status,
      reason,
      newest_output: self.body.newest_output(),
      duration: started.elapsed(),
    }
  }
}
