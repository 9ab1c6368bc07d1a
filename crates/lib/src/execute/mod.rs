//! Build scheduling.
//!
//! The scheduler runs the tasks of a [`TaskGraph`] with bounded parallelism:
//! - a task starts only after every task it depends on has finished
//! - among ready tasks, the longest-running estimates start first, as long as
//!   their CPU cost fits in what is left of the budget
//! - each task runs on its own worker and reports back through its join handle
//! - after a failure nothing new starts, running workers drain, and the run fails
//!   with every failed task listed
//! - a timeout or Ctrl-C aborts all workers (killing their commands)

pub mod daemon;
pub mod dag;
pub mod types;

use std::collections::BTreeSet;
use std::future::pending;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::build::{BuildOptions, BuildTask, TaskError, TaskReport, TaskStatus};
use crate::graph::{DepId, Workspace};

pub use daemon::DaemonPool;
pub use dag::{TaskGraph, chain_depths};
pub use types::{BuildReport, FailedTask, ScheduleConfig, ScheduleError};

/// Build `roots` (every default root when empty) and everything they need.
pub async fn build(
  ws: &Workspace,
  roots: &[String],
  options: &BuildOptions,
  config: &ScheduleConfig,
) -> Result<BuildReport, ScheduleError> {
  let roots = resolve_roots(ws, roots)?;
  let graph = TaskGraph::from_workspace(ws, &roots, options)?;
  schedule(graph, options, config).await
}

/// Map root names to dependencies, falling back to the workspace's default roots.
pub fn resolve_roots(ws: &Workspace, names: &[String]) -> Result<Vec<DepId>, ScheduleError> {
  if names.is_empty() {
    return Ok(ws.default_roots());
  }
  names
    .iter()
    .map(|name| {
      ws.lookup(name).map(|dep| dep.id).ok_or_else(|| ScheduleError::UnknownRoot {
        name: name.clone(),
        removed: ws.removal_reason(name).map(str::to_string),
      })
    })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Waiting,
  Running,
  Done,
  Failed,
}

type Workers = JoinSet<(usize, Result<TaskReport, TaskError>)>;

/// Run every task of `graph`.
pub async fn schedule(
  graph: TaskGraph,
  options: &BuildOptions,
  config: &ScheduleConfig,
) -> Result<BuildReport, ScheduleError> {
  let mut run = Run::new(graph.into_tasks(), options, config.parallelism);
  info!(tasks = run.tasks.len(), parallelism = run.budget, "starting build");

  let deadline = config.timeout.map(|timeout| Instant::now() + timeout);
  let timeout = async move {
    match deadline {
      Some(deadline) => sleep_until(deadline).await,
      None => pending().await,
    }
  };
  let handle_interrupt = config.handle_interrupt;
  let interrupt = async move {
    if !handle_interrupt || tokio::signal::ctrl_c().await.is_err() {
      pending::<()>().await;
    }
  };
  tokio::pin!(timeout, interrupt);

  loop {
    if !run.failing {
      run.launch_ready();
    }
    if run.workers.is_empty() {
      break;
    }

    tokio::select! {
      joined = run.workers.join_next() => {
        if let Some(joined) = joined {
          run.collect(joined);
        }
        run.release_daemons().await;
      }
      _ = &mut timeout => {
        let after = config.timeout.unwrap_or_default();
        warn!(after = %humantime::format_duration(after), "build timed out, aborting workers");
        run.abort().await;
        return Err(ScheduleError::Timeout { after });
      }
      _ = &mut interrupt => {
        warn!("interrupted, aborting workers");
        run.abort().await;
        return Err(ScheduleError::Interrupted);
      }
    }
  }

  run.finish().await
}

/// Coordinator state of one scheduler run.
struct Run<'a> {
  tasks: Vec<BuildTask>,
  states: Vec<State>,
  options: &'a BuildOptions,
  budget: usize,
  semaphore: Arc<Semaphore>,
  workers: Workers,
  daemons: DaemonPool,
  report: BuildReport,
  failing: bool,
}

impl<'a> Run<'a> {
  fn new(tasks: Vec<BuildTask>, options: &'a BuildOptions, parallelism: usize) -> Self {
    let budget = parallelism.max(1);
    Self {
      states: vec![State::Waiting; tasks.len()],
      tasks,
      options,
      budget,
      semaphore: Arc::new(Semaphore::new(budget)),
      workers: JoinSet::new(),
      daemons: DaemonPool::new(options.shell.clone()),
      report: BuildReport::default(),
      failing: false,
    }
  }

  /// Start ready tasks, longest estimate first, until the next one does not fit.
  fn launch_ready(&mut self) {
    loop {
      let finished: Vec<bool> = self.states.iter().map(|s| *s == State::Done).collect();
      let depths = chain_depths(&self.tasks, &finished);
      let mut ready: Vec<usize> = (0..self.tasks.len())
        .filter(|&i| self.states[i] == State::Waiting && depths[i] == 0)
        .collect();
      ready.sort_by(|&a, &b| {
        let (a, b) = (&self.tasks[a], &self.tasks[b]);
        b.build_time.cmp(&a.build_time).then_with(|| a.name.cmp(&b.name))
      });

      // forbidden tasks finish on the spot and may unblock others
      let mut unblocked = false;
      for idx in ready {
        if self.tasks[idx].forbidden {
          debug!(task = %self.tasks[idx].name, "skipping task not selected for this run");
          self.states[idx] = State::Done;
          self.report.forbidden.push(self.tasks[idx].name.clone());
          unblocked = true;
          continue;
        }
        if !self.launch(idx) {
          break;
        }
        if self.failing {
          return;
        }
      }
      if !unblocked {
        break;
      }
    }
  }

  /// Start task `idx` on a worker. Returns false if its cost does not fit.
  fn launch(&mut self, idx: usize) -> bool {
    let task = &self.tasks[idx];
    let cost = task.parallelism.clamp(1, self.budget) as u32;
    let Ok(permit) = self.semaphore.clone().try_acquire_many_owned(cost) else {
      return false;
    };

    let daemon_pid = match task.body.daemon_key() {
      Some(key) => match self.daemons.prepare(key) {
        Ok(pid) => pid,
        Err(e) => {
          error!(task = %task.name, error = %e, "shared daemon failed to start");
          self.report.failed.push(FailedTask {
            name: task.name.clone(),
            error: e.to_string(),
          });
          self.states[idx] = State::Failed;
          self.failing = true;
          return true;
        }
      },
      None => None,
    };

    let job = task.job(&self.tasks, self.options, daemon_pid);
    debug!(task = %task.name, cost, "launching task");
    self.states[idx] = State::Running;
    self.workers.spawn(async move {
      let _permit = permit;
      (idx, job.execute().await)
    });
    true
  }

  fn collect(&mut self, joined: Result<(usize, Result<TaskReport, TaskError>), tokio::task::JoinError>) {
    match joined {
      Ok((idx, Ok(task_report))) => {
        self.tasks[idx].complete(&task_report);
        self.states[idx] = State::Done;
        match task_report.status {
          TaskStatus::Built => {
            info!(task = %task_report.name, reason = %task_report.reason, "built");
            self.report.built.push(task_report);
          }
          TaskStatus::UpToDate => self.report.up_to_date.push(task_report),
          TaskStatus::Forbidden => self.report.forbidden.push(task_report.name),
        }
      }
      Ok((idx, Err(e))) => {
        error!(task = %self.tasks[idx].name, error = %e, "task failed");
        self.states[idx] = State::Failed;
        self.report.failed.push(FailedTask {
          name: self.tasks[idx].name.clone(),
          error: e.to_string(),
        });
        self.failing = true;
      }
      Err(e) => {
        error!(error = %e, "worker terminated abnormally");
        self.failing = true;
      }
    }
  }

  /// Stop daemons no waiting or running task needs any more.
  async fn release_daemons(&mut self) {
    if self.daemons.is_empty() {
      return;
    }
    let needed: BTreeSet<&str> = self
      .tasks
      .iter()
      .zip(&self.states)
      .filter(|(_, state)| matches!(state, State::Waiting | State::Running))
      .filter_map(|(task, _)| task.body.daemon_key())
      .collect();
    self.daemons.retain(&needed).await;
  }

  async fn abort(&mut self) {
    self.workers.abort_all();
    while self.workers.join_next().await.is_some() {}
    self.daemons.shutdown_all().await;
  }

  async fn finish(mut self) -> Result<BuildReport, ScheduleError> {
    self.daemons.shutdown_all().await;
    for (task, state) in self.tasks.iter().zip(&self.states) {
      match state {
        State::Waiting => self.report.not_started.push(task.name.clone()),
        // its worker panicked before reporting
        State::Running => self.report.failed.push(FailedTask {
          name: task.name.clone(),
          error: "worker terminated abnormally".to_string(),
        }),
        State::Done | State::Failed => {}
      }
    }

    let report = self.report;
    info!(
      built = report.built.len(),
      up_to_date = report.up_to_date.len(),
      forbidden = report.forbidden.len(),
      failed = report.failed.len(),
      not_started = report.not_started.len(),
      "build complete"
    );
    if report.is_success() {
      Ok(report)
    } else {
      Err(ScheduleError::BuildFailed {
        report: Box::new(report),
      })
    }
  }
}
