//! Types for scheduling a build run.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::build::TaskReport;
use crate::config::{Config, num_cpus};
use crate::graph::GraphError;

/// Errors that end a build run.
#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error("unknown dependency '{name}'{}", removed_suffix(.removed))]
  UnknownRoot { name: String, removed: Option<String> },

  #[error("build timed out after {}", humantime::format_duration(*.after))]
  Timeout { after: Duration },

  #[error("build interrupted")]
  Interrupted,

  #[error("{} task(s) failed: {}", .report.failed.len(), failed_names(.report))]
  BuildFailed { report: Box<BuildReport> },

  #[error("task cycle: {}", .cycle.join(" -> "))]
  CycleDetected { cycle: Vec<String> },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

fn removed_suffix(removed: &Option<String>) -> String {
  match removed {
    Some(reason) => format!(" (removed: {reason})"),
    None => String::new(),
  }
}

fn failed_names(report: &BuildReport) -> String {
  report
    .failed
    .iter()
    .map(|f| f.name.as_str())
    .collect::<Vec<_>>()
    .join(", ")
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
  /// CPU units shared by all running tasks.
  pub parallelism: usize,
  /// Wall-clock budget for the whole run.
  pub timeout: Option<Duration>,
  /// Abort the run on Ctrl-C.
  pub handle_interrupt: bool,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      timeout: None,
      handle_interrupt: false,
    }
  }
}

impl ScheduleConfig {
  pub fn from_config(config: &Config) -> Self {
    Self {
      parallelism: config.parallelism.max(1),
      timeout: config.timeout,
      handle_interrupt: true,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
  pub name: String,
  pub error: String,
}

/// Outcome of every task in a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
  pub built: Vec<TaskReport>,
  pub up_to_date: Vec<TaskReport>,
  pub forbidden: Vec<String>,
  pub failed: Vec<FailedTask>,
  /// Tasks that never started because a dependency failed or the run stopped.
  pub not_started: Vec<String>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn built_names(&self) -> Vec<&str> {
    self.built.iter().map(|r| r.name.as_str()).collect()
  }

  pub fn up_to_date_names(&self) -> Vec<&str> {
    self.up_to_date.iter().map(|r| r.name.as_str()).collect()
  }
}
