//! Implementation of the `sb build` command.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};

use suitebuild_lib::build::BuildOptions;
use suitebuild_lib::execute::{self, BuildReport, ScheduleConfig, ScheduleError};

use super::load_workspace;
use crate::SuiteArgs;
use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning,
  symbols,
};

pub struct BuildArgs {
  pub names: Vec<String>,
  pub only: Vec<String>,
  pub force: bool,
  pub clean: bool,
  pub jobs: Option<usize>,
  pub timeout: Option<Duration>,
  pub print_timing: bool,
  pub output: OutputFormat,
}

pub fn cmd_build(suite: &SuiteArgs, args: &BuildArgs) -> Result<()> {
  let (config, ws) = load_workspace(suite)?;

  for (name, removed) in ws.removed() {
    print_warning(&format!("skipping {}: {}", name, removed.reason));
  }

  let mut options = BuildOptions::from_config(&config);
  options.force = args.force;
  options.clean = args.clean;
  if !args.only.is_empty() {
    options.only = Some(args.only.iter().cloned().collect::<BTreeSet<_>>());
  }

  let mut schedule = ScheduleConfig::from_config(&config);
  if let Some(jobs) = args.jobs {
    schedule.parallelism = jobs.max(1);
  }
  if args.timeout.is_some() {
    schedule.timeout = args.timeout;
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(execute::build(&ws, &args.names, &options, &schedule));

  let report = match &result {
    Ok(report) => Some(report),
    Err(ScheduleError::BuildFailed { report }) => Some(&**report),
    Err(_) => None,
  };
  if let Some(report) = report {
    if args.output.is_json() {
      print_json(report)?;
    } else {
      print_report(report, args.print_timing);
    }
  }

  result.context("Build failed")?;
  Ok(())
}

fn print_report(report: &BuildReport, print_timing: bool) {
  for task in &report.built {
    let timing = if print_timing {
      format!(" [{}]", format_duration(task.duration))
    } else {
      String::new()
    };
    print_success(&format!("built {} ({}){}", task.name, task.reason, timing));
  }
  for task in &report.up_to_date {
    print_info(&format!("{} is up to date ({})", task.name, task.reason));
  }
  for failed in &report.failed {
    print_error(&format!("{} failed: {}", failed.name, failed.error));
  }

  println!();
  print_stat("Built", &report.built.len().to_string());
  print_stat("Up to date", &report.up_to_date.len().to_string());
  if !report.forbidden.is_empty() {
    print_stat("Skipped", &report.forbidden.join(", "));
  }
  if !report.failed.is_empty() {
    print_stat("Failed", &report.failed.len().to_string());
  }
  if !report.not_started.is_empty() {
    print_stat(
      "Not started",
      &format!("{} {}", symbols::ARROW, report.not_started.join(", ")),
    );
  }

  if print_timing {
    let total: Duration = report.built.iter().map(|t| t.duration).sum();
    print_stat("Task time", &format_duration(total));
  }
}
