mod build;
mod clean;
mod graph;
mod resolve;

use anyhow::{Context, Result};
use tracing::debug;

use suitebuild_lib::config::Config;
use suitebuild_lib::execute::ScheduleError;
use suitebuild_lib::graph::{Workspace, WorkspaceOptions};
use suitebuild_lib::suite::TomlLoader;
use suitebuild_lib::suite::resolve::{Resolution, ResolveOptions, resolve_suites};
use suitebuild_lib::vcs::git::GitVcs;

use crate::SuiteArgs;

pub use build::{BuildArgs, cmd_build};
pub use clean::cmd_clean;
pub use graph::cmd_graph;
pub use resolve::cmd_resolve;

/// Configuration for the primary suite, with command-line overrides applied.
fn load_config(args: &SuiteArgs) -> Result<(std::path::PathBuf, Config)> {
  let dir = dunce::canonicalize(&args.dir)
    .with_context(|| format!("Suite directory not found: {}", args.dir.display()))?;
  let mut config = Config::load(&dir).context("Failed to load configuration")?;
  if let Some(policy) = args.policy {
    config.conflict_policy = policy;
  }
  if args.no_fetch {
    config.fetch = false;
  }
  debug!(dir = ?dir, policy = %config.conflict_policy, fetch = config.fetch, "configuration loaded");
  Ok((dir, config))
}

fn resolve(args: &SuiteArgs) -> Result<(Config, Resolution)> {
  let (dir, config) = load_config(args)?;
  let mut options = ResolveOptions::from_config(&config);
  options.dynamic_imports = args.dynamic_imports.clone();
  let resolution = resolve_suites(&dir, &GitVcs::new(), &TomlLoader, &options)
    .with_context(|| format!("Failed to resolve suites from {}", dir.display()))?;
  Ok((config, resolution))
}

/// Resolve the suites and load their dependencies.
fn load_workspace(args: &SuiteArgs) -> Result<(Config, Workspace)> {
  let (config, resolution) = resolve(args)?;
  let ws = Workspace::load(resolution, &WorkspaceOptions::from_config(&config))
    .context("Failed to load dependency graph")?;
  Ok((config, ws))
}

/// Exit status for a failed command: the failed task count for build failures, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> u8 {
  match err.downcast_ref::<ScheduleError>() {
    Some(ScheduleError::BuildFailed { report }) => report.failed.len().clamp(1, 255) as u8,
    _ => 1,
  }
}
