//! Implementation of the `sb clean` command.
//!
//! Removes the outputs of every task the named roots need. Downloaded and
//! platform libraries are left alone.

use anyhow::{Context, Result};

use suitebuild_lib::build::BuildOptions;
use suitebuild_lib::execute::{TaskGraph, resolve_roots};

use super::load_workspace;
use crate::SuiteArgs;
use crate::output::{print_info, print_success};

pub fn cmd_clean(suite: &SuiteArgs, names: &[String]) -> Result<()> {
  let (config, ws) = load_workspace(suite)?;
  let roots = resolve_roots(&ws, names)?;
  let graph = TaskGraph::from_workspace(&ws, &roots, &BuildOptions::from_config(&config))?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let mut cleaned = 0;
  for task in graph.tasks() {
    if task.body.clean_forbidden() {
      continue;
    }
    rt.block_on(task.body.clean())
      .with_context(|| format!("Failed to clean {}", task.name))?;
    if task.saved_deps_path.exists() {
      std::fs::remove_file(&task.saved_deps_path)
        .with_context(|| format!("Failed to remove {}", task.saved_deps_path.display()))?;
    }
    print_info(&format!("cleaned {}", task.name));
    cleaned += 1;
  }

  print_success(&format!("Cleaned {} task(s)", cleaned));
  Ok(())
}
