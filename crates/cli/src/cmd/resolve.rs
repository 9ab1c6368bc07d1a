//! Implementation of the `sb resolve` command.
//!
//! Discovers every suite the primary suite imports, pinning each repository to
//! one revision, and lists the result.

use anyhow::Result;
use serde::Serialize;

use suitebuild_lib::suite::ResolutionStats;

use super::resolve;
use crate::SuiteArgs;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

#[derive(Serialize)]
struct SuiteOutput {
  name: String,
  dir: String,
  repository: Option<String>,
  primary: bool,
  imports: Vec<String>,
}

#[derive(Serialize)]
struct ResolveOutput {
  primary: String,
  suites: Vec<SuiteOutput>,
  clones: usize,
  updates: usize,
  forgets: usize,
}

pub fn cmd_resolve(args: &SuiteArgs, output: OutputFormat) -> Result<()> {
  let (_, resolution) = resolve(args)?;
  let ResolutionStats { clones, updates, forgets } = resolution.stats;

  let suites: Vec<SuiteOutput> = resolution
    .suites
    .values()
    .map(|suite| SuiteOutput {
      name: suite.name.clone(),
      dir: suite.dir.display().to_string(),
      repository: suite.repo_dir.as_ref().map(|p| p.display().to_string()),
      primary: suite.is_primary,
      imports: suite.imports.iter().map(|i| i.target_name.clone()).collect(),
    })
    .collect();

  if output.is_json() {
    return print_json(&ResolveOutput {
      primary: resolution.primary,
      suites,
      clones,
      updates,
      forgets,
    });
  }

  print_success(&format!("Resolved {} suite(s) from {}", suites.len(), resolution.primary));
  for suite in &suites {
    let marker = if suite.primary { " (primary)" } else { "" };
    print_info(&format!("{}{}: {}", suite.name, marker, suite.dir));
    if !suite.imports.is_empty() {
      print_stat("imports", &suite.imports.join(", "));
    }
  }
  if clones + updates + forgets > 0 {
    println!();
    print_stat("Cloned", &clones.to_string());
    print_stat("Updated", &updates.to_string());
    print_stat("Forgotten", &forgets.to_string());
  }
  Ok(())
}
