//! Implementation of the `sb graph` command.

use anyhow::{Result, bail};
use serde::Serialize;

use suitebuild_lib::graph::{Dependency, Workspace};

use super::load_workspace;
use crate::SuiteArgs;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_warning, symbols};

#[derive(Serialize)]
struct EdgeOutput {
  kind: String,
  target: String,
}

#[derive(Serialize)]
struct DependencyOutput {
  name: String,
  suite: String,
  kind: &'static str,
  edges: Vec<EdgeOutput>,
}

#[derive(Serialize)]
struct RemovedOutput {
  name: String,
  reason: String,
}

#[derive(Serialize)]
struct GraphOutput {
  dependencies: Vec<DependencyOutput>,
  removed: Vec<RemovedOutput>,
}

pub fn cmd_graph(suite: &SuiteArgs, path: Option<&[String]>, output: OutputFormat) -> Result<()> {
  let (_, ws) = load_workspace(suite)?;

  if let Some([from, to]) = path {
    return print_path(&ws, from, to, output);
  }

  let dependencies: Vec<DependencyOutput> = ws.dependencies().map(|dep| describe(&ws, dep)).collect();
  let removed: Vec<RemovedOutput> = ws
    .removed()
    .iter()
    .map(|(name, removed)| RemovedOutput {
      name: name.clone(),
      reason: removed.reason.clone(),
    })
    .collect();

  if output.is_json() {
    return print_json(&GraphOutput { dependencies, removed });
  }

  for dep in &dependencies {
    print_info(&format!("{}:{} ({})", dep.suite, dep.name, dep.kind));
    for edge in &dep.edges {
      print_stat(&edge.kind, &edge.target);
    }
  }
  for removed in &removed {
    print_warning(&format!("removed {}: {}", removed.name, removed.reason));
  }
  Ok(())
}

fn describe(ws: &Workspace, dep: &Dependency) -> DependencyOutput {
  DependencyOutput {
    name: dep.name.clone(),
    suite: dep.suite.clone(),
    kind: dep.kind_name(),
    edges: dep
      .edges
      .iter()
      .map(|edge| EdgeOutput {
        kind: edge.kind.to_string(),
        target: ws.get(edge.target).qualified_name(),
      })
      .collect(),
  }
}

fn print_path(ws: &Workspace, from: &str, to: &str, output: OutputFormat) -> Result<()> {
  let Some(source) = ws.lookup(from) else {
    bail!("unknown dependency '{}'", from);
  };
  let Some(target) = ws.lookup(to) else {
    bail!("unknown dependency '{}'", to);
  };

  let names: Option<Vec<String>> = ws
    .path_to(source.id, target.id)
    .map(|path| path.into_iter().map(|id| ws.get(id).name.clone()).collect());

  if output.is_json() {
    return print_json(&names);
  }
  match names {
    Some(names) => println!("{}", names.join(&format!(" {} ", symbols::ARROW))),
    None => print_info(&format!("{} does not depend on {}", from, to)),
  }
  Ok(())
}
