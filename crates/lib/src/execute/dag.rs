//! The task DAG for one build run.
//!
//! Tasks are created by walking the dependency graph from the requested roots,
//! so the task list only holds what those roots need. Walking in post-order
//! places every task after the tasks it depends on.

use std::collections::HashMap;
use std::convert::Infallible;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::types::ScheduleError;
use crate::build::{BuildOptions, BuildTask, build_task};
use crate::graph::walk::Edge;
use crate::graph::{DepId, Dependency, EdgeKind, Visitor, Workspace};

/// Tasks in dependency order, with `deps` wired to mirror the graph's kept edges.
#[derive(Debug)]
pub struct TaskGraph {
  tasks: Vec<BuildTask>,
}

impl TaskGraph {
  /// Create one task per dependency reachable from `roots`.
  ///
  /// Only excluded edges are ignored: build-only and annotation-processor
  /// dependencies must be built before their dependents too.
  pub fn from_workspace(ws: &Workspace, roots: &[DepId], options: &BuildOptions) -> Result<Self, ScheduleError> {
    let mut collector = TaskCollector {
      ws,
      options,
      tasks: Vec::new(),
      index: HashMap::new(),
    };
    let Ok(()) = ws.walk(Some(roots), &[EdgeKind::Excluded], &mut collector);
    let graph = Self { tasks: collector.tasks };
    graph.verify_acyclic()?;
    Ok(graph)
  }

  pub fn from_tasks(tasks: Vec<BuildTask>) -> Result<Self, ScheduleError> {
    let graph = Self { tasks };
    graph.verify_acyclic()?;
    Ok(graph)
  }

  fn verify_acyclic(&self) -> Result<(), ScheduleError> {
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..self.tasks.len()).map(|i| graph.add_node(i)).collect();
    for (i, task) in self.tasks.iter().enumerate() {
      for &dep in &task.deps {
        graph.add_edge(nodes[dep], nodes[i], ());
      }
    }
    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
      let start = graph[cycle.node_id()];
      ScheduleError::CycleDetected {
        cycle: vec![self.tasks[start].name.clone()],
      }
    })
  }

  pub fn tasks(&self) -> &[BuildTask] {
    &self.tasks
  }

  pub fn into_tasks(self) -> Vec<BuildTask> {
    self.tasks
  }
}

/// Length of the longest chain of unfinished dependencies below each task.
///
/// A task whose dependencies are all finished has depth 0 and may start.
/// `tasks` must be in dependency order.
pub fn chain_depths(tasks: &[BuildTask], finished: &[bool]) -> Vec<usize> {
  let mut depths = vec![0; tasks.len()];
  for (i, task) in tasks.iter().enumerate() {
    depths[i] = task
      .deps
      .iter()
      .filter(|&&dep| !finished[dep])
      .map(|&dep| depths[dep] + 1)
      .max()
      .unwrap_or(0);
  }
  depths
}

struct TaskCollector<'a> {
  ws: &'a Workspace,
  options: &'a BuildOptions,
  tasks: Vec<BuildTask>,
  index: HashMap<DepId, usize>,
}

impl Visitor for TaskCollector<'_> {
  type Error = Infallible;

  fn visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<(), Infallible> {
    let mut task = build_task(self.ws, dep, self.options);
    for edge in dep.edges.iter().filter(|e| e.kind != EdgeKind::Excluded) {
      if let Some(&i) = self.index.get(&edge.target)
        && !task.deps.contains(&i)
      {
        task.deps.push(i);
      }
    }
    self.index.insert(dep.id, self.tasks.len());
    self.tasks.push(task);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::workspace;
  use tempfile::TempDir;

  const SUITE: &str = r#"name = "app"
[libraries.LIB]
path = "lib.jar"
urls = ["https://example.com/lib.jar"]

[projects.gen]

[projects.core]
dependencies = ["LIB"]
build_dependencies = ["gen"]

[projects.unrelated]

[distributions.DIST]
dependencies = ["core"]
exclude = ["LIB"]
"#;

  fn names(graph: &TaskGraph) -> Vec<&str> {
    graph.tasks().iter().map(|t| t.name.as_str()).collect()
  }

  #[test]
  fn only_reachable_tasks_in_dependency_order() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("app", SUITE)]).unwrap();
    let root = ws.lookup("DIST").unwrap().id;

    let graph = TaskGraph::from_workspace(&ws, &[root], &BuildOptions::default()).unwrap();
    assert_eq!(names(&graph), vec!["LIB", "gen", "core", "DIST"]);

    let core = &graph.tasks()[2];
    assert_eq!(core.deps, vec![0, 1]);
    // the exclude edge does not add a second dependency on LIB
    assert_eq!(graph.tasks()[3].deps, vec![2]);
  }

  #[test]
  fn depths_count_unfinished_chains() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("app", SUITE)]).unwrap();
    let graph = TaskGraph::from_workspace(&ws, &ws.default_roots(), &BuildOptions::default()).unwrap();
    let position = |name: &str| graph.tasks().iter().position(|t| t.name == name).unwrap();

    let mut finished = vec![false; graph.tasks().len()];
    let depths = chain_depths(graph.tasks(), &finished);
    assert_eq!(depths[position("LIB")], 0);
    assert_eq!(depths[position("core")], 1);
    assert_eq!(depths[position("DIST")], 2);
    assert_eq!(depths[position("unrelated")], 0);

    finished[position("LIB")] = true;
    finished[position("gen")] = true;
    let depths = chain_depths(graph.tasks(), &finished);
    assert_eq!(depths[position("core")], 0);
    assert_eq!(depths[position("DIST")], 1);
  }

  #[test]
  fn hand_built_cycles_are_rejected() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("app", SUITE)]).unwrap();
    let graph = TaskGraph::from_workspace(&ws, &ws.default_roots(), &BuildOptions::default()).unwrap();
    let mut tasks = graph.into_tasks();
    let last = tasks.len() - 1;
    tasks[0].deps.push(last);
    tasks[last].deps.push(0);

    assert!(matches!(
      TaskGraph::from_tasks(tasks),
      Err(ScheduleError::CycleDetected { .. })
    ));
  }
}
