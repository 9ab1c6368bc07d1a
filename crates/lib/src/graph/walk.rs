//! Depth-first traversal of the dependency graph.

use std::collections::BTreeSet;

use super::{DepId, Dependency, EdgeKind, GraphError, Workspace};

/// The edge a node was reached through.
#[derive(Debug, Clone, Copy)]
pub struct Edge<'a> {
  pub src: &'a Dependency,
  pub kind: EdgeKind,
}

/// Callbacks for [`Workspace::walk`].
///
/// `pre_visit` runs once for each node reached for the first time; returning
/// `false` prunes it (it stays unvisited and may be reached again through another
/// edge). `visit_edge` runs for every kept out-edge of an entered node, whether or
/// not its destination was already visited. `visit` runs after all children.
pub trait Visitor {
  type Error;

  fn pre_visit(&mut self, _dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<bool, Self::Error> {
    Ok(true)
  }

  fn visit_edge(&mut self, _src: &Dependency, _dst: &Dependency, _kind: EdgeKind) -> Result<(), Self::Error> {
    Ok(())
  }

  fn visit(&mut self, _dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl Workspace {
  /// Walk from `roots` (every live dependency when `None`), skipping `ignored` edge kinds.
  pub fn walk<V: Visitor>(&self, roots: Option<&[DepId]>, ignored: &[EdgeKind], visitor: &mut V) -> Result<(), V::Error> {
    let all;
    let roots = match roots {
      Some(roots) => roots,
      None => {
        all = self.dependencies().map(|d| d.id).collect::<Vec<_>>();
        &all
      }
    };
    let mut visited = BTreeSet::new();
    for &root in roots {
      self.walk_from(root, None, ignored, &mut visited, visitor)?;
    }
    Ok(())
  }

  fn walk_from<V: Visitor>(
    &self,
    id: DepId,
    edge: Option<Edge<'_>>,
    ignored: &[EdgeKind],
    visited: &mut BTreeSet<DepId>,
    visitor: &mut V,
  ) -> Result<(), V::Error> {
    if visited.contains(&id) || !self.is_live(id) {
      return Ok(());
    }
    let dep = self.get(id);
    if !visitor.pre_visit(dep, edge)? {
      return Ok(());
    }
    visited.insert(id);
    for out in dep.edges.iter().filter(|e| !ignored.contains(&e.kind)) {
      let dst = self.get(out.target);
      visitor.visit_edge(dep, dst, out.kind)?;
      self.walk_from(out.target, Some(Edge { src: dep, kind: out.kind }), ignored, visited, visitor)?;
    }
    visitor.visit(dep, edge)
  }

  /// The chain of dependencies leading from `from` to `to`, if `to` is reachable.
  pub fn path_to(&self, from: DepId, to: DepId) -> Option<Vec<DepId>> {
    let mut finder = PathFinder {
      target: to,
      stack: Vec::new(),
      found: None,
    };
    let Ok(()) = self.walk(Some(&[from]), &[], &mut finder);
    finder.found
  }
}

/// Rejects any edge that closes a loop on the current path.
#[derive(Debug, Default)]
pub struct CycleDetector {
  path: Vec<(DepId, String)>,
}

impl Visitor for CycleDetector {
  type Error = GraphError;

  fn pre_visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<bool, GraphError> {
    self.path.push((dep.id, dep.name.clone()));
    Ok(true)
  }

  fn visit_edge(&mut self, _src: &Dependency, dst: &Dependency, _kind: EdgeKind) -> Result<(), GraphError> {
    let Some(start) = self.path.iter().position(|(id, _)| *id == dst.id) else {
      return Ok(());
    };
    let mut cycle: Vec<String> = self.path[start..].iter().map(|(_, name)| name.clone()).collect();
    cycle.push(dst.name.clone());
    Err(GraphError::DependencyCycle { cycle })
  }

  fn visit(&mut self, _dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<(), GraphError> {
    self.path.pop();
    Ok(())
  }
}

struct PathFinder {
  target: DepId,
  stack: Vec<DepId>,
  found: Option<Vec<DepId>>,
}

impl Visitor for PathFinder {
  type Error = std::convert::Infallible;

  fn pre_visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<bool, Self::Error> {
    if self.found.is_some() {
      return Ok(false);
    }
    self.stack.push(dep.id);
    if dep.id == self.target {
      self.found = Some(self.stack.clone());
    }
    Ok(true)
  }

  fn visit(&mut self, _dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<(), Self::Error> {
    self.stack.pop();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::DEFAULT_IGNORED_EDGES;
  use crate::util::testutil::workspace;
  use tempfile::TempDir;

  #[derive(Default)]
  struct Recorder {
    order: Vec<String>,
    edges: Vec<(String, String)>,
    prune: Option<&'static str>,
  }

  impl Visitor for Recorder {
    type Error = std::convert::Infallible;

    fn pre_visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<bool, Self::Error> {
      Ok(self.prune != Some(dep.name.as_str()))
    }

    fn visit_edge(&mut self, src: &Dependency, dst: &Dependency, _kind: EdgeKind) -> Result<(), Self::Error> {
      self.edges.push((src.name.clone(), dst.name.clone()));
      Ok(())
    }

    fn visit(&mut self, dep: &Dependency, _edge: Option<Edge<'_>>) -> Result<(), Self::Error> {
      self.order.push(dep.name.clone());
      Ok(())
    }
  }

  const DIAMOND: &str = r#"name = "a"
[libraries.LIB]
path = "lib.jar"
urls = ["https://example.com/lib.jar"]

[projects.left]
dependencies = ["LIB"]

[projects.right]
dependencies = ["LIB"]
build_dependencies = ["gen"]

[projects.gen]

[projects.top]
dependencies = ["left", "right"]
"#;

  #[test]
  fn visits_each_node_once_in_post_order() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("a", DIAMOND)]).unwrap();
    let top = ws.lookup("top").unwrap().id;

    let mut recorder = Recorder::default();
    let Ok(()) = ws.walk(Some(&[top]), DEFAULT_IGNORED_EDGES, &mut recorder);

    assert_eq!(recorder.order, vec!["LIB", "left", "right", "top"]);
    // right -> LIB is reported although LIB was already visited
    assert!(recorder.edges.contains(&("right".to_string(), "LIB".to_string())));
    assert!(!recorder.edges.iter().any(|(_, dst)| dst == "gen"));
  }

  #[test]
  fn requested_edge_kinds_are_followed() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("a", DIAMOND)]).unwrap();
    let top = ws.lookup("top").unwrap().id;

    let mut recorder = Recorder::default();
    let Ok(()) = ws.walk(Some(&[top]), &[EdgeKind::Excluded], &mut recorder);
    assert!(recorder.order.contains(&"gen".to_string()));
  }

  #[test]
  fn pruned_nodes_are_not_entered() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("a", DIAMOND)]).unwrap();

    let mut recorder = Recorder {
      prune: Some("left"),
      ..Recorder::default()
    };
    let Ok(()) = ws.walk(None, DEFAULT_IGNORED_EDGES, &mut recorder);
    assert!(!recorder.order.contains(&"left".to_string()));
    assert!(recorder.order.contains(&"LIB".to_string()));
  }

  #[test]
  fn path_to_follows_every_edge_kind() {
    let temp = TempDir::new().unwrap();
    let ws = workspace(temp.path(), &[("a", DIAMOND)]).unwrap();
    let id = |name: &str| ws.lookup(name).unwrap().id;

    let path = ws.path_to(id("top"), id("gen")).unwrap();
    let names: Vec<_> = path.into_iter().map(|d| ws.get(d).name.as_str()).collect();
    assert_eq!(names, vec!["top", "right", "gen"]);
    assert!(ws.path_to(id("left"), id("right")).is_none());
  }
}
