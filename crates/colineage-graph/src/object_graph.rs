//! Object dependency graph construction and traversal
//!
//! Edges point from a dependent object to the objects it reads. Cycles are
//! broken once at build time so the graph always has a topological order.

use colineage_core::{Diagnostic, DiagnosticCode, ObjectInfo, ObjectKind};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Dependency graph with forward and reverse edges, keyed by canonical name
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    /// All analyzed objects (temp tables included)
    nodes: BTreeMap<String, ObjectKind>,

    /// Forward edges: object -> objects it depends on
    parents: BTreeMap<String, BTreeSet<String>>,

    /// Reverse edges: object -> objects depending on it
    children: BTreeMap<String, BTreeSet<String>>,

    /// Dependencies naming objects outside the corpus
    external: BTreeMap<String, BTreeSet<String>>,

    /// Edges removed to break cycles, as (dependent, dependency)
    removed: Vec<(String, String)>,

    /// Dependencies first, lexicographic among independent objects
    order: Vec<String>,

    diagnostics: Vec<Diagnostic>,
}

impl ObjectGraph {
    /// Build the graph from analyzed objects and their owned temp objects
    pub fn build(objects: &[ObjectInfo]) -> Self {
        let mut graph = Self::default();

        let mut all = Vec::new();
        for object in objects {
            collect(object, &mut all);
        }
        for object in &all {
            graph.nodes.insert(object.name.clone(), object.kind);
        }

        for object in &all {
            for dependency in &object.dependencies {
                if graph.nodes.contains_key(dependency) {
                    graph.add_edge(&object.name, dependency);
                } else {
                    graph
                        .external
                        .entry(object.name.clone())
                        .or_default()
                        .insert(dependency.clone());
                    graph.diagnostics.push(
                        Diagnostic::info(
                            DiagnosticCode::UnresolvedDependency,
                            format!("Dependency '{}' is not defined in the analyzed sources", dependency),
                        )
                        .with_object(object.name.clone()),
                    );
                }
            }
        }

        graph.break_cycles();
        graph.order = graph.kahn();
        graph
    }

    fn add_edge(&mut self, dependent: &str, dependency: &str) {
        self.parents
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.children
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
    }

    fn remove_edge(&mut self, dependent: &str, dependency: &str) {
        if let Some(parents) = self.parents.get_mut(dependent) {
            parents.remove(dependency);
        }
        if let Some(children) = self.children.get_mut(dependency) {
            children.remove(dependent);
        }
    }

    /// Remove one edge per cycle until none remain: the edge whose
    /// dependency has the smallest canonical name
    fn break_cycles(&mut self) {
        while let Some(cycle) = self.find_cycle() {
            let edge = (0..cycle.len())
                .map(|i| (&cycle[i], &cycle[(i + 1) % cycle.len()]))
                .min_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)))
                .map(|(from, to)| (from.clone(), to.clone()));
            let Some((from, to)) = edge else {
                break;
            };

            tracing::warn!(
                cycle = %cycle.join(" -> "),
                removed = %format!("{} -> {}", from, to),
                "breaking dependency cycle"
            );
            self.diagnostics.push(
                Diagnostic::warn(
                    DiagnosticCode::CyclicDependency,
                    format!(
                        "Dependency cycle {} broken by ignoring '{}' -> '{}'",
                        cycle.join(" -> "),
                        from,
                        to
                    ),
                )
                .with_object(from.clone()),
            );
            self.remove_edge(&from, &to);
            self.removed.push((from, to));
        }
    }

    /// Three-colour DFS in name order; returns the members of the first
    /// cycle found, each depending on the next and the last on the first
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut color: BTreeMap<&str, Color> =
            self.nodes.keys().map(|n| (n.as_str(), Color::White)).collect();

        for start in self.nodes.keys() {
            if color.get(start.as_str()) != Some(&Color::White) {
                continue;
            }
            color.insert(start.as_str(), Color::Gray);
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];

            while let Some(&(node, index)) = stack.last() {
                let next = self.parents.get(node).and_then(|p| p.iter().nth(index));
                let Some(dependency) = next else {
                    color.insert(node, Color::Black);
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match color.get(dependency.as_str()) {
                    Some(Color::Gray) => {
                        let at = stack
                            .iter()
                            .position(|(n, _)| *n == dependency.as_str())
                            .unwrap_or(0);
                        return Some(stack[at..].iter().map(|(n, _)| n.to_string()).collect());
                    }
                    Some(Color::White) => {
                        color.insert(dependency.as_str(), Color::Gray);
                        stack.push((dependency.as_str(), 0));
                    }
                    _ => {}
                }
            }
        }
        None
    }

    /// Kahn's algorithm with an ordered ready set
    fn kahn(&self) -> Vec<String> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|n| (n.as_str(), self.parents.get(n).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for child in self.children.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child.as_str());
                    }
                }
            }
        }
        order
    }

    /// Objects in resolution order
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<ObjectKind> {
        self.nodes.get(name).copied()
    }

    /// All object names, sorted
    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of internal edges after cycle breaking
    pub fn edge_count(&self) -> usize {
        self.parents.values().map(BTreeSet::len).sum()
    }

    /// Immediate dependencies inside the corpus
    pub fn dependencies(&self, name: &str) -> Vec<&String> {
        self.parents.get(name).map(|p| p.iter().collect()).unwrap_or_default()
    }

    /// Immediate dependents
    pub fn dependents(&self, name: &str) -> Vec<&String> {
        self.children.get(name).map(|c| c.iter().collect()).unwrap_or_default()
    }

    /// Dependencies outside the corpus
    pub fn external_dependencies(&self, name: &str) -> Vec<&String> {
        self.external.get(name).map(|e| e.iter().collect()).unwrap_or_default()
    }

    /// Edges dropped while breaking cycles
    pub fn removed_edges(&self) -> &[(String, String)] {
        &self.removed
    }

    /// Cycle and unresolved-dependency diagnostics
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Every object affected when `name` changes (transitive dependents)
    pub fn downstream(&self, name: &str) -> Vec<String> {
        bfs(&self.children, name)
    }

    /// Every object `name` reads from, directly or not
    pub fn upstream(&self, name: &str) -> Vec<String> {
        bfs(&self.parents, name)
    }

    /// Whether `to` is reachable downstream of `from`
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        self.downstream(from).iter().any(|n| n == to)
    }
}

fn collect<'o>(object: &'o ObjectInfo, out: &mut Vec<&'o ObjectInfo>) {
    out.push(object);
    for scoped in &object.scoped {
        collect(scoped, out);
    }
}

fn bfs(edges: &BTreeMap<String, BTreeSet<String>>, start: &str) -> Vec<String> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<&String> = edges.get(start).into_iter().flatten().collect();
    let mut result = Vec::new();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        result.push(current.clone());
        for next in edges.get(current).into_iter().flatten() {
            if !visited.contains(next) {
                queue.push_back(next);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn object(name: &str, deps: &[&str]) -> ObjectInfo {
        let mut object = ObjectInfo::new(name, ObjectKind::View);
        for dep in deps {
            object.add_dependency(*dep);
        }
        object
    }

    #[test]
    fn dependencies_come_first_with_name_tie_break() {
        let graph = ObjectGraph::build(&[
            object("d.s.report", &["d.s.b", "d.s.a"]),
            object("d.s.b", &["d.s.base"]),
            object("d.s.a", &["d.s.base"]),
            object("d.s.base", &[]),
        ]);
        assert_eq!(graph.topological_order(), ["d.s.base", "d.s.a", "d.s.b", "d.s.report"]);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn external_dependencies_do_not_affect_order() {
        let graph = ObjectGraph::build(&[object("d.s.v", &["d.s.outside"])]);
        assert_eq!(graph.topological_order(), ["d.s.v"]);
        assert_eq!(graph.external_dependencies("d.s.v"), vec!["d.s.outside"]);
        assert_eq!(graph.diagnostics()[0].code, DiagnosticCode::UnresolvedDependency);
    }

    #[test]
    fn cycle_broken_at_smallest_target() {
        let graph = ObjectGraph::build(&[
            object("d.s.x", &["d.s.y"]),
            object("d.s.y", &["d.s.z"]),
            object("d.s.z", &["d.s.x"]),
        ]);
        assert_eq!(graph.removed_edges(), [("d.s.z".to_string(), "d.s.x".to_string())]);
        assert_eq!(graph.topological_order(), ["d.s.z", "d.s.y", "d.s.x"]);
        assert!(graph
            .diagnostics()
            .iter()
            .any(|d| d.code == DiagnosticCode::CyclicDependency));
    }

    #[test]
    fn temp_objects_are_nodes() {
        let mut owner = object("d.s.p", &["d.s.p#t"]);
        owner.scoped.push(object("d.s.p#t", &["d.s.src"]));
        let graph = ObjectGraph::build(&[owner, object("d.s.src", &[])]);
        assert_eq!(graph.topological_order(), ["d.s.src", "d.s.p#t", "d.s.p"]);
        assert_eq!(graph.upstream("d.s.p"), vec!["d.s.p#t", "d.s.src"]);
        assert_eq!(graph.downstream("d.s.src"), vec!["d.s.p#t", "d.s.p"]);
    }
}
