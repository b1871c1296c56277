//! Column-level lineage graph
//!
//! Nodes are fully-qualified columns, edges run from a source column to the
//! output column it feeds. Both are kept in ordered sets so construction and
//! queries do not depend on input order.

use crate::selector::{Direction, Selector};
use colineage_core::{ColumnRef, ResolvedObject, TransformationKind};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A fully-qualified column
pub type ColumnNode = ColumnRef;

/// One lineage edge: `from` feeds `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ColumnEdge {
    pub from: ColumnNode,
    pub to: ColumnNode,
    pub transformation: TransformationKind,

    /// Object that defines `to`
    pub owner: String,

    /// Expression text producing `to`
    pub expression: String,
}

/// One edge reached by an impact query
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ImpactEdge {
    pub from: ColumnNode,
    pub to: ColumnNode,
    pub direction: Direction,
    pub transformation: TransformationKind,
    pub description: String,

    /// Hops from the nearest seed
    pub depth: usize,
}

/// Bidirectional column graph
#[derive(Debug, Clone, Default)]
pub struct ColumnGraph {
    nodes: BTreeSet<ColumnNode>,
    edges: BTreeSet<ColumnEdge>,
    /// Original-case column names for display
    labels: BTreeMap<ColumnNode, String>,
}

impl ColumnGraph {
    /// Build from resolved objects
    pub fn build(objects: &[ResolvedObject]) -> Self {
        let mut graph = Self::default();

        for object in objects {
            for column in &object.schema.columns {
                let node = ColumnNode::new(object.name.clone(), &column.name);
                graph.labels.entry(node.clone()).or_insert_with(|| column.name.clone());
                graph.nodes.insert(node);
            }
            for lineage in &object.lineage {
                let to = ColumnNode::new(object.name.clone(), &lineage.output_column);
                graph.nodes.insert(to.clone());
                for input in &lineage.inputs {
                    graph.nodes.insert(input.source.clone());
                    graph.edges.insert(ColumnEdge {
                        from: input.source.clone(),
                        to: to.clone(),
                        transformation: input.transformation,
                        owner: object.name.clone(),
                        expression: input.expression.clone(),
                    });
                }
            }
        }

        tracing::debug!(nodes = graph.nodes.len(), edges = graph.edges.len(), "column graph built");
        graph
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ColumnNode> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &ColumnEdge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Columns matching a selector pattern (direction ignored)
    pub fn find_columns(&self, selector: &Selector) -> Vec<&ColumnNode> {
        self.nodes.iter().filter(|n| selector.matches(n)).collect()
    }

    /// Display name of a column, keeping its declared case
    pub fn label(&self, node: &ColumnNode) -> String {
        match self.labels.get(node) {
            Some(column) => format!("{}.{}", node.object, column),
            None => node.to_string(),
        }
    }

    /// Column part of [`Self::label`]
    pub fn column_name<'g>(&'g self, node: &'g ColumnNode) -> &'g str {
        self.labels.get(node).map_or(node.column.as_str(), String::as_str)
    }

    /// SHA-256 over the ordered edge list
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for edge in &self.edges {
            hasher.update(edge.from.to_string().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(edge.to.to_string().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(edge.transformation.to_string().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(edge.expression.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Parse `text` and run it; unparseable selectors give no edges
    pub fn impact(&self, text: &str, max_depth: usize) -> Vec<ImpactEdge> {
        match Selector::parse(text, max_depth) {
            Ok(selector) => self.query(&selector),
            Err(error) => {
                tracing::debug!(selector = text, error = %error, "selector rejected");
                Vec::new()
            }
        }
    }

    /// Breadth-first walk from every seed column, bounded by the selector's
    /// depth; results are deduplicated by (from, to, direction)
    pub fn query(&self, selector: &Selector) -> Vec<ImpactEdge> {
        let seeds: Vec<&ColumnNode> = self.find_columns(selector);
        if seeds.is_empty() {
            return Vec::new();
        }

        let mut upstream: BTreeMap<&ColumnNode, Vec<&ColumnEdge>> = BTreeMap::new();
        let mut downstream: BTreeMap<&ColumnNode, Vec<&ColumnEdge>> = BTreeMap::new();
        for edge in &self.edges {
            upstream.entry(&edge.to).or_default().push(edge);
            downstream.entry(&edge.from).or_default().push(edge);
        }

        let mut seen: BTreeSet<(ColumnNode, ColumnNode, Direction)> = BTreeSet::new();
        let mut results = Vec::new();

        for direction in selector.directions() {
            let adjacency = match direction {
                Direction::Upstream => &upstream,
                Direction::Downstream => &downstream,
            };

            let mut visited: BTreeSet<&ColumnNode> = seeds.iter().copied().collect();
            let mut queue: VecDeque<(&ColumnNode, usize)> = seeds.iter().map(|s| (*s, 0)).collect();

            while let Some((node, depth)) = queue.pop_front() {
                if depth >= selector.max_depth {
                    continue;
                }
                for edge in adjacency.get(node).into_iter().flatten() {
                    let next = match direction {
                        Direction::Upstream => &edge.from,
                        Direction::Downstream => &edge.to,
                    };
                    if seen.insert((edge.from.clone(), edge.to.clone(), direction)) {
                        results.push(ImpactEdge {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                            direction,
                            transformation: edge.transformation,
                            description: self.describe(edge),
                            depth: depth + 1,
                        });
                    }
                    if visited.insert(next) {
                        queue.push_back((next, depth + 1));
                    }
                }
            }
        }

        results.sort_by(|a, b| {
            (a.direction, a.depth, &a.from, &a.to).cmp(&(b.direction, b.depth, &b.from, &b.to))
        });
        results
    }

    pub(crate) fn describe(&self, edge: &ColumnEdge) -> String {
        let from = self.label(&edge.from);
        let to = self.label(&edge.to);
        if edge.expression.is_empty() {
            format!("{} -> {} ({})", from, to, edge.transformation)
        } else {
            format!("{} -> {} ({}: {})", from, to, edge.transformation, edge.expression)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colineage_core::{Column, ColumnLineage, LineageInput, LogicalType, ObjectKind, Schema};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn resolved(name: &str, column: &str, source: (&str, &str), kind: TransformationKind) -> ResolvedObject {
        let input = LineageInput {
            source: ColumnRef::new(source.0, source.1),
            transformation: kind,
            expression: String::new(),
        };
        ResolvedObject {
            name: name.to_string(),
            kind: ObjectKind::View,
            schema: Schema::from_columns(vec![Column::new(column, LogicalType::Int)]),
            lineage: vec![ColumnLineage::new(column, [input])],
            dependencies: BTreeSet::from([source.0.to_string()]),
            star_sources: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn chain() -> Vec<ResolvedObject> {
        vec![
            resolved("d.s.b", "x", ("d.s.a", "x"), TransformationKind::Identity),
            resolved("d.s.c", "y", ("d.s.b", "x"), TransformationKind::Arithmetic),
            resolved("d.s.d", "z", ("d.s.c", "y"), TransformationKind::Aggregate),
        ]
    }

    #[test]
    fn depth_limits_traversal() {
        let graph = ColumnGraph::build(&chain());
        assert_eq!(graph.impact("+d.s.d.z", 10).len(), 3);
        assert_eq!(graph.impact("+d.s.d.z", 2).len(), 2);
        assert_eq!(graph.impact("d.s.a.x+", 1)[0].to, ColumnRef::new("d.s.b", "x"));
    }

    #[test]
    fn both_directions_from_the_middle() {
        let graph = ColumnGraph::build(&chain());
        let edges = graph.impact("s.c.y", 10);
        let directions: Vec<Direction> = edges.iter().map(|e| e.direction).collect();
        assert_eq!(
            directions,
            vec![Direction::Upstream, Direction::Upstream, Direction::Downstream]
        );
    }

    #[test]
    fn fingerprint_ignores_input_order() {
        let mut reversed = chain();
        reversed.reverse();
        assert_eq!(ColumnGraph::build(&chain()).fingerprint(), ColumnGraph::build(&reversed).fingerprint());
    }

    #[test]
    fn degenerate_selectors_return_nothing() {
        let graph = ColumnGraph::build(&chain());
        for text in [".", "..", "ns..", ""] {
            assert!(graph.impact(text, 10).is_empty());
        }
    }
}
