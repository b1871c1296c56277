//! Standalone HTML rendering of a column graph
//!
//! Objects become cards listing the columns that take part in at least one
//! edge; edges become wires between column ports. The page carries its data
//! as embedded JSON and lays itself out in the browser.

use crate::column_graph::{ColumnGraph, ColumnNode};
use colineage_core::TransformationKind;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const TEMPLATE: &str = include_str!("../assets/lineage.html");

/// What part of the graph to draw
#[derive(Debug, Clone, Default)]
pub struct VizOptions {
    /// Selector limiting the page to its impact edges; `None` draws everything
    pub focus: Option<String>,

    /// Hop limit applied to `focus`
    pub max_depth: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Table {
    id: String,
    label: String,
    columns: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
struct Port {
    table: String,
    column: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
struct Wire {
    from: Port,
    to: Port,
    transformation: String,

    /// Anything other than a plain copy
    strong: bool,
    description: String,
}

#[derive(Debug, Serialize)]
struct PageConfig<'a> {
    focus: Option<&'a str>,
    depth: usize,
}

/// Render `graph` as a self-contained HTML document
pub fn render_html(graph: &ColumnGraph, options: &VizOptions) -> Result<String, serde_json::Error> {
    let wires = match &options.focus {
        Some(selector) => focus_wires(graph, selector, options.max_depth),
        None => all_wires(graph),
    };
    let tables = tables(&wires);

    tracing::debug!(tables = tables.len(), wires = wires.len(), "rendering lineage page");

    let config = PageConfig {
        focus: options.focus.as_deref(),
        depth: options.max_depth,
    };

    Ok(TEMPLATE
        .replace("__TABLES__", &script_json(&tables)?)
        .replace("__EDGES__", &script_json(&wires)?)
        .replace("__CONFIG__", &script_json(&config)?))
}

fn all_wires(graph: &ColumnGraph) -> Vec<Wire> {
    graph
        .edges()
        .map(|edge| {
            wire(
                graph,
                &edge.from,
                &edge.to,
                edge.transformation,
                graph.describe(edge),
            )
        })
        .collect()
}

fn focus_wires(graph: &ColumnGraph, selector: &str, max_depth: usize) -> Vec<Wire> {
    let mut seen = BTreeSet::new();
    graph
        .impact(selector, max_depth)
        .into_iter()
        .filter(|edge| seen.insert((edge.from.clone(), edge.to.clone())))
        .map(|edge| wire(graph, &edge.from, &edge.to, edge.transformation, edge.description))
        .collect()
}

fn wire(
    graph: &ColumnGraph,
    from: &ColumnNode,
    to: &ColumnNode,
    transformation: TransformationKind,
    description: String,
) -> Wire {
    Wire {
        from: port(graph, from),
        to: port(graph, to),
        transformation: transformation.to_string(),
        strong: transformation != TransformationKind::Identity,
        description,
    }
}

fn port(graph: &ColumnGraph, node: &ColumnNode) -> Port {
    Port {
        table: node.object.clone(),
        column: graph.column_name(node).to_string(),
    }
}

/// One card per object seen on either end of a wire
fn tables(wires: &[Wire]) -> Vec<Table> {
    let mut columns: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for wire in wires {
        for port in [&wire.from, &wire.to] {
            columns
                .entry(port.table.as_str())
                .or_default()
                .insert(port.column.as_str());
        }
    }

    columns
        .into_iter()
        .map(|(id, columns)| Table {
            id: id.to_string(),
            label: id.rsplit('.').next().unwrap_or(id).to_string(),
            columns: columns.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

/// JSON safe to splice into a `<script>` element; `__` only occurs inside
/// strings and is escaped so data never forms a template placeholder
fn script_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(value)?
        .replace("</", "<\\/")
        .replace("__", "_\\u005f"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use colineage_core::{
        Column, ColumnLineage, ColumnRef, LineageInput, LogicalType, ObjectKind, ResolvedObject, Schema,
    };
    use pretty_assertions::assert_eq;

    fn view(name: &str, column: &str, sources: &[(&str, &str, TransformationKind)]) -> ResolvedObject {
        let inputs = sources.iter().map(|(object, source, kind)| LineageInput {
            source: ColumnRef::new(*object, source),
            transformation: *kind,
            expression: String::new(),
        });
        ResolvedObject {
            name: name.to_string(),
            kind: ObjectKind::View,
            schema: Schema::from_columns(vec![Column::new(column, LogicalType::Int)]),
            lineage: vec![ColumnLineage::new(column, inputs)],
            dependencies: sources.iter().map(|(object, _, _)| object.to_string()).collect(),
            star_sources: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn graph() -> ColumnGraph {
        ColumnGraph::build(&[
            view(
                "dw.dbo.stage",
                "Amount",
                &[("dw.dbo.orders", "amount", TransformationKind::Identity)],
            ),
            view(
                "dw.dbo.fct_sales",
                "Revenue",
                &[
                    ("dw.dbo.stage", "amount", TransformationKind::Arithmetic),
                    ("dw.dbo.rates", "rate", TransformationKind::Arithmetic),
                ],
            ),
        ])
    }

    /// The JSON assigned to `const <name> = ...;` in the page
    fn embedded(html: &str, name: &str) -> serde_json::Value {
        let prefix = format!("const {} = ", name);
        let line = html
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with(&prefix))
            .unwrap();
        serde_json::from_str(line[prefix.len()..].trim_end_matches(';')).unwrap()
    }

    #[test]
    fn every_edge_is_drawn() {
        let graph = graph();
        let html = render_html(&graph, &VizOptions::default()).unwrap();

        let edges = embedded(&html, "EDGES");
        let edges = edges.as_array().unwrap();
        assert_eq!(edges.len(), graph.edge_count());

        for edge in graph.edges() {
            let drawn = edges.iter().any(|wire| {
                wire["from"]["table"] == edge.from.object.as_str()
                    && wire["from"]["column"] == graph.column_name(&edge.from)
                    && wire["to"]["table"] == edge.to.object.as_str()
                    && wire["to"]["column"] == graph.column_name(&edge.to)
            });
            assert!(drawn, "missing wire {} -> {}", edge.from, edge.to);
        }
    }

    #[test]
    fn cards_list_sorted_columns_with_declared_case() {
        let html = render_html(&graph(), &VizOptions::default()).unwrap();
        let tables = embedded(&html, "TABLES");

        let ids: Vec<&str> = tables
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["dw.dbo.fct_sales", "dw.dbo.orders", "dw.dbo.rates", "dw.dbo.stage"]);

        assert_eq!(tables[0]["label"], "fct_sales");
        assert_eq!(tables[0]["columns"], serde_json::json!(["Revenue"]));
        assert_eq!(tables[3]["columns"], serde_json::json!(["Amount"]));
    }

    #[test]
    fn identity_wires_are_weak() {
        let html = render_html(&graph(), &VizOptions::default()).unwrap();
        let edges = embedded(&html, "EDGES");
        for wire in edges.as_array().unwrap() {
            let identity = wire["transformation"] == "IDENTITY";
            assert_eq!(wire["strong"], !identity);
        }
    }

    #[test]
    fn focus_limits_the_page_to_impact_edges() {
        let options = VizOptions {
            focus: Some("+fct_sales.revenue".to_string()),
            max_depth: 1,
        };
        let html = render_html(&graph(), &options).unwrap();

        let edges = embedded(&html, "EDGES");
        assert_eq!(edges.as_array().unwrap().len(), 2);
        assert_eq!(embedded(&html, "CONFIG")["focus"], "+fct_sales.revenue");
        assert_eq!(embedded(&html, "CONFIG")["depth"], 1);
    }

    #[test]
    fn script_end_tags_are_escaped() {
        let json = script_json(&"</script>").unwrap();
        assert!(!json.contains("</"));
    }

    #[test]
    fn names_shaped_like_placeholders_survive() {
        let graph = ColumnGraph::build(&[view(
            "dw.dbo.__edges__",
            "x",
            &[("dw.dbo.src", "x", TransformationKind::Identity)],
        )]);
        let html = render_html(&graph, &VizOptions::default()).unwrap();

        let edges = embedded(&html, "EDGES");
        assert_eq!(edges[0]["to"]["table"], "dw.dbo.__edges__");
    }
}
