//! Object and column graphs
//!
//! [`ObjectGraph`] orders objects so every dependency resolves first.
//! [`ColumnGraph`] links fully-qualified columns through resolved lineage and
//! answers impact queries expressed as [`Selector`]s. [`render_html`] draws
//! it as a standalone page.

pub mod column_graph;
pub mod object_graph;
pub mod selector;
pub mod viz;

pub use column_graph::{ColumnEdge, ColumnGraph, ColumnNode, ImpactEdge};
pub use object_graph::ObjectGraph;
pub use selector::{Direction, Pattern, Selector, SelectorError};
pub use viz::{render_html, VizOptions};
