//! Base/head comparison
//!
//! Compares two independently resolved snapshots object by object and
//! column by column. Severity comes from a fixed table keyed by change type,
//! refined only by nullability and `*` exposure of added columns.

use crate::pipeline::Snapshot;
use colineage_core::{
    ChangeRecord, ChangeSeverity, ChangeType, Column, ColumnLineage, ColumnRef, DiffReport,
    Nullability, ObjectKind, ResolvedObject, TransformationKind, TypeChange,
};
use colineage_graph::ColumnGraph;
use std::collections::{BTreeMap, BTreeSet};

/// Default hop limit for impact lists attached to change records
pub const DEFAULT_IMPACT_DEPTH: usize = 10;

/// Classifies schema and lineage changes between two corpora
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    /// Hop limit when collecting downstream impact in the base graph
    pub max_depth: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_IMPACT_DEPTH,
        }
    }
}

/// Lineage of one column as a comparable set of (source, kind, expression)
type Signature<'a> = BTreeSet<(&'a ColumnRef, TransformationKind, &'a str)>;

impl DiffEngine {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Compare two snapshots
    pub fn compare(&self, base: &Snapshot, head: &Snapshot) -> DiffReport {
        self.diff(&base.column_graph, &base.objects, &head.column_graph, &head.objects)
    }

    /// Compare resolved objects
    ///
    /// Impact of removed or changed columns comes from the base graph; impact
    /// of added columns and objects comes from the head graph.
    pub fn diff(
        &self,
        base_graph: &ColumnGraph,
        base_objects: &[ResolvedObject],
        head_graph: &ColumnGraph,
        head_objects: &[ResolvedObject],
    ) -> DiffReport {
        let base = index(base_objects);
        let head = index(head_objects);
        let exposed: BTreeSet<&str> = head_objects
            .iter()
            .flat_map(|o| o.star_sources.iter().map(String::as_str))
            .collect();

        let names: BTreeSet<&str> = base.keys().chain(head.keys()).copied().collect();
        let mut changes = Vec::new();

        for name in names {
            match (base.get(name), head.get(name)) {
                (Some(before), None) => {
                    let impact = self.object_impact(base_graph, before);
                    changes.push(ChangeRecord {
                        object: name.to_string(),
                        column: None,
                        change_type: ChangeType::ObjectRemoved,
                        severity: ChangeSeverity::Breaking,
                        before: None,
                        after: None,
                        message: format!("{} '{}' was removed", before.kind, name),
                        impact,
                    });
                }
                (None, Some(after)) => changes.push(ChangeRecord {
                    object: name.to_string(),
                    column: None,
                    change_type: ChangeType::ObjectAdded,
                    severity: ChangeSeverity::Breaking,
                    before: None,
                    after: None,
                    message: format!("{} '{}' was added", after.kind, name),
                    impact: self.object_impact(head_graph, after),
                }),
                (Some(before), Some(after)) => {
                    let graphs = (base_graph, head_graph);
                    let star_exposed = exposed.contains(name);
                    self.diff_object(graphs, before, after, star_exposed, &mut changes);
                }
                (None, None) => {}
            }
        }

        changes.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        let report = DiffReport::new(changes);
        tracing::info!(
            changes = report.changes.len(),
            severity = ?report.severity,
            "diff complete"
        );
        report
    }

    fn diff_object(
        &self,
        (base_graph, head_graph): (&ColumnGraph, &ColumnGraph),
        before: &ResolvedObject,
        after: &ResolvedObject,
        star_exposed: bool,
        changes: &mut Vec<ChangeRecord>,
    ) {
        let object = before.name.as_str();
        let removed: Vec<&Column> = before
            .schema
            .columns
            .iter()
            .filter(|c| after.schema.find_column(&c.name).is_none())
            .collect();
        let mut added: Vec<&Column> = after
            .schema
            .columns
            .iter()
            .filter(|c| before.schema.find_column(&c.name).is_none())
            .collect();

        for old in removed {
            let old_signature = signature(before.lineage_of(&old.name));
            let renamed = (!old_signature.is_empty())
                .then(|| {
                    added
                        .iter()
                        .position(|new| signature(after.lineage_of(&new.name)) == old_signature)
                })
                .flatten();

            let impact = self.impact(base_graph, object, &old.name);
            match renamed {
                Some(index) => {
                    let new = added.remove(index);
                    changes.push(ChangeRecord {
                        object: object.to_string(),
                        column: Some(new.name.clone()),
                        change_type: ChangeType::ColumnRenamed,
                        severity: ChangeSeverity::PotentiallyBreaking,
                        before: Some(old.clone()),
                        after: Some(new.clone()),
                        message: format!("Column '{}' renamed to '{}'", old.name, new.name),
                        impact,
                    });
                }
                None => changes.push(ChangeRecord {
                    object: object.to_string(),
                    column: Some(old.name.clone()),
                    change_type: ChangeType::ColumnRemoved,
                    severity: ChangeSeverity::Breaking,
                    before: Some(old.clone()),
                    after: None,
                    message: format!("Column '{}' was removed", old.name),
                    impact,
                }),
            }
        }

        for new in added {
            let severity = if new.nullable == Nullability::Yes && !star_exposed {
                ChangeSeverity::NonBreaking
            } else {
                ChangeSeverity::PotentiallyBreaking
            };
            let detail = if star_exposed {
                " and is exposed through SELECT *"
            } else {
                ""
            };
            changes.push(ChangeRecord {
                object: object.to_string(),
                column: Some(new.name.clone()),
                change_type: ChangeType::ColumnAdded,
                severity,
                before: None,
                after: Some(new.clone()),
                message: format!("Column '{}' ({}) was added{}", new.name, new.nullable, detail),
                impact: self.impact(head_graph, object, &new.name),
            });
        }

        for old in &before.schema.columns {
            let Some(new) = after.schema.find_column(&old.name) else {
                continue;
            };
            self.diff_column(base_graph, before, after, old, new, changes);
        }
    }

    fn diff_column(
        &self,
        base_graph: &ColumnGraph,
        before: &ResolvedObject,
        after: &ResolvedObject,
        old: &Column,
        new: &Column,
        changes: &mut Vec<ChangeRecord>,
    ) {
        let object = before.name.as_str();
        let record = |change_type: ChangeType, severity: ChangeSeverity, message: String| ChangeRecord {
            object: object.to_string(),
            column: Some(new.name.clone()),
            change_type,
            severity,
            before: Some(old.clone()),
            after: Some(new.clone()),
            message,
            impact: self.impact(base_graph, object, &old.name),
        };

        match old.logical_type.compare(&new.logical_type) {
            TypeChange::Narrowing => changes.push(record(
                ChangeType::ColumnTypeChanged,
                ChangeSeverity::Breaking,
                format!(
                    "Column '{}' narrowed from {} to {}",
                    new.name, old.logical_type, new.logical_type
                ),
            )),
            TypeChange::Widening => changes.push(record(
                ChangeType::ColumnTypeChanged,
                ChangeSeverity::NonBreaking,
                format!(
                    "Column '{}' widened from {} to {}",
                    new.name, old.logical_type, new.logical_type
                ),
            )),
            TypeChange::Same | TypeChange::Indeterminate => {}
        }

        match (old.nullable, new.nullable) {
            (Nullability::Yes, Nullability::No) => changes.push(record(
                ChangeType::NullabilityTightened,
                ChangeSeverity::PotentiallyBreaking,
                format!("Column '{}' is no longer nullable", new.name),
            )),
            (Nullability::No, Nullability::Yes) => changes.push(record(
                ChangeType::NullabilityRelaxed,
                ChangeSeverity::PotentiallyBreaking,
                format!("Column '{}' became nullable", new.name),
            )),
            _ => {}
        }

        let lineage_changed = match (before.lineage_of(&old.name), after.lineage_of(&new.name)) {
            (Some(a), Some(b)) => a.sources() != b.sources() || a.kinds() != b.kinds(),
            (a, b) => a.or(b).is_some_and(ColumnLineage::is_resolved),
        };
        if lineage_changed {
            changes.push(record(
                ChangeType::LineageSemanticChanged,
                ChangeSeverity::PotentiallyBreaking,
                format!("Column '{}' is derived differently", new.name),
            ));
        }
    }

    /// Downstream columns of every column of `object`, sorted
    fn object_impact(&self, graph: &ColumnGraph, object: &ResolvedObject) -> Vec<String> {
        object
            .schema
            .columns
            .iter()
            .flat_map(|c| self.impact(graph, &object.name, &c.name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Downstream columns of `object.column` in `graph`, sorted
    fn impact(&self, graph: &ColumnGraph, object: &str, column: &str) -> Vec<String> {
        let seed = ColumnRef::new(object, column);
        let reached: BTreeSet<String> = graph
            .impact(&format!("{}+", seed), self.max_depth)
            .into_iter()
            .map(|edge| graph.label(&edge.to))
            .collect();
        reached.into_iter().collect()
    }
}

/// Objects worth diffing, by name; temp tables belong to their owner
fn index(objects: &[ResolvedObject]) -> BTreeMap<&str, &ResolvedObject> {
    objects
        .iter()
        .filter(|o| o.kind != ObjectKind::TempTable)
        .map(|o| (o.name.as_str(), o))
        .collect()
}

fn signature(lineage: Option<&ColumnLineage>) -> Signature<'_> {
    lineage
        .map(|l| {
            l.inputs
                .iter()
                .map(|i| (&i.source, i.transformation, i.expression.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

/// (object, column ordinal, change type)
fn sort_key(record: &ChangeRecord) -> (&str, usize, ChangeType) {
    let ordinal = record
        .after
        .as_ref()
        .or(record.before.as_ref())
        .map_or(0, |c| c.ordinal);
    (record.object.as_str(), ordinal, record.change_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use colineage_core::{LineageInput, LogicalType, Schema};
    use pretty_assertions::assert_eq;

    fn object(name: &str, columns: Vec<(Column, &str)>) -> ResolvedObject {
        let lineage = columns
            .iter()
            .map(|(column, source)| {
                ColumnLineage::new(
                    column.name.clone(),
                    [LineageInput {
                        source: ColumnRef::new("dw.dbo.orders", source),
                        transformation: TransformationKind::Identity,
                        expression: format!("o.{}", source),
                    }],
                )
            })
            .collect();
        ResolvedObject {
            name: name.to_string(),
            kind: ObjectKind::View,
            schema: Schema::from_columns(columns.into_iter().map(|(c, _)| c).collect()),
            lineage,
            dependencies: BTreeSet::from(["dw.dbo.orders".to_string()]),
            star_sources: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    fn diff(base: &[ResolvedObject], head: &[ResolvedObject]) -> DiffReport {
        DiffEngine::default().diff(
            &ColumnGraph::build(base),
            base,
            &ColumnGraph::build(head),
            head,
        )
    }

    fn column(name: &str, logical_type: LogicalType, nullable: Nullability) -> Column {
        Column::new(name, logical_type).with_nullability(nullable)
    }

    #[test]
    fn identical_inputs_have_no_changes() {
        let objects = vec![object(
            "dw.dbo.v",
            vec![(column("OrderID", LogicalType::Int, Nullability::No), "OrderID")],
        )];
        let report = diff(&objects, &objects);
        assert!(report.is_clean());
        assert_eq!(report.severity, None);
    }

    #[test]
    fn added_column_severity_follows_nullability() {
        let base = vec![object(
            "dw.dbo.v",
            vec![(column("OrderID", LogicalType::Int, Nullability::No), "OrderID")],
        )];
        let nullable = vec![object(
            "dw.dbo.v",
            vec![
                (column("OrderID", LogicalType::Int, Nullability::No), "OrderID"),
                (column("Note", LogicalType::varchar(20), Nullability::Yes), "Note"),
            ],
        )];
        assert_eq!(diff(&base, &nullable).severity, Some(ChangeSeverity::NonBreaking));

        let required = vec![object(
            "dw.dbo.v",
            vec![
                (column("OrderID", LogicalType::Int, Nullability::No), "OrderID"),
                (column("Note", LogicalType::varchar(20), Nullability::No), "Note"),
            ],
        )];
        assert_eq!(diff(&base, &required).severity, Some(ChangeSeverity::PotentiallyBreaking));

        let mut exposed = nullable.clone();
        let mut consumer = object("dw.dbo.consumer", Vec::new());
        consumer.star_sources.insert("dw.dbo.v".to_string());
        exposed.push(consumer.clone());
        let mut base_with_consumer = base.clone();
        base_with_consumer.push(consumer);
        assert_eq!(
            diff(&base_with_consumer, &exposed).severity,
            Some(ChangeSeverity::PotentiallyBreaking)
        );
    }

    #[test]
    fn nullability_changes_both_ways() {
        let strict = vec![object(
            "dw.dbo.v",
            vec![(column("Amount", LogicalType::Int, Nullability::No), "Amount")],
        )];
        let loose = vec![object(
            "dw.dbo.v",
            vec![(column("Amount", LogicalType::Int, Nullability::Yes), "Amount")],
        )];
        let relaxed = diff(&strict, &loose);
        assert_eq!(relaxed.changes[0].change_type, ChangeType::NullabilityRelaxed);
        let tightened = diff(&loose, &strict);
        assert_eq!(tightened.changes[0].change_type, ChangeType::NullabilityTightened);
        assert_eq!(tightened.severity, Some(ChangeSeverity::PotentiallyBreaking));
    }

    #[test]
    fn added_column_impact_comes_from_head_graph() {
        let base = vec![object(
            "dw.dbo.v",
            vec![(column("OrderID", LogicalType::Int, Nullability::No), "OrderID")],
        )];
        let v = object(
            "dw.dbo.v",
            vec![
                (column("OrderID", LogicalType::Int, Nullability::No), "OrderID"),
                (column("Note", LogicalType::varchar(20), Nullability::Yes), "Note"),
            ],
        );
        let mut report = object(
            "dw.dbo.report",
            vec![(column("Note", LogicalType::varchar(20), Nullability::Yes), "Note")],
        );
        report.lineage[0].inputs[0].source = ColumnRef::new("dw.dbo.v", "Note");
        let head = vec![v, report];

        let result = diff(&base, &head);
        let added = result
            .changes
            .iter()
            .find(|c| c.change_type == ChangeType::ColumnAdded)
            .unwrap();
        assert_eq!(added.impact, vec!["dw.dbo.report.Note".to_string()]);

        let new_object = result
            .changes
            .iter()
            .find(|c| c.change_type == ChangeType::ObjectAdded)
            .unwrap();
        assert_eq!(new_object.object, "dw.dbo.report");
        assert!(new_object.impact.is_empty());
    }

    #[test]
    fn temp_tables_are_not_compared() {
        let mut temp = object("dw.dbo.p#stage", Vec::new());
        temp.kind = ObjectKind::TempTable;
        let report = diff(&[temp], &[]);
        assert!(report.is_clean());
    }

    #[test]
    fn objects_added_and_removed_are_breaking() {
        let base = vec![object("dw.dbo.old", Vec::new())];
        let head = vec![object("dw.dbo.new", Vec::new())];
        let report = diff(&base, &head);
        let types: Vec<ChangeType> = report.changes.iter().map(|c| c.change_type).collect();
        assert_eq!(types, vec![ChangeType::ObjectAdded, ChangeType::ObjectRemoved]);
        assert_eq!(report.severity, Some(ChangeSeverity::Breaking));
    }
}
