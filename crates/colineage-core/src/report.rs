//! Report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::diagnostic::{Diagnostic, Severity};
use crate::object::{ColumnLineage, ObjectKind, ResolvedObject};
use crate::schema::{Column, Nullability};
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Summary statistics for a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of diagnostics
    pub total: usize,

    /// Number of errors
    pub errors: usize,

    /// Number of warnings
    pub warnings: usize,

    /// Number of info messages
    pub info: usize,

    /// Number of objects resolved
    pub objects: usize,

    /// Number of column lineage edges
    pub edges: usize,
}

/// Extraction report (report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: ReportSummary,

    /// All diagnostics
    pub diagnostics: Vec<Diagnostic>,

    /// Deterministic fingerprint of the column graph
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Report {
    /// Create a report from diagnostics
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        let summary = ReportSummary {
            total: diagnostics.len(),
            errors: diagnostics.iter().filter(|d| d.severity == Severity::Error).count(),
            warnings: diagnostics.iter().filter(|d| d.severity == Severity::Warn).count(),
            info: diagnostics.iter().filter(|d| d.severity == Severity::Info).count(),
            objects: 0,
            edges: 0,
        };

        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary,
            diagnostics,
            fingerprint: None,
        }
    }

    /// Set graph statistics
    pub fn with_graph(mut self, objects: usize, edges: usize, fingerprint: String) -> Self {
        self.summary.objects = objects;
        self.summary.edges = edges;
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Column entry of a schema descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,

    #[serde(rename = "type")]
    pub data_type: String,

    pub nullable: Nullability,

    pub ordinal: usize,
}

impl From<&Column> for ColumnDescriptor {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.logical_type.to_string(),
            nullable: column.nullable,
            ordinal: column.ordinal,
        }
    }
}

/// Per-object output: schema descriptor paired with column lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub name: String,

    pub kind: ObjectKind,

    /// Fully qualified namespace URI of the object, when configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub schema: Vec<ColumnDescriptor>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<ColumnLineage>,

    pub dependencies: Vec<String>,
}

impl ObjectDescriptor {
    /// Describe a resolved object
    pub fn new(object: &ResolvedObject, namespace: Option<&str>) -> Self {
        let lineage = if object.lineage.iter().any(ColumnLineage::is_resolved) {
            object.lineage.clone()
        } else {
            Vec::new()
        };
        Self {
            name: object.name.clone(),
            kind: object.kind,
            namespace: namespace.map(|ns| format!("{}/{}", ns.trim_end_matches('/'), object.name)),
            schema: object.schema.columns.iter().map(ColumnDescriptor::from).collect(),
            lineage,
            dependencies: object.dependencies.iter().cloned().collect(),
        }
    }
}

/// Diff change type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    ObjectAdded,
    ObjectRemoved,
    ColumnAdded,
    ColumnRemoved,
    ColumnRenamed,
    ColumnTypeChanged,
    NullabilityTightened,
    NullabilityRelaxed,
    LineageSemanticChanged,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ObjectAdded => "OBJECT_ADDED",
            Self::ObjectRemoved => "OBJECT_REMOVED",
            Self::ColumnAdded => "COLUMN_ADDED",
            Self::ColumnRemoved => "COLUMN_REMOVED",
            Self::ColumnRenamed => "COLUMN_RENAMED",
            Self::ColumnTypeChanged => "COLUMN_TYPE_CHANGED",
            Self::NullabilityTightened => "NULLABILITY_TIGHTENED",
            Self::NullabilityRelaxed => "NULLABILITY_RELAXED",
            Self::LineageSemanticChanged => "LINEAGE_SEMANTIC_CHANGED",
        };
        write!(f, "{}", s)
    }
}

/// Diff severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSeverity {
    NonBreaking,
    PotentiallyBreaking,
    Breaking,
}

impl std::fmt::Display for ChangeSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonBreaking => write!(f, "NON_BREAKING"),
            Self::PotentiallyBreaking => write!(f, "POTENTIALLY_BREAKING"),
            Self::Breaking => write!(f, "BREAKING"),
        }
    }
}

/// One diff finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Canonical object name
    pub object: String,

    /// Column name, for column-level changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    pub change_type: ChangeType,

    pub severity: ChangeSeverity,

    /// Column as it was in base
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Column>,

    /// Column as it is in head
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Column>,

    /// Human-readable explanation
    pub message: String,

    /// Downstream columns reached from the changed column in the base graph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact: Vec<String>,
}

/// Process exit tier derived from a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// No changes
    Clean,

    /// Only changes below the failure threshold
    NonBreaking,

    /// At least one change at or above the failure threshold
    Breaking,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::NonBreaking => 1,
            Self::Breaking => 2,
        }
    }
}

/// Diff output: ordered change records and the overall severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub version: ReportVersion,

    pub changes: Vec<ChangeRecord>,

    /// Maximum severity; `None` when there are no changes
    pub severity: Option<ChangeSeverity>,
}

impl DiffReport {
    /// Build a report, deriving the overall severity
    pub fn new(changes: Vec<ChangeRecord>) -> Self {
        let severity = changes.iter().map(|c| c.severity).max();
        Self {
            version: ReportVersion::CURRENT,
            changes,
            severity,
        }
    }

    /// Whether nothing changed
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }

    /// Three-tier exit status against a failure threshold
    pub fn exit_status(&self, fail_on: ChangeSeverity) -> ExitStatus {
        match self.severity {
            None => ExitStatus::Clean,
            Some(severity) if severity >= fail_on => ExitStatus::Breaking,
            Some(_) => ExitStatus::NonBreaking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticCode;
    use crate::schema::LogicalType;

    fn record(severity: ChangeSeverity) -> ChangeRecord {
        ChangeRecord {
            object: "dw.dbo.fct_sales".to_string(),
            column: Some("Revenue".to_string()),
            change_type: ChangeType::ColumnTypeChanged,
            severity,
            before: Some(Column::new("Revenue", LogicalType::decimal(18, 2))),
            after: Some(Column::new("Revenue", LogicalType::Int)),
            message: "type changed".to_string(),
            impact: Vec::new(),
        }
    }

    #[test]
    fn report_summary_counts() {
        let report = Report::from_diagnostics(vec![
            Diagnostic::warn(DiagnosticCode::RecoveryUsed, "recovered"),
            Diagnostic::info(DiagnosticCode::UnresolvedDependency, "external"),
        ])
        .with_graph(3, 7, "abc".to_string());

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.summary.info, 1);
        assert_eq!(report.summary.edges, 7);
        assert_eq!(report.version.to_string(), "1.0");
    }

    #[test]
    fn severity_ordering() {
        assert!(ChangeSeverity::Breaking > ChangeSeverity::PotentiallyBreaking);
        assert!(ChangeSeverity::PotentiallyBreaking > ChangeSeverity::NonBreaking);
    }

    #[test]
    fn exit_status_is_three_way() {
        let empty = DiffReport::new(vec![]);
        assert_eq!(empty.severity, None);
        assert_eq!(empty.exit_status(ChangeSeverity::PotentiallyBreaking).code(), 0);

        let minor = DiffReport::new(vec![record(ChangeSeverity::NonBreaking)]);
        assert_eq!(minor.exit_status(ChangeSeverity::PotentiallyBreaking), ExitStatus::NonBreaking);

        let major = DiffReport::new(vec![
            record(ChangeSeverity::NonBreaking),
            record(ChangeSeverity::Breaking),
        ]);
        assert_eq!(major.severity, Some(ChangeSeverity::Breaking));
        assert_eq!(major.exit_status(ChangeSeverity::PotentiallyBreaking).code(), 2);
    }

    #[test]
    fn change_record_serialization() {
        let json = serde_json::to_string(&record(ChangeSeverity::Breaking)).unwrap();
        assert!(json.contains("\"COLUMN_TYPE_CHANGED\""));
        assert!(json.contains("\"BREAKING\""));
        assert!(!json.contains("impact"));
    }
}
