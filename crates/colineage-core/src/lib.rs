//! colineage core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod schema;
pub mod object;
pub mod plan;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use schema::{LogicalType, Column, Schema, Nullability, TypeChange};
pub use object::{
    ColumnLineage, ColumnRef, LineageInput, ObjectBody, ObjectInfo, ObjectKind, QualifiedName,
    ResolvedObject, SetOpKind, TransformationKind,
};
pub use plan::{
    AggregateKind, BinaryClass, FunctionClass, ProjectionItem, QueryPlan, Relation, ScalarExpr,
    SelectPlan, SourceBinding,
};
pub use report::{
    ChangeRecord, ChangeSeverity, ChangeType, ColumnDescriptor, DiffReport, ExitStatus,
    ObjectDescriptor, Report, ReportVersion,
};
pub use config::{CatalogFile, CatalogTable, Config, ConfigError, DialectConfig};
