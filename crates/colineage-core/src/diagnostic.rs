//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Analysis (1xxx)
    /// The grammar parser could not produce an AST; recovery was attempted
    ParseFailure,

    /// Pattern-based recovery produced (part of) the object
    RecoveryUsed,

    /// Recognized but unhandled syntax (PIVOT, dynamic SQL, ...)
    UnsupportedConstruct,

    // Resolution (2xxx)
    /// A column or table reference cannot be matched to any known schema
    UnresolvedIdentifier,

    /// An unqualified column matches more than one source
    AmbiguousIdentifier,

    /// SELECT * encountered but the input schema is unknown
    SelectStarUnexpandable,

    /// Set-operation operand schemas are incompatible
    SchemaMismatch,

    // Graph (3xxx)
    /// A dependency cycle was found and an edge was removed
    CyclicDependency,

    /// A dependency names an object outside the analyzed corpus
    UnresolvedDependency,

    /// Two source units define the same canonical object
    DuplicateObject,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseFailure => "PARSE_FAILURE",
            Self::RecoveryUsed => "RECOVERY_USED",
            Self::UnsupportedConstruct => "UNSUPPORTED_CONSTRUCT",
            Self::UnresolvedIdentifier => "UNRESOLVED_IDENTIFIER",
            Self::AmbiguousIdentifier => "AMBIGUOUS_IDENTIFIER",
            Self::SelectStarUnexpandable => "SELECT_STAR_UNEXPANDABLE",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::CyclicDependency => "CYCLIC_DEPENDENCY",
            Self::UnresolvedDependency => "UNRESOLVED_DEPENDENCY",
            Self::DuplicateObject => "DUPLICATE_OBJECT",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - result is best-effort
    Warn,

    /// Error - the object could not be analyzed meaningfully
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to the scanned directory
    pub file: String,

    /// Optional line number (1-indexed)
    pub line: Option<usize>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
        }
    }

    /// Create a location with file and line number
    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Canonical name of the object the diagnostic belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    /// Source location (best-effort)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Offending expression or statement text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            object: None,
            location: None,
            expression: None,
        }
    }

    /// Shorthand for a warning
    pub fn warn(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warn, message)
    }

    /// Shorthand for an informational diagnostic
    pub fn info(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Info, message)
    }

    /// Set the owning object
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the offending expression
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(object) = &self.object {
            write!(f, " ({})", object)?;
        }
        Ok(())
    }
}
