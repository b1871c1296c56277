//! Grammar parsing through the dialect's `sqlparser` grammar
//!
//! Parses preprocessed SQL into statements and turns parser errors into
//! diagnostics.

use crate::dialect::SqlDialect;
use colineage_core::{Diagnostic, DiagnosticCode, Location, Severity};
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::parser::ParserError;
use std::sync::LazyLock;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Line: (\d+)").unwrap());

/// SQL parser bound to a dialect
pub struct SqlParser<'a> {
    dialect: &'a dyn SqlDialect,
}

impl<'a> SqlParser<'a> {
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self { dialect }
    }

    /// Parse SQL into statements
    pub fn parse(&self, sql: &str, path: Option<&str>) -> Result<ParsedSql, ParseFailure> {
        match self.dialect.parse(sql) {
            Ok(statements) => Ok(ParsedSql {
                statements,
                path: path.map(str::to_string),
            }),
            Err(error) => Err(ParseFailure::new(error, path)),
        }
    }
}

/// Successfully parsed SQL
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Parsed statements in source order
    pub statements: Vec<Statement>,

    /// Source path, when known
    pub path: Option<String>,
}

impl ParsedSql {
    /// Number of statements
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Whether the text is a single bare query
    pub fn is_select(&self) -> bool {
        matches!(self.statements.as_slice(), [Statement::Query(_)])
    }
}

/// Grammar parse failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("SQL parse error: {message}")]
pub struct ParseFailure {
    /// Parser message
    pub message: String,

    /// 1-based line of the error, when the parser reports one
    pub line: Option<usize>,

    /// Source path
    pub path: Option<String>,
}

impl ParseFailure {
    pub fn new(error: ParserError, path: Option<&str>) -> Self {
        let message = error.to_string();
        let line = LINE_RE
            .captures(&message)
            .and_then(|c| c[1].parse::<usize>().ok());
        Self {
            message,
            line,
            path: path.map(str::to_string),
        }
    }

    /// Convert to a diagnostic; grammar failures are warnings because
    /// recovery follows
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::new(
            DiagnosticCode::ParseFailure,
            Severity::Warn,
            format!("Failed to parse SQL: {}", self.message),
        );

        if let Some(path) = &self.path {
            let location = match self.line {
                Some(line) => Location::with_line(path.clone(), line),
                None => Location::new(path.clone()),
            };
            diag = diag.with_location(location);
        }

        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Ansi, MsSql};

    #[test]
    fn parse_simple_select() {
        let dialect = Ansi;
        let parser = SqlParser::new(&dialect);
        let parsed = parser
            .parse("SELECT id, name FROM users WHERE active = true", None)
            .unwrap();
        assert_eq!(parsed.statement_count(), 1);
        assert!(parsed.is_select());
    }

    #[test]
    fn parse_with_cte() {
        let dialect = MsSql;
        let parser = SqlParser::new(&dialect);
        let sql = r#"
            WITH active_users AS (
                SELECT * FROM users WHERE active = 1
            )
            SELECT id, name FROM active_users
        "#;
        assert!(parser.parse(sql, None).unwrap().is_select());
    }

    #[test]
    fn parse_invalid_sql() {
        let dialect = MsSql;
        let parser = SqlParser::new(&dialect);
        let error = parser
            .parse("SELECT *\nFROM (", Some("models/bad.sql"))
            .unwrap_err();

        let diag = error.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::ParseFailure);
        assert_eq!(diag.severity, Severity::Warn);
        assert_eq!(diag.location.map(|l| l.file), Some("models/bad.sql".to_string()));
    }
}
