//! SQL analysis: dialects, preprocessing, parsing and lowering to query plans
//!
//! The entry point is [`StatementAnalyzer`], which turns one source unit into
//! an [`ObjectInfo`](colineage_core::ObjectInfo). The grammar path lowers the
//! `sqlparser` AST; when it fails, recovery works from the token stream.

pub mod analyzer;
pub mod context;
pub mod dialect;
pub mod fragment;
pub mod lexeme;
pub mod lower;
pub mod parser;
pub mod preprocess;
pub mod recovery;
pub mod script;

pub use analyzer::{Attempt, GrammarStrategy, RecoveryStrategy, StatementAnalyzer, Strategy, StubStrategy};
pub use context::{AnalysisContext, SourceUnit};
pub use dialect::{dialect_for, Ansi, BigQuery, MsSql, Postgres, Snowflake, SqlDialect};
pub use parser::{ParseFailure, ParsedSql, SqlParser};
pub use preprocess::{preprocess, Preprocessed};
pub use recovery::scan_dependencies;
