//! SQL dialect capabilities
//!
//! The analyzer only talks to [`SqlDialect`]: parsing, tokenizing, name
//! qualification and builtin function semantics. Each implementation wraps
//! the matching `sqlparser` dialect.

use crate::context::AnalysisContext;
use colineage_core::plan::{AggregateKind, FunctionClass};
use colineage_core::{DialectConfig, LogicalType};
use sqlparser::ast::Statement;
use sqlparser::dialect::{
    BigQueryDialect, Dialect, GenericDialect, MsSqlDialect, PostgreSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

/// Capability interface implemented once per SQL dialect
pub trait SqlDialect: Send + Sync + std::fmt::Debug {
    /// Short dialect name for logs
    fn name(&self) -> &'static str;

    /// Parse text into statements
    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError>;

    /// Tokenize text without parsing (used by recovery)
    fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError>;

    /// Schema assumed for unqualified names
    fn default_schema(&self) -> &'static str;

    /// Whether `#name` denotes a session temp table
    fn has_hash_temp_tables(&self) -> bool {
        false
    }

    /// Whether `SELECT alias = expr` assigns a column alias
    fn has_assignment_aliases(&self) -> bool {
        false
    }

    /// Canonical name for a raw table reference
    fn qualify(&self, raw: &str, ctx: &AnalysisContext) -> Option<String> {
        ctx.qualify(raw)
    }

    /// Semantics of a builtin function (name is case-insensitive)
    fn builtin(&self, function: &str) -> FunctionClass {
        common_builtin(&function.to_lowercase())
    }
}

fn parse_with(dialect: &dyn Dialect, sql: &str) -> Result<Vec<Statement>, ParserError> {
    Parser::parse_sql(dialect, sql)
}

fn tokenize_with(dialect: &dyn Dialect, sql: &str) -> Result<Vec<Token>, TokenizerError> {
    Tokenizer::new(dialect, sql).tokenize()
}

/// Function semantics shared by all dialects
fn common_builtin(name: &str) -> FunctionClass {
    use FunctionClass::*;

    let text = |unicode: bool| Returns(LogicalType::Text {
        unicode,
        fixed: false,
        length: None,
    });

    match name {
        "count" => Aggregate(AggregateKind::Count),
        "count_big" => Aggregate(AggregateKind::CountBig),
        "sum" => Aggregate(AggregateKind::Sum),
        "avg" => Aggregate(AggregateKind::Avg),
        "min" | "max" | "any_value" => Aggregate(AggregateKind::MinMax),
        "stdev" | "stdevp" | "stddev" | "stddev_pop" | "stddev_samp" | "var" | "varp"
        | "variance" | "var_pop" | "var_samp" => Aggregate(AggregateKind::Statistic),
        "string_agg" | "listagg" | "group_concat" => Aggregate(AggregateKind::Concat),
        "array_agg" | "bool_and" | "bool_or" | "checksum_agg" => Aggregate(AggregateKind::Other),

        "row_number" | "rank" | "dense_rank" | "ntile" => Ranking,
        "lag" | "lead" => Nullable,
        "first_value" | "last_value" | "nth_value" => FirstArgument,
        "percent_rank" | "cume_dist" => Returns(LogicalType::Float),

        "coalesce" | "ifnull" | "nvl" => Coalesce,
        "nullif" => Nullable,

        "upper" | "lower" | "trim" | "ltrim" | "rtrim" | "substring" | "substr" | "left"
        | "right" | "replace" | "reverse" | "abs" | "round" | "ceiling" | "ceil" | "floor"
        | "sign" => FirstArgument,
        "concat" | "concat_ws" | "format" => text(true),
        "len" | "length" | "char_length" | "datalength" | "charindex" | "position"
        | "strpos" | "datediff" | "datepart" | "year" | "month" | "day" | "ascii"
        | "unicode" => Returns(LogicalType::Int),
        "datediff_big" => Returns(LogicalType::BigInt),
        "datename" | "to_char" => text(true),
        "getdate" | "getutcdate" | "sysdatetime" | "sysutcdatetime" | "current_timestamp"
        | "now" | "dateadd" | "date_add" | "date_trunc" | "datetimefromparts"
        | "to_timestamp" => Returns(LogicalType::Timestamp),
        "current_date" | "eomonth" | "datefromparts" | "to_date" => Returns(LogicalType::Date),
        "newid" | "gen_random_uuid" => Returns(LogicalType::Uuid),
        "sqrt" | "power" | "exp" | "log" | "log10" | "ln" | "rand" | "random" | "pi" => {
            Returns(LogicalType::Float)
        }
        "isnumeric" | "isdate" => Returns(LogicalType::Int),
        _ => Unknown,
    }
}

/// Microsoft SQL Server (T-SQL), the default dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct MsSql;

impl SqlDialect for MsSql {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        parse_with(&MsSqlDialect {}, sql)
    }

    fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError> {
        tokenize_with(&MsSqlDialect {}, sql)
    }

    fn default_schema(&self) -> &'static str {
        "dbo"
    }

    fn has_hash_temp_tables(&self) -> bool {
        true
    }

    fn has_assignment_aliases(&self) -> bool {
        true
    }

    fn builtin(&self, function: &str) -> FunctionClass {
        match function.to_lowercase().as_str() {
            "isnull" => FunctionClass::Coalesce,
            "iif" | "choose" => FunctionClass::Unknown,
            "try_convert" | "try_parse" => FunctionClass::Nullable,
            other => common_builtin(other),
        }
    }
}

/// Generic ANSI SQL
#[derive(Debug, Default, Clone, Copy)]
pub struct Ansi;

impl SqlDialect for Ansi {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        parse_with(&GenericDialect {}, sql)
    }

    fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError> {
        tokenize_with(&GenericDialect {}, sql)
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    fn qualify(&self, raw: &str, ctx: &AnalysisContext) -> Option<String> {
        colineage_core::QualifiedName::resolve(raw, &ctx.database, &ctx.schema)
            .map(|q| q.canonical())
    }
}

/// PostgreSQL
#[derive(Debug, Default, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        parse_with(&PostgreSqlDialect {}, sql)
    }

    fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError> {
        tokenize_with(&PostgreSqlDialect {}, sql)
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    fn qualify(&self, raw: &str, ctx: &AnalysisContext) -> Option<String> {
        colineage_core::QualifiedName::resolve(raw, &ctx.database, &ctx.schema)
            .map(|q| q.canonical())
    }
}

/// BigQuery: `project.dataset.table`, often inside a single backtick pair
#[derive(Debug, Default, Clone, Copy)]
pub struct BigQuery;

impl SqlDialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        parse_with(&BigQueryDialect {}, sql)
    }

    fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError> {
        tokenize_with(&BigQueryDialect {}, sql)
    }

    fn default_schema(&self) -> &'static str {
        "dataset"
    }

    fn qualify(&self, raw: &str, ctx: &AnalysisContext) -> Option<String> {
        let unquoted = raw.replace('`', "");
        colineage_core::QualifiedName::resolve(&unquoted, &ctx.database, &ctx.schema)
            .map(|q| q.canonical())
    }

    fn builtin(&self, function: &str) -> FunctionClass {
        match function.to_lowercase().as_str() {
            "safe_divide" => FunctionClass::Nullable,
            "current_datetime" => FunctionClass::Returns(LogicalType::Timestamp),
            other => common_builtin(other),
        }
    }
}

/// Snowflake
#[derive(Debug, Default, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParserError> {
        parse_with(&SnowflakeDialect {}, sql)
    }

    fn tokenize(&self, sql: &str) -> Result<Vec<Token>, TokenizerError> {
        tokenize_with(&SnowflakeDialect {}, sql)
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    fn qualify(&self, raw: &str, ctx: &AnalysisContext) -> Option<String> {
        colineage_core::QualifiedName::resolve(raw, &ctx.database, &ctx.schema)
            .map(|q| q.canonical())
    }

    fn builtin(&self, function: &str) -> FunctionClass {
        match function.to_lowercase().as_str() {
            "zeroifnull" => FunctionClass::FirstArgument,
            "iff" => FunctionClass::Unknown,
            "div0" => FunctionClass::Returns(LogicalType::Float),
            other => common_builtin(other),
        }
    }
}

/// Build the dialect selected in the configuration
pub fn dialect_for(config: DialectConfig) -> Box<dyn SqlDialect> {
    match config {
        DialectConfig::MsSql => Box::new(MsSql),
        DialectConfig::Ansi => Box::new(Ansi),
        DialectConfig::Postgres => Box::new(Postgres),
        DialectConfig::BigQuery => Box::new(BigQuery),
        DialectConfig::Snowflake => Box::new(Snowflake),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_dialects_parse_simple_select() {
        let sql = "SELECT id FROM users";
        for config in [
            DialectConfig::MsSql,
            DialectConfig::Ansi,
            DialectConfig::Postgres,
            DialectConfig::BigQuery,
            DialectConfig::Snowflake,
        ] {
            let dialect = dialect_for(config);
            assert!(dialect.parse(sql).is_ok(), "{} failed", dialect.name());
        }
    }

    #[test]
    fn builtin_semantics() {
        let dialect = MsSql;
        assert_eq!(dialect.builtin("COUNT"), FunctionClass::Aggregate(AggregateKind::Count));
        assert_eq!(dialect.builtin("ISNULL"), FunctionClass::Coalesce);
        assert_eq!(dialect.builtin("row_number"), FunctionClass::Ranking);
        assert_eq!(dialect.builtin("GETDATE"), FunctionClass::Returns(LogicalType::Timestamp));
        assert_eq!(dialect.builtin("dbo.fn_custom"), FunctionClass::Unknown);
    }

    #[test]
    fn bigquery_backticked_paths_split() {
        let ctx = AnalysisContext::new("proj", "dataset");
        let name = BigQuery.qualify("`analytics.sales.orders`", &ctx);
        assert_eq!(name.as_deref(), Some("analytics.sales.orders"));
    }

    #[test]
    fn mssql_tokenizer_keeps_temp_names() {
        let tokens = MsSql.tokenize("SELECT * INTO #stage FROM dbo.t").unwrap();
        assert!(tokens.iter().any(|t| t.to_string() == "#stage"));
    }
}
