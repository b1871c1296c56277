//! Statement sequences to objects
//!
//! A unit either defines an object (`CREATE VIEW/TABLE/PROCEDURE`) or is a
//! bare script. Scripts that return a result set become a view named after the
//! unit; scripts that only write to one table become that table.

use crate::context::{AnalysisContext, SourceUnit};
use crate::dialect::SqlDialect;
use crate::lower::Lowerer;
use crate::recovery;
use colineage_core::object::is_temp_name;
use colineage_core::{
    Column, Diagnostic, DiagnosticCode, LogicalType, Nullability, ObjectBody, ObjectInfo,
    ObjectKind, QueryPlan, Schema,
};
use regex::Regex;
use sqlparser::ast::{ColumnDef, CreateTable, Query, SetExpr, Statement, TableConstraint};
use std::sync::LazyLock;

static INSERT_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*INSERT\s+(?:INTO\s+)?(?:TABLE\s+)?((?:\[[^\]]+\]|"[^"]+"|`[^`]+`|[\w@#$]+)(?:\s*\.\s*(?:\[[^\]]+\]|"[^"]+"|`[^`]+`|[\w@#$]*))*)"#)
        .unwrap()
});

static NAME_DOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\.\s*").unwrap());

static EXEC_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*(?:EXEC|EXECUTE|CALL)\s+(?:@\w+\s*=\s*)?([^\s(;,]+)").unwrap());

static DYNAMIC_SQL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bEXEC(?:UTE)?\s*\(|\bsp_executesql\b").unwrap());

static PRIMARY_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)PRIMARY\s+KEY\s*(?:CLUSTERED|NONCLUSTERED)?\s*\(([^)]*)\)").unwrap()
});

/// Statements that never affect shape or lineage
const IGNORED_PREFIXES: &[&str] = &[
    "DECLARE", "SET", "DROP", "TRUNCATE", "BEGIN", "START", "COMMIT", "ROLLBACK", "USE",
    "RETURN", "PRINT", "RAISERROR", "THROW", "ALTER TABLE", "CREATE INDEX", "CREATE UNIQUE",
    "CREATE CLUSTERED", "CREATE NONCLUSTERED", "CREATE STATISTICS", "GRANT", "REVOKE",
    "DENY", "UPDATE STATISTICS",
];

/// Outcome of lowering a parsed unit
#[derive(Debug, Clone)]
pub struct ScriptResult {
    pub object: ObjectInfo,

    /// False when some statements could not be handled
    pub complete: bool,
}

/// Lower parsed statements of one unit into its object
pub fn lower_statements(
    statements: &[Statement],
    unit: &SourceUnit,
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
) -> ScriptResult {
    let (name, kind) = match find_header(statements, ctx, dialect) {
        Some(header) => header,
        None => match script_target(statements, ctx, dialect) {
            Some(target) => (target, ObjectKind::Table),
            None => (hint_name(unit, ctx, dialect), ObjectKind::View),
        },
    };

    let mut ctx = ctx.clone();
    ctx.owner = Some(name.clone());

    let object = ObjectInfo::new(name, kind).with_source(unit.path.clone());
    let mut builder = ScriptBuilder {
        lowerer: Lowerer::new(dialect, &ctx),
        dialect,
        ctx: &ctx,
        assembler: Assembler::new(object),
        complete: true,
    };
    for statement in statements {
        builder.statement(statement);
    }
    builder.finish()
}

/// Canonical object name derived from the unit hint
pub fn hint_name(unit: &SourceUnit, ctx: &AnalysisContext, dialect: &dyn SqlDialect) -> String {
    dialect
        .qualify(&unit.name_hint, ctx)
        .unwrap_or_else(|| format!("{}.{}.unnamed", ctx.database, ctx.schema))
}

fn find_header(
    statements: &[Statement],
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
) -> Option<(String, ObjectKind)> {
    statements.iter().find_map(|statement| {
        let (raw, kind) = match statement {
            Statement::CreateView { name, .. } | Statement::AlterView { name, .. } => {
                (name.to_string(), ObjectKind::View)
            }
            Statement::CreateProcedure { name, .. } => (name.to_string(), ObjectKind::Procedure),
            Statement::CreateTable(table) => (table.name.to_string(), ObjectKind::Table),
            _ => return None,
        };
        if is_temp_name(&raw) {
            return None;
        }
        dialect.qualify(&raw, ctx).map(|name| (name, kind))
    })
}

/// Table written by a script without a result set
fn script_target(
    statements: &[Statement],
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
) -> Option<String> {
    let mut target = None;
    for statement in statements {
        let raw = match statement {
            Statement::Query(query) => match select_into(query) {
                Some(raw) => raw,
                None => return None,
            },
            Statement::Insert(_) => match insert_target(&statement.to_string()) {
                Some(raw) => raw,
                None => continue,
            },
            _ => continue,
        };
        if !is_temp_name(&raw) {
            target = dialect.qualify(&raw, ctx);
        }
    }
    target
}

/// Raw `SELECT ... INTO` target of a query
fn select_into(query: &Query) -> Option<String> {
    fn body_into(body: &SetExpr) -> Option<String> {
        match body {
            SetExpr::Select(select) => select.into.as_ref().map(|into| into.name.to_string()),
            SetExpr::SetOperation { left, .. } => body_into(left),
            SetExpr::Query(query) => body_into(&query.body),
            _ => None,
        }
    }
    body_into(&query.body)
}

/// Raw target of an INSERT statement
fn insert_target(text: &str) -> Option<String> {
    INSERT_TARGET_RE
        .captures(text)
        .map(|c| NAME_DOT_RE.replace_all(c[1].trim(), ".").into_owned())
}

/// Declared schema of a `CREATE TABLE`
fn declared_schema(table: &CreateTable) -> Schema {
    let mut primary_key: Vec<String> = Vec::new();
    for constraint in &table.constraints {
        primary_key.extend(primary_key_columns(constraint));
    }

    let columns = table
        .columns
        .iter()
        .map(|column| declared_column(column, &primary_key))
        .collect();
    Schema::from_columns(columns)
}

fn declared_column(column: &ColumnDef, primary_key: &[String]) -> Column {
    let name = column.name.value.clone();
    let not_null = primary_key.iter().any(|k| k.eq_ignore_ascii_case(&name))
        || column
            .options
            .iter()
            .any(|option| is_not_null_option(&option.option.to_string()));
    let nullable = if not_null {
        Nullability::No
    } else {
        Nullability::Yes
    };
    Column::new(name, LogicalType::parse(&column.data_type.to_string())).with_nullability(nullable)
}

/// Column option text that rules out NULL
pub(crate) fn is_not_null_option(text: &str) -> bool {
    let text = text.trim().to_uppercase();
    text.starts_with("NOT NULL") || text.starts_with("PRIMARY KEY") || text.starts_with("IDENTITY")
}

fn primary_key_columns(constraint: &TableConstraint) -> Vec<String> {
    primary_key_names(&constraint.to_string())
}

/// Column names of a `PRIMARY KEY (...)` clause
pub(crate) fn primary_key_names(text: &str) -> Vec<String> {
    PRIMARY_KEY_RE
        .captures(text)
        .map(|c| {
            c[1].split(',')
                .filter_map(|part| part.split_whitespace().next())
                .map(|name| name.trim_matches(['[', ']', '"', '`']).to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Collects the statements of one unit into its object
///
/// Shared by the grammar and recovery paths: temp tables are scoped to the
/// owner, declared tables filled by a later insert become populated, and the
/// owner's body is the last result set (or the last materialized query).
#[derive(Debug)]
pub(crate) struct Assembler {
    pub object: ObjectInfo,
    /// Last plain SELECT
    result_set: Option<QueryPlan>,
    /// Last query written to a permanent table
    materialized: Option<QueryPlan>,
}

impl Assembler {
    pub fn new(object: ObjectInfo) -> Self {
        Self {
            object,
            result_set: None,
            materialized: None,
        }
    }

    pub fn depend(&mut self, name: impl Into<String>) {
        self.object.add_dependency(name);
    }

    fn add_dependencies(&mut self, plan: &QueryPlan) {
        for name in plan.dependencies() {
            self.object.add_dependency(name);
        }
    }

    /// A query whose rows are returned to the caller
    pub fn result(&mut self, plan: QueryPlan) {
        self.add_dependencies(&plan);
        self.result_set = Some(plan);
    }

    /// Definition of a view, table or temp table
    pub fn define(&mut self, name: String, temp: bool, body: ObjectBody) {
        if let ObjectBody::Query(plan) = &body {
            self.add_dependencies(plan);
            if !temp && name != self.object.name {
                self.materialized = Some(plan.clone());
            }
        }

        if temp {
            let mut scoped = ObjectInfo::new(name.clone(), ObjectKind::TempTable)
                .with_source(self.object.source.clone());
            if let ObjectBody::Query(plan) = &body {
                plan.dependencies().into_iter().for_each(|d| scoped.add_dependency(d));
            }
            scoped.body = body;
            // a re-created temp table replaces the earlier definition
            self.object.scoped.retain(|t| t.name != name);
            self.object.scoped.push(scoped);
        } else if name == self.object.name {
            self.object.body = body;
        }
    }

    /// Rows written into `name` by `plan`
    pub fn write(&mut self, name: String, temp: bool, plan: QueryPlan) {
        self.add_dependencies(&plan);

        if temp {
            let source = self.object.source.clone();
            match self.object.scoped_object_mut(&name) {
                Some(scoped) => {
                    plan.dependencies().into_iter().for_each(|d| scoped.add_dependency(d));
                    let body = std::mem::replace(&mut scoped.body, ObjectBody::Opaque);
                    scoped.body = merge_body(body, plan);
                }
                None => {
                    let mut scoped = ObjectInfo::new(name, ObjectKind::TempTable).with_source(source);
                    plan.dependencies().into_iter().for_each(|d| scoped.add_dependency(d));
                    scoped.body = ObjectBody::Query(plan);
                    self.object.scoped.push(scoped);
                }
            }
            return;
        }

        if name == self.object.name {
            let body = std::mem::replace(&mut self.object.body, ObjectBody::Opaque);
            self.object.body = merge_body(body, plan.clone());
        }
        self.materialized = Some(plan);
    }

    /// `INSERT INTO name EXEC procedure`
    pub fn write_exec(&mut self, name: String, temp: bool, procedure: String) {
        self.object.add_dependency(procedure.clone());
        let passthrough = ObjectBody::ExecPassthrough {
            procedure: procedure.clone(),
        };

        if temp {
            let source = self.object.source.clone();
            match self.object.scoped_object_mut(&name) {
                Some(scoped) => {
                    scoped.add_dependency(procedure);
                    if matches!(scoped.body, ObjectBody::Opaque) {
                        scoped.body = passthrough;
                    }
                }
                None => {
                    let mut scoped = ObjectInfo::new(name, ObjectKind::TempTable)
                        .with_source(source)
                        .with_body(passthrough);
                    scoped.add_dependency(procedure);
                    self.object.scoped.push(scoped);
                }
            }
        } else if name == self.object.name && matches!(self.object.body, ObjectBody::Opaque) {
            self.object.body = passthrough;
        }
    }

    /// Settle the owner's body and attach diagnostics
    pub fn finish(mut self, diagnostics: Vec<Diagnostic>) -> ObjectInfo {
        let query_shaped = matches!(
            self.object.kind,
            ObjectKind::Procedure | ObjectKind::View | ObjectKind::Function
        );
        if query_shaped && matches!(self.object.body, ObjectBody::Opaque) {
            if let Some(plan) = self.result_set.take().or(self.materialized.take()) {
                self.object.body = ObjectBody::Query(plan);
            }
        }
        for diagnostic in diagnostics {
            self.object.push_diagnostic(diagnostic);
        }
        self.object
    }
}

/// Combine an existing body with a populating query
fn merge_body(body: ObjectBody, plan: QueryPlan) -> ObjectBody {
    match body {
        ObjectBody::Declared(schema) => ObjectBody::Populated { schema, plan },
        ObjectBody::Opaque => ObjectBody::Query(plan),
        // the first definition decides the shape
        other => other,
    }
}

struct ScriptBuilder<'a> {
    lowerer: Lowerer<'a>,
    dialect: &'a dyn SqlDialect,
    ctx: &'a AnalysisContext,
    assembler: Assembler,
    complete: bool,
}

impl<'a> ScriptBuilder<'a> {
    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Query(query) => self.query(query),
            Statement::Insert(insert) => {
                let Some(raw) = insert_target(&statement.to_string()) else {
                    self.incomplete(statement);
                    return;
                };
                let Some(source) = &insert.source else {
                    return;
                };
                let mut plan = self.lowerer.query(source);
                let columns: Vec<String> = insert.columns.iter().map(|c| c.value.clone()).collect();
                if !columns.is_empty() {
                    plan.rename_outputs(&columns);
                }
                self.write(&raw, plan);
            }
            Statement::CreateTable(table) => self.create_table(table),
            Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => {
                let columns: Vec<String> = columns.iter().map(|c| c.name.value.clone()).collect();
                self.view(&name.to_string(), &columns, query);
            }
            Statement::AlterView {
                name,
                columns,
                query,
                ..
            } => {
                let columns: Vec<String> = columns.iter().map(|c| c.value.clone()).collect();
                self.view(&name.to_string(), &columns, query);
            }
            Statement::CreateProcedure { body, .. } => {
                for inner in body {
                    self.statement(inner);
                }
            }
            other => self.other(other),
        }
    }

    fn query(&mut self, query: &Query) {
        let plan = self.lowerer.query(query);
        match select_into(query) {
            Some(raw) => self.write(&raw, plan),
            None => self.assembler.result(plan),
        }
    }

    fn view(&mut self, raw: &str, columns: &[String], query: &Query) {
        let mut plan = self.lowerer.query(query);
        if !columns.is_empty() {
            plan.rename_outputs(columns);
        }
        let Some(name) = self.lowerer.qualify(raw) else {
            return;
        };
        if name != self.assembler.object.name {
            self.assembler.object.push_diagnostic(
                Diagnostic::info(
                    DiagnosticCode::UnsupportedConstruct,
                    "Additional object definition in the same unit is not analyzed separately",
                )
                .with_expression(raw.to_string()),
            );
        }
        self.assembler.define(name, false, ObjectBody::Query(plan));
    }

    fn create_table(&mut self, table: &CreateTable) {
        let raw = table.name.to_string();
        let Some(name) = self.lowerer.qualify(&raw) else {
            return;
        };
        let body = match &table.query {
            Some(query) => ObjectBody::Query(self.lowerer.query(query)),
            None => ObjectBody::Declared(declared_schema(table)),
        };
        self.assembler.define(name, is_temp_name(&raw), body);
    }

    fn write(&mut self, raw: &str, plan: QueryPlan) {
        if let Some(name) = self.lowerer.qualify(raw) {
            self.assembler.write(name, is_temp_name(raw), plan);
        }
    }

    fn other(&mut self, statement: &Statement) {
        let text = statement.to_string();
        let upper = text.trim_start().to_uppercase();

        if DYNAMIC_SQL_RE.is_match(&text) {
            self.assembler.object.push_diagnostic(
                Diagnostic::warn(
                    DiagnosticCode::UnsupportedConstruct,
                    "Dynamic SQL is not resolved",
                )
                .with_expression(text.clone()),
            );
            return;
        }
        if IGNORED_PREFIXES.iter().any(|p| upper.starts_with(p)) {
            return;
        }
        if upper.starts_with("EXEC") || upper.starts_with("CALL") {
            if let Some(name) = EXEC_TARGET_RE
                .captures(&text)
                .and_then(|c| self.dialect.qualify(&c[1], self.ctx))
            {
                self.assembler.depend(name);
            }
            return;
        }
        if upper.starts_with("UPDATE") || upper.starts_with("DELETE") || upper.starts_with("MERGE") {
            for name in recovery::scan_dependencies(&text, self.dialect, self.ctx) {
                self.assembler.depend(name);
            }
            return;
        }

        self.incomplete(statement);
    }

    fn incomplete(&mut self, statement: &Statement) {
        let text = statement.to_string();
        let head: String = text.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
        tracing::debug!(object = %self.assembler.object.name, statement = %head, "statement not handled by grammar path");
        self.complete = false;
    }

    fn finish(mut self) -> ScriptResult {
        let diagnostics = std::mem::take(&mut self.lowerer.diagnostics);
        ScriptResult {
            object: self.assembler.finish(diagnostics),
            complete: self.complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MsSql;
    use crate::preprocess::preprocess;
    use pretty_assertions::assert_eq;

    fn lower(name_hint: &str, sql: &str) -> ScriptResult {
        let dialect = MsSql;
        let ctx = AnalysisContext::new("dw", "dbo");
        let text = preprocess(sql).text;
        let statements = dialect.parse(&text).unwrap();
        let unit = SourceUnit::new(name_hint, sql);
        lower_statements(&statements, &unit, &ctx, &dialect)
    }

    fn deps(object: &ObjectInfo) -> Vec<&str> {
        object.dependencies.iter().map(String::as_str).collect()
    }

    #[test]
    fn view_definition() {
        let result = lower(
            "ignored",
            "CREATE VIEW sales.v_orders AS SELECT o.id, c.name FROM orders o JOIN sales.customers c ON o.cid = c.id",
        );
        assert!(result.complete);
        assert_eq!(result.object.name, "dw.sales.v_orders");
        assert_eq!(result.object.kind, ObjectKind::View);
        assert_eq!(deps(&result.object), vec!["dw.dbo.orders", "dw.sales.customers"]);
        assert!(matches!(result.object.body, ObjectBody::Query(_)));
    }

    #[test]
    fn declared_table_nullability() {
        let result = lower(
            "ignored",
            "CREATE TABLE dbo.customers (id INT NOT NULL, name NVARCHAR(100), region VARCHAR(10) NULL, CONSTRAINT pk PRIMARY KEY (name))",
        );
        let ObjectBody::Declared(schema) = &result.object.body else {
            panic!("expected declared body");
        };
        let nullability: Vec<Nullability> = schema.columns.iter().map(|c| c.nullable).collect();
        assert_eq!(nullability, vec![Nullability::No, Nullability::No, Nullability::Yes]);
        assert_eq!(schema.columns[1].logical_type, LogicalType::nvarchar(100));
    }

    #[test]
    fn script_select_into_temp_then_result() {
        let result = lower(
            "report_sales",
            "SELECT o.id, o.amount INTO #stage FROM orders o;\nSELECT s.id, s.amount FROM #stage s",
        );
        let object = result.object;
        assert_eq!(object.name, "dw.dbo.report_sales");
        assert_eq!(object.kind, ObjectKind::View);
        assert_eq!(object.scoped.len(), 1);
        assert_eq!(object.scoped[0].name, "dw.dbo.report_sales#stage");
        assert_eq!(deps(&object.scoped[0]), vec!["dw.dbo.orders"]);
        assert!(object.dependencies.contains("dw.dbo.report_sales#stage"));
    }

    #[test]
    fn script_writing_one_table_becomes_that_table() {
        let result = lower(
            "load_fact",
            "INSERT INTO dbo.fact_sales (id, total) SELECT id, qty * price FROM staging.sales",
        );
        assert_eq!(result.object.name, "dw.dbo.fact_sales");
        assert_eq!(result.object.kind, ObjectKind::Table);
        assert_eq!(deps(&result.object), vec!["dw.staging.sales"]);
        assert!(matches!(result.object.body, ObjectBody::Query(_)));
    }

    #[test]
    fn declared_temp_filled_by_insert() {
        let result = lower(
            "p",
            "CREATE TABLE #t (id INT NOT NULL, amount DECIMAL(10,2));\nINSERT INTO #t (id, amount) SELECT id, amount FROM orders;\nSELECT id FROM #t",
        );
        let temp = &result.object.scoped[0];
        assert!(matches!(temp.body, ObjectBody::Populated { .. }));
        assert_eq!(deps(temp), vec!["dw.dbo.orders"]);
    }

    #[test]
    fn insert_target_text() {
        assert_eq!(
            insert_target("INSERT INTO [dbo].[Fact Sales] (a) SELECT 1").as_deref(),
            Some("[dbo].[Fact Sales]")
        );
        assert_eq!(insert_target("INSERT #stage SELECT 1").as_deref(), Some("#stage"));
        assert_eq!(
            insert_target("INSERT INTO Stage..Orders SELECT 1").as_deref(),
            Some("Stage..Orders")
        );
        assert_eq!(
            insert_target("INSERT INTO \"dbo\" . \"t\" SELECT 1").as_deref(),
            Some("\"dbo\".\"t\"")
        );
    }

    #[test]
    fn script_writing_bracketed_table_becomes_that_table() {
        let result = lower(
            "load_fact",
            "INSERT INTO [dbo].[FactSales] (OrderID, Amount) SELECT o.OrderID, o.Amount FROM dbo.Orders o",
        );
        assert_eq!(result.object.name, "dw.dbo.factsales");
        assert_eq!(result.object.kind, ObjectKind::Table);
        assert_eq!(deps(&result.object), vec!["dw.dbo.orders"]);
    }
}
