//! Best-effort recovery for text the grammar rejects
//!
//! Statements are split from the token stream and interpreted one at a time;
//! queries go through [`TokenLowerer`]. When even tokenizing fails, plain
//! patterns still recover the object name and its dependencies.

use crate::context::{AnalysisContext, SourceUnit};
use crate::dialect::SqlDialect;
use crate::fragment::{starts_query, type_text, TokenLowerer, ALIAS_STOP};
use crate::lexeme::{depths, join_text, lex, matching_paren, read_name, split_statements, split_top, Lexeme};
use crate::lower::Lowerer;
use crate::script::{hint_name, primary_key_names, Assembler};
use colineage_core::object::{is_temp_name, split_identifier};
use colineage_core::{
    Column, Diagnostic, DiagnosticCode, Location, LogicalType, Nullability, ObjectBody,
    ObjectInfo, ObjectKind, QueryPlan, Schema,
};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b(?:CREATE|ALTER)\s+(?:OR\s+(?:ALTER|REPLACE)\s+)?(VIEW|PROCEDURE|PROC|FUNCTION|TABLE)\s+([\[\]"`\w.#]+)"#)
        .unwrap()
});

static SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN|APPLY|USING)\s+([\[\]"`\w.#@]+)"#).unwrap()
});

static INSERT_EXEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)INSERT\s+(?:INTO\s+)?([#\[\]\w.]+)\s+EXEC(?:UTE)?\s+([^\s(;]+)").unwrap()
});

static INTO_TEMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bINTO\s+(#\w+)").unwrap());

/// Words that follow a column type in a column definition
const COLUMN_OPTION_WORDS: &[&str] = &[
    "NOT", "NULL", "IDENTITY", "PRIMARY", "DEFAULT", "CONSTRAINT", "COLLATE", "UNIQUE",
    "REFERENCES", "CHECK", "AS", "GENERATED", "AUTO_INCREMENT", "SPARSE", "ROWGUIDCOL",
];

/// Words that open a table-level constraint
const CONSTRAINT_WORDS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "INDEX", "FOREIGN", "CHECK", "KEY", "PERIOD"];

/// Recover an object from text the grammar could not (fully) handle
///
/// `known` fixes the object name and kind when an earlier attempt already
/// decided them, so temp tables scope to the same owner.
pub fn recover(
    text: &str,
    unit: &SourceUnit,
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
    known: Option<(String, ObjectKind)>,
) -> ObjectInfo {
    let mut object = match lex(text, dialect) {
        Ok(lexemes) => recover_statements(&lexemes, unit, ctx, dialect, known),
        Err(error) => {
            tracing::debug!(error = %error, "tokenizer failed, falling back to patterns");
            recover_by_pattern(text, unit, ctx, dialect, known)
        }
    };

    object.push_diagnostic(
        Diagnostic::warn(
            DiagnosticCode::RecoveryUsed,
            "Object recovered without a full parse; lineage is best-effort",
        )
        .with_location(source_location(unit)),
    );
    object
}

fn source_location(unit: &SourceUnit) -> Location {
    Location::new(unit.path.clone().unwrap_or_else(|| unit.name_hint.clone()))
}

/// Fold a recovered object into a partial grammar result
///
/// The grammar result keeps its name, kind and (non-opaque) body;
/// dependencies, temp tables and diagnostics are unioned.
pub fn merge(mut prior: ObjectInfo, recovered: ObjectInfo) -> ObjectInfo {
    for dependency in recovered.dependencies {
        prior.add_dependency(dependency);
    }
    if matches!(prior.body, ObjectBody::Opaque) {
        prior.body = recovered.body;
    }
    for scoped in recovered.scoped {
        match prior.scoped_object_mut(&scoped.name) {
            Some(existing) => {
                for dependency in scoped.dependencies {
                    existing.add_dependency(dependency);
                }
                if matches!(existing.body, ObjectBody::Opaque) {
                    existing.body = scoped.body;
                }
            }
            None => prior.scoped.push(scoped),
        }
    }
    prior.diagnostics.extend(recovered.diagnostics);
    prior
}

/// Objects read by a statement: FROM sources of queries, every JOIN/APPLY
/// source and MERGE's USING source. CTE names, variables and write targets
/// are excluded.
pub fn scan_dependencies(
    text: &str,
    dialect: &dyn SqlDialect,
    ctx: &AnalysisContext,
) -> BTreeSet<String> {
    match lex(text, dialect) {
        Ok(lexemes) => scan_lexemes(&lexemes, dialect, ctx),
        Err(_) => SOURCE_RE
            .captures_iter(text)
            .filter(|c| !c[1].starts_with('@'))
            .filter_map(|c| dialect.qualify(&c[1], ctx))
            .collect(),
    }
}

fn scan_lexemes(lexemes: &[Lexeme], dialect: &dyn SqlDialect, ctx: &AnalysisContext) -> BTreeSet<String> {
    let ctes = cte_names(lexemes);
    let head = lexemes.get(main_index(lexemes));
    let update_head = head.is_some_and(|l| l.is_any_keyword(&["UPDATE", "MERGE"]));
    let delete_head = head.is_some_and(|l| l.is_keyword("DELETE"));
    let mut delete_target_seen = false;

    let mut deps = BTreeSet::new();
    // per nesting level: whether a SELECT was seen
    let mut selects: Vec<bool> = vec![false];

    for (i, l) in lexemes.iter().enumerate() {
        if l.is_symbol("(") {
            selects.push(false);
            continue;
        }
        if l.is_symbol(")") {
            if selects.len() > 1 {
                selects.pop();
            }
            continue;
        }
        let top = selects.len() == 1;
        if l.is_keyword("SELECT") {
            if let Some(seen) = selects.last_mut() {
                *seen = true;
            }
            continue;
        }

        let from = l.is_keyword("FROM");
        let reads = if from {
            if top && delete_head && !delete_target_seen && !selects[0] {
                delete_target_seen = true;
                false
            } else {
                selects.last().copied().unwrap_or(false) || (top && (update_head || delete_head))
            }
        } else {
            l.is_any_keyword(&["JOIN", "APPLY", "USING"])
        };
        if !reads {
            continue;
        }

        let mut j = i + 1;
        while let Some((raw, next)) = read_name(lexemes, j) {
            let single = split_identifier(&raw);
            let is_cte = single.len() == 1 && ctes.contains(&single[0]);
            if !raw.starts_with('@') && !is_cte {
                if let Some(name) = dialect.qualify(&raw, ctx) {
                    deps.insert(name);
                }
            }
            j = skip_factor_tail(lexemes, next);
            if from && lexemes.get(j).is_some_and(|l| l.is_symbol(",")) {
                j += 1;
            } else {
                break;
            }
        }
    }
    deps
}

/// Skip arguments, alias and hints after a source name
fn skip_factor_tail(lexemes: &[Lexeme], mut j: usize) -> usize {
    if lexemes.get(j).is_some_and(|l| l.is_symbol("(")) {
        j = matching_paren(lexemes, j).map_or(lexemes.len(), |c| c + 1);
    }
    if lexemes.get(j).is_some_and(|l| l.is_keyword("AS")) {
        j += 1;
    }
    if lexemes
        .get(j)
        .is_some_and(|l| l.is_name_part() && !l.is_any_keyword(ALIAS_STOP))
    {
        j += 1;
    }
    if lexemes.get(j).is_some_and(|l| l.is_keyword("WITH")) && lexemes.get(j + 1).is_some_and(|l| l.is_symbol("(")) {
        j = matching_paren(lexemes, j + 1).map_or(lexemes.len(), |c| c + 1);
    }
    j
}

/// Lower-cased names defined by `WITH name [(cols)] AS (`
fn cte_names(lexemes: &[Lexeme]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for i in 1..lexemes.len() {
        let after_list = lexemes[i - 1].is_keyword("WITH") || lexemes[i - 1].is_symbol(",");
        if !after_list || !lexemes[i].is_name_part() {
            continue;
        }
        let mut j = i + 1;
        if lexemes.get(j).is_some_and(|l| l.is_symbol("(")) {
            j = matching_paren(lexemes, j).map_or(lexemes.len(), |c| c + 1);
        }
        if lexemes.get(j).is_some_and(|l| l.is_keyword("AS")) && lexemes.get(j + 1).is_some_and(|l| l.is_symbol("(")) {
            names.insert(lexemes[i].unquoted().to_lowercase());
        }
    }
    names
}

/// `CREATE|ALTER [OR ALTER|OR REPLACE] <kind> <name>`
fn header(statement: &[Lexeme]) -> Option<(String, ObjectKind, usize)> {
    if !statement.first()?.is_any_keyword(&["CREATE", "ALTER"]) {
        return None;
    }
    let mut i = 1;
    if statement.get(i).is_some_and(|l| l.is_keyword("OR")) {
        i += 2;
    }
    let word = statement.get(i)?;
    let kind = if word.is_keyword("VIEW") {
        ObjectKind::View
    } else if word.is_any_keyword(&["PROCEDURE", "PROC"]) {
        ObjectKind::Procedure
    } else if word.is_keyword("FUNCTION") {
        ObjectKind::Function
    } else if word.is_keyword("TABLE") {
        ObjectKind::Table
    } else {
        return None;
    };
    let (raw, next) = read_name(statement, i + 1)?;
    Some((raw, kind, next))
}

/// Index of the main keyword of a statement (after a leading CTE list)
fn main_index(statement: &[Lexeme]) -> usize {
    if !statement.first().is_some_and(|l| l.is_keyword("WITH")) {
        return 0;
    }
    let depth = depths(statement);
    (1..statement.len())
        .find(|&i| {
            depth[i] == 0 && statement[i].is_any_keyword(&["SELECT", "INSERT", "UPDATE", "DELETE", "MERGE"])
        })
        .unwrap_or(0)
}

/// Raw `SELECT ... INTO` target
fn select_into(statement: &[Lexeme], main: usize) -> Option<String> {
    let depth = depths(statement);
    for i in main..statement.len() {
        if depth[i] != 0 {
            continue;
        }
        if statement[i].is_any_keyword(&["FROM", "UNION", "EXCEPT", "INTERSECT"]) {
            return None;
        }
        if statement[i].is_keyword("INTO") {
            return read_name(statement, i + 1).map(|(raw, _)| raw);
        }
    }
    None
}

/// `SELECT @x = ...` assigns variables instead of returning rows
fn assigns_variables(statement: &[Lexeme], main: usize) -> bool {
    let mut i = main + 1;
    if statement.get(i).is_some_and(|l| l.is_keyword("TOP")) {
        i += 2;
    }
    statement.get(i).is_some_and(|l| l.text.starts_with('@'))
        && statement.get(i + 1).is_some_and(|l| l.is_symbol("="))
}

/// Parsed pieces of an INSERT statement
struct InsertParts<'l> {
    target: String,
    columns: Vec<String>,
    source: InsertSource<'l>,
}

enum InsertSource<'l> {
    Query(&'l [Lexeme]),
    Exec(String),
    Values,
}

fn insert_parts(statement: &[Lexeme], main: usize) -> Option<InsertParts<'_>> {
    let mut i = main + 1;
    if statement.get(i).is_some_and(|l| l.is_keyword("INTO")) {
        i += 1;
    }
    let (target, next) = read_name(statement, i)?;
    i = next;

    let mut columns = Vec::new();
    if statement.get(i).is_some_and(|l| l.is_symbol("(")) {
        let close = matching_paren(statement, i)?;
        columns = statement[i + 1..close]
            .iter()
            .filter(|l| l.is_name_part())
            .map(|l| l.unquoted().to_string())
            .collect();
        i = close + 1;
    }

    // OUTPUT clause
    if statement.get(i).is_some_and(|l| l.is_keyword("OUTPUT")) {
        let depth = depths(statement);
        i = (i..statement.len())
            .find(|&k| depth[k] == 0 && statement[k].is_any_keyword(&["SELECT", "WITH", "EXEC", "EXECUTE", "VALUES"]))
            .unwrap_or(statement.len());
    }

    let rest = &statement[i.min(statement.len())..];
    let source = match rest.first() {
        Some(l) if l.is_any_keyword(&["EXEC", "EXECUTE"]) => {
            let (procedure, _) = read_name(rest, 1)?;
            InsertSource::Exec(procedure)
        }
        Some(_) if starts_query(rest) => InsertSource::Query(rest),
        _ => InsertSource::Values,
    };
    Some(InsertParts {
        target,
        columns,
        source,
    })
}

/// Owner name and kind for a unit without a usable grammar result
fn owner(
    statements: &[&[Lexeme]],
    unit: &SourceUnit,
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
) -> (String, ObjectKind) {
    let header = statements.iter().find_map(|statement| {
        let (raw, kind, _) = header(statement)?;
        if is_temp_name(&raw) {
            return None;
        }
        dialect.qualify(&raw, ctx).map(|name| (name, kind))
    });
    if let Some(header) = header {
        return header;
    }

    // scripts that only write to one permanent table become that table
    let mut target = None;
    for statement in statements {
        let main = main_index(statement);
        let Some(first) = statement.get(main) else {
            continue;
        };
        let raw = if first.is_keyword("SELECT") {
            match select_into(statement, main) {
                Some(raw) => raw,
                None if assigns_variables(statement, main) => continue,
                None => return (hint_name(unit, ctx, dialect), ObjectKind::View),
            }
        } else if first.is_keyword("INSERT") {
            match insert_parts(statement, main) {
                Some(parts) => parts.target,
                None => continue,
            }
        } else {
            continue;
        };
        if !is_temp_name(&raw) && !raw.starts_with('@') {
            target = dialect.qualify(&raw, ctx);
        }
    }
    match target {
        Some(name) => (name, ObjectKind::Table),
        None => (hint_name(unit, ctx, dialect), ObjectKind::View),
    }
}

fn recover_statements(
    lexemes: &[Lexeme],
    unit: &SourceUnit,
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
    known: Option<(String, ObjectKind)>,
) -> ObjectInfo {
    let split = split_statements(lexemes);
    let statements = split.statements;
    let (name, kind) = known.unwrap_or_else(|| owner(&statements, unit, ctx, dialect));

    let mut ctx = ctx.clone();
    ctx.owner = Some(name.clone());

    let mut lowerer = Lowerer::new(dialect, &ctx);
    for line in split.unclosed_case {
        let file = unit.path.clone().unwrap_or_else(|| unit.name_hint.clone());
        lowerer.diagnostics.push(
            Diagnostic::warn(DiagnosticCode::ParseFailure, "CASE without a matching END")
                .with_location(Location::with_line(file, line)),
        );
    }
    let mut interpreter = Interpreter {
        assembler: Assembler::new(ObjectInfo::new(name, kind).with_source(unit.path.clone())),
        dialect,
        ctx: &ctx,
        return_variable: None,
    };
    for statement in statements {
        interpreter.statement(statement, &mut lowerer);
    }

    let diagnostics = std::mem::take(&mut lowerer.diagnostics);
    interpreter.assembler.finish(diagnostics)
}

struct Interpreter<'a> {
    assembler: Assembler,
    dialect: &'a dyn SqlDialect,
    ctx: &'a AnalysisContext,
    /// Table variable returned by a multi-statement function
    return_variable: Option<String>,
}

impl<'a> Interpreter<'a> {
    fn statement(&mut self, statement: &[Lexeme], lowerer: &mut Lowerer<'_>) {
        let Some(first) = statement.first() else {
            return;
        };

        if let Some((raw, kind, next)) = header(statement) {
            self.definition(statement, &raw, kind, next, lowerer);
            return;
        }

        if first.is_keyword("WITH") {
            let mut tokens = TokenLowerer::new(lowerer);
            let body = tokens.bind_ctes(statement);
            self.body_statement(statement, body, &mut tokens);
            lowerer.pop_scope();
            return;
        }

        if first.is_any_keyword(&["EXEC", "EXECUTE", "CALL"]) {
            self.exec(statement);
            return;
        }

        if first.is_keyword("RETURN") && statement.len() > 1 && starts_query(&statement[1..]) {
            let plan = TokenLowerer::new(lowerer).query(&statement[1..]);
            self.assembler.result(plan);
            return;
        }

        let mut tokens = TokenLowerer::new(lowerer);
        self.body_statement(statement, 0, &mut tokens);
    }

    /// SELECT / INSERT / UPDATE / DELETE / MERGE starting at `main`
    fn body_statement(&mut self, statement: &[Lexeme], main: usize, tokens: &mut TokenLowerer<'_, '_>) {
        let Some(first) = statement.get(main) else {
            return;
        };

        if first.is_keyword("SELECT") {
            if assigns_variables(statement, main) {
                for name in scan_lexemes(statement, self.dialect, self.ctx) {
                    self.assembler.depend(name);
                }
                return;
            }
            let plan = tokens.query(&statement[main..]);
            match select_into(statement, main) {
                Some(raw) => self.write(&raw, plan),
                None => self.assembler.result(plan),
            }
        } else if first.is_keyword("INSERT") {
            let Some(parts) = insert_parts(statement, main) else {
                return;
            };
            match parts.source {
                InsertSource::Query(query) => {
                    let mut plan = tokens.query(query);
                    if !parts.columns.is_empty() {
                        plan.rename_outputs(&parts.columns);
                    }
                    self.write(&parts.target, plan);
                }
                InsertSource::Exec(procedure) => {
                    let Some(procedure) = self.dialect.qualify(&procedure, self.ctx) else {
                        return;
                    };
                    if let Some((target, temp)) = self.target(&parts.target) {
                        self.assembler.write_exec(target, temp, procedure);
                    }
                }
                InsertSource::Values => {}
            }
        } else if first.is_any_keyword(&["UPDATE", "DELETE", "MERGE"]) {
            for name in scan_lexemes(&statement[main..], self.dialect, self.ctx) {
                self.assembler.depend(name);
            }
        }
    }

    fn definition(
        &mut self,
        statement: &[Lexeme],
        raw: &str,
        kind: ObjectKind,
        next: usize,
        lowerer: &mut Lowerer<'_>,
    ) {
        let Some(name) = self.dialect.qualify(raw, self.ctx) else {
            return;
        };
        let rest = &statement[next.min(statement.len())..];
        match kind {
            ObjectKind::View => {
                let mut columns = Vec::new();
                let mut i = 0;
                if rest.first().is_some_and(|l| l.is_symbol("(")) {
                    let close = matching_paren(rest, 0).unwrap_or(rest.len());
                    columns = rest[1..close]
                        .iter()
                        .filter(|l| l.is_name_part())
                        .map(|l| l.unquoted().to_string())
                        .collect();
                    i = close + 1;
                }
                // view options (WITH SCHEMABINDING) precede AS
                let Some(as_at) = (i..rest.len()).find(|&k| rest[k].is_keyword("AS")) else {
                    return;
                };
                let mut plan = TokenLowerer::new(lowerer).query(&rest[as_at + 1..]);
                if !columns.is_empty() {
                    plan.rename_outputs(&columns);
                }
                self.assembler.define(name, false, ObjectBody::Query(plan));
            }
            ObjectKind::Table => {
                let body = if rest.first().is_some_and(|l| l.is_symbol("(")) {
                    let close = matching_paren(rest, 0).unwrap_or(rest.len());
                    ObjectBody::Declared(recovered_schema(&rest[1..close.max(1)]))
                } else if let Some(as_at) = rest.iter().position(|l| l.is_keyword("AS")) {
                    ObjectBody::Query(TokenLowerer::new(lowerer).query(&rest[as_at + 1..]))
                } else {
                    return;
                };
                self.assembler.define(name, is_temp_name(raw), body);
            }
            ObjectKind::Function => {
                // RETURNS @t TABLE (...) declares the result shape
                let returns = rest.iter().position(|l| l.is_keyword("RETURNS"));
                if let Some(at) = returns {
                    let variable = rest.get(at + 1).filter(|l| l.text.starts_with('@'));
                    let table = rest.get(at + 2).is_some_and(|l| l.is_keyword("TABLE"));
                    if let (Some(variable), true) = (variable, table) {
                        self.return_variable = Some(variable.text.to_lowercase());
                        if rest.get(at + 3).is_some_and(|l| l.is_symbol("(")) {
                            if let Some(close) = matching_paren(rest, at + 3) {
                                let schema = recovered_schema(&rest[at + 4..close]);
                                self.assembler.define(name, false, ObjectBody::Declared(schema));
                            }
                        }
                    }
                }
            }
            // procedure headers carry no shape
            _ => {}
        }
    }

    fn exec(&mut self, statement: &[Lexeme]) {
        let text = join_text(statement);
        // EXEC @rc = proc
        let mut at = 1;
        if statement.get(1).is_some_and(|l| l.text.starts_with('@'))
            && statement.get(2).is_some_and(|l| l.is_symbol("="))
        {
            at = 3;
        }
        let dynamic = statement.get(at).is_some_and(|l| l.is_symbol("(") || l.text.starts_with('@'))
            || statement.iter().any(|l| l.is_keyword("sp_executesql"));
        if dynamic {
            self.assembler.object.push_diagnostic(
                Diagnostic::warn(DiagnosticCode::UnsupportedConstruct, "Dynamic SQL is not resolved")
                    .with_expression(text),
            );
            return;
        }
        if let Some(name) = read_name(statement, at).and_then(|(raw, _)| self.dialect.qualify(&raw, self.ctx)) {
            self.assembler.depend(name);
        }
    }

    /// Canonical write target and whether it is a temp table; the function
    /// return variable writes to the owner
    fn target(&self, raw: &str) -> Option<(String, bool)> {
        if raw.starts_with('@') {
            let returned = self.return_variable.as_deref() == Some(raw.to_lowercase().as_str());
            return returned.then(|| (self.assembler.object.name.clone(), false));
        }
        self.dialect
            .qualify(raw, self.ctx)
            .map(|name| (name, is_temp_name(raw)))
    }

    fn write(&mut self, raw: &str, plan: QueryPlan) {
        match self.target(raw) {
            Some((name, temp)) => self.assembler.write(name, temp, plan),
            None => {
                for dependency in plan.dependencies() {
                    self.assembler.depend(dependency);
                }
            }
        }
    }
}

/// Column definitions of a `CREATE TABLE (...)` body
fn recovered_schema(definitions: &[Lexeme]) -> Schema {
    let mut primary_key = Vec::new();
    let mut columns = Vec::new();

    for definition in split_top(definitions, |l| l.is_symbol(",")) {
        let Some(first) = definition.first() else {
            continue;
        };
        if first.is_any_keyword(CONSTRAINT_WORDS) {
            primary_key.extend(primary_key_names(&join_text(definition)));
            continue;
        }
        if !first.is_name_part() {
            continue;
        }

        let type_end = definition[1..]
            .iter()
            .position(|l| l.is_any_keyword(COLUMN_OPTION_WORDS))
            .map_or(definition.len(), |p| p + 1);
        let data_type = type_text(&definition[1..type_end]);
        let options = join_text(&definition[type_end..]).to_uppercase();
        let not_null = options.contains("NOT NULL") || options.contains("PRIMARY KEY") || options.contains("IDENTITY");

        let nullable = if not_null { Nullability::No } else { Nullability::Yes };
        columns.push(Column::new(first.unquoted(), LogicalType::parse(&data_type)).with_nullability(nullable));
    }

    for column in &mut columns {
        if primary_key.iter().any(|k| k.eq_ignore_ascii_case(&column.name)) {
            column.nullable = Nullability::No;
        }
    }
    Schema::from_columns(columns)
}

/// Name, temp tables and dependencies from patterns alone
fn recover_by_pattern(
    text: &str,
    unit: &SourceUnit,
    ctx: &AnalysisContext,
    dialect: &dyn SqlDialect,
    known: Option<(String, ObjectKind)>,
) -> ObjectInfo {
    let (name, kind) = known.unwrap_or_else(|| {
        HEADER_RE
            .captures(text)
            .filter(|c| !is_temp_name(&c[2]))
            .and_then(|c| {
                let kind = match c[1].to_uppercase().as_str() {
                    "VIEW" => ObjectKind::View,
                    "FUNCTION" => ObjectKind::Function,
                    "TABLE" => ObjectKind::Table,
                    _ => ObjectKind::Procedure,
                };
                dialect.qualify(&c[2], ctx).map(|name| (name, kind))
            })
            .unwrap_or_else(|| (hint_name(unit, ctx, dialect), ObjectKind::View))
    });

    let mut ctx = ctx.clone();
    ctx.owner = Some(name.clone());
    let mut assembler = Assembler::new(ObjectInfo::new(name, kind).with_source(unit.path.clone()));

    for capture in INTO_TEMP_RE.captures_iter(text) {
        if let Some(temp) = ctx.qualify(&capture[1]) {
            if assembler.object.scoped.iter().all(|t| t.name != temp) {
                assembler.define(temp, true, ObjectBody::Opaque);
            }
        }
    }
    for capture in INSERT_EXEC_RE.captures_iter(text) {
        let target = dialect.qualify(&capture[1], &ctx);
        let procedure = dialect.qualify(&capture[2], &ctx);
        if let (Some(target), Some(procedure)) = (target, procedure) {
            assembler.write_exec(target, is_temp_name(&capture[1]), procedure);
        }
    }
    for capture in SOURCE_RE.captures_iter(text) {
        if capture[1].starts_with('@') {
            continue;
        }
        if let Some(name) = dialect.qualify(&capture[1], &ctx) {
            assembler.depend(name);
        }
    }

    assembler.finish(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MsSql;
    use pretty_assertions::assert_eq;

    fn ctx() -> AnalysisContext {
        AnalysisContext::new("dw", "dbo")
    }

    fn run(hint: &str, sql: &str) -> ObjectInfo {
        recover(sql, &SourceUnit::new(hint, sql), &ctx(), &MsSql, None)
    }

    fn deps(object: &ObjectInfo) -> Vec<&str> {
        object.dependencies.iter().map(String::as_str).collect()
    }

    #[test]
    fn scans_join_only_sources() {
        let sql = "UPDATE f SET f.amount = s.amount FROM dbo.fact f INNER JOIN staging.sales s ON f.id = s.id WHERE f.id IN (SELECT id FROM dbo.changed)";
        let found: Vec<String> = scan_dependencies(sql, &MsSql, &ctx()).into_iter().collect();
        assert_eq!(found, vec!["dw.dbo.changed", "dw.dbo.fact", "dw.staging.sales"]);
    }

    #[test]
    fn scan_skips_ctes_and_variables() {
        let sql = "WITH recent AS (SELECT id FROM dbo.orders) DELETE FROM dbo.target WHERE id IN (SELECT id FROM recent JOIN @keep k ON k.id = recent.id)";
        let found: Vec<String> = scan_dependencies(sql, &MsSql, &ctx()).into_iter().collect();
        assert_eq!(found, vec!["dw.dbo.orders"]);
    }

    #[test]
    fn insert_exec_into_temp() {
        let object = run(
            "load_positions",
            "CREATE PROCEDURE dbo.load_positions AS\nBEGIN\nCREATE TABLE #pos (id INT NOT NULL, qty INT)\nINSERT INTO #pos EXEC dbo.get_positions @day = 1\nSELECT p.id, p.qty FROM #pos p\nEND",
        );
        assert_eq!(object.name, "dw.dbo.load_positions");
        assert_eq!(object.kind, ObjectKind::Procedure);
        assert_eq!(object.scoped.len(), 1);
        let temp = &object.scoped[0];
        assert_eq!(temp.name, "dw.dbo.load_positions#pos");
        assert!(matches!(temp.body, ObjectBody::Declared(_)));
        assert_eq!(deps(temp), vec!["dw.dbo.get_positions"]);
        assert!(object.dependencies.contains("dw.dbo.get_positions"));
        assert!(matches!(object.body, ObjectBody::Query(_)));
        assert!(object
            .diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::RecoveryUsed));
    }

    #[test]
    fn exec_passthrough_without_declaration() {
        let object = run("p", "INSERT INTO #rows EXEC dbo.list_rows\nSELECT * FROM #rows");
        let temp = &object.scoped[0];
        assert_eq!(
            temp.body,
            ObjectBody::ExecPassthrough {
                procedure: "dw.dbo.list_rows".to_string()
            }
        );
    }

    #[test]
    fn inline_function_returns_query() {
        let object = run(
            "ignored",
            "CREATE FUNCTION dbo.fn_orders (@since DATE) RETURNS TABLE AS RETURN (SELECT o.id, o.total FROM dbo.orders o WHERE o.created >= @since)",
        );
        assert_eq!(object.name, "dw.dbo.fn_orders");
        assert_eq!(object.kind, ObjectKind::Function);
        assert_eq!(deps(&object), vec!["dw.dbo.orders"]);
        assert!(matches!(object.body, ObjectBody::Query(_)));
    }

    #[test]
    fn table_valued_function_variable() {
        let object = run(
            "ignored",
            "CREATE FUNCTION dbo.fn_totals () RETURNS @out TABLE (id INT NOT NULL, total DECIMAL(18,2)) AS BEGIN INSERT INTO @out (id, total) SELECT id, SUM(amount) FROM dbo.sales GROUP BY id RETURN END",
        );
        match &object.body {
            ObjectBody::Populated { schema, .. } => {
                assert_eq!(schema.column_names(), vec!["id", "total"]);
                assert_eq!(schema.columns[0].nullable, Nullability::No);
            }
            other => panic!("expected populated body, got {:?}", other),
        }
        assert_eq!(deps(&object), vec!["dw.dbo.sales"]);
    }

    #[test]
    fn pattern_fallback_on_tokenizer_failure() {
        let sql = "CREATE VIEW dbo.v AS SELECT 'unterminated FROM dbo.a JOIN dbo.b ON 1 = 1";
        let object = run("v", sql);
        assert_eq!(object.name, "dw.dbo.v");
        assert_eq!(deps(&object), vec!["dw.dbo.a", "dw.dbo.b"]);
    }

    #[test]
    fn merge_keeps_prior_identity() {
        let prior = ObjectInfo::new("dw.dbo.p", ObjectKind::Procedure).with_body(ObjectBody::Opaque);
        let mut recovered = ObjectInfo::new("dw.dbo.p", ObjectKind::Procedure)
            .with_body(ObjectBody::ExecPassthrough {
                procedure: "dw.dbo.q".into(),
            });
        recovered.add_dependency("dw.dbo.q");
        let merged = merge(prior, recovered);
        assert_eq!(deps(&merged), vec!["dw.dbo.q"]);
        assert!(matches!(merged.body, ObjectBody::ExecPassthrough { .. }));
    }
}
