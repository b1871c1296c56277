//! Lowering of `sqlparser` queries and expressions into the plan IR
//!
//! Object references are qualified through the dialect as they are lowered.
//! CTEs are inlined as derived relations, visible to later CTEs and to the
//! body of their query only.

use crate::context::AnalysisContext;
use crate::dialect::SqlDialect;
use colineage_core::object::split_identifier;
use colineage_core::plan::{
    BinaryClass, FunctionClass, ProjectionItem, QueryPlan, Relation, ScalarExpr, SelectPlan,
    SourceBinding,
};
use colineage_core::{Diagnostic, DiagnosticCode, LogicalType, SetOpKind};
use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, Ident, JoinConstraint, JoinOperator, Query, Select, SelectItem, SetExpr,
    SetOperator, TableAlias, TableFactor, TableWithJoins, UnaryOperator, Value, WindowType,
};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Qualified column references inside expression text we cannot lower
static QUALIFIED_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\[([^\]]+)\]|([A-Za-z_#][\w#$]*))\.(?:\[([^\]]+)\]|([A-Za-z_][\w$]*))")
        .unwrap()
});

/// Functions whose first argument is a date-part keyword, not a column
pub(crate) const DATEPART_FUNCTIONS: &[&str] = &[
    "dateadd",
    "datediff",
    "datediff_big",
    "datepart",
    "datename",
    "datetrunc",
    "date_bucket",
];

/// Lowers queries for one analysis unit
pub struct Lowerer<'a> {
    dialect: &'a dyn SqlDialect,
    ctx: &'a AnalysisContext,
    scopes: Vec<BTreeMap<String, Relation>>,
    anonymous: usize,

    /// Diagnostics raised while lowering
    pub diagnostics: Vec<Diagnostic>,
}

impl<'a> Lowerer<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, ctx: &'a AnalysisContext) -> Self {
        Self {
            dialect,
            ctx,
            scopes: Vec::new(),
            anonymous: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Canonical name for raw object name text
    pub fn qualify(&self, raw: &str) -> Option<String> {
        self.dialect.qualify(raw, self.ctx)
    }

    /// Lower a full query (CTEs, body)
    pub fn query(&mut self, query: &Query) -> QueryPlan {
        let Some(with) = &query.with else {
            return self.set_expr(&query.body);
        };

        self.scopes.push(BTreeMap::new());
        for cte in &with.cte_tables {
            let name = cte.alias.name.value.to_lowercase();
            if with.recursive {
                // self-references see a shapeless placeholder
                self.bind_cte(&name, Relation::Opaque);
            }
            let mut plan = self.query(&cte.query);
            let columns = alias_columns(&cte.alias);
            if !columns.is_empty() {
                plan.rename_outputs(&columns);
            }
            self.bind_cte(&name, Relation::Derived(Box::new(plan)));
        }
        let plan = self.set_expr(&query.body);
        self.scopes.pop();
        plan
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Builtin semantics for an unqualified function name
    pub(crate) fn builtin(&self, name: &str) -> FunctionClass {
        self.dialect.builtin(name)
    }

    pub(crate) fn has_assignment_aliases(&self) -> bool {
        self.dialect.has_assignment_aliases()
    }

    pub(crate) fn bind_cte(&mut self, name: &str, relation: Relation) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), relation);
        }
    }

    pub(crate) fn lookup_cte(&self, raw: &str) -> Option<Relation> {
        let parts = split_identifier(raw);
        let [name] = parts.as_slice() else {
            return None;
        };
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name.as_str()).cloned())
    }

    fn set_expr(&mut self, body: &SetExpr) -> QueryPlan {
        match body {
            SetExpr::Select(select) => QueryPlan::Select(self.select(select)),
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation {
                op, left, right, ..
            } => {
                let op = match op {
                    SetOperator::Union => SetOpKind::Union,
                    SetOperator::Intersect => SetOpKind::Intersect,
                    _ => SetOpKind::Except,
                };
                QueryPlan::SetOp {
                    op,
                    left: Box::new(self.set_expr(left)),
                    right: Box::new(self.set_expr(right)),
                }
            }
            SetExpr::Values(values) => {
                let projection = values
                    .rows
                    .first()
                    .map(|row| {
                        row.iter()
                            .enumerate()
                            .map(|(i, e)| ProjectionItem::Expr {
                                name: format!("column_{}", i + 1),
                                expr: self.expr(e),
                                text: e.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                QueryPlan::Select(SelectPlan {
                    projection,
                    ..SelectPlan::default()
                })
            }
            other => {
                self.unsupported("query body", &other.to_string());
                QueryPlan::Select(SelectPlan::default())
            }
        }
    }

    /// Lower one SELECT block; `INTO` is left to the caller
    pub fn select(&mut self, select: &Select) -> SelectPlan {
        let mut plan = SelectPlan::default();

        for table in &select.from {
            self.table_with_joins(table, &mut plan);
        }

        let mut position = 0;
        for item in &select.projection {
            position += 1;
            let item = self.projection_item(item, position);
            plan.projection.push(item);
        }

        if let Some(selection) = &select.selection {
            let predicate = self.expr(selection);
            plan.predicates.push(predicate);
        }

        match &select.group_by {
            GroupByExpr::All(_) => plan.grouped = true,
            GroupByExpr::Expressions(exprs, _) => {
                plan.grouped = !exprs.is_empty();
                for e in exprs {
                    let predicate = self.expr(e);
                    plan.predicates.push(predicate);
                }
            }
        }

        if let Some(having) = &select.having {
            let predicate = self.expr(having);
            plan.predicates.push(predicate);
        }

        plan
    }

    fn table_with_joins(&mut self, table: &TableWithJoins, plan: &mut SelectPlan) {
        let start = plan.sources.len();
        self.factor(&table.relation, plan);

        for join in &table.joins {
            let before = plan.sources.len();
            self.factor(&join.relation, plan);

            let (left_optional, right_optional) = join_optionality(&join.join_operator);
            if right_optional {
                plan.sources[before..].iter_mut().for_each(|s| s.optional = true);
            }
            if left_optional {
                plan.sources[start..before].iter_mut().for_each(|s| s.optional = true);
            }
            if let Some(JoinConstraint::On(on)) = join_constraint(&join.join_operator) {
                let predicate = self.expr(on);
                plan.predicates.push(predicate);
            }
        }
    }

    fn factor(&mut self, factor: &TableFactor, plan: &mut SelectPlan) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let raw = name.to_string();
                let relation = if raw.starts_with('@') {
                    Relation::Opaque
                } else if let Some(cte) = self.lookup_cte(&raw) {
                    cte
                } else {
                    self.qualify(&raw).map_or(Relation::Opaque, Relation::Object)
                };
                let alias = match alias {
                    Some(alias) => alias.name.value.clone(),
                    None => split_identifier(&raw).pop().unwrap_or_default(),
                };
                plan.sources.push(SourceBinding::new(alias, relation));
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let mut inner = self.query(subquery);
                let alias = match alias {
                    Some(alias) => {
                        let columns = alias_columns(alias);
                        if !columns.is_empty() {
                            inner.rename_outputs(&columns);
                        }
                        alias.name.value.clone()
                    }
                    None => self.anonymous_alias(),
                };
                plan.sources
                    .push(SourceBinding::new(alias, Relation::Derived(Box::new(inner))));
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins, plan),
            TableFactor::Pivot { table, alias, .. } | TableFactor::Unpivot { table, alias, .. } => {
                self.unsupported("PIVOT/UNPIVOT", &factor.to_string());
                let mut inner = SelectPlan::default();
                self.factor(table, &mut inner);
                let relation = inner
                    .sources
                    .into_iter()
                    .next()
                    .map_or(Relation::Opaque, |s| s.relation);
                let alias = alias
                    .as_ref()
                    .map_or_else(|| self.anonymous_alias(), |a| a.name.value.clone());
                plan.sources
                    .push(SourceBinding::new(alias, Relation::Pivot(Box::new(relation))));
            }
            other => {
                self.unsupported("table factor", &other.to_string());
                let alias = self.anonymous_alias();
                plan.sources.push(SourceBinding::new(alias, Relation::Opaque));
            }
        }
    }

    pub(crate) fn anonymous_alias(&mut self) -> String {
        self.anonymous += 1;
        format!("derived_{}", self.anonymous)
    }

    fn projection_item(&mut self, item: &SelectItem, position: usize) -> ProjectionItem {
        match item {
            SelectItem::Wildcard(_) => ProjectionItem::Star { qualifier: None },
            SelectItem::QualifiedWildcard(name, _) => ProjectionItem::Star {
                qualifier: Some(split_identifier(&name.to_string()).join(".")),
            },
            SelectItem::ExprWithAlias { expr, alias } => ProjectionItem::Expr {
                name: alias.value.clone(),
                expr: self.expr(expr),
                text: expr.to_string(),
            },
            SelectItem::UnnamedExpr(expr) => {
                if let Some((alias, value)) = self.assignment_alias(expr) {
                    return ProjectionItem::Expr {
                        name: alias,
                        expr: self.expr(value),
                        text: value.to_string(),
                    };
                }
                let name = match expr {
                    Expr::Identifier(ident) => ident.value.clone(),
                    Expr::CompoundIdentifier(idents) => idents
                        .last()
                        .map_or_else(|| format!("column_{}", position), |i| i.value.clone()),
                    _ => format!("column_{}", position),
                };
                ProjectionItem::Expr {
                    name,
                    expr: self.expr(expr),
                    text: expr.to_string(),
                }
            }
        }
    }

    /// T-SQL `SELECT alias = expr`
    fn assignment_alias<'e>(&self, expr: &'e Expr) -> Option<(String, &'e Expr)> {
        if !self.dialect.has_assignment_aliases() {
            return None;
        }
        let Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } = expr
        else {
            return None;
        };
        match left.as_ref() {
            Expr::Identifier(ident) if !ident.value.starts_with('@') => {
                Some((ident.value.clone(), right.as_ref()))
            }
            Expr::Value(Value::SingleQuotedString(alias)) => Some((alias.clone(), right.as_ref())),
            _ => None,
        }
    }

    /// Lower a scalar expression
    pub fn expr(&mut self, expr: &Expr) -> ScalarExpr {
        match expr {
            Expr::Identifier(ident) => {
                if ident.value.starts_with('@') {
                    ScalarExpr::Opaque { inputs: Vec::new() }
                } else {
                    ScalarExpr::column(ident.value.clone())
                }
            }
            Expr::CompoundIdentifier(idents) => compound_column(idents),
            Expr::Value(value) => literal(value),
            Expr::TypedString { data_type, .. } => ScalarExpr::Literal {
                logical_type: LogicalType::parse(&data_type.to_string()),
                null: false,
            },
            Expr::Cast {
                expr: inner,
                data_type,
                ..
            } => ScalarExpr::Cast {
                expr: Box::new(self.expr(inner)),
                target: LogicalType::parse(&data_type.to_string()),
            },
            Expr::Convert {
                expr: inner,
                data_type,
                ..
            } => match data_type {
                Some(data_type) => ScalarExpr::Cast {
                    expr: Box::new(self.expr(inner)),
                    target: LogicalType::parse(&data_type.to_string()),
                },
                None => self.expr(inner),
            },
            Expr::Nested(inner) | Expr::Collate { expr: inner, .. } => self.expr(inner),
            Expr::UnaryOp { op, expr: inner } => {
                let operand = self.expr(inner);
                match op {
                    UnaryOperator::Not => ScalarExpr::Predicate {
                        operands: vec![operand],
                        null_test: false,
                    },
                    UnaryOperator::Plus => operand,
                    _ => ScalarExpr::Negate(Box::new(operand)),
                }
            }
            Expr::BinaryOp { left, op, right } => ScalarExpr::Binary {
                class: binary_class(op),
                left: Box::new(self.expr(left)),
                right: Box::new(self.expr(right)),
            },
            Expr::IsNull(inner) | Expr::IsNotNull(inner) => ScalarExpr::Predicate {
                operands: vec![self.expr(inner)],
                null_test: true,
            },
            Expr::InList { expr: inner, list, .. } => {
                let mut operands = vec![self.expr(inner)];
                for e in list {
                    operands.push(self.expr(e));
                }
                predicate(operands)
            }
            Expr::InSubquery {
                expr: inner,
                subquery,
                ..
            } => {
                let operands = vec![
                    self.expr(inner),
                    ScalarExpr::Subquery(Box::new(self.query(subquery))),
                ];
                predicate(operands)
            }
            Expr::Between {
                expr: inner,
                low,
                high,
                ..
            } => {
                let operands = vec![self.expr(inner), self.expr(low), self.expr(high)];
                predicate(operands)
            }
            Expr::Like {
                expr: inner,
                pattern,
                ..
            }
            | Expr::ILike {
                expr: inner,
                pattern,
                ..
            } => {
                let operands = vec![self.expr(inner), self.expr(pattern)];
                predicate(operands)
            }
            Expr::Exists { subquery, .. } => {
                predicate(vec![ScalarExpr::Subquery(Box::new(self.query(subquery)))])
            }
            Expr::Subquery(query) => ScalarExpr::Subquery(Box::new(self.query(query))),
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let operand = operand.as_ref().map(|e| Box::new(self.expr(e)));
                let conditions = conditions.iter().map(|e| self.expr(e)).collect();
                let results = results.iter().map(|e| self.expr(e)).collect();
                let else_result = else_result.as_ref().map(|e| Box::new(self.expr(e)));
                ScalarExpr::Case {
                    operand,
                    conditions,
                    results,
                    else_result,
                }
            }
            Expr::Function(function) => self.function(function),
            Expr::Substring { expr: inner, .. } => {
                self.builtin_call("substring", FunctionClass::FirstArgument, inner)
            }
            Expr::Trim { expr: inner, .. } => {
                self.builtin_call("trim", FunctionClass::FirstArgument, inner)
            }
            Expr::Ceil { expr: inner, .. } => {
                self.builtin_call("ceiling", FunctionClass::FirstArgument, inner)
            }
            Expr::Floor { expr: inner, .. } => {
                self.builtin_call("floor", FunctionClass::FirstArgument, inner)
            }
            Expr::Extract { expr: inner, .. } => {
                self.builtin_call("extract", FunctionClass::Returns(LogicalType::Int), inner)
            }
            Expr::Position { expr: inner, .. } => {
                self.builtin_call("position", FunctionClass::Returns(LogicalType::Int), inner)
            }
            Expr::AtTimeZone { timestamp, .. } => self.builtin_call(
                "at_time_zone",
                FunctionClass::Returns(LogicalType::Timestamp),
                timestamp,
            ),
            other => opaque(&other.to_string()),
        }
    }

    fn builtin_call(&mut self, name: &str, class: FunctionClass, arg: &Expr) -> ScalarExpr {
        ScalarExpr::Function {
            name: name.to_string(),
            class,
            args: vec![self.expr(arg)],
            windowed: false,
            window_inputs: Vec::new(),
        }
    }

    fn function(&mut self, function: &Function) -> ScalarExpr {
        let name = function.name.to_string();
        let parts = split_identifier(&name);
        let short = parts.last().cloned().unwrap_or_default();
        let class = if parts.len() > 1 {
            // schema-qualified calls are user functions
            FunctionClass::Unknown
        } else {
            self.dialect.builtin(&short)
        };

        let mut args = Vec::new();
        match &function.args {
            FunctionArguments::List(list) => {
                for (i, arg) in list.args.iter().enumerate() {
                    let Some(FunctionArgExpr::Expr(e)) = function_arg_expr(arg) else {
                        continue;
                    };
                    if i == 0
                        && DATEPART_FUNCTIONS.contains(&short.as_str())
                        && matches!(e, Expr::Identifier(_))
                    {
                        continue;
                    }
                    args.push(self.expr(e));
                }
            }
            FunctionArguments::Subquery(query) => {
                args.push(ScalarExpr::Subquery(Box::new(self.query(query))));
            }
            FunctionArguments::None => {}
        }

        let mut window_inputs = Vec::new();
        let windowed = match &function.over {
            Some(WindowType::WindowSpec(spec)) => {
                for e in &spec.partition_by {
                    window_inputs.push(self.expr(e));
                }
                for order in &spec.order_by {
                    window_inputs.push(self.expr(&order.expr));
                }
                true
            }
            Some(_) => true,
            None => false,
        };

        ScalarExpr::Function {
            name: short,
            class,
            args,
            windowed,
            window_inputs,
        }
    }

    pub(crate) fn unsupported(&mut self, what: &str, text: &str) {
        tracing::debug!(construct = what, "unsupported construct");
        self.diagnostics.push(
            Diagnostic::warn(
                DiagnosticCode::UnsupportedConstruct,
                format!("Unsupported {}; lineage through it is unknown", what),
            )
            .with_expression(text.to_string()),
        );
    }
}

fn function_arg_expr(arg: &FunctionArg) -> Option<&FunctionArgExpr> {
    match arg {
        FunctionArg::Unnamed(arg) => Some(arg),
        FunctionArg::Named { arg, .. } => Some(arg),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn join_optionality(op: &JoinOperator) -> (bool, bool) {
    match op {
        JoinOperator::LeftOuter(_) | JoinOperator::OuterApply => (false, true),
        JoinOperator::RightOuter(_) => (true, false),
        JoinOperator::FullOuter(_) => (true, true),
        _ => (false, false),
    }
}

fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c) => Some(c),
        _ => None,
    }
}

fn binary_class(op: &BinaryOperator) -> BinaryClass {
    match op {
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo
        | BinaryOperator::BitwiseAnd
        | BinaryOperator::BitwiseOr
        | BinaryOperator::BitwiseXor => BinaryClass::Arithmetic,
        BinaryOperator::StringConcat => BinaryClass::Concat,
        _ => BinaryClass::Predicate,
    }
}

fn predicate(operands: Vec<ScalarExpr>) -> ScalarExpr {
    ScalarExpr::Predicate {
        operands,
        null_test: false,
    }
}

fn compound_column(idents: &[Ident]) -> ScalarExpr {
    match idents {
        [] => ScalarExpr::Opaque { inputs: Vec::new() },
        [name] => ScalarExpr::column(name.value.clone()),
        [qualifier @ .., name] => ScalarExpr::qualified(
            qualifier
                .iter()
                .map(|i| i.value.to_lowercase())
                .collect::<Vec<_>>()
                .join("."),
            name.value.clone(),
        ),
    }
}

/// Typed literal
pub(crate) fn literal(value: &Value) -> ScalarExpr {
    let (logical_type, null) = match value {
        Value::Number(text, _) => (number_type(text), false),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            (LogicalType::varchar(s.chars().count().max(1) as u32), false)
        }
        Value::NationalStringLiteral(s) => {
            (LogicalType::nvarchar(s.chars().count().max(1) as u32), false)
        }
        Value::Boolean(_) => (LogicalType::Bool, false),
        Value::Null => (LogicalType::Unknown, true),
        _ => (LogicalType::Unknown, false),
    };
    ScalarExpr::Literal { logical_type, null }
}

/// Type of a numeric literal
pub(crate) fn number_type(text: &str) -> LogicalType {
    let text = text.trim_start_matches(['-', '+']);
    if text.contains(['e', 'E']) {
        return LogicalType::Float;
    }
    if let Some((whole, fraction)) = text.split_once('.') {
        let whole = whole.trim_start_matches('0').len().max(1);
        let scale = fraction.len();
        return LogicalType::decimal(
            (whole + scale).min(38) as u8,
            scale.min(38) as u8,
        );
    }
    match text.parse::<i64>() {
        Ok(n) if i32::try_from(n).is_ok() => LogicalType::Int,
        Ok(_) => LogicalType::BigInt,
        Err(_) => LogicalType::decimal(text.len().min(38) as u8, 0),
    }
}

/// Unlowerable expression: keep the qualified column references found in its text
pub(crate) fn opaque(text: &str) -> ScalarExpr {
    let inputs = QUALIFIED_REF_RE
        .captures_iter(text)
        .filter_map(|c| {
            let qualifier = c.get(1).or_else(|| c.get(2))?.as_str();
            let name = c.get(3).or_else(|| c.get(4))?.as_str();
            Some(ScalarExpr::qualified(qualifier.to_lowercase(), name))
        })
        .collect();
    ScalarExpr::Opaque { inputs }
}

/// Column names of a table alias list (`AS t (a, b)`)
fn alias_columns(alias: &TableAlias) -> Vec<String> {
    alias
        .columns
        .iter()
        .filter_map(|c| {
            let text = c.to_string();
            let name = text.split_whitespace().next()?;
            Some(name.trim_matches(['[', ']', '"', '`']).to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MsSql;
    use sqlparser::ast::Statement;

    fn lower(sql: &str) -> (QueryPlan, Vec<Diagnostic>) {
        let dialect = MsSql;
        let ctx = AnalysisContext::new("dw", "dbo");
        let statements = dialect.parse(sql).unwrap();
        let Statement::Query(query) = &statements[0] else {
            panic!("expected a query");
        };
        let mut lowerer = Lowerer::new(&dialect, &ctx);
        let plan = lowerer.query(query);
        (plan, lowerer.diagnostics)
    }

    fn select(plan: &QueryPlan) -> &SelectPlan {
        match plan {
            QueryPlan::Select(select) => select,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn joins_mark_optional_sources() {
        let (plan, _) = lower(
            "SELECT o.id, c.name FROM sales.orders o LEFT JOIN customers c ON o.cid = c.id",
        );
        let select = select(&plan);
        assert_eq!(select.sources.len(), 2);
        assert_eq!(select.sources[0].relation, Relation::Object("dw.sales.orders".into()));
        assert!(!select.sources[0].optional);
        assert_eq!(select.sources[1].alias, "c");
        assert!(select.sources[1].optional);
        assert_eq!(select.predicates.len(), 1);
    }

    #[test]
    fn ctes_are_inlined() {
        let (plan, _) = lower(
            "WITH recent AS (SELECT id FROM orders) SELECT r.id FROM recent r",
        );
        let select = select(&plan);
        match &select.sources[0].relation {
            Relation::Derived(inner) => {
                let deps: Vec<String> = inner.dependencies().into_iter().collect();
                assert_eq!(deps, vec!["dw.dbo.orders"]);
            }
            other => panic!("expected derived relation, got {:?}", other),
        }
    }

    #[test]
    fn assignment_aliases_and_unnamed_columns() {
        let (plan, _) = lower("SELECT Total = o.qty * o.price, o.id, 1 + 1 FROM orders o");
        let names: Vec<String> = select(&plan)
            .projection
            .iter()
            .map(|item| match item {
                ProjectionItem::Expr { name, .. } => name.clone(),
                ProjectionItem::Star { .. } => "*".to_string(),
            })
            .collect();
        assert_eq!(names, vec!["Total", "id", "column_3"]);
    }

    #[test]
    fn cast_records_target_type() {
        let (plan, _) = lower("SELECT CAST(amount AS DECIMAL(10,2)) AS amount FROM orders");
        match &select(&plan).projection[0] {
            ProjectionItem::Expr {
                expr: ScalarExpr::Cast { target, .. },
                ..
            } => assert_eq!(*target, LogicalType::decimal(10, 2)),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn datepart_keywords_are_not_columns() {
        let (plan, _) = lower("SELECT DATEADD(day, 1, o.created) AS d FROM orders o");
        match &select(&plan).projection[0] {
            ProjectionItem::Expr {
                expr: ScalarExpr::Function { args, class, .. },
                ..
            } => {
                assert_eq!(args.len(), 2);
                assert_eq!(*class, FunctionClass::Returns(LogicalType::Timestamp));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn numeric_literal_types() {
        assert_eq!(number_type("42"), LogicalType::Int);
        assert_eq!(number_type("12345678901"), LogicalType::BigInt);
        assert_eq!(number_type("3.14"), LogicalType::decimal(3, 2));
        assert_eq!(number_type("1e3"), LogicalType::Float);
    }

    #[test]
    fn opaque_keeps_qualified_references() {
        match opaque("SOMETHING(o.amount, [c].[Region])") {
            ScalarExpr::Opaque { inputs } => assert_eq!(
                inputs,
                vec![
                    ScalarExpr::qualified("o", "amount"),
                    ScalarExpr::qualified("c", "Region"),
                ]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }
}
