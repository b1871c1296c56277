//! Query and expression recovery from lexemes
//!
//! Builds the same plan IR as [`Lowerer`] for text the grammar rejected.
//! Clause boundaries come from top-level keywords; expressions are split by
//! operator precedence and anything unrecognized keeps only the column
//! references it contains.

use crate::lexeme::{depths, join_text, matching_paren, read_name, split_top, Lexeme, LexemeKind};
use crate::lower::{literal, number_type, opaque, Lowerer, DATEPART_FUNCTIONS};
use colineage_core::object::split_identifier;
use colineage_core::plan::{
    BinaryClass, FunctionClass, ProjectionItem, QueryPlan, Relation, ScalarExpr, SelectPlan,
    SourceBinding,
};
use colineage_core::{LogicalType, SetOpKind};
use sqlparser::ast::Value;
use std::collections::BTreeMap;
use std::ops::Range;

/// Words that end a table factor instead of aliasing it
pub(crate) const ALIAS_STOP: &[&str] = &[
    "WITH", "ON", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "PIVOT",
    "UNPIVOT", "GROUP", "ORDER", "HAVING", "UNION", "EXCEPT", "INTERSECT", "OPTION", "FOR",
    "WINDOW", "USING", "WHEN", "SET", "OUTPUT", "APPLY", "NATURAL", "INTO", "LIMIT", "QUALIFY",
];

/// Top-level keywords that end the projection list
const SELECT_CLAUSES: &[&str] = &[
    "INTO", "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "OPTION", "FOR", "WINDOW", "LIMIT",
    "QUALIFY",
];

const JOIN_WORDS: &[&str] = &["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "APPLY"];

const COMPARISONS: &[&str] = &["=", "<>", "!=", "<", ">", "<=", ">=", "!<", "!>"];

const COMPARISON_WORDS: &[&str] = &["IS", "IN", "LIKE", "ILIKE", "BETWEEN", "EXISTS"];

/// Lowers lexeme slices through a shared [`Lowerer`]
pub struct TokenLowerer<'l, 'a> {
    lowerer: &'l mut Lowerer<'a>,
}

impl<'l, 'a> TokenLowerer<'l, 'a> {
    pub fn new(lowerer: &'l mut Lowerer<'a>) -> Self {
        Self { lowerer }
    }

    /// Lower a query: optional CTE list, then a set-operation tree
    pub fn query(&mut self, lexemes: &[Lexeme]) -> QueryPlan {
        let lexemes = strip_parens(lexemes);
        if lexemes.first().is_some_and(|l| l.is_keyword("WITH")) {
            let body = self.bind_ctes(lexemes);
            let plan = self.set_query(&lexemes[body..]);
            self.lowerer.pop_scope();
            return plan;
        }
        self.set_query(lexemes)
    }

    /// Bind the CTEs of a leading `WITH` list in a new scope; returns the
    /// index of the statement body. The caller pops the scope.
    pub fn bind_ctes(&mut self, lexemes: &[Lexeme]) -> usize {
        self.lowerer.push_scope();
        let mut i = 1;
        let recursive = lexemes.get(i).is_some_and(|l| l.is_keyword("RECURSIVE"));
        if recursive {
            i += 1;
        }

        while let Some(name) = lexemes.get(i).filter(|l| l.is_name_part()) {
            let name = name.unquoted().to_lowercase();
            i += 1;

            let mut columns = Vec::new();
            if lexemes.get(i).is_some_and(|l| l.is_symbol("(")) {
                let Some(close) = matching_paren(lexemes, i) else {
                    break;
                };
                columns = lexemes[i + 1..close]
                    .iter()
                    .filter(|l| l.is_name_part())
                    .map(|l| l.unquoted().to_string())
                    .collect();
                i = close + 1;
            }
            if !lexemes.get(i).is_some_and(|l| l.is_keyword("AS")) {
                break;
            }
            i += 1;
            if !lexemes.get(i).is_some_and(|l| l.is_symbol("(")) {
                break;
            }
            let Some(close) = matching_paren(lexemes, i) else {
                break;
            };

            if recursive {
                self.lowerer.bind_cte(&name, Relation::Opaque);
            }
            let mut plan = self.query(&lexemes[i + 1..close]);
            if !columns.is_empty() {
                plan.rename_outputs(&columns);
            }
            self.lowerer.bind_cte(&name, Relation::Derived(Box::new(plan)));
            i = close + 1;

            if lexemes.get(i).is_some_and(|l| l.is_symbol(",")) {
                i += 1;
            } else {
                break;
            }
        }
        i
    }

    fn set_query(&mut self, lexemes: &[Lexeme]) -> QueryPlan {
        let depth = depths(lexemes);
        let split = (0..lexemes.len()).rev().find(|&i| {
            depth[i] == 0 && lexemes[i].is_any_keyword(&["UNION", "EXCEPT", "INTERSECT", "MINUS"])
        });

        let Some(at) = split else {
            return self.select(lexemes);
        };
        let op = if lexemes[at].is_keyword("UNION") {
            SetOpKind::Union
        } else if lexemes[at].is_keyword("INTERSECT") {
            SetOpKind::Intersect
        } else {
            SetOpKind::Except
        };
        let mut right = at + 1;
        if lexemes.get(right).is_some_and(|l| l.is_any_keyword(&["ALL", "DISTINCT"])) {
            right += 1;
        }
        QueryPlan::SetOp {
            op,
            left: Box::new(self.set_query(&lexemes[..at])),
            right: Box::new(self.query(&lexemes[right..])),
        }
    }

    fn select(&mut self, lexemes: &[Lexeme]) -> QueryPlan {
        let lexemes = strip_parens(lexemes);
        match lexemes.first() {
            Some(first) if first.is_keyword("SELECT") => {}
            Some(first) if first.is_keyword("VALUES") => return self.values(&lexemes[1..]),
            Some(first) if first.is_keyword("WITH") => return self.query(lexemes),
            _ => {
                self.lowerer.unsupported("query", &join_text(lexemes));
                return QueryPlan::Select(SelectPlan::default());
            }
        }

        let mut i = 1;
        if lexemes.get(i).is_some_and(|l| l.is_any_keyword(&["DISTINCT", "ALL"])) {
            i += 1;
        }
        if lexemes.get(i).is_some_and(|l| l.is_keyword("TOP")) {
            i += 1;
            match lexemes.get(i) {
                Some(l) if l.is_symbol("(") => i = matching_paren(lexemes, i).map_or(i + 1, |c| c + 1),
                Some(_) => i += 1,
                None => {}
            }
            if lexemes.get(i).is_some_and(|l| l.is_keyword("PERCENT")) {
                i += 1;
            }
            if lexemes.get(i).is_some_and(|l| l.is_keyword("WITH"))
                && lexemes.get(i + 1).is_some_and(|l| l.is_keyword("TIES"))
            {
                i += 2;
            }
        }

        let clauses = clause_ranges(lexemes, i);
        let mut plan = SelectPlan::default();

        if let Some(from) = clauses.get("FROM") {
            self.from(&lexemes[from.clone()], &mut plan);
        }

        let projection_end = clauses.values().map(|r| r.start - 1).min().unwrap_or(lexemes.len());
        let items = split_top(&lexemes[i..projection_end.max(i)], |l| l.is_symbol(","));
        for (position, item) in items.into_iter().filter(|s| !s.is_empty()).enumerate() {
            let item = self.projection_item(item, position + 1);
            plan.projection.push(item);
        }

        if let Some(range) = clauses.get("WHERE") {
            let predicate = self.expr(&lexemes[range.clone()]);
            plan.predicates.push(predicate);
        }
        if let Some(range) = clauses.get("GROUP") {
            let group = &lexemes[range.clone()];
            let group = group.strip_prefix_keyword("BY");
            for item in split_top(group, |l| l.is_symbol(",")).into_iter().filter(|s| !s.is_empty()) {
                plan.grouped = true;
                let predicate = self.expr(item);
                plan.predicates.push(predicate);
            }
        }
        if let Some(range) = clauses.get("HAVING") {
            let predicate = self.expr(&lexemes[range.clone()]);
            plan.predicates.push(predicate);
        }

        QueryPlan::Select(plan)
    }

    fn values(&mut self, rows: &[Lexeme]) -> QueryPlan {
        let first_row = split_top(rows, |l| l.is_symbol(","))
            .into_iter()
            .next()
            .map(strip_parens)
            .unwrap_or_default();
        let projection = split_top(first_row, |l| l.is_symbol(","))
            .into_iter()
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, value)| ProjectionItem::Expr {
                name: format!("column_{}", i + 1),
                expr: self.expr(value),
                text: join_text(value),
            })
            .collect();
        QueryPlan::Select(SelectPlan {
            projection,
            ..SelectPlan::default()
        })
    }

    /// FROM list: comma-separated join chains
    fn from(&mut self, lexemes: &[Lexeme], plan: &mut SelectPlan) {
        for chain in split_top(lexemes, |l| l.is_symbol(",")) {
            if !chain.is_empty() {
                self.join_chain(chain, plan);
            }
        }
    }

    fn join_chain(&mut self, lexemes: &[Lexeme], plan: &mut SelectPlan) {
        let depth = depths(lexemes);
        // (start of join keywords, index after JOIN/APPLY)
        let mut joins: Vec<(usize, usize)> = Vec::new();
        let mut i = 0;
        while i < lexemes.len() {
            let is_call = lexemes.get(i + 1).is_some_and(|l| l.is_symbol("("));
            if depth[i] == 0
                && lexemes[i].is_any_keyword(JOIN_WORDS)
                && !is_call
                && !is_outer_join_tail(lexemes, i)
            {
                let start = i;
                while i < lexemes.len() && !lexemes[i].is_any_keyword(&["JOIN", "APPLY"]) {
                    i += 1;
                }
                joins.push((start, (i + 1).min(lexemes.len())));
            }
            i += 1;
        }

        let start = plan.sources.len();
        let first_end = joins.first().map_or(lexemes.len(), |j| j.0);
        self.factor(&lexemes[..first_end], plan);

        for (n, &(keywords, after)) in joins.iter().enumerate() {
            let end = joins.get(n + 1).map_or(lexemes.len(), |j| j.0);
            let segment = &lexemes[after..end.max(after)];
            let segment_depth = depths(segment);
            let on = (0..segment.len()).find(|&k| segment_depth[k] == 0 && segment[k].is_keyword("ON"));

            let before = plan.sources.len();
            self.factor(&segment[..on.unwrap_or(segment.len())], plan);

            let words: Vec<String> = lexemes[keywords..after].iter().filter_map(Lexeme::keyword).collect();
            let has = |w: &str| words.iter().any(|x| x == w);
            let outer_apply = has("OUTER") && has("APPLY");
            if has("LEFT") || has("FULL") || outer_apply {
                plan.sources[before..].iter_mut().for_each(|s| s.optional = true);
            }
            if has("RIGHT") || has("FULL") {
                plan.sources[start..before].iter_mut().for_each(|s| s.optional = true);
            }

            if let Some(on) = on {
                let predicate = self.expr(&segment[on + 1..]);
                plan.predicates.push(predicate);
            }
        }
    }

    /// One table factor with its alias, hints and PIVOT
    fn factor(&mut self, lexemes: &[Lexeme], plan: &mut SelectPlan) {
        let Some(first) = lexemes.first() else {
            return;
        };

        let (relation, rest, default_alias) = if first.is_symbol("(") {
            let close = matching_paren(lexemes, 0).unwrap_or(lexemes.len() - 1).max(1);
            let inner = &lexemes[1..close];
            let rest = &lexemes[(close + 1).min(lexemes.len())..];
            if starts_query(inner) {
                let plan = self.query(inner);
                (Relation::Derived(Box::new(plan)), rest, None)
            } else {
                // parenthesized join
                self.join_chain(inner, plan);
                return;
            }
        } else if let Some((raw, next)) = read_name(lexemes, 0) {
            let mut next = next;
            let relation = if raw.starts_with('@') {
                Relation::Opaque
            } else if let Some(cte) = self.lowerer.lookup_cte(&raw) {
                cte
            } else {
                self.lowerer.qualify(&raw).map_or(Relation::Opaque, Relation::Object)
            };
            // table-valued function arguments
            if lexemes.get(next).is_some_and(|l| l.is_symbol("(")) {
                next = matching_paren(lexemes, next).map_or(lexemes.len(), |c| c + 1);
            }
            let alias = split_identifier(&raw).pop();
            (relation, &lexemes[next.min(lexemes.len())..], alias)
        } else {
            self.lowerer.unsupported("table factor", &join_text(lexemes));
            let alias = self.lowerer.anonymous_alias();
            plan.sources.push(SourceBinding::new(alias, Relation::Opaque));
            return;
        };

        let (mut alias, columns, mut rest) = read_alias(rest);
        let mut relation = relation;
        if let Relation::Derived(inner) = &mut relation {
            if !columns.is_empty() {
                inner.rename_outputs(&columns);
            }
        }

        rest = skip_table_hints(rest);
        if rest.first().is_some_and(|l| l.is_any_keyword(&["PIVOT", "UNPIVOT"])) {
            self.lowerer.unsupported("PIVOT/UNPIVOT", &join_text(lexemes));
            relation = Relation::Pivot(Box::new(relation));
            let after = match rest.get(1) {
                Some(l) if l.is_symbol("(") => matching_paren(rest, 1).map_or(rest.len(), |c| c + 1),
                _ => 1,
            };
            let (pivot_alias, _, _) = read_alias(&rest[after.min(rest.len())..]);
            alias = pivot_alias.or(alias);
        }

        let alias = match alias.or(default_alias) {
            Some(alias) => alias,
            None => self.lowerer.anonymous_alias(),
        };
        plan.sources.push(SourceBinding::new(alias, relation));
    }

    fn projection_item(&mut self, lexemes: &[Lexeme], position: usize) -> ProjectionItem {
        let n = lexemes.len();
        if n == 1 && lexemes[0].is_symbol("*") {
            return ProjectionItem::Star { qualifier: None };
        }
        if n >= 3 && lexemes[n - 1].is_symbol("*") && lexemes[n - 2].is_symbol(".") {
            let qualifier = read_name(&lexemes[..n - 2], 0)
                .map(|(raw, _)| split_identifier(&raw).join("."));
            return ProjectionItem::Star { qualifier };
        }

        // T-SQL `alias = expr`
        if self.lowerer.has_assignment_aliases()
            && n >= 3
            && lexemes[1].is_symbol("=")
            && is_alias_token(&lexemes[0])
            && !lexemes[0].text.starts_with('@')
        {
            let value = &lexemes[2..];
            return ProjectionItem::Expr {
                name: lexemes[0].unquoted().to_string(),
                expr: self.expr(value),
                text: join_text(value),
            };
        }

        let depth = depths(lexemes);
        let (name, value) = if let Some(k) = (0..n).rev().find(|&k| depth[k] == 0 && lexemes[k].is_keyword("AS")) {
            let name = lexemes.get(k + 1).map(|l| l.unquoted().to_string());
            (name, &lexemes[..k])
        } else if n >= 2 && is_bare_alias(&lexemes[n - 1], &lexemes[n - 2]) {
            (Some(lexemes[n - 1].unquoted().to_string()), &lexemes[..n - 1])
        } else {
            (None, lexemes)
        };

        let name = name.unwrap_or_else(|| match read_name(value, 0) {
            Some((raw, next)) if next == value.len() => {
                split_identifier_preserving_case(&raw).unwrap_or_else(|| format!("column_{}", position))
            }
            _ => format!("column_{}", position),
        });

        ProjectionItem::Expr {
            name,
            expr: self.expr(value),
            text: join_text(value),
        }
    }

    /// Lower an expression by operator precedence
    pub fn expr(&mut self, lexemes: &[Lexeme]) -> ScalarExpr {
        let lexemes = strip_parens(lexemes);
        let Some(first) = lexemes.first() else {
            return ScalarExpr::Opaque { inputs: Vec::new() };
        };
        if starts_query(lexemes) {
            return ScalarExpr::Subquery(Box::new(self.query(lexemes)));
        }

        let depth = depths(lexemes);
        let top = |pred: &dyn Fn(&Lexeme) -> bool| -> Vec<usize> {
            (0..lexemes.len()).filter(|&i| depth[i] == 0 && pred(&lexemes[i])).collect()
        };

        // lists: `(a, b)` after IN
        if !top(&|l| l.is_symbol(",")).is_empty() {
            let inputs = split_top(lexemes, |l| l.is_symbol(","))
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| self.expr(s))
                .collect();
            return ScalarExpr::Opaque { inputs };
        }

        // boolean connectives
        let between_and = between_ands(lexemes, &depth);
        let connectives = top(&|l| l.is_any_keyword(&["AND", "OR"]));
        let connectives: Vec<usize> = connectives.into_iter().filter(|i| !between_and.contains(i)).collect();
        if !connectives.is_empty() {
            let operands = split_at(lexemes, &connectives)
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| self.expr(s))
                .collect();
            return predicate(operands, false);
        }
        if first.is_any_keyword(&["NOT", "EXISTS"]) {
            return predicate(vec![self.expr(&lexemes[1..])], false);
        }

        // comparisons
        let comparisons = top(&|l| {
            (l.kind == LexemeKind::Symbol && COMPARISONS.contains(&l.text.as_str()))
                || l.is_any_keyword(COMPARISON_WORDS)
                || l.is_any_keyword(&["NOT", "AND"])
        });
        if comparisons
            .iter()
            .any(|&i| !lexemes[i].is_any_keyword(&["NOT", "AND"]))
        {
            let null_test = comparisons.iter().any(|&i| lexemes[i].is_keyword("IS"));
            let operands = split_at(lexemes, &comparisons)
                .into_iter()
                .filter(|s| !s.is_empty() && !(s.len() == 1 && s[0].is_keyword("NULL")))
                .map(|s| self.expr(s))
                .collect();
            return predicate(operands, null_test);
        }

        // additive, then multiplicative (left-associative: split at the last operator)
        for operators in [&["+", "-", "||"][..], &["*", "/", "%"][..]] {
            let split = (1..lexemes.len()).rev().find(|&i| {
                depth[i] == 0
                    && lexemes[i].kind == LexemeKind::Symbol
                    && operators.contains(&lexemes[i].text.as_str())
                    && is_operand_end(&lexemes[i - 1])
            });
            if let Some(at) = split {
                let class = if lexemes[at].text == "||" {
                    BinaryClass::Concat
                } else {
                    BinaryClass::Arithmetic
                };
                return ScalarExpr::Binary {
                    class,
                    left: Box::new(self.expr(&lexemes[..at])),
                    right: Box::new(self.expr(&lexemes[at + 1..])),
                };
            }
        }

        if first.is_symbol("-") || first.is_symbol("+") {
            let operand = self.expr(&lexemes[1..]);
            if first.is_symbol("+") || matches!(operand, ScalarExpr::Literal { .. }) {
                return operand;
            }
            return ScalarExpr::Negate(Box::new(operand));
        }

        self.atom(lexemes)
    }

    fn atom(&mut self, lexemes: &[Lexeme]) -> ScalarExpr {
        let first = &lexemes[0];
        let text = join_text(lexemes);

        match first.kind {
            LexemeKind::Number if lexemes.len() == 1 => {
                return ScalarExpr::Literal {
                    logical_type: number_type(&first.text),
                    null: false,
                }
            }
            LexemeKind::Text if lexemes.len() == 1 => {
                let value = if first.text.starts_with(['N', 'n']) {
                    Value::NationalStringLiteral(first.unquoted().to_string())
                } else {
                    Value::SingleQuotedString(first.unquoted().to_string())
                };
                return literal(&value);
            }
            _ => {}
        }

        if first.is_keyword("NULL") && lexemes.len() == 1 {
            return literal(&Value::Null);
        }
        if first.is_any_keyword(&["TRUE", "FALSE"]) && lexemes.len() == 1 {
            return literal(&Value::Boolean(first.is_keyword("TRUE")));
        }
        if first.is_keyword("CASE") && lexemes.last().is_some_and(|l| l.is_keyword("END")) {
            return self.case(&lexemes[1..lexemes.len() - 1]);
        }
        if first.is_any_keyword(&["CAST", "TRY_CAST"]) && lexemes.get(1).is_some_and(|l| l.is_symbol("(")) {
            if let Some(close) = matching_paren(lexemes, 1) {
                let inner = &lexemes[2..close];
                let inner_depth = depths(inner);
                if let Some(as_at) = (0..inner.len()).rev().find(|&k| inner_depth[k] == 0 && inner[k].is_keyword("AS")) {
                    return ScalarExpr::Cast {
                        expr: Box::new(self.expr(&inner[..as_at])),
                        target: LogicalType::parse(&type_text(&inner[as_at + 1..])),
                    };
                }
            }
        }
        if first.is_any_keyword(&["CONVERT", "TRY_CONVERT"]) && lexemes.get(1).is_some_and(|l| l.is_symbol("(")) {
            if let Some(close) = matching_paren(lexemes, 1) {
                let args = split_top(&lexemes[2..close], |l| l.is_symbol(","));
                if args.len() >= 2 {
                    return ScalarExpr::Cast {
                        expr: Box::new(self.expr(args[1])),
                        target: LogicalType::parse(&type_text(args[0])),
                    };
                }
            }
        }

        if let Some((raw, next)) = read_name(lexemes, 0) {
            if next == lexemes.len() {
                if raw.starts_with('@') {
                    return ScalarExpr::Opaque { inputs: Vec::new() };
                }
                return column(&raw);
            }
            if lexemes[next].is_symbol("(") {
                if let Some(close) = matching_paren(lexemes, next) {
                    return self.function(&raw, &lexemes[next + 1..close], &lexemes[close + 1..]);
                }
            }
        }

        opaque(&text)
    }

    fn function(&mut self, raw: &str, args: &[Lexeme], tail: &[Lexeme]) -> ScalarExpr {
        let parts = split_identifier(raw);
        let short = parts.last().cloned().unwrap_or_default();
        let class = if parts.len() > 1 {
            FunctionClass::Unknown
        } else {
            self.lowerer.builtin(&short)
        };

        let mut lowered = Vec::new();
        for (i, arg) in split_top(args, |l| l.is_symbol(",")).into_iter().enumerate() {
            let arg = match arg.first() {
                Some(l) if l.is_any_keyword(&["DISTINCT", "ALL"]) => &arg[1..],
                _ => arg,
            };
            if arg.is_empty() || (arg.len() == 1 && arg[0].is_symbol("*")) {
                continue;
            }
            if i == 0
                && DATEPART_FUNCTIONS.contains(&short.as_str())
                && arg.len() == 1
                && arg[0].kind == LexemeKind::Word
            {
                continue;
            }
            lowered.push(self.expr(arg));
        }

        let mut window_inputs = Vec::new();
        let mut windowed = false;
        if tail.first().is_some_and(|l| l.is_keyword("OVER")) {
            windowed = true;
            if tail.get(1).is_some_and(|l| l.is_symbol("(")) {
                let close = matching_paren(tail, 1).unwrap_or(tail.len());
                for item in window_items(&tail[2..close.max(2)]) {
                    window_inputs.push(self.expr(item));
                }
            }
        }

        ScalarExpr::Function {
            name: short,
            class,
            args: lowered,
            windowed,
            window_inputs,
        }
    }

    /// Body of `CASE ... END`
    fn case(&mut self, inner: &[Lexeme]) -> ScalarExpr {
        let depth = depths(inner);
        let marks: Vec<usize> = (0..inner.len())
            .filter(|&i| depth[i] == 0 && inner[i].is_any_keyword(&["WHEN", "THEN", "ELSE"]))
            .collect();

        let operand_end = marks.first().copied().unwrap_or(inner.len());
        let operand = (operand_end > 0).then(|| Box::new(self.expr(&inner[..operand_end])));

        let mut conditions = Vec::new();
        let mut results = Vec::new();
        let mut else_result = None;
        for (n, &at) in marks.iter().enumerate() {
            let end = marks.get(n + 1).copied().unwrap_or(inner.len());
            let part = &inner[at + 1..end];
            if inner[at].is_keyword("WHEN") {
                conditions.push(self.expr(part));
            } else if inner[at].is_keyword("THEN") {
                results.push(self.expr(part));
            } else {
                else_result = Some(Box::new(self.expr(part)));
            }
        }

        ScalarExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        }
    }
}

/// Slice helpers used while reading clauses
trait KeywordSlice {
    fn strip_prefix_keyword(&self, keyword: &str) -> &Self;
}

impl KeywordSlice for [Lexeme] {
    fn strip_prefix_keyword(&self, keyword: &str) -> &Self {
        match self.first() {
            Some(l) if l.is_keyword(keyword) => &self[1..],
            _ => self,
        }
    }
}

/// Top-level clause ranges (content after the keyword) of a SELECT
fn clause_ranges(lexemes: &[Lexeme], from: usize) -> BTreeMap<&'static str, Range<usize>> {
    let depth = depths(lexemes);
    let mut starts: Vec<(usize, &'static str)> = Vec::new();
    for i in from..lexemes.len() {
        if depth[i] != 0 {
            continue;
        }
        if let Some(clause) = SELECT_CLAUSES.iter().find(|c| lexemes[i].is_keyword(c)) {
            if starts.iter().all(|(_, c)| c != clause) {
                starts.push((i, clause));
            }
        }
    }

    let mut ranges = BTreeMap::new();
    for (n, &(at, clause)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map_or(lexemes.len(), |s| s.0);
        ranges.insert(clause, at + 1..end.max(at + 1));
    }
    ranges
}

/// Remove parentheses that wrap the whole slice
fn strip_parens(mut lexemes: &[Lexeme]) -> &[Lexeme] {
    while lexemes.len() >= 2
        && lexemes[0].is_symbol("(")
        && matching_paren(lexemes, 0) == Some(lexemes.len() - 1)
    {
        lexemes = &lexemes[1..lexemes.len() - 1];
    }
    lexemes
}

/// Whether the slice (possibly parenthesized) is a query
pub(crate) fn starts_query(lexemes: &[Lexeme]) -> bool {
    let lexemes = strip_parens(lexemes);
    lexemes
        .first()
        .is_some_and(|l| l.is_keyword("SELECT") || (l.is_keyword("WITH") && lexemes.len() > 1))
}

/// `OUTER` directly before `JOIN` belongs to the preceding LEFT/RIGHT/FULL
fn is_outer_join_tail(lexemes: &[Lexeme], i: usize) -> bool {
    i > 0
        && lexemes[i - 1].is_any_keyword(JOIN_WORDS)
        && !lexemes[i - 1].is_any_keyword(&["JOIN", "APPLY"])
}

/// Alias (with optional column list) at the start of `rest`
fn read_alias(rest: &[Lexeme]) -> (Option<String>, Vec<String>, &[Lexeme]) {
    let mut i = 0;
    let explicit = rest.first().is_some_and(|l| l.is_keyword("AS"));
    if explicit {
        i += 1;
    }
    let Some(candidate) = rest.get(i) else {
        return (None, Vec::new(), &rest[i.min(rest.len())..]);
    };
    let usable = candidate.kind == LexemeKind::QuotedWord
        || (candidate.kind == LexemeKind::Word && (explicit || !candidate.is_any_keyword(ALIAS_STOP)));
    if !usable {
        return (None, Vec::new(), rest);
    }
    let alias = candidate.unquoted().to_string();
    i += 1;

    let mut columns = Vec::new();
    let hint_follows = rest
        .get(i + 1)
        .is_some_and(|l| l.is_any_keyword(&["NOLOCK", "INDEX", "READUNCOMMITTED"]));
    if rest.get(i).is_some_and(|l| l.is_symbol("(")) && !hint_follows {
        if let Some(close) = matching_paren(rest, i) {
            columns = rest[i + 1..close]
                .iter()
                .filter(|l| l.is_name_part())
                .map(|l| l.unquoted().to_string())
                .collect();
            i = close + 1;
        }
    }
    (Some(alias), columns, &rest[i.min(rest.len())..])
}

/// Skip `WITH (NOLOCK)` style hints
fn skip_table_hints(rest: &[Lexeme]) -> &[Lexeme] {
    if rest.first().is_some_and(|l| l.is_keyword("WITH")) && rest.get(1).is_some_and(|l| l.is_symbol("(")) {
        if let Some(close) = matching_paren(rest, 1) {
            return &rest[close + 1..];
        }
    }
    rest
}

fn is_alias_token(l: &Lexeme) -> bool {
    matches!(l.kind, LexemeKind::Word | LexemeKind::QuotedWord | LexemeKind::Text)
}

/// `expr alias` without AS
fn is_bare_alias(last: &Lexeme, previous: &Lexeme) -> bool {
    let alias_like = last.kind == LexemeKind::QuotedWord
        || last.kind == LexemeKind::Text
        || (last.kind == LexemeKind::Word
            && !last.is_any_keyword(&["END", "NULL", "TRUE", "FALSE", "ASC", "DESC"]));
    let follows_operand = previous.is_symbol(")")
        || matches!(
            previous.kind,
            LexemeKind::Word | LexemeKind::QuotedWord | LexemeKind::Number | LexemeKind::Text
        ) && !previous.is_any_keyword(&["NOT", "AND", "OR", "IS", "IN", "LIKE"]);
    alias_like && follows_operand && !previous.text.ends_with('.')
}

/// Last part of a dotted name with its case kept
fn split_identifier_preserving_case(raw: &str) -> Option<String> {
    let last = raw.rsplit('.').next()?;
    let last = last.trim_matches(['[', ']', '"', '`']);
    (!last.is_empty()).then(|| last.to_string())
}

fn column(raw: &str) -> ScalarExpr {
    let parts = split_identifier(raw);
    let name = split_identifier_preserving_case(raw).unwrap_or_default();
    match parts.len() {
        0 | 1 => ScalarExpr::column(name),
        n => ScalarExpr::qualified(parts[..n - 1].join("."), name),
    }
}

fn predicate(operands: Vec<ScalarExpr>, null_test: bool) -> ScalarExpr {
    ScalarExpr::Predicate {
        operands,
        null_test,
    }
}

fn is_operand_end(l: &Lexeme) -> bool {
    l.is_symbol(")")
        || l.is_keyword("END")
        || (matches!(
            l.kind,
            LexemeKind::Word | LexemeKind::QuotedWord | LexemeKind::Number | LexemeKind::Text
        ) && !l.is_any_keyword(&["AND", "OR", "NOT", "WHEN", "THEN", "ELSE", "IS", "IN", "LIKE", "CASE"]))
}

/// Positions of the `AND` belonging to `BETWEEN x AND y`
fn between_ands(lexemes: &[Lexeme], depth: &[usize]) -> Vec<usize> {
    let mut result = Vec::new();
    let mut pending = false;
    for (i, l) in lexemes.iter().enumerate() {
        if depth[i] != 0 {
            continue;
        }
        if l.is_keyword("BETWEEN") {
            pending = true;
        } else if pending && l.is_keyword("AND") {
            result.push(i);
            pending = false;
        }
    }
    result
}

fn split_at<'l>(lexemes: &'l [Lexeme], positions: &[usize]) -> Vec<&'l [Lexeme]> {
    let mut parts = Vec::new();
    let mut start = 0;
    for &at in positions {
        parts.push(&lexemes[start..at]);
        start = at + 1;
    }
    parts.push(&lexemes[start.min(lexemes.len())..]);
    parts
}

/// PARTITION BY / ORDER BY expressions of a window specification
fn window_items(spec: &[Lexeme]) -> Vec<&[Lexeme]> {
    let depth = depths(spec);
    let boundaries: Vec<usize> = (0..spec.len())
        .filter(|&i| {
            depth[i] == 0 && spec[i].is_any_keyword(&["PARTITION", "ORDER", "ROWS", "RANGE", "GROUPS"])
        })
        .collect();

    let mut items = Vec::new();
    for (n, &at) in boundaries.iter().enumerate() {
        if !spec[at].is_any_keyword(&["PARTITION", "ORDER"]) {
            continue;
        }
        let end = boundaries.get(n + 1).copied().unwrap_or(spec.len());
        let body = spec[at + 1..end].strip_prefix_keyword("BY");
        for item in split_top(body, |l| l.is_symbol(",")) {
            let item = match item.last() {
                Some(l) if l.is_any_keyword(&["ASC", "DESC"]) => &item[..item.len() - 1],
                _ => item,
            };
            if !item.is_empty() {
                items.push(item);
            }
        }
    }
    items
}

/// Type name text: `DECIMAL(10,2)`, `DOUBLE PRECISION`
pub(crate) fn type_text(lexemes: &[Lexeme]) -> String {
    let mut out = String::new();
    let mut previous_word = false;
    for l in lexemes {
        let word = l.is_name_part();
        if word && previous_word {
            out.push(' ');
        }
        out.push_str(if word { l.unquoted() } else { &l.text });
        previous_word = word;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AnalysisContext;
    use crate::dialect::MsSql;
    use crate::lexeme::lex;
    use pretty_assertions::assert_eq;

    fn recover(sql: &str) -> QueryPlan {
        let ctx = AnalysisContext::new("dw", "dbo");
        let mut lowerer = Lowerer::new(&MsSql, &ctx);
        let lexemes = lex(sql, &MsSql).unwrap();
        TokenLowerer::new(&mut lowerer).query(&lexemes)
    }

    fn select(plan: &QueryPlan) -> &SelectPlan {
        match plan {
            QueryPlan::Select(select) => select,
            other => panic!("expected select, got {:?}", other),
        }
    }

    fn names(plan: &SelectPlan) -> Vec<String> {
        plan.projection
            .iter()
            .map(|item| match item {
                ProjectionItem::Expr { name, .. } => name.clone(),
                ProjectionItem::Star { .. } => "*".to_string(),
            })
            .collect()
    }

    #[test]
    fn projection_names() {
        let plan = recover(
            "SELECT o.OrderId, o.qty * o.price AS Total, Region = c.region, COUNT(*) cnt, 1 + 1 FROM orders o",
        );
        assert_eq!(
            names(select(&plan)),
            vec!["OrderId", "Total", "Region", "cnt", "column_5"]
        );
    }

    #[test]
    fn joins_and_hints() {
        let plan = recover(
            "SELECT * FROM sales.orders o WITH (NOLOCK) LEFT OUTER JOIN dbo.customers AS c ON o.cid = c.id CROSS APPLY (SELECT TOP 1 x FROM dbo.events e WHERE e.id = o.id) AS ev",
        );
        let plan = select(&plan);
        let aliases: Vec<(&str, bool)> = plan
            .sources
            .iter()
            .map(|s| (s.alias.as_str(), s.optional))
            .collect();
        assert_eq!(aliases, vec![("o", false), ("c", true), ("ev", false)]);
        assert_eq!(plan.sources[0].relation, Relation::Object("dw.sales.orders".into()));
        assert_eq!(plan.predicates.len(), 1);
    }

    #[test]
    fn cast_case_and_windows() {
        let plan = recover(
            "SELECT CAST(amount AS DECIMAL(12, 2)) AS amt, CASE WHEN a > 1 THEN b ELSE c END AS pick, ROW_NUMBER() OVER (PARTITION BY region ORDER BY created DESC) AS rn FROM t",
        );
        let plan = select(&plan);
        match &plan.projection[0] {
            ProjectionItem::Expr {
                expr: ScalarExpr::Cast { target, .. },
                ..
            } => assert_eq!(*target, LogicalType::decimal(12, 2)),
            other => panic!("expected cast, got {:?}", other),
        }
        match &plan.projection[1] {
            ProjectionItem::Expr {
                expr: ScalarExpr::Case { conditions, results, else_result, .. },
                ..
            } => {
                assert_eq!(conditions.len(), 1);
                assert_eq!(results.len(), 1);
                assert!(else_result.is_some());
            }
            other => panic!("expected case, got {:?}", other),
        }
        match &plan.projection[2] {
            ProjectionItem::Expr {
                expr: ScalarExpr::Function { windowed, window_inputs, class, .. },
                ..
            } => {
                assert!(*windowed);
                assert_eq!(*class, FunctionClass::Ranking);
                assert_eq!(window_inputs.len(), 2);
            }
            other => panic!("expected window function, got {:?}", other),
        }
    }

    #[test]
    fn unary_minus_keeps_one_operand() {
        let plan = recover("SELECT -o.Amount AS Refund, +o.Qty AS Qty, -5 AS k FROM orders o");
        let plan = select(&plan);
        match &plan.projection[0] {
            ProjectionItem::Expr {
                expr: ScalarExpr::Negate(inner),
                ..
            } => assert_eq!(**inner, ScalarExpr::qualified("o", "Amount")),
            other => panic!("expected negation, got {:?}", other),
        }
        assert!(matches!(
            &plan.projection[1],
            ProjectionItem::Expr { expr: ScalarExpr::Column { .. }, .. }
        ));
        assert!(matches!(
            &plan.projection[2],
            ProjectionItem::Expr { expr: ScalarExpr::Literal { .. }, .. }
        ));
    }

    #[test]
    fn ctes_and_unions() {
        let plan = recover(
            "WITH recent AS (SELECT id FROM orders) SELECT id FROM recent UNION ALL SELECT id FROM archive.orders",
        );
        let deps: Vec<String> = plan.dependencies().into_iter().collect();
        assert_eq!(deps, vec!["dw.archive.orders", "dw.dbo.orders"]);
        assert!(matches!(plan, QueryPlan::SetOp { op: SetOpKind::Union, .. }));
    }

    #[test]
    fn where_subqueries_add_dependencies() {
        let plan = recover("SELECT a FROM t WHERE a IN (SELECT a FROM dbo.allowed) AND b BETWEEN 1 AND 5");
        let deps: Vec<String> = plan.dependencies().into_iter().collect();
        assert_eq!(deps, vec!["dw.dbo.allowed", "dw.dbo.t"]);
    }
}
