//! Dialect-independent query plan
//!
//! The statement analyzer lowers SQL (or recovered text) into this owned
//! representation. Object references are already canonical; column
//! references are left unresolved until the schema resolver binds them
//! against resolved dependency schemas.

use crate::object::SetOpKind;
use crate::schema::LogicalType;
use std::collections::BTreeSet;

/// A query producing a row set
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// A single SELECT
    Select(SelectPlan),

    /// `left <op> right`, operands aligned by ordinal
    SetOp {
        op: SetOpKind,
        left: Box<QueryPlan>,
        right: Box<QueryPlan>,
    },
}

impl QueryPlan {
    /// Canonical names of every object read anywhere in the plan
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(&mut deps);
        deps
    }

    fn collect_dependencies(&self, deps: &mut BTreeSet<String>) {
        match self {
            Self::Select(select) => {
                for source in &select.sources {
                    source.relation.collect_dependencies(deps);
                }
                for item in &select.projection {
                    if let ProjectionItem::Expr { expr, .. } = item {
                        expr.collect_dependencies(deps);
                    }
                }
                for predicate in &select.predicates {
                    predicate.collect_dependencies(deps);
                }
            }
            Self::SetOp { left, right, .. } => {
                left.collect_dependencies(deps);
                right.collect_dependencies(deps);
            }
        }
    }

    /// Rename output columns positionally (INSERT column lists)
    pub fn rename_outputs(&mut self, names: &[String]) {
        match self {
            Self::Select(select) => {
                for (item, new_name) in select.projection.iter_mut().zip(names) {
                    if let ProjectionItem::Expr { name, .. } = item {
                        *name = new_name.clone();
                    }
                }
            }
            Self::SetOp { left, .. } => left.rename_outputs(names),
        }
    }

    /// Plan that selects every column of one object
    pub fn select_all(object: impl Into<String>) -> Self {
        Self::Select(SelectPlan {
            sources: vec![SourceBinding::new("t", Relation::Object(object.into()))],
            projection: vec![ProjectionItem::Star { qualifier: None }],
            ..SelectPlan::default()
        })
    }
}

/// One SELECT block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectPlan {
    /// FROM/JOIN sources in textual order
    pub sources: Vec<SourceBinding>,

    /// Projection list in order
    pub projection: Vec<ProjectionItem>,

    /// GROUP BY present: every aggregate sees at least one row
    pub grouped: bool,

    /// ON, WHERE, GROUP BY and HAVING expressions; they add dependencies
    /// but never lineage
    pub predicates: Vec<ScalarExpr>,
}

/// A named source in a FROM clause
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBinding {
    /// Alias (or bare object name) used to qualify columns, case-folded
    pub alias: String,

    /// What the alias refers to
    pub relation: Relation,

    /// Optional side of an outer join: all its columns become nullable
    pub optional: bool,
}

impl SourceBinding {
    pub fn new(alias: impl Into<String>, relation: Relation) -> Self {
        Self {
            alias: alias.into().to_lowercase(),
            relation,
            optional: false,
        }
    }
}

/// Relation bound to a source alias
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    /// A canonical object (table, view, temp table, function)
    Object(String),

    /// A derived table or inlined CTE
    Derived(Box<QueryPlan>),

    /// PIVOT/UNPIVOT over an inner relation
    Pivot(Box<Relation>),

    /// Shape cannot be known (table variable, VALUES, unsupported factor)
    Opaque,
}

impl Relation {
    fn collect_dependencies(&self, deps: &mut BTreeSet<String>) {
        match self {
            Self::Object(name) => {
                deps.insert(name.clone());
            }
            Self::Derived(plan) => plan.collect_dependencies(deps),
            Self::Pivot(inner) => inner.collect_dependencies(deps),
            Self::Opaque => {}
        }
    }
}

/// A projection list entry
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItem {
    /// `*` or `alias.*`
    Star { qualifier: Option<String> },

    /// An expression with its output name and source text
    Expr {
        name: String,
        expr: ScalarExpr,
        text: String,
    },
}

/// Aggregate function family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    CountBig,
    Sum,
    Avg,
    MinMax,
    /// Statistical aggregates (STDEV, VAR, ...)
    Statistic,
    /// STRING_AGG / LISTAGG
    Concat,
    Other,
}

/// Builtin function semantics, decided by the dialect at analysis time
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionClass {
    Aggregate(AggregateKind),

    /// ROW_NUMBER, RANK, DENSE_RANK, NTILE: BIGINT, never NULL
    Ranking,

    /// Fixed return type, nullable if any argument is
    Returns(LogicalType),

    /// Type of the first argument (ABS, ROUND, UPPER, ...)
    FirstArgument,

    /// COALESCE: LUB of arguments, nullable only if all are
    Coalesce,

    /// NULLIF and friends: first argument type, always nullable
    Nullable,

    /// Not a known builtin
    Unknown,
}

/// Arithmetic or concatenation operator class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryClass {
    /// `+ - * / %`
    Arithmetic,

    /// `||`
    Concat,

    /// Comparison or logical operator producing a boolean
    Predicate,
}

/// Scalar expression with unresolved column references
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    /// `[qualifier.]name`; the qualifier may itself be dotted (`schema.table`)
    Column {
        qualifier: Option<String>,
        name: String,
    },

    /// Literal of a known type (`NULL` is `Unknown` and nullable)
    Literal { logical_type: LogicalType, null: bool },

    /// `CAST(expr AS T)` / `CONVERT(T, expr)`
    Cast {
        expr: Box<ScalarExpr>,
        target: LogicalType,
    },

    /// Binary operator
    Binary {
        class: BinaryClass,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },

    /// Arithmetic sign: `-x`
    Negate(Box<ScalarExpr>),

    /// Unary predicate or negation; `null_test` marks IS [NOT] NULL
    Predicate {
        operands: Vec<ScalarExpr>,
        null_test: bool,
    },

    /// `CASE [operand] WHEN c THEN r ... [ELSE e] END`
    Case {
        operand: Option<Box<ScalarExpr>>,
        conditions: Vec<ScalarExpr>,
        results: Vec<ScalarExpr>,
        else_result: Option<Box<ScalarExpr>>,
    },

    /// Function call; `windowed` marks an OVER clause
    Function {
        name: String,
        class: FunctionClass,
        args: Vec<ScalarExpr>,
        windowed: bool,
        /// Column references in PARTITION BY / ORDER BY of the window
        window_inputs: Vec<ScalarExpr>,
    },

    /// Scalar subquery
    Subquery(Box<QueryPlan>),

    /// Unsupported expression; only its column references are kept
    Opaque { inputs: Vec<ScalarExpr> },
}

impl ScalarExpr {
    /// Unqualified column shorthand
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column {
            qualifier: None,
            name: name.into(),
        }
    }

    /// Qualified column shorthand
    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    fn collect_dependencies(&self, deps: &mut BTreeSet<String>) {
        match self {
            Self::Subquery(plan) => plan.collect_dependencies(deps),
            Self::Cast { expr, .. } | Self::Negate(expr) => expr.collect_dependencies(deps),
            Self::Binary { left, right, .. } => {
                left.collect_dependencies(deps);
                right.collect_dependencies(deps);
            }
            Self::Predicate { operands, .. } | Self::Opaque { inputs: operands } => {
                operands.iter().for_each(|e| e.collect_dependencies(deps));
            }
            Self::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                operand.iter().for_each(|e| e.collect_dependencies(deps));
                conditions.iter().for_each(|e| e.collect_dependencies(deps));
                results.iter().for_each(|e| e.collect_dependencies(deps));
                else_result.iter().for_each(|e| e.collect_dependencies(deps));
            }
            Self::Function {
                args, window_inputs, ..
            } => {
                args.iter().for_each(|e| e.collect_dependencies(deps));
                window_inputs.iter().for_each(|e| e.collect_dependencies(deps));
            }
            Self::Column { .. } | Self::Literal { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dependencies_include_joins_derived_and_subqueries() {
        let inner = QueryPlan::select_all("dw.dbo.customers");
        let plan = QueryPlan::Select(SelectPlan {
            sources: vec![
                SourceBinding::new("o", Relation::Object("dw.dbo.orders".into())),
                SourceBinding::new("c", Relation::Derived(Box::new(inner))),
            ],
            projection: vec![ProjectionItem::Expr {
                name: "x".into(),
                expr: ScalarExpr::Subquery(Box::new(QueryPlan::select_all("dw.dbo.regions"))),
                text: "(SELECT ...)".into(),
            }],
            predicates: vec![ScalarExpr::Subquery(Box::new(QueryPlan::select_all(
                "dw.dbo.blocked",
            )))],
            ..SelectPlan::default()
        });

        let deps: Vec<String> = plan.dependencies().into_iter().collect();
        assert_eq!(
            deps,
            vec!["dw.dbo.blocked", "dw.dbo.customers", "dw.dbo.orders", "dw.dbo.regions"]
        );
    }

    #[test]
    fn rename_outputs_positionally() {
        let mut plan = QueryPlan::Select(SelectPlan {
            sources: vec![],
            projection: vec![ProjectionItem::Expr {
                name: "a".into(),
                expr: ScalarExpr::column("a"),
                text: "a".into(),
            }],
            ..SelectPlan::default()
        });
        plan.rename_outputs(&["order_id".to_string()]);
        match plan {
            QueryPlan::Select(select) => match &select.projection[0] {
                ProjectionItem::Expr { name, .. } => assert_eq!(name, "order_id"),
                other => panic!("unexpected item {:?}", other),
            },
            other => panic!("unexpected plan {:?}", other),
        }
    }
}
