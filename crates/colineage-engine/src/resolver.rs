//! Schema resolution
//!
//! Binds an object's query plan against the already-resolved schemas of its
//! dependencies, producing the output schema and per-column lineage.
//! Objects must be resolved in dependency order; sources missing from the
//! catalog are treated as open (any column resolves with an unknown type).

use colineage_core::{
    AggregateKind, BinaryClass, Column, ColumnLineage, ColumnRef, Diagnostic, DiagnosticCode,
    FunctionClass, LineageInput, LogicalType, Nullability, ObjectBody, ObjectInfo,
    ProjectionItem, QueryPlan, Relation, ResolvedObject, ScalarExpr, Schema, SelectPlan, SetOpKind,
    Severity, SourceBinding, TransformationKind,
};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the placeholder column standing for an unexpandable row
pub const STAR_COLUMN: &str = "*";

/// Resolved objects available to later resolutions, keyed by canonical name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    objects: BTreeMap<String, ResolvedObject>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolved object, replacing any previous entry
    pub fn insert(&mut self, object: ResolvedObject) {
        self.objects.insert(object.name.clone(), object);
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedObject> {
        self.objects.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects in canonical-name order
    pub fn objects(&self) -> impl Iterator<Item = &ResolvedObject> {
        self.objects.values()
    }

    pub fn into_objects(self) -> Vec<ResolvedObject> {
        self.objects.into_values().collect()
    }

    /// Columns of an object, `None` when its shape is not known
    fn columns(&self, name: &str) -> Option<&[Column]> {
        let object = self.objects.get(name)?;
        let columns = &object.schema.columns;
        if columns.is_empty() || columns.iter().any(|c| c.name == STAR_COLUMN) {
            None
        } else {
            Some(columns)
        }
    }
}

/// One output column while resolving
#[derive(Debug, Clone)]
struct Output {
    column: Column,
    inputs: Vec<LineageInput>,
}

/// Column visible through a source binding
#[derive(Debug, Clone)]
struct ShapeColumn {
    name: String,
    logical_type: LogicalType,
    nullable: Nullability,
    inputs: Vec<LineageInput>,
}

impl From<Output> for ShapeColumn {
    fn from(output: Output) -> Self {
        Self {
            name: output.column.name,
            logical_type: output.column.logical_type,
            nullable: output.column.nullable,
            inputs: output.inputs,
        }
    }
}

/// A FROM source with its visible columns
#[derive(Debug, Clone)]
struct Binding {
    alias: String,

    /// Canonical object behind the alias, if any
    object: Option<String>,

    /// Known columns; `None` means the shape is open
    columns: Option<Vec<ShapeColumn>>,

    /// Column references through this binding are pivoted
    pivot: bool,
}

impl Binding {
    fn answers_to(&self, qualifier: &str) -> bool {
        if self.alias == qualifier {
            return true;
        }
        match &self.object {
            Some(object) => {
                object == qualifier
                    || object
                        .strip_suffix(qualifier)
                        .is_some_and(|head| head.ends_with('.'))
            }
            None => false,
        }
    }

    fn find(&self, name: &str) -> Option<&ShapeColumn> {
        self.columns
            .as_ref()?
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Sources of one SELECT block, chained to the enclosing block for
/// correlated references
struct Scope<'p> {
    bindings: Vec<Binding>,
    grouped: bool,
    parent: Option<&'p Scope<'p>>,
}

/// Typed value of a scalar expression
#[derive(Debug, Clone)]
struct Value {
    logical_type: LogicalType,
    nullable: Nullability,
    inputs: Vec<LineageInput>,

    /// The expression is a bare column reference
    bare: bool,
}

impl Value {
    fn constant(logical_type: LogicalType, nullable: Nullability) -> Self {
        Self {
            logical_type,
            nullable,
            inputs: Vec::new(),
            bare: false,
        }
    }

    /// Apply a transformation to every input
    fn through(mut self, kind: TransformationKind) -> Self {
        for input in &mut self.inputs {
            input.transformation = combine(input.transformation, kind);
        }
        self.bare = false;
        self
    }
}

/// Resolves one object against a catalog
pub struct SchemaResolver<'c> {
    catalog: &'c Catalog,
    owner: String,
    diagnostics: Vec<Diagnostic>,
    reported: BTreeSet<(DiagnosticCode, String)>,
    star_sources: BTreeSet<String>,
}

impl<'c> SchemaResolver<'c> {
    /// Resolve an object whose dependencies are already in `catalog`
    pub fn resolve(object: &ObjectInfo, catalog: &'c Catalog) -> ResolvedObject {
        let mut resolver = SchemaResolver {
            catalog,
            owner: object.name.clone(),
            diagnostics: Vec::new(),
            reported: BTreeSet::new(),
            star_sources: BTreeSet::new(),
        };

        let (schema, lineage) = match &object.body {
            ObjectBody::Declared(schema) => (Schema::from_columns(schema.columns.clone()), Vec::new()),
            body => {
                let outputs = resolver.body(body);
                let lineage = outputs
                    .iter()
                    .map(|o| ColumnLineage::new(o.column.name.clone(), o.inputs.iter().cloned()))
                    .collect();
                let schema = Schema::from_columns(outputs.into_iter().map(|o| o.column).collect());
                (schema, lineage)
            }
        };

        tracing::debug!(
            object = %object.name,
            columns = schema.len(),
            "resolved schema"
        );

        let mut diagnostics = object.diagnostics.clone();
        diagnostics.extend(resolver.diagnostics);

        ResolvedObject {
            name: object.name.clone(),
            kind: object.kind,
            schema,
            lineage,
            dependencies: object.dependencies.clone(),
            star_sources: resolver.star_sources,
            diagnostics,
        }
    }

    fn body(&mut self, body: &ObjectBody) -> Vec<Output> {
        match body {
            ObjectBody::Declared(_) | ObjectBody::Opaque => Vec::new(),
            ObjectBody::Query(plan) => self.plan(plan, None),
            ObjectBody::Populated { schema, plan } => {
                let outputs = self.plan(plan, None);
                populate(schema, outputs)
            }
            ObjectBody::ExecPassthrough { procedure } => self.exec_passthrough(procedure),
        }
    }

    /// Rows produced by a procedure's result set
    fn exec_passthrough(&mut self, procedure: &str) -> Vec<Output> {
        let passthrough = |column: &str| LineageInput {
            source: ColumnRef::new(procedure, column),
            transformation: TransformationKind::ExecPassthrough,
            expression: format!("EXEC {}", procedure),
        };

        match self.catalog.columns(procedure) {
            Some(columns) => columns
                .iter()
                .map(|c| Output {
                    column: c.clone(),
                    inputs: vec![passthrough(&c.name)],
                })
                .collect(),
            None => vec![Output {
                column: Column::new(STAR_COLUMN, LogicalType::Unknown),
                inputs: vec![passthrough(STAR_COLUMN)],
            }],
        }
    }

    fn plan(&mut self, plan: &QueryPlan, parent: Option<&Scope<'_>>) -> Vec<Output> {
        match plan {
            QueryPlan::Select(select) => self.select(select, parent),
            QueryPlan::SetOp { op, left, right } => {
                let left = self.plan(left, parent);
                let right = self.plan(right, parent);
                self.set_op(*op, left, right)
            }
        }
    }

    fn set_op(
        &mut self,
        op: SetOpKind,
        left: Vec<Output>,
        right: Vec<Output>,
    ) -> Vec<Output> {
        if left.len() != right.len() {
            self.report(
                Severity::Warn,
                DiagnosticCode::SchemaMismatch,
                format!(
                    "Set operation operands have {} and {} columns",
                    left.len(),
                    right.len()
                ),
                None,
            );
        }

        let kind = TransformationKind::SetOp(op);
        let mut right = right.into_iter();
        let mut outputs = Vec::with_capacity(left.len());

        for mut output in left {
            let Some(other) = right.next() else {
                output.inputs.clear();
                outputs.push(output);
                continue;
            };

            match output
                .column
                .logical_type
                .least_upper_bound(&other.column.logical_type)
            {
                Some(logical_type) => {
                    output.column.logical_type = logical_type;
                    output.column.nullable = output.column.nullable.either(other.column.nullable);
                    output.inputs.extend(other.inputs);
                    for input in &mut output.inputs {
                        if input.transformation == TransformationKind::Identity {
                            input.transformation = kind;
                        }
                    }
                }
                None => {
                    self.report(
                        Severity::Warn,
                        DiagnosticCode::SchemaMismatch,
                        format!(
                            "Column '{}' has incompatible types {} and {} across set operation",
                            output.column.name, output.column.logical_type, other.column.logical_type
                        ),
                        None,
                    );
                    output.column.nullable = output.column.nullable.either(other.column.nullable);
                    output.inputs.clear();
                }
            }
            outputs.push(output);
        }
        outputs
    }

    fn select(&mut self, select: &SelectPlan, parent: Option<&Scope<'_>>) -> Vec<Output> {
        let bindings = select
            .sources
            .iter()
            .map(|source| self.bind(source, parent))
            .collect();
        let scope = Scope {
            bindings,
            grouped: select.grouped,
            parent,
        };

        let mut outputs = Vec::new();
        for item in &select.projection {
            match item {
                ProjectionItem::Star { qualifier } => {
                    self.expand_star(qualifier.as_deref(), &scope, &mut outputs);
                }
                ProjectionItem::Expr { name, expr, text } => {
                    let value = self.expr(expr, &scope);
                    outputs.push(output(name, text, value));
                }
            }
        }

        // predicates only surface unresolved references
        for predicate in &select.predicates {
            self.expr(predicate, &scope);
        }

        dedup_names(&mut outputs);
        outputs
    }

    fn bind(&mut self, source: &SourceBinding, parent: Option<&Scope<'_>>) -> Binding {
        let mut binding = self.relation(&source.alias, &source.relation, parent);
        if source.optional {
            for column in binding.columns.iter_mut().flatten() {
                column.nullable = Nullability::Yes;
            }
        }
        binding
    }

    fn relation(&mut self, alias: &str, relation: &Relation, parent: Option<&Scope<'_>>) -> Binding {
        match relation {
            Relation::Object(name) => {
                let columns = self.catalog.columns(name).map(|columns| {
                    columns
                        .iter()
                        .map(|c| ShapeColumn {
                            name: c.name.clone(),
                            logical_type: c.logical_type.clone(),
                            nullable: c.nullable,
                            inputs: vec![LineageInput {
                                source: ColumnRef::new(name.clone(), &c.name),
                                transformation: TransformationKind::Identity,
                                expression: String::new(),
                            }],
                        })
                        .collect()
                });
                Binding {
                    alias: alias.to_string(),
                    object: Some(name.clone()),
                    columns,
                    pivot: false,
                }
            }
            Relation::Derived(plan) => {
                let columns = self.plan(plan, parent).into_iter().map(ShapeColumn::from).collect();
                Binding {
                    alias: alias.to_string(),
                    object: None,
                    columns: Some(columns),
                    pivot: false,
                }
            }
            Relation::Pivot(inner) => {
                let inner = self.relation(alias, inner, parent);
                Binding {
                    alias: alias.to_string(),
                    object: inner.object,
                    columns: None,
                    pivot: true,
                }
            }
            Relation::Opaque => Binding {
                alias: alias.to_string(),
                object: None,
                columns: None,
                pivot: false,
            },
        }
    }

    fn expand_star(&mut self, qualifier: Option<&str>, scope: &Scope<'_>, outputs: &mut Vec<Output>) {
        let qualifier = qualifier.map(str::to_lowercase);
        let bindings: Vec<&Binding> = match &qualifier {
            Some(q) => scope.bindings.iter().filter(|b| b.answers_to(q)).take(1).collect(),
            None => scope.bindings.iter().collect(),
        };

        if bindings.is_empty() {
            self.report(
                Severity::Warn,
                DiagnosticCode::UnresolvedIdentifier,
                format!("No source named '{}' for star expansion", qualifier.unwrap_or_default()),
                None,
            );
            return;
        }

        for binding in bindings {
            let Some(columns) = &binding.columns else {
                self.report(
                    Severity::Warn,
                    DiagnosticCode::SelectStarUnexpandable,
                    format!("Cannot expand '{}.*': source schema is unknown", binding.alias),
                    Some(format!("{}.*", binding.alias)),
                );
                if outputs.iter().any(|o| o.column.name == STAR_COLUMN) {
                    continue;
                }
                let inputs = binding
                    .object
                    .iter()
                    .map(|object| LineageInput {
                        source: ColumnRef::new(object.clone(), STAR_COLUMN),
                        transformation: TransformationKind::Identity,
                        expression: format!("{}.*", binding.alias),
                    })
                    .collect();
                outputs.push(Output {
                    column: Column::new(STAR_COLUMN, LogicalType::Unknown),
                    inputs,
                });
                continue;
            };

            match &binding.object {
                Some(object) => {
                    self.star_sources.insert(object.clone());
                }
                None => {
                    for column in columns {
                        for input in &column.inputs {
                            self.star_sources.insert(input.source.object.clone());
                        }
                    }
                }
            }

            for column in columns {
                let inputs = column
                    .inputs
                    .iter()
                    .cloned()
                    .map(|mut input| {
                        if input.expression.is_empty() {
                            input.expression = format!("{}.{}", binding.alias, column.name);
                        }
                        input
                    })
                    .collect();
                outputs.push(Output {
                    column: Column::new(column.name.clone(), column.logical_type.clone())
                        .with_nullability(column.nullable),
                    inputs,
                });
            }
        }
    }

    fn expr(&mut self, expr: &ScalarExpr, scope: &Scope<'_>) -> Value {
        match expr {
            ScalarExpr::Column { qualifier, name } => self.column(qualifier.as_deref(), name, scope),

            ScalarExpr::Literal { logical_type, null } => {
                let nullable = if *null { Nullability::Yes } else { Nullability::No };
                Value::constant(logical_type.clone(), nullable)
            }

            ScalarExpr::Cast { expr, target } => {
                let inner = self.expr(expr, scope);
                Value {
                    logical_type: target.clone(),
                    ..inner.through(TransformationKind::Cast)
                }
            }

            ScalarExpr::Binary { class, left, right } => {
                let left = self.expr(left, scope);
                let right = self.expr(right, scope);
                binary(*class, left, right)
            }

            ScalarExpr::Predicate { operands, null_test } => {
                let values: Vec<Value> = operands.iter().map(|e| self.expr(e, scope)).collect();
                let nullable = if *null_test {
                    Nullability::No
                } else {
                    fold_nullability(&values, Nullability::either).unwrap_or(Nullability::Unknown)
                };
                Value {
                    logical_type: LogicalType::Bool,
                    nullable,
                    inputs: values.into_iter().flat_map(|v| v.inputs).collect(),
                    bare: false,
                }
                .through(TransformationKind::Expression)
            }

            ScalarExpr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let mut inputs = Vec::new();
                if let Some(operand) = operand {
                    inputs.extend(self.expr(operand, scope).inputs);
                }
                for condition in conditions {
                    inputs.extend(self.expr(condition, scope).inputs);
                }

                let mut branches: Vec<Value> = results.iter().map(|e| self.expr(e, scope)).collect();
                let has_else = else_result.is_some();
                if let Some(else_result) = else_result {
                    branches.push(self.expr(else_result, scope));
                }

                let logical_type = branches
                    .iter()
                    .try_fold(LogicalType::Unknown, |acc, v| acc.least_upper_bound(&v.logical_type))
                    .unwrap_or(LogicalType::Unknown);
                let nullable = if has_else {
                    fold_nullability(&branches, Nullability::either).unwrap_or(Nullability::Unknown)
                } else {
                    Nullability::Yes
                };
                inputs.extend(branches.into_iter().flat_map(|v| v.inputs));

                Value {
                    logical_type,
                    nullable,
                    inputs,
                    bare: false,
                }
                .through(TransformationKind::Expression)
            }

            ScalarExpr::Function {
                class,
                args,
                windowed,
                window_inputs,
                ..
            } => {
                let values: Vec<Value> = args.iter().map(|e| self.expr(e, scope)).collect();
                let mut value = function(class, &values, *windowed, scope.grouped);
                value.inputs = values.into_iter().flat_map(|v| v.inputs).collect();
                for input in window_inputs {
                    value.inputs.extend(self.expr(input, scope).inputs);
                }
                let kind = if *windowed {
                    TransformationKind::Window
                } else if matches!(class, FunctionClass::Aggregate(_)) {
                    TransformationKind::Aggregate
                } else {
                    TransformationKind::Expression
                };
                value.through(kind)
            }

            ScalarExpr::Subquery(plan) => {
                let mut outputs = self.plan(plan, Some(scope));
                if outputs.is_empty() {
                    return Value::constant(LogicalType::Unknown, Nullability::Yes);
                }
                let first = outputs.swap_remove(0);
                Value {
                    logical_type: first.column.logical_type,
                    nullable: Nullability::Yes,
                    inputs: first.inputs,
                    bare: false,
                }
                .through(TransformationKind::Expression)
            }

            ScalarExpr::Negate(inner) => {
                let value = self.expr(inner, scope);
                let kind = if value.logical_type.is_text() {
                    TransformationKind::Expression
                } else {
                    TransformationKind::Arithmetic
                };
                value.through(kind)
            }

            ScalarExpr::Opaque { inputs } => {
                let values: Vec<Value> = inputs.iter().map(|e| self.expr(e, scope)).collect();
                Value {
                    logical_type: LogicalType::Unknown,
                    nullable: Nullability::Unknown,
                    inputs: values.into_iter().flat_map(|v| v.inputs).collect(),
                    bare: false,
                }
                .through(TransformationKind::Unknown)
            }
        }
    }

    /// Resolve a column reference through the scope chain
    fn column(&mut self, qualifier: Option<&str>, name: &str, scope: &Scope<'_>) -> Value {
        let display = match qualifier {
            Some(q) => format!("{}.{}", q, name),
            None => name.to_string(),
        };

        let mut current = Some(scope);
        while let Some(scope) = current {
            let found = match qualifier {
                Some(q) => scope
                    .bindings
                    .iter()
                    .find(|b| b.answers_to(&q.to_lowercase()))
                    .map(|binding| self.through_binding(binding, name, &display)),
                None => self.unqualified(scope, name, &display),
            };
            if let Some(value) = found {
                return value;
            }
            current = scope.parent;
        }

        self.report(
            Severity::Warn,
            DiagnosticCode::UnresolvedIdentifier,
            format!("Column '{}' cannot be resolved", display),
            Some(display),
        );
        Value::constant(LogicalType::Unknown, Nullability::Unknown)
    }

    fn unqualified(&mut self, scope: &Scope<'_>, name: &str, display: &str) -> Option<Value> {
        let known: Vec<&Binding> = scope.bindings.iter().filter(|b| b.find(name).is_some()).collect();
        if let Some(first) = known.first() {
            if known.len() > 1 {
                let candidates: Vec<&str> = known.iter().map(|b| b.alias.as_str()).collect();
                self.report(
                    Severity::Warn,
                    DiagnosticCode::AmbiguousIdentifier,
                    format!(
                        "Column '{}' matches several sources ({}); using '{}'",
                        name,
                        candidates.join(", "),
                        first.alias
                    ),
                    Some(display.to_string()),
                );
            }
            return Some(self.through_binding(first, name, display));
        }

        let mut open = scope
            .bindings
            .iter()
            .filter(|b| b.columns.is_none() && b.object.is_some());
        match (open.next(), open.next()) {
            (Some(binding), None) => Some(self.through_binding(binding, name, display)),
            _ => None,
        }
    }

    fn through_binding(&mut self, binding: &Binding, name: &str, display: &str) -> Value {
        if let Some(column) = binding.find(name) {
            return Value {
                logical_type: column.logical_type.clone(),
                nullable: column.nullable,
                inputs: column.inputs.clone(),
                bare: true,
            };
        }

        if binding.columns.is_some() {
            self.report(
                Severity::Warn,
                DiagnosticCode::UnresolvedIdentifier,
                format!("Column '{}' does not exist in '{}'", name, binding.alias),
                Some(display.to_string()),
            );
            return Value::constant(LogicalType::Unknown, Nullability::Unknown);
        }

        let Some(object) = &binding.object else {
            self.report(
                Severity::Info,
                DiagnosticCode::UnresolvedIdentifier,
                format!("Source '{}' has no known shape; '{}' is untracked", binding.alias, display),
                Some(display.to_string()),
            );
            return Value::constant(LogicalType::Unknown, Nullability::Unknown);
        };

        let transformation = if binding.pivot {
            TransformationKind::Pivot
        } else {
            TransformationKind::Identity
        };
        Value {
            logical_type: LogicalType::Unknown,
            nullable: Nullability::Unknown,
            inputs: vec![LineageInput {
                source: ColumnRef::new(object.clone(), name),
                transformation,
                expression: String::new(),
            }],
            bare: !binding.pivot,
        }
    }

    fn report(
        &mut self,
        severity: Severity,
        code: DiagnosticCode,
        message: String,
        expression: Option<String>,
    ) {
        if !self.reported.insert((code, message.clone())) {
            return;
        }
        let mut diagnostic = Diagnostic::new(code, severity, message).with_object(self.owner.clone());
        if let Some(expression) = expression {
            diagnostic = diagnostic.with_expression(expression);
        }
        self.diagnostics.push(diagnostic);
    }
}

/// Projection output from a resolved value; bare references keep the
/// expression recorded further down
fn output(name: &str, text: &str, value: Value) -> Output {
    let inputs = value
        .inputs
        .into_iter()
        .map(|mut input| {
            if !value.bare || input.expression.is_empty() {
                input.expression = text.to_string();
            }
            input
        })
        .collect();
    Output {
        column: Column::new(name, value.logical_type).with_nullability(value.nullable),
        inputs,
    }
}

/// Align a populating query to declared columns: by name when the query
/// produces the column, otherwise by ordinal
fn populate(schema: &Schema, outputs: Vec<Output>) -> Vec<Output> {
    schema
        .columns
        .iter()
        .enumerate()
        .map(|(ordinal, declared)| {
            let source = outputs
                .iter()
                .find(|o| o.column.name.eq_ignore_ascii_case(&declared.name))
                .or_else(|| outputs.get(ordinal));
            Output {
                column: declared.clone(),
                inputs: source.map(|o| o.inputs.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

/// Suffix repeated output names: `id`, `id_2`, `id_3`
fn dedup_names(outputs: &mut [Output]) {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for output in outputs.iter_mut() {
        let key = output.column.name.to_lowercase();
        let count = seen.entry(key).or_insert(0);
        *count += 1;
        if *count > 1 {
            output.column.name = format!("{}_{}", output.column.name, count);
        }
    }
}

fn binary(class: BinaryClass, left: Value, right: Value) -> Value {
    let nullable = left.nullable.either(right.nullable);
    let (logical_type, kind) = match class {
        BinaryClass::Predicate => (LogicalType::Bool, TransformationKind::Expression),
        BinaryClass::Concat => (concat_type(&left.logical_type, &right.logical_type), TransformationKind::Expression),
        BinaryClass::Arithmetic => {
            let logical_type = match (&left.logical_type, &right.logical_type) {
                (LogicalType::Unknown, _) | (_, LogicalType::Unknown) => LogicalType::Unknown,
                (l, r) if l.is_text() && r.is_text() => concat_type(l, r),
                (l, r) => l.promote(r).unwrap_or_else(|| l.clone()),
            };
            let kind = if left.logical_type.is_text() || right.logical_type.is_text() {
                TransformationKind::Expression
            } else {
                TransformationKind::Arithmetic
            };
            (logical_type, kind)
        }
    };

    let mut inputs = left.inputs;
    inputs.extend(right.inputs);
    Value {
        logical_type,
        nullable,
        inputs,
        bare: false,
    }
    .through(kind)
}

/// Result type of string concatenation
fn concat_type(left: &LogicalType, right: &LogicalType) -> LogicalType {
    match (left, right) {
        (
            LogicalType::Text { unicode: ua, length: la, .. },
            LogicalType::Text { unicode: ub, length: lb, .. },
        ) => LogicalType::Text {
            unicode: *ua || *ub,
            fixed: false,
            length: la.zip(*lb).map(|(a, b)| a.saturating_add(b)),
        },
        (LogicalType::Text { unicode, .. }, _) | (_, LogicalType::Text { unicode, .. }) => {
            LogicalType::Text {
                unicode: *unicode,
                fixed: false,
                length: None,
            }
        }
        _ => LogicalType::Text {
            unicode: false,
            fixed: false,
            length: None,
        },
    }
}

/// Type and nullability of a function call; inputs are filled by the caller
fn function(class: &FunctionClass, args: &[Value], windowed: bool, grouped: bool) -> Value {
    let first = args.first();
    let first_type = first.map_or(LogicalType::Unknown, |v| v.logical_type.clone());
    let first_nullable = first.map_or(Nullability::Unknown, |v| v.nullable);

    match class {
        FunctionClass::Aggregate(kind) => {
            // at least one row is guaranteed per group or per window frame
            let nullable = if grouped || windowed {
                first_nullable
            } else {
                Nullability::Yes
            };
            match kind {
                AggregateKind::Count => Value::constant(LogicalType::Int, Nullability::No),
                AggregateKind::CountBig => Value::constant(LogicalType::BigInt, Nullability::No),
                AggregateKind::Sum => Value::constant(sum_type(&first_type), nullable),
                AggregateKind::Avg => Value::constant(avg_type(&first_type), nullable),
                AggregateKind::MinMax | AggregateKind::Other => Value::constant(first_type, nullable),
                AggregateKind::Statistic => Value::constant(LogicalType::Float, nullable),
                AggregateKind::Concat => Value::constant(
                    LogicalType::Text {
                        unicode: matches!(first_type, LogicalType::Text { unicode: true, .. }),
                        fixed: false,
                        length: None,
                    },
                    nullable,
                ),
            }
        }
        FunctionClass::Ranking => Value::constant(LogicalType::BigInt, Nullability::No),
        FunctionClass::Returns(logical_type) => {
            let nullable = fold_nullability(args, Nullability::either).unwrap_or(Nullability::No);
            Value::constant(logical_type.clone(), nullable)
        }
        FunctionClass::FirstArgument => Value::constant(first_type, first_nullable),
        FunctionClass::Coalesce => {
            let logical_type = args
                .iter()
                .try_fold(LogicalType::Unknown, |acc, v| acc.least_upper_bound(&v.logical_type))
                .unwrap_or(LogicalType::Unknown);
            let nullable = fold_nullability(args, Nullability::both).unwrap_or(Nullability::Unknown);
            Value::constant(logical_type, nullable)
        }
        FunctionClass::Nullable => Value::constant(first_type, Nullability::Yes),
        FunctionClass::Unknown => Value::constant(LogicalType::Unknown, Nullability::Unknown),
    }
}

fn sum_type(input: &LogicalType) -> LogicalType {
    match input {
        LogicalType::TinyInt | LogicalType::SmallInt | LogicalType::Int | LogicalType::BigInt => {
            LogicalType::BigInt
        }
        LogicalType::Decimal { scale, .. } => LogicalType::decimal(38, *scale),
        LogicalType::Float => LogicalType::Float,
        _ => LogicalType::Unknown,
    }
}

fn avg_type(input: &LogicalType) -> LogicalType {
    match input {
        LogicalType::Float => LogicalType::Float,
        LogicalType::Decimal { scale, .. } => LogicalType::decimal(38, (*scale).max(6)),
        t if t.is_numeric() => LogicalType::decimal(38, 6),
        _ => LogicalType::Unknown,
    }
}

fn fold_nullability(values: &[Value], f: fn(Nullability, Nullability) -> Nullability) -> Option<Nullability> {
    values.iter().map(|v| v.nullable).reduce(f)
}

fn rank(kind: TransformationKind) -> u8 {
    match kind {
        TransformationKind::Constant => 0,
        TransformationKind::Identity => 1,
        TransformationKind::Cast => 2,
        TransformationKind::Arithmetic => 3,
        TransformationKind::Expression => 4,
        TransformationKind::Aggregate => 5,
        TransformationKind::Window => 6,
        TransformationKind::SetOp(_) => 7,
        TransformationKind::Pivot => 8,
        TransformationKind::ExecPassthrough => 9,
        TransformationKind::Unknown => 10,
    }
}

/// The stronger of two transformations applied to the same input
fn combine(inner: TransformationKind, outer: TransformationKind) -> TransformationKind {
    if rank(outer) > rank(inner) {
        outer
    } else {
        inner
    }
}
