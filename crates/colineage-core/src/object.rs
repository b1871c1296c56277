//! Objects, canonical names and column lineage

use crate::diagnostic::Diagnostic;
use crate::plan::QueryPlan;
use crate::schema::Schema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// Separator between an owning object and a temp table local name
pub const TEMP_SEPARATOR: char = '#';

/// Fully qualified object name: `database.schema.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub database: String,
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    /// Build a qualified name from raw (possibly bracketed/quoted, partially
    /// qualified) identifier text, filling missing parts from the defaults
    ///
    /// Returns `None` for empty input.
    pub fn resolve(raw: &str, default_database: &str, default_schema: &str) -> Option<Self> {
        let mut parts = split_identifier(raw);
        if parts.last().map_or(true, |p| p.is_empty()) {
            return None;
        }
        // server.database.schema.name
        while parts.len() > 3 {
            parts.remove(0);
        }
        let or_default = |part: &str, default: &str| {
            if part.is_empty() {
                default.to_lowercase()
            } else {
                part.to_string()
            }
        };

        let qualified = match parts.as_slice() {
            [name] => Self {
                database: default_database.to_lowercase(),
                schema: default_schema.to_lowercase(),
                name: name.clone(),
            },
            [schema, name] => Self {
                database: default_database.to_lowercase(),
                schema: or_default(schema.as_str(), default_schema),
                name: name.clone(),
            },
            [database, schema, name] => Self {
                database: or_default(database.as_str(), default_database),
                schema: or_default(schema.as_str(), default_schema),
                name: name.clone(),
            },
            _ => return None,
        };
        Some(qualified)
    }

    /// Parse an already-canonical name
    pub fn parse_canonical(canonical: &str) -> Option<Self> {
        let mut parts = canonical.splitn(3, '.');
        Some(Self {
            database: parts.next()?.to_string(),
            schema: parts.next()?.to_string(),
            name: parts.next()?.to_string(),
        })
    }

    /// Canonical string form used as the object key
    pub fn canonical(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// Split a dotted identifier into case-folded parts, stripping `[]`, `""` and
/// backtick quoting. Dots inside quotes do not split. Empty parts (`db..t`) are kept.
pub fn split_identifier(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for ch in raw.trim().chars() {
        match closing {
            Some(close) if ch == close => closing = None,
            Some(_) => current.push(ch),
            None => match ch {
                '[' => closing = Some(']'),
                '"' => closing = Some('"'),
                '`' => closing = Some('`'),
                '.' => parts.push(std::mem::take(&mut current)),
                c if c.is_whitespace() => {}
                c => current.push(c),
            },
        }
    }
    parts.push(current);
    parts.into_iter().map(|p| p.to_lowercase()).collect()
}

/// Whether a raw identifier names a session temp table (`#t`, `tempdb..#t`)
pub fn is_temp_name(raw: &str) -> bool {
    split_identifier(raw)
        .last()
        .map_or(false, |p| p.starts_with(TEMP_SEPARATOR))
}

/// Canonical name of a temp table scoped to its owner: `owner#local`
pub fn temp_object_name(owner: &str, raw: &str) -> String {
    let local = split_identifier(raw).pop().unwrap_or_default();
    format!("{}{}{}", owner, TEMP_SEPARATOR, local.trim_start_matches(TEMP_SEPARATOR))
}

/// Kind of a SQL object, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
    Procedure,
    Function,
    TempTable,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::Procedure => write!(f, "procedure"),
            Self::Function => write!(f, "function"),
            Self::TempTable => write!(f, "temp_table"),
        }
    }
}

/// Reference to a column of a canonical object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Canonical object name
    pub object: String,

    /// Case-folded column name (`*` for whole-row passthrough)
    pub column: String,
}

impl ColumnRef {
    pub fn new(object: impl Into<String>, column: impl AsRef<str>) -> Self {
        Self {
            object: object.into(),
            column: column.as_ref().to_lowercase(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.object, self.column)
    }
}

/// Set operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

impl SetOpKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Union => "UNION",
            Self::Intersect => "INTERSECT",
            Self::Except => "EXCEPT",
        }
    }
}

/// Classification of how an output column is derived from its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransformationKind {
    Identity,
    Cast,
    Arithmetic,
    /// CASE or scalar function
    Expression,
    Aggregate,
    Window,
    SetOp(SetOpKind),
    Constant,
    ExecPassthrough,
    Pivot,
    Unknown,
}

impl std::fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "IDENTITY"),
            Self::Cast => write!(f, "CAST"),
            Self::Arithmetic => write!(f, "ARITHMETIC"),
            Self::Expression => write!(f, "EXPRESSION"),
            Self::Aggregate => write!(f, "AGGREGATE"),
            Self::Window => write!(f, "WINDOW"),
            Self::SetOp(op) => write!(f, "SET_OP({})", op.as_str()),
            Self::Constant => write!(f, "CONSTANT"),
            Self::ExecPassthrough => write!(f, "EXEC_PASSTHROUGH"),
            Self::Pivot => write!(f, "PIVOT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for TransformationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "IDENTITY" => Self::Identity,
            "CAST" => Self::Cast,
            "ARITHMETIC" => Self::Arithmetic,
            "EXPRESSION" => Self::Expression,
            "AGGREGATE" => Self::Aggregate,
            "WINDOW" => Self::Window,
            "SET_OP(UNION)" => Self::SetOp(SetOpKind::Union),
            "SET_OP(INTERSECT)" => Self::SetOp(SetOpKind::Intersect),
            "SET_OP(EXCEPT)" => Self::SetOp(SetOpKind::Except),
            "CONSTANT" => Self::Constant,
            "EXEC_PASSTHROUGH" => Self::ExecPassthrough,
            "PIVOT" => Self::Pivot,
            "UNKNOWN" => Self::Unknown,
            other => return Err(format!("unknown transformation kind '{}'", other)),
        };
        Ok(kind)
    }
}

impl Serialize for TransformationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransformationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One contributing input of an output column
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageInput {
    /// Source column
    pub source: ColumnRef,

    /// How the source contributes
    pub transformation: TransformationKind,

    /// Expression text that produced the output
    pub expression: String,
}

/// Provenance of one output column
///
/// Inputs form an ordered set; an empty set means the column is unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLineage {
    /// Output column name (original case)
    pub output_column: String,

    /// Contributing inputs, sorted and deduplicated
    pub inputs: Vec<LineageInput>,
}

impl ColumnLineage {
    pub fn new(output_column: impl Into<String>, inputs: impl IntoIterator<Item = LineageInput>) -> Self {
        let inputs: BTreeSet<LineageInput> = inputs.into_iter().collect();
        Self {
            output_column: output_column.into(),
            inputs: inputs.into_iter().collect(),
        }
    }

    /// Whether any input was found
    pub fn is_resolved(&self) -> bool {
        !self.inputs.is_empty()
    }

    /// Distinct source columns
    pub fn sources(&self) -> BTreeSet<&ColumnRef> {
        self.inputs.iter().map(|i| &i.source).collect()
    }

    /// Distinct transformation kinds
    pub fn kinds(&self) -> BTreeSet<TransformationKind> {
        self.inputs.iter().map(|i| i.transformation).collect()
    }
}

/// How an object's shape is defined
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    /// Explicit column list (CREATE TABLE, catalog)
    Declared(Schema),

    /// Defining query (view, CTAS, SELECT INTO, procedure result set)
    Query(QueryPlan),

    /// Declared columns filled by a later `INSERT ... SELECT`; the plan's
    /// outputs are aligned to the declared columns by ordinal
    Populated { schema: Schema, plan: QueryPlan },

    /// `INSERT INTO t EXEC proc`: rows come from a procedure's result set
    ExecPassthrough { procedure: String },

    /// Nothing usable could be extracted
    Opaque,
}

/// Output of the statement analyzer for one source unit
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    /// Canonical name, globally unique per run
    pub name: String,

    /// Object kind
    pub kind: ObjectKind,

    /// Shape definition, resolved later in topological order
    pub body: ObjectBody,

    /// Canonical names of objects this one reads from
    pub dependencies: BTreeSet<String>,

    /// Diagnostics attached during analysis
    pub diagnostics: Vec<Diagnostic>,

    /// Temp objects owned by (and scoped to) this object
    pub scoped: Vec<ObjectInfo>,

    /// Source file the object came from
    pub source: Option<String>,
}

impl ObjectInfo {
    /// Create an object with an opaque body
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            body: ObjectBody::Opaque,
            dependencies: BTreeSet::new(),
            diagnostics: Vec::new(),
            scoped: Vec::new(),
            source: None,
        }
    }

    /// Set the body
    pub fn with_body(mut self, body: ObjectBody) -> Self {
        self.body = body;
        self
    }

    /// Set the source file
    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    /// Record a diagnostic, tagging it with this object's name
    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic.with_object(self.name.clone()));
    }

    /// Record a dependency unless it is a self-reference
    pub fn add_dependency(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            self.dependencies.insert(name);
        }
    }

    /// Find an owned temp object
    pub fn scoped_object_mut(&mut self, name: &str) -> Option<&mut ObjectInfo> {
        self.scoped.iter_mut().find(|o| o.name == name)
    }

    /// Detach owned temp objects, returning the owner followed by them
    pub fn flatten(mut self) -> Vec<ObjectInfo> {
        let scoped = std::mem::take(&mut self.scoped);
        let mut objects = vec![self];
        for object in scoped {
            objects.extend(object.flatten());
        }
        objects
    }
}

/// An object after schema resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedObject {
    /// Canonical name
    pub name: String,

    /// Object kind
    pub kind: ObjectKind,

    /// Resolved output schema
    pub schema: Schema,

    /// Per-output-column lineage, in schema order
    pub lineage: Vec<ColumnLineage>,

    /// Canonical names of dependencies
    pub dependencies: BTreeSet<String>,

    /// Objects whose columns reached this one through `*` expansion
    pub star_sources: BTreeSet<String>,

    /// Analysis and resolution diagnostics
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolvedObject {
    /// Lineage of an output column (case-insensitive)
    pub fn lineage_of(&self, column: &str) -> Option<&ColumnLineage> {
        self.lineage
            .iter()
            .find(|l| l.output_column.eq_ignore_ascii_case(column))
    }

    /// Whether the object's shape is known
    pub fn has_schema(&self) -> bool {
        !self.schema.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn qualify_partial_names() {
        let name = QualifiedName::resolve("[Sales].[Orders]", "DW", "dbo").unwrap();
        assert_eq!(name.canonical(), "dw.sales.orders");

        let name = QualifiedName::resolve("orders", "dw", "dbo").unwrap();
        assert_eq!(name.canonical(), "dw.dbo.orders");

        let name = QualifiedName::resolve("srv.Other.dbo.T", "dw", "dbo").unwrap();
        assert_eq!(name.canonical(), "other.dbo.t");

        let name = QualifiedName::resolve("Stage..Orders", "dw", "dbo").unwrap();
        assert_eq!(name.canonical(), "stage.dbo.orders");

        assert!(QualifiedName::resolve("", "dw", "dbo").is_none());
    }

    #[test]
    fn quoted_parts_keep_dots() {
        assert_eq!(split_identifier("\"my.schema\".t"), vec!["my.schema", "t"]);
    }

    #[test]
    fn temp_names_are_scoped_to_owner() {
        assert!(is_temp_name("#stage"));
        assert!(is_temp_name("tempdb..#stage"));
        assert!(!is_temp_name("dbo.stage"));
        assert_eq!(
            temp_object_name("dw.dbo.load_sales", "tempdb..#Stage"),
            "dw.dbo.load_sales#stage"
        );
    }

    #[test]
    fn transformation_kind_serializes_as_string() {
        let kind = TransformationKind::SetOp(SetOpKind::Union);
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"SET_OP(UNION)\"");
        let back: TransformationKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn lineage_inputs_are_an_ordered_set() {
        let input = |col: &str| LineageInput {
            source: ColumnRef::new("dw.dbo.orders", col),
            transformation: TransformationKind::Identity,
            expression: "o.x".to_string(),
        };
        let lineage = ColumnLineage::new("x", vec![input("b"), input("a"), input("b")]);
        assert_eq!(lineage.inputs.len(), 2);
        assert_eq!(lineage.inputs[0].source.column, "a");
    }

    #[test]
    fn flatten_detaches_scoped_objects() {
        let mut owner = ObjectInfo::new("dw.dbo.p", ObjectKind::Procedure);
        owner.scoped.push(ObjectInfo::new("dw.dbo.p#t", ObjectKind::TempTable));
        let all = owner.flatten();
        assert_eq!(all.len(), 2);
        assert!(all[0].scoped.is_empty());
        assert_eq!(all[1].kind, ObjectKind::TempTable);
    }
}
