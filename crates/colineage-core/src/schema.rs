//! Schema types and canonical type system

use serde::{Deserialize, Serialize};

/// Portable logical type system
///
/// Maps dialect-specific declared types to a common representation that keeps
/// enough precision (lengths, decimal precision/scale) to classify type changes
/// as widening or narrowing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalType {
    /// Boolean / BIT
    Bool,

    /// 1-byte integer
    TinyInt,

    /// 2-byte integer
    SmallInt,

    /// 4-byte integer
    Int,

    /// 8-byte integer
    BigInt,

    /// Floating point (any precision)
    Float,

    /// Exact numeric with precision and scale
    Decimal { precision: u8, scale: u8 },

    /// Character data. `length: None` means unbounded (MAX / TEXT).
    Text {
        unicode: bool,
        fixed: bool,
        length: Option<u32>,
    },

    /// Date (no time component)
    Date,

    /// Time of day
    Time,

    /// Timestamp (with date and time component)
    Timestamp,

    /// Binary data. `length: None` means unbounded.
    Binary { length: Option<u32> },

    /// UUID / UNIQUEIDENTIFIER
    Uuid,

    /// JSON/Variant type
    Json,

    /// A declared type with no portable mapping
    Other { name: String },

    /// Unknown type (cannot infer)
    Unknown,
}

/// Outcome of comparing a column type between two versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
    /// Types are identical
    Same,

    /// Every value of the old type fits the new type
    Widening,

    /// Some values of the old type may not fit the new type
    Narrowing,

    /// At least one side is unknown, nothing can be said
    Indeterminate,
}

const MAX_DECIMAL_PRECISION: u8 = 38;

impl LogicalType {
    /// Shorthand for `VARCHAR(n)`
    pub fn varchar(length: u32) -> Self {
        Self::Text {
            unicode: false,
            fixed: false,
            length: Some(length),
        }
    }

    /// Shorthand for `NVARCHAR(n)`
    pub fn nvarchar(length: u32) -> Self {
        Self::Text {
            unicode: true,
            fixed: false,
            length: Some(length),
        }
    }

    /// Shorthand for `DECIMAL(p,s)`
    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self::Decimal { precision, scale }
    }

    /// Parse declared SQL type text such as `DECIMAL(10,2)`, `NVARCHAR(MAX)` or `int8`
    pub fn parse(data_type: &str) -> Self {
        let lower = data_type.trim().to_lowercase();
        if lower.is_empty() {
            return Self::Unknown;
        }

        let (base, args) = match lower.find('(') {
            Some(open) => {
                let close = lower.rfind(')').unwrap_or(lower.len());
                let args: Vec<&str> = lower[open + 1..close.max(open + 1)]
                    .split(',')
                    .map(|a| a.trim())
                    .filter(|a| !a.is_empty())
                    .collect();
                (lower[..open].trim(), args)
            }
            None => (lower.as_str(), Vec::new()),
        };
        let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

        let length_arg = |default: Option<u32>| -> Option<u32> {
            match args.first() {
                Some(&"max") => None,
                Some(n) => n.parse().ok().or(default),
                None => default,
            }
        };
        let numeric_arg = |idx: usize, default: u8| -> u8 {
            args.get(idx)
                .and_then(|a| a.parse::<u8>().ok())
                .unwrap_or(default)
                .min(MAX_DECIMAL_PRECISION)
        };

        match base.as_str() {
            "bit" | "bool" | "boolean" => Self::Bool,
            "tinyint" => Self::TinyInt,
            "smallint" | "int2" => Self::SmallInt,
            "int" | "integer" | "int4" | "mediumint" => Self::Int,
            "bigint" | "int8" | "int64" => Self::BigInt,
            "float" | "real" | "double" | "double precision" | "float4" | "float8"
            | "float64" => Self::Float,
            "decimal" | "numeric" | "dec" | "number" | "bignumeric" => Self::Decimal {
                precision: numeric_arg(0, 18),
                scale: numeric_arg(1, 0),
            },
            "money" => Self::decimal(19, 4),
            "smallmoney" => Self::decimal(10, 4),
            "char" | "character" => Self::Text {
                unicode: false,
                fixed: true,
                length: length_arg(Some(1)),
            },
            "nchar" | "national character" => Self::Text {
                unicode: true,
                fixed: true,
                length: length_arg(Some(1)),
            },
            "varchar" | "character varying" => Self::Text {
                unicode: false,
                fixed: false,
                length: length_arg(None),
            },
            "nvarchar" | "national character varying" => Self::Text {
                unicode: true,
                fixed: false,
                length: length_arg(None),
            },
            "text" => Self::Text {
                unicode: false,
                fixed: false,
                length: None,
            },
            "ntext" | "string" => Self::Text {
                unicode: true,
                fixed: false,
                length: if base == "string" { length_arg(None) } else { None },
            },
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" | "timestamp"
            | "timestamptz" | "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz"
            | "timestamp with time zone" | "timestamp without time zone" => Self::Timestamp,
            "binary" | "varbinary" => Self::Binary {
                length: length_arg(None),
            },
            "image" | "bytea" | "bytes" | "blob" => Self::Binary { length: None },
            "uniqueidentifier" | "uuid" => Self::Uuid,
            "json" | "jsonb" | "variant" | "object" | "xml" => Self::Json,
            _ => Self::Other {
                name: data_type.trim().to_uppercase(),
            },
        }
    }

    /// Whether this is a known numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt | Self::Float | Self::Decimal { .. }
        )
    }

    /// Whether this is a character type
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    fn integer_rank(&self) -> Option<u8> {
        match self {
            Self::TinyInt => Some(1),
            Self::SmallInt => Some(2),
            Self::Int => Some(3),
            Self::BigInt => Some(4),
            _ => None,
        }
    }

    /// Number of decimal digits needed to hold any value of an integer type
    fn integer_digits(&self) -> Option<u8> {
        match self {
            Self::TinyInt => Some(3),
            Self::SmallInt => Some(5),
            Self::Int => Some(10),
            Self::BigInt => Some(19),
            _ => None,
        }
    }

    /// View an exact numeric as (integer digits, scale)
    fn exact_shape(&self) -> Option<(u8, u8)> {
        match self {
            Self::Decimal { precision, scale } => Some((precision.saturating_sub(*scale), *scale)),
            other => other.integer_digits().map(|d| (d, 0)),
        }
    }

    /// Numeric promotion to the wider operand type
    ///
    /// Returns `None` when either side is not numeric.
    pub fn promote(&self, other: &LogicalType) -> Option<LogicalType> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }
        if matches!(self, Self::Float) || matches!(other, Self::Float) {
            return Some(Self::Float);
        }
        if let (Some(a), Some(b)) = (self.integer_rank(), other.integer_rank()) {
            return Some(if a >= b { self.clone() } else { other.clone() });
        }

        let (int_a, scale_a) = self.exact_shape()?;
        let (int_b, scale_b) = other.exact_shape()?;
        let scale = scale_a.max(scale_b);
        let precision = int_a
            .max(int_b)
            .saturating_add(scale)
            .min(MAX_DECIMAL_PRECISION);
        Some(Self::Decimal { precision, scale })
    }

    /// Least upper bound of two branch types (CASE branches, set-operation columns)
    ///
    /// `Unknown` is absorbed by the other side. Returns `None` for incompatible
    /// families.
    pub fn least_upper_bound(&self, other: &LogicalType) -> Option<LogicalType> {
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (Self::Unknown, t) | (t, Self::Unknown) => Some(t.clone()),
            (a, b) if a.is_numeric() && b.is_numeric() => a.promote(b),
            (
                Self::Text { unicode: ua, fixed: fa, length: la },
                Self::Text { unicode: ub, fixed: fb, length: lb },
            ) => Some(Self::Text {
                unicode: *ua || *ub,
                fixed: *fa && *fb && la == lb,
                length: match (la, lb) {
                    (Some(a), Some(b)) => Some((*a).max(*b)),
                    _ => None,
                },
            }),
            (Self::Date, Self::Timestamp) | (Self::Timestamp, Self::Date) => Some(Self::Timestamp),
            (Self::Binary { length: la }, Self::Binary { length: lb }) => Some(Self::Binary {
                length: match (la, lb) {
                    (Some(a), Some(b)) => Some((*a).max(*b)),
                    _ => None,
                },
            }),
            _ => None,
        }
    }

    /// Classify a change from `self` (base) to `to` (head)
    pub fn compare(&self, to: &LogicalType) -> TypeChange {
        if matches!(self, Self::Unknown) || matches!(to, Self::Unknown) {
            return TypeChange::Indeterminate;
        }
        if self == to {
            return TypeChange::Same;
        }

        let widening = match (self, to) {
            (a, b) if a.integer_rank().is_some() && b.integer_rank().is_some() => {
                a.integer_rank() <= b.integer_rank()
            }
            (a, Self::Float) if a.integer_rank().is_some() => true,
            (a, Self::Decimal { .. }) if a.is_numeric() && !matches!(a, Self::Float) => {
                match (a.exact_shape(), to.exact_shape()) {
                    (Some((int_a, scale_a)), Some((int_b, scale_b))) => {
                        int_b >= int_a && scale_b >= scale_a
                    }
                    _ => false,
                }
            }
            (
                Self::Text { unicode: ua, fixed: fa, length: la },
                Self::Text { unicode: ub, fixed: fb, length: lb },
            ) => {
                let unicode_ok = !ua || *ub;
                let fixed_ok = *fa || !fb;
                let length_ok = match (la, lb) {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(a), Some(b)) => b >= a,
                };
                unicode_ok && fixed_ok && length_ok
            }
            (Self::Binary { length: la }, Self::Binary { length: lb }) => match (la, lb) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(a), Some(b)) => b >= a,
            },
            (Self::Date, Self::Timestamp) => true,
            _ => false,
        };

        if widening {
            TypeChange::Widening
        } else {
            TypeChange::Narrowing
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "BIT"),
            Self::TinyInt => write!(f, "TINYINT"),
            Self::SmallInt => write!(f, "SMALLINT"),
            Self::Int => write!(f, "INT"),
            Self::BigInt => write!(f, "BIGINT"),
            Self::Float => write!(f, "FLOAT"),
            Self::Decimal { precision, scale } => write!(f, "DECIMAL({},{})", precision, scale),
            Self::Text { unicode, fixed, length } => {
                let base = match (unicode, fixed) {
                    (false, true) => "CHAR",
                    (true, true) => "NCHAR",
                    (false, false) => "VARCHAR",
                    (true, false) => "NVARCHAR",
                };
                match length {
                    Some(n) => write!(f, "{}({})", base, n),
                    None => write!(f, "{}(MAX)", base),
                }
            }
            Self::Date => write!(f, "DATE"),
            Self::Time => write!(f, "TIME"),
            Self::Timestamp => write!(f, "DATETIME2"),
            Self::Binary { length: Some(n) } => write!(f, "VARBINARY({})", n),
            Self::Binary { length: None } => write!(f, "VARBINARY(MAX)"),
            Self::Uuid => write!(f, "UNIQUEIDENTIFIER"),
            Self::Json => write!(f, "JSON"),
            Self::Other { name } => write!(f, "{}", name),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Nullability state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Nullability {
    /// Definitely nullable
    Yes,

    /// Definitely not nullable
    No,

    /// Cannot determine nullability
    Unknown,
}

impl Nullability {
    /// Nullable if either side is nullable
    pub fn either(self, other: Nullability) -> Nullability {
        match (self, other) {
            (Self::Yes, _) | (_, Self::Yes) => Self::Yes,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::No,
        }
    }

    /// Nullable only if both sides are nullable (COALESCE semantics)
    pub fn both(self, other: Nullability) -> Nullability {
        match (self, other) {
            (Self::No, _) | (_, Self::No) => Self::No,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::Yes,
        }
    }

    /// Convert from an optional boolean flag
    pub fn from_flag(nullable: Option<bool>) -> Self {
        match nullable {
            Some(true) => Self::Yes,
            Some(false) => Self::No,
            None => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Nullability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "NULL"),
            Self::No => write!(f, "NOT NULL"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A column in a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name (original case)
    pub name: String,

    /// Logical type
    pub logical_type: LogicalType,

    /// Nullability
    pub nullable: Nullability,

    /// Zero-based ordinal position within the owning schema
    pub ordinal: usize,
}

impl Column {
    /// Create a new column with unknown nullability
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: Nullability::Unknown,
            ordinal: 0,
        }
    }

    /// Set nullability
    pub fn with_nullability(mut self, nullable: Nullability) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set ordinal position
    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Case-folded name used for comparisons and graph keys
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// An ordered collection of columns
///
/// Column names are unique case-insensitively and ordinals follow position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Ordered list of columns
    pub columns: Vec<Column>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema from columns, renumbering ordinals by position
    pub fn from_columns(columns: Vec<Column>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(ordinal, column)| column.with_ordinal(ordinal))
            .collect();
        Self { columns }
    }

    /// Find a column by name (case-insensitive)
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn logical_type_display() {
        assert_eq!(LogicalType::Bool.to_string(), "BIT");
        assert_eq!(LogicalType::decimal(10, 2).to_string(), "DECIMAL(10,2)");
        assert_eq!(LogicalType::varchar(10).to_string(), "VARCHAR(10)");
        assert_eq!(LogicalType::parse("nvarchar(max)").to_string(), "NVARCHAR(MAX)");
    }

    #[test]
    fn parse_declared_types() {
        assert_eq!(LogicalType::parse("INT"), LogicalType::Int);
        assert_eq!(LogicalType::parse("int8"), LogicalType::BigInt);
        assert_eq!(LogicalType::parse("DECIMAL(10, 2)"), LogicalType::decimal(10, 2));
        assert_eq!(LogicalType::parse("numeric"), LogicalType::decimal(18, 0));
        assert_eq!(LogicalType::parse("varchar(10)"), LogicalType::varchar(10));
        assert_eq!(LogicalType::parse("datetime"), LogicalType::Timestamp);
        assert_eq!(LogicalType::parse(""), LogicalType::Unknown);
        assert_eq!(
            LogicalType::parse("geography"),
            LogicalType::Other { name: "GEOGRAPHY".to_string() }
        );
    }

    #[test]
    fn numeric_promotion_picks_wider_operand() {
        assert_eq!(LogicalType::Int.promote(&LogicalType::BigInt), Some(LogicalType::BigInt));
        assert_eq!(
            LogicalType::decimal(10, 2).promote(&LogicalType::Int),
            Some(LogicalType::decimal(12, 2))
        );
        assert_eq!(LogicalType::Float.promote(&LogicalType::Int), Some(LogicalType::Float));
        assert_eq!(LogicalType::Int.promote(&LogicalType::varchar(3)), None);
    }

    #[test]
    fn least_upper_bound_of_branches() {
        assert_eq!(
            LogicalType::varchar(5).least_upper_bound(&LogicalType::nvarchar(3)),
            Some(LogicalType::nvarchar(5))
        );
        assert_eq!(
            LogicalType::Unknown.least_upper_bound(&LogicalType::Date),
            Some(LogicalType::Date)
        );
        assert_eq!(LogicalType::Date.least_upper_bound(&LogicalType::Int), None);
    }

    #[test]
    fn type_change_classification() {
        assert_eq!(LogicalType::Int.compare(&LogicalType::BigInt), TypeChange::Widening);
        assert_eq!(
            LogicalType::decimal(10, 2).compare(&LogicalType::decimal(12, 2)),
            TypeChange::Widening
        );
        assert_eq!(
            LogicalType::decimal(18, 2).compare(&LogicalType::Int),
            TypeChange::Narrowing
        );
        assert_eq!(
            LogicalType::varchar(10).compare(&LogicalType::varchar(20)),
            TypeChange::Widening
        );
        assert_eq!(
            LogicalType::varchar(20).compare(&LogicalType::varchar(10)),
            TypeChange::Narrowing
        );
        assert_eq!(LogicalType::Unknown.compare(&LogicalType::Int), TypeChange::Indeterminate);
    }

    #[test]
    fn nullability_combination() {
        assert_eq!(Nullability::No.either(Nullability::Yes), Nullability::Yes);
        assert_eq!(Nullability::No.either(Nullability::Unknown), Nullability::Unknown);
        assert_eq!(Nullability::Yes.both(Nullability::No), Nullability::No);
    }

    #[test]
    fn schema_lookup_is_case_insensitive() {
        let schema = Schema::from_columns(vec![
            Column::new("OrderID", LogicalType::Int),
            Column::new("Status", LogicalType::varchar(10)),
        ]);

        assert_eq!(schema.column_names(), vec!["OrderID", "Status"]);
        assert_eq!(schema.find_column("status").map(|c| c.ordinal), Some(1));
        assert!(schema.find_column("nonexistent").is_none());
    }
}
