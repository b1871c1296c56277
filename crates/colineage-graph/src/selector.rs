//! Impact selectors: `[+]pattern[+]`
//!
//! A leading `+` walks upstream from the seed columns, a trailing `+` walks
//! downstream; with neither (or both) the walk goes both ways.
//!
//! Patterns:
//! - `table.column`, `schema.table.column`, `db.schema.table.column`
//! - `schema.table.*` (every column of matching tables)
//! - `.text` / `..text` (column names containing `text`, or matching it as a
//!   glob when it has `*`, `?` or `[`), optionally scoped as `table..text`
//! - `scheme://host/db.schema.table.column`

use colineage_core::object::split_identifier;
use colineage_core::ColumnRef;
use thiserror::Error;

/// Selector parse errors; callers of the query API see an empty result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("selector '{0}' matches nothing by construction")]
    Degenerate(String),

    #[error("malformed selector '{0}'")]
    Malformed(String),

    #[error("invalid column glob '{0}': {1}")]
    InvalidGlob(String, String),
}

/// Traversal direction relative to the seed column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards the sources of the seed
    Upstream,
    /// Towards the consumers of the seed
    Downstream,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upstream => write!(f, "upstream"),
            Direction::Downstream => write!(f, "downstream"),
        }
    }
}

/// Seed pattern of a selector
#[derive(Debug, Clone)]
pub enum Pattern {
    /// One column of tables whose trailing name segments match
    Column { table: Vec<String>, column: String },

    /// Every column of tables whose `schema.table` (or `table`) matches
    Table { table: Vec<String> },

    /// Columns whose name contains (or glob-matches) the text
    ColumnWildcard {
        scope: Vec<String>,
        text: String,
        glob: Option<glob::Pattern>,
    },
}

/// A parsed impact query
#[derive(Debug, Clone)]
pub struct Selector {
    pub pattern: Pattern,
    pub upstream: bool,
    pub downstream: bool,
    pub max_depth: usize,
}

impl Selector {
    /// Parse selector text
    pub fn parse(text: &str, max_depth: usize) -> Result<Self, SelectorError> {
        let mut body = text.trim();
        if body.is_empty() {
            return Err(SelectorError::Empty);
        }

        let upstream = body.starts_with('+');
        let downstream = body.len() > 1 && body.ends_with('+');
        body = body.trim_start_matches('+').trim_end_matches('+').trim();
        let (upstream, downstream) = if upstream || downstream {
            (upstream, downstream)
        } else {
            (true, true)
        };

        if let Some(at) = body.find("://") {
            let rest = &body[at + 3..];
            body = match rest.find('/') {
                Some(slash) => &rest[slash + 1..],
                None => return Err(SelectorError::Degenerate(text.to_string())),
            };
        }

        let pattern = parse_pattern(body).map_err(|e| match e {
            SelectorError::Degenerate(_) => SelectorError::Degenerate(text.to_string()),
            SelectorError::Malformed(_) => SelectorError::Malformed(text.to_string()),
            other => other,
        })?;

        Ok(Self {
            pattern,
            upstream,
            downstream,
            max_depth,
        })
    }

    /// Directions to walk, upstream first
    pub fn directions(&self) -> Vec<Direction> {
        let mut directions = Vec::new();
        if self.upstream {
            directions.push(Direction::Upstream);
        }
        if self.downstream {
            directions.push(Direction::Downstream);
        }
        directions
    }

    /// Whether a column node is a seed
    pub fn matches(&self, node: &ColumnRef) -> bool {
        let object: Vec<&str> = node.object.splitn(3, '.').collect();
        match &self.pattern {
            Pattern::Column { table, column } => {
                node.column == *column && ends_with(&object, table)
            }
            Pattern::Table { table } => {
                // a differing database prefix is ignored
                let start = table.len().saturating_sub(2);
                ends_with(&object, &table[start..])
            }
            Pattern::ColumnWildcard { scope, text, glob } => {
                if !scope.is_empty() && !ends_with(&object, scope) {
                    return false;
                }
                match glob {
                    Some(glob) => glob.matches_with(&node.column, glob_options()),
                    None => node.column.contains(text.as_str()),
                }
            }
        }
    }
}

fn parse_pattern(body: &str) -> Result<Pattern, SelectorError> {
    if body.is_empty() || body.chars().all(|c| c == '.' || c == '*') {
        return Err(SelectorError::Degenerate(body.to_string()));
    }

    if let Some(at) = body.find("..").or_else(|| body.starts_with('.').then_some(0)) {
        let scope_text = &body[..at];
        let text = body[at..].trim_start_matches('.').to_lowercase();
        if text.is_empty() || text.chars().all(|c| c == '*') {
            return Err(SelectorError::Degenerate(body.to_string()));
        }
        let scope = if scope_text.is_empty() {
            Vec::new()
        } else {
            name_parts(scope_text)?
        };
        let glob = if text.contains(['*', '?', '[']) {
            let pattern = glob::Pattern::new(&text)
                .map_err(|e| SelectorError::InvalidGlob(text.clone(), e.to_string()))?;
            Some(pattern)
        } else {
            None
        };
        return Ok(Pattern::ColumnWildcard { scope, text, glob });
    }

    if let Some(table) = body.strip_suffix(".*") {
        let table = name_parts(table)?;
        if table.len() > 3 {
            return Err(SelectorError::Malformed(body.to_string()));
        }
        return Ok(Pattern::Table { table });
    }

    let mut parts = name_parts(body)?;
    if parts.len() < 2 {
        return Err(SelectorError::Malformed(body.to_string()));
    }
    // server.db.schema.table.column
    while parts.len() > 4 {
        parts.remove(0);
    }
    let column = parts.pop().unwrap_or_default();
    Ok(Pattern::Column {
        table: parts,
        column,
    })
}

/// Case-folded dotted parts; empty parts are malformed
fn name_parts(text: &str) -> Result<Vec<String>, SelectorError> {
    let parts = split_identifier(text);
    if parts.iter().any(String::is_empty) {
        return Err(SelectorError::Malformed(text.to_string()));
    }
    Ok(parts)
}

fn ends_with(object: &[&str], suffix: &[String]) -> bool {
    suffix.len() <= object.len()
        && object[object.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn glob_options() -> glob::MatchOptions {
    glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(object: &str, column: &str) -> ColumnRef {
        ColumnRef::new(object, column)
    }

    #[test]
    fn plus_signs_choose_direction() {
        let up = Selector::parse("+dbo.orders.status", 5).unwrap();
        assert!(up.upstream && !up.downstream);

        let down = Selector::parse("dbo.orders.status+", 5).unwrap();
        assert!(!down.upstream && down.downstream);

        let both = Selector::parse("+dbo.orders.status+", 5).unwrap();
        assert!(both.upstream && both.downstream);

        let bare = Selector::parse("orders.status", 5).unwrap();
        assert_eq!(bare.directions(), vec![Direction::Upstream, Direction::Downstream]);
    }

    #[test]
    fn column_patterns_match_trailing_segments() {
        let selector = Selector::parse("Orders.Status", 5).unwrap();
        assert!(selector.matches(&node("dw.dbo.orders", "status")));
        assert!(selector.matches(&node("other.sales.orders", "status")));
        assert!(!selector.matches(&node("dw.dbo.orders", "id")));

        let full = Selector::parse("dw.dbo.orders.status", 5).unwrap();
        assert!(!full.matches(&node("other.dbo.orders", "status")));
    }

    #[test]
    fn table_wildcard_ignores_database() {
        let selector = Selector::parse("+INFOMART.dbo.fct_sales.*", 2).unwrap();
        assert!(selector.matches(&node("warehouse.dbo.fct_sales", "revenue")));
        assert!(!selector.matches(&node("warehouse.stg.fct_sales", "revenue")));
    }

    #[test]
    fn column_wildcards() {
        let contains = Selector::parse("..revenue", 5).unwrap();
        assert!(contains.matches(&node("dw.dbo.fct", "TotalRevenue")));

        let glob = Selector::parse(".is_*", 5).unwrap();
        assert!(glob.matches(&node("dw.dbo.stg", "is_fulfilled")));
        assert!(!glob.matches(&node("dw.dbo.stg", "status_is")));

        let scoped = Selector::parse("stg..id", 5).unwrap();
        assert!(scoped.matches(&node("dw.dbo.stg", "order_id")));
        assert!(!scoped.matches(&node("dw.dbo.fct", "order_id")));
    }

    #[test]
    fn namespace_uri() {
        let selector = Selector::parse("mssql://localhost/dw.dbo.orders.status", 5).unwrap();
        assert!(selector.matches(&node("dw.dbo.orders", "status")));
    }

    #[test]
    fn degenerate_patterns_are_rejected() {
        for text in [".", "..", "ns..", "", "+", "++", "*", "mssql://host"] {
            assert!(Selector::parse(text, 5).is_err(), "{:?} should not parse", text);
        }
        assert!(matches!(Selector::parse("orders", 5), Err(SelectorError::Malformed(_))));
    }
}
