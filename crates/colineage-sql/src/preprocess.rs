//! Text preprocessing ahead of parsing
//!
//! Removes batch separators, session settings and other statements that carry
//! no lineage, and turns dbt `ref`/`source` calls into plain table names.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static GO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*GO(?:[ \t]+\d+)?[ \t]*;?[ \t]*$").unwrap());

static SESSION_SET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*SET[ \t]+(?:ANSI_NULLS|ANSI_PADDING|ANSI_WARNINGS|ARITHABORT|CONCAT_NULL_YIELDS_NULL|QUOTED_IDENTIFIER|NOCOUNT|XACT_ABORT|NUMERIC_ROUNDABORT|TRANSACTION[ \t]+ISOLATION[ \t]+LEVEL[ \t]+[A-Z ]+?)[ \t]*(?:ON|OFF)?[ \t]*;?[ \t]*$",
    )
    .unwrap()
});

static PRINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*PRINT\b[^\n]*$").unwrap());

static DECLARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*DECLARE[ \t]+@[^\n]*$").unwrap());

static TABLE_VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*DECLARE\s+@\w+\s+(?:AS\s+)?TABLE\b").unwrap());

static TEMP_DROP_GUARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)IF\s+OBJECT_ID\s*\(\s*N?'(?:tempdb\.\.)?#\w+'(?:\s*,\s*N?'U')?\s*\)\s+IS\s+NOT\s+NULL\s+(?:BEGIN\s+)?DROP\s+TABLE\s+#\w+\s*;?(?:\s*END\b\s*;?)?",
    )
    .unwrap()
});

static DROP_TEMP_IF_EXISTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)DROP\s+TABLE\s+IF\s+EXISTS\s+(?:tempdb\.\.)?#\w+\s*;?").unwrap()
});

static COLLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+COLLATE\s+[A-Za-z0-9_]+").unwrap());

static ISNULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bISNULL\s*\(").unwrap());

static USE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?im)^[ \t]*USE[ \t]+((?:\[[^\]]+\])|(?:"[^"]+")|(?:\w+))[ \t]*;?[ \t]*$"#).unwrap()
});

static DBT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\{\s*ref\(\s*['"]([^'"]+)['"]\s*(?:,\s*['"]([^'"]+)['"]\s*)?(?:,\s*v(?:ersion)?\s*=\s*[^)]*)?\)\s*\}\}"#,
    )
    .unwrap()
});

static DBT_SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\{\s*source\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]+)['"]\s*\)\s*\}\}"#).unwrap()
});

static JINJA_CONFIG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{\s*config\(.*?\)\s*\}\}").unwrap());

static JINJA_EXPR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}").unwrap());

static JINJA_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{%.*?%\}|\{#.*?#\}").unwrap());

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap());

/// Result of preprocessing one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
    /// Cleaned SQL text
    pub text: String,

    /// Database selected by the first `USE` statement
    pub database: Option<String>,

    /// Whether dbt template syntax was found
    pub had_templates: bool,
}

/// Preprocess raw SQL text
pub fn preprocess(raw: &str) -> Preprocessed {
    let text = strip_comments(raw);
    let had_templates = text.contains("{{") || text.contains("{%");
    let text = if had_templates {
        render_templates(&text)
    } else {
        text
    };

    let database = USE_RE
        .captures(&text)
        .map(|c| c[1].trim_matches(|ch| ch == '[' || ch == ']' || ch == '"').to_lowercase());
    let text = USE_RE.replace_all(&text, "").into_owned();

    let text = GO_RE.replace_all(&text, ";").into_owned();
    let text = SESSION_SET_RE.replace_all(&text, "").into_owned();
    let text = PRINT_RE.replace_all(&text, "").into_owned();
    let text = DECLARE_RE
        .replace_all(&text, |c: &Captures| {
            // Table variables keep their column list balanced, so leave them
            if TABLE_VARIABLE_RE.is_match(&c[0]) {
                c[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned();
    let text = TEMP_DROP_GUARD_RE.replace_all(&text, "").into_owned();
    let text = DROP_TEMP_IF_EXISTS_RE.replace_all(&text, "").into_owned();
    let text = COLLATE_RE.replace_all(&text, "").into_owned();
    let text = ISNULL_RE.replace_all(&text, "COALESCE(").into_owned();
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n").into_owned();

    Preprocessed {
        text: text.trim().to_string(),
        database,
        had_templates,
    }
}

/// Replace dbt `ref`/`source` calls with table names and drop other template syntax
fn render_templates(text: &str) -> String {
    let text = DBT_REF_RE.replace_all(text, |c: &Captures| {
        // ref('package', 'model') names the model last
        c.get(2).map_or(&c[1], |m| m.as_str()).to_string()
    });
    let text = DBT_SOURCE_RE.replace_all(&text, "$1.$2");
    let text = JINJA_CONFIG_RE.replace_all(&text, "");
    let text = JINJA_BLOCK_RE.replace_all(&text, "");
    JINJA_EXPR_RE.replace_all(&text, "NULL").into_owned()
}

/// Remove `--` and (nested) `/* */` comments outside string literals and
/// quoted identifiers. Newlines inside block comments are kept.
pub fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match ch {
            '\'' | '"' | '[' => {
                let close = if ch == '[' { ']' } else { ch };
                out.push(ch);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == close {
                        // doubled quote is an escape
                        if chars.get(i + 1) == Some(&close) && close != ']' {
                            out.push(close);
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let mut depth = 0usize;
                while i < chars.len() {
                    if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                        depth += 1;
                        i += 2;
                    } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        if chars[i] == '\n' {
                            out.push('\n');
                        }
                        i += 1;
                    }
                }
                out.push(' ');
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_batch_noise() {
        let sql = "SET ANSI_NULLS ON\nGO\nSET QUOTED_IDENTIFIER ON\nGO\nPRINT 'loading'\nDECLARE @d DATE = GETDATE()\nSELECT ISNULL(a, 0) AS a FROM t\nGO";
        let result = preprocess(sql);
        assert!(!result.text.contains("ANSI_NULLS"));
        assert!(!result.text.contains("PRINT"));
        assert!(!result.text.contains("DECLARE"));
        assert!(result.text.contains("COALESCE(a, 0)"));
        assert!(!result.text.contains("\nGO"));
    }

    #[test]
    fn keeps_table_variables() {
        let result = preprocess("DECLARE @ids TABLE (id INT)\nSELECT 1");
        assert!(result.text.contains("DECLARE @ids TABLE (id INT)"));
    }

    #[test]
    fn captures_use_database() {
        let result = preprocess("USE [Staging]\nGO\nCREATE VIEW v AS SELECT 1 AS x");
        assert_eq!(result.database.as_deref(), Some("staging"));
        assert!(result.text.starts_with(";"));
    }

    #[test]
    fn removes_temp_drop_guards() {
        let sql = "IF OBJECT_ID('tempdb..#stage') IS NOT NULL DROP TABLE #stage;\nSELECT 1 INTO #stage";
        let result = preprocess(sql);
        assert_eq!(result.text, "SELECT 1 INTO #stage");
    }

    #[test]
    fn comments_inside_strings_survive() {
        let stripped = strip_comments("SELECT '--not a comment' AS x -- trailing\n/* block\n /* nested */ */FROM t");
        assert_eq!(stripped, "SELECT '--not a comment' AS x \n\n FROM t");
    }

    #[test]
    fn renders_dbt_references() {
        let sql = "{{ config(materialized='table') }}\nSELECT * FROM {{ ref('stg_orders') }} o JOIN {{ source('raw', 'customers') }} c ON o.id = c.id {% if is_incremental() %}WHERE 1 = 1{% endif %}";
        let result = preprocess(sql);
        assert!(result.had_templates);
        assert_eq!(
            result.text,
            "SELECT * FROM stg_orders o JOIN raw.customers c ON o.id = c.id WHERE 1 = 1"
        );
    }

    #[test]
    fn collate_clauses_removed() {
        let result = preprocess("SELECT name COLLATE Latin1_General_CI_AS AS name FROM t");
        assert_eq!(result.text, "SELECT name AS name FROM t");
    }
}
