//! Token stream and statement splitting for the recovery path
//!
//! Uses the dialect tokenizer, so string literals, quoted identifiers and
//! comments are handled the same way the grammar sees them.

use crate::dialect::SqlDialect;
use std::collections::BTreeSet;
use sqlparser::tokenizer::{Token, TokenizerError};

/// Lexeme class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexemeKind {
    /// Keyword or bare identifier
    Word,
    /// `[x]`, `"x"` or `` `x` ``
    QuotedWord,
    Number,
    /// String literal, quotes included
    Text,
    Symbol,
}

/// One significant token with its source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub kind: LexemeKind,
    pub text: String,
    pub line: usize,
}

impl Lexeme {
    /// Unquoted word equal to `keyword` (case-insensitive)
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == LexemeKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        self.kind == LexemeKind::Word && keywords.iter().any(|k| self.text.eq_ignore_ascii_case(k))
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == LexemeKind::Symbol && self.text == symbol
    }

    /// Can be part of a dotted object or column name
    pub fn is_name_part(&self) -> bool {
        matches!(self.kind, LexemeKind::Word | LexemeKind::QuotedWord)
    }

    /// Upper-cased text of an unquoted word
    pub fn keyword(&self) -> Option<String> {
        (self.kind == LexemeKind::Word).then(|| self.text.to_uppercase())
    }

    /// Text with identifier quotes removed
    pub fn unquoted(&self) -> &str {
        match self.kind {
            LexemeKind::QuotedWord => self.text.trim_matches(['[', ']', '"', '`']),
            LexemeKind::Text => self
                .text
                .trim_start_matches(['N', 'n'])
                .trim_matches('\''),
            _ => &self.text,
        }
    }
}

/// Tokenize text into significant lexemes
pub fn lex(sql: &str, dialect: &dyn SqlDialect) -> Result<Vec<Lexeme>, TokenizerError> {
    let tokens = dialect.tokenize(sql)?;
    let mut lexemes: Vec<Lexeme> = Vec::with_capacity(tokens.len());
    let mut line = 1;
    let mut glue = false;

    for token in tokens {
        let (kind, text) = match &token {
            Token::Whitespace(ws) => {
                line += ws.to_string().matches('\n').count();
                glue = false;
                continue;
            }
            Token::EOF => continue,
            Token::Word(word) => {
                let kind = if word.quote_style.is_some() {
                    LexemeKind::QuotedWord
                } else {
                    LexemeKind::Word
                };
                (kind, token.to_string())
            }
            Token::Number(number, _) => (LexemeKind::Number, number.clone()),
            Token::SingleQuotedString(_)
            | Token::DoubleQuotedString(_)
            | Token::NationalStringLiteral(_)
            | Token::EscapedStringLiteral(_)
            | Token::HexStringLiteral(_) => (LexemeKind::Text, token.to_string()),
            other => (LexemeKind::Symbol, other.to_string()),
        };

        // some tokenizers split `#name` and `@name`
        if glue && kind == LexemeKind::Word {
            if let Some(previous) = lexemes.last_mut() {
                previous.text.push_str(&text);
                previous.kind = LexemeKind::Word;
                glue = false;
                continue;
            }
        }
        glue = kind == LexemeKind::Symbol && (text == "#" || text == "@");
        lexemes.push(Lexeme { kind, text, line });
    }

    Ok(lexemes)
}

/// Read a dotted name starting at `start`; returns the raw name text and
/// the index after it
pub fn read_name(lexemes: &[Lexeme], start: usize) -> Option<(String, usize)> {
    let first = lexemes.get(start)?;
    if !first.is_name_part() {
        return None;
    }
    let mut raw = first.text.clone();
    let mut i = start + 1;

    while let Some(dot) = lexemes.get(i) {
        if dot.kind != LexemeKind::Symbol || dot.text.is_empty() || !dot.text.chars().all(|c| c == '.')
        {
            break;
        }
        raw.push_str(&dot.text);
        i += 1;
        if let Some(part) = lexemes.get(i).filter(|l| l.is_name_part()) {
            raw.push_str(&part.text);
            i += 1;
        }
    }

    // `t.*` is not a name
    if raw.ends_with('.') && !raw.ends_with("..") {
        raw.pop();
        i -= 1;
    }
    Some((raw, i))
}

/// Nesting depth of every lexeme; `(` and `CASE` open, `)` and `END` close
pub fn depths(lexemes: &[Lexeme]) -> Vec<usize> {
    let mut depth = 0usize;
    lexemes
        .iter()
        .map(|l| {
            if l.is_symbol(")") || (l.is_keyword("END") && depth > 0) {
                depth = depth.saturating_sub(1);
                depth
            } else if l.is_symbol("(") || l.is_keyword("CASE") {
                depth += 1;
                depth - 1
            } else {
                depth
            }
        })
        .collect()
}

/// Index of the `)` matching the `(` at `open`
pub fn matching_paren(lexemes: &[Lexeme], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, l) in lexemes.iter().enumerate().skip(open) {
        if l.is_symbol("(") {
            depth += 1;
        } else if l.is_symbol(")") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Split at top-level lexemes matching `pred`, dropping the separators
pub fn split_top<'l>(lexemes: &'l [Lexeme], pred: impl Fn(&Lexeme) -> bool) -> Vec<&'l [Lexeme]> {
    let depth = depths(lexemes);
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, l) in lexemes.iter().enumerate() {
        if depth[i] == 0 && pred(l) {
            parts.push(&lexemes[start..i]);
            start = i + 1;
        }
    }
    parts.push(&lexemes[start..]);
    parts
}

/// Join lexemes back into readable text
pub fn join_text(lexemes: &[Lexeme]) -> String {
    let mut out = String::new();
    let mut previous: Option<&Lexeme> = None;
    for l in lexemes {
        let tight = match previous {
            None => true,
            Some(p) => {
                p.is_symbol("(")
                    || p.is_symbol(".")
                    || l.is_symbol(".")
                    || l.is_symbol(")")
                    || l.is_symbol(",")
                    || (l.is_symbol("(") && p.is_name_part())
            }
        };
        if !tight {
            out.push(' ');
        }
        out.push_str(&l.text);
        previous = Some(l);
    }
    out
}

const STARTERS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE",
    "DECLARE", "SET", "EXEC", "EXECUTE", "WITH", "IF", "WHILE", "BEGIN", "END", "RETURN",
    "PRINT", "USE", "ELSE", "OPEN", "FETCH", "CLOSE", "DEALLOCATE", "COMMIT", "ROLLBACK",
    "RAISERROR", "THROW",
];

/// Words after which SELECT continues the current statement
const QUERY_LEADERS: &[&str] = &["UNION", "ALL", "EXCEPT", "INTERSECT", "MINUS", "AS", "RETURN", "FOR"];

#[derive(Debug, Default)]
struct Head {
    keyword: String,
    awaiting_query: bool,
    routine_header: bool,
}

impl Head {
    fn begin(lexemes: &[Lexeme], i: usize) -> Self {
        let keyword = lexemes[i].text.to_uppercase();
        let routine_header = (keyword == "CREATE" || keyword == "ALTER")
            && lexemes[i + 1..]
                .iter()
                .take(4)
                .any(|l| l.is_any_keyword(&["PROCEDURE", "PROC", "FUNCTION", "TRIGGER"]));
        Self {
            awaiting_query: keyword == "INSERT" || keyword == "WITH",
            keyword,
            routine_header,
        }
    }

    /// Whether the starter at `i` belongs to the current statement
    fn continues(&mut self, lexemes: &[Lexeme], i: usize) -> bool {
        let word = lexemes[i].text.to_uppercase();
        let previous = i.checked_sub(1).map(|p| &lexemes[p]);
        let previous_is = |words: &[&str]| previous.is_some_and(|p| p.is_any_keyword(words));

        match word.as_str() {
            "SELECT" => {
                if self.awaiting_query || previous_is(QUERY_LEADERS) {
                    self.awaiting_query = false;
                    return true;
                }
                false
            }
            "EXEC" | "EXECUTE" if self.keyword == "INSERT" && self.awaiting_query => {
                self.awaiting_query = false;
                true
            }
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" => {
                if self.keyword == "MERGE" {
                    return true;
                }
                if self.keyword == "WITH" && self.awaiting_query {
                    self.keyword = word.clone();
                    self.awaiting_query = word == "INSERT";
                    return true;
                }
                false
            }
            "SET" => self.keyword == "UPDATE" || self.keyword == "MERGE",
            "WITH" => {
                if lexemes.get(i + 1).is_some_and(|n| n.is_symbol("(")) {
                    return true;
                }
                if previous_is(&["AS"]) {
                    self.awaiting_query = true;
                    return true;
                }
                false
            }
            "FETCH" => previous_is(&["ROWS", "ROW"]),
            _ => false,
        }
    }
}

/// Statements of one lexeme stream
#[derive(Debug)]
pub struct Split<'l> {
    pub statements: Vec<&'l [Lexeme]>,

    /// Lines of `CASE` keywords with no matching `END`
    pub unclosed_case: Vec<usize>,
}

/// Split a lexeme stream into statements
///
/// Statement boundaries are `;` and the first keyword of a new statement at
/// nesting depth zero. Procedure and function headers (up to their `AS`) are
/// returned as their own statement so the body statements split normally.
/// A `CASE` left open at a `;` or at the end of input is ignored and the
/// stream is split again, so it cannot swallow the statements after it.
pub fn split_statements(lexemes: &[Lexeme]) -> Split<'_> {
    let mut ignored = BTreeSet::new();
    loop {
        match split_pass(lexemes, &ignored) {
            Ok(statements) => {
                return Split {
                    statements,
                    unclosed_case: ignored.iter().map(|&i| lexemes[i].line).collect(),
                }
            }
            Err(open_case) => {
                ignored.insert(open_case);
            }
        }
    }
}

/// One split; `Err` carries the index of the outermost unclosed `CASE`
fn split_pass<'l>(lexemes: &'l [Lexeme], ignored: &BTreeSet<usize>) -> Result<Vec<&'l [Lexeme]>, usize> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut case_depth = 0usize;
    let mut case_open = 0usize;
    let mut head = Head::default();

    for i in 0..lexemes.len() {
        let l = &lexemes[i];
        if l.is_symbol("(") {
            depth += 1;
            continue;
        }
        if l.is_symbol(")") {
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth > 0 {
            continue;
        }
        if l.is_symbol(";") {
            if case_depth > 0 {
                return Err(case_open);
            }
            push_span(&mut statements, lexemes, start, i);
            start = i + 1;
            head = Head::default();
            continue;
        }
        if l.is_keyword("CASE") && !ignored.contains(&i) {
            if case_depth == 0 {
                case_open = i;
            }
            case_depth += 1;
            continue;
        }
        if case_depth > 0 {
            if l.is_keyword("END") {
                case_depth -= 1;
            }
            continue;
        }

        if head.routine_header && l.is_keyword("AS") && ends_routine_header(lexemes, i) {
            push_span(&mut statements, lexemes, start, i + 1);
            start = i + 1;
            head = Head::default();
            continue;
        }

        if !l.is_any_keyword(STARTERS) {
            continue;
        }
        if i > start && head.continues(lexemes, i) {
            continue;
        }
        push_span(&mut statements, lexemes, start, i);
        start = i;
        head = Head::begin(lexemes, i);
    }
    if case_depth > 0 {
        return Err(case_open);
    }
    push_span(&mut statements, lexemes, start, lexemes.len());
    Ok(statements)
}

fn push_span<'l>(statements: &mut Vec<&'l [Lexeme]>, lexemes: &'l [Lexeme], from: usize, to: usize) {
    if to > from {
        statements.push(&lexemes[from..to]);
    }
}

/// `AS` that closes a routine header: not `EXECUTE AS`, and followed by a
/// statement (not a parameter type)
fn ends_routine_header(lexemes: &[Lexeme], i: usize) -> bool {
    let after_execute = i
        .checked_sub(1)
        .is_some_and(|p| lexemes[p].is_any_keyword(&["EXEC", "EXECUTE"]));
    let next_starts = lexemes
        .get(i + 1)
        .map_or(true, |n| n.is_any_keyword(STARTERS) || n.is_symbol(";"));
    !after_execute && next_starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MsSql;
    use pretty_assertions::assert_eq;

    fn statements(sql: &str) -> Vec<String> {
        let lexemes = lex(sql, &MsSql).unwrap();
        split_statements(&lexemes)
            .statements
            .into_iter()
            .map(join_text)
            .collect()
    }

    #[test]
    fn splits_without_semicolons() {
        let sql = "SELECT a INTO #t FROM x\nINSERT INTO y (a) SELECT a FROM #t UNION ALL SELECT b FROM z\nUPDATE y SET a = 1 FROM y JOIN w ON y.id = w.id";
        assert_eq!(
            statements(sql),
            vec![
                "SELECT a INTO #t FROM x",
                "INSERT INTO y(a) SELECT a FROM #t UNION ALL SELECT b FROM z",
                "UPDATE y SET a = 1 FROM y JOIN w ON y.id = w.id",
            ]
        );
    }

    #[test]
    fn procedure_header_is_separate() {
        let sql = "CREATE PROCEDURE dbo.load @from DATE AS BEGIN SET NOCOUNT ON; INSERT INTO t EXEC dbo.src END";
        let result = statements(sql);
        assert_eq!(result[0], "CREATE PROCEDURE dbo.load @from DATE AS");
        assert!(result.contains(&"INSERT INTO t EXEC dbo.src".to_string()));
    }

    #[test]
    fn unclosed_case_does_not_hide_later_statements() {
        let sql = "SELECT CASE WHEN a = 1 THEN 'y' AS flag INTO #t FROM x\nINSERT INTO y (a) SELECT a FROM #t\nSELECT b FROM z";
        let lexemes = lex(sql, &MsSql).unwrap();
        let split = split_statements(&lexemes);
        let texts: Vec<String> = split.statements.into_iter().map(join_text).collect();
        assert_eq!(texts.len(), 3);
        assert!(texts[1].starts_with("INSERT INTO y"));
        assert_eq!(texts[2], "SELECT b FROM z");
        assert_eq!(split.unclosed_case, vec![1]);
    }

    #[test]
    fn closed_case_reports_nothing() {
        let lexemes = lex("SELECT CASE WHEN a = 1 THEN 1 END AS f FROM t; SELECT 2", &MsSql).unwrap();
        let split = split_statements(&lexemes);
        assert_eq!(split.statements.len(), 2);
        assert!(split.unclosed_case.is_empty());
    }

    #[test]
    fn case_and_ctes_stay_whole() {
        let sql = "WITH a AS (SELECT 1 AS x) SELECT CASE WHEN x = 1 THEN 'y' ELSE 'n' END AS flag FROM a";
        assert_eq!(statements(sql).len(), 1);
    }

    #[test]
    fn merge_branches_stay_whole() {
        let sql = "MERGE INTO t USING s ON t.id = s.id WHEN MATCHED THEN UPDATE SET t.a = s.a WHEN NOT MATCHED THEN INSERT (id) VALUES (s.id);";
        assert_eq!(statements(sql).len(), 1);
    }

    #[test]
    fn dotted_names() {
        let lexemes = lex("FROM [dw]..[Orders] o", &MsSql).unwrap();
        let (raw, next) = read_name(&lexemes, 1).unwrap();
        assert_eq!(raw, "[dw]..[Orders]");
        assert_eq!(lexemes[next].text, "o");
    }
}
