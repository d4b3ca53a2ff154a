//! Read-only statement guard
//!
//! Generated queries come from an untrusted text model. Before any store
//! touches a connection, the text must be a single `SELECT`/`WITH`
//! statement free of data-modifying, DDL or administrative keywords.
//! Anything else is rejected outright, never rewritten.

use crate::{Result, StoreError};

const LEADING_KEYWORDS: &[&str] = &["SELECT", "WITH"];

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "UPSERT", "MERGE", "INTO", "DROP", "ALTER", "CREATE",
    "TRUNCATE", "RENAME", "ATTACH", "DETACH", "EXCHANGE", "UNDROP", "OPTIMIZE", "GRANT",
    "REVOKE", "SYSTEM", "KILL", "COPY", "CALL", "EXEC", "EXECUTE", "PREPARE", "DEALLOCATE",
    "SET", "RESET", "LOCK", "VACUUM", "ANALYZE", "REINDEX", "CLUSTER", "REFRESH", "COMMENT",
    "LISTEN", "NOTIFY", "DISCARD", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "DO",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    LineComment,
    BlockComment,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
}

/// Reject anything that is not one read-only retrieval statement
pub fn ensure_read_only(sql: &str) -> Result<()> {
    let skeleton = strip_literals_and_comments(sql)?;

    let statement = skeleton.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if statement.is_empty() {
        return Err(StoreError::Rejected("empty statement".into()));
    }
    if statement.contains(';') {
        return Err(StoreError::Rejected("multiple statements are not allowed".into()));
    }

    let words = keywords(statement);
    match words.first() {
        Some(first) if LEADING_KEYWORDS.contains(&first.as_str()) => {}
        Some(first) => {
            return Err(StoreError::Rejected(format!(
                "only SELECT or WITH statements are allowed, got {}",
                first
            )))
        }
        None => return Err(StoreError::Rejected("statement has no keywords".into())),
    }

    if let Some(word) = words.iter().find(|w| FORBIDDEN_KEYWORDS.contains(&w.as_str())) {
        return Err(StoreError::Rejected(format!("keyword {} is not allowed", word)));
    }

    Ok(())
}

/// Strip trailing semicolons so the statement can be wrapped or suffixed
pub fn trim_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Blank out comments and quoted text so keyword scanning only sees code
fn strip_literals_and_comments(sql: &str) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut state = LexState::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            LexState::Code => match c {
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = LexState::LineComment;
                    out.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = LexState::BlockComment;
                    out.push(' ');
                }
                '\'' => {
                    state = LexState::SingleQuoted;
                    out.push(' ');
                }
                '"' => {
                    state = LexState::DoubleQuoted;
                    out.push(' ');
                }
                '`' => {
                    state = LexState::Backticked;
                    out.push(' ');
                }
                // A line comment in ClickHouse, an operator in PostgreSQL
                '#' => {
                    return Err(StoreError::Rejected(
                        "`#` is ambiguous between SQL dialects".into(),
                    ));
                }
                '$' if !continues_identifier(&out) && opens_dollar_quote(chars.clone()) => {
                    return Err(StoreError::Rejected("dollar-quoted text is not allowed".into()));
                }
                _ => out.push(c),
            },
            LexState::LineComment => {
                if c == '\n' {
                    state = LexState::Code;
                    out.push('\n');
                }
            }
            LexState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = LexState::Code;
                }
            }
            LexState::SingleQuoted => match c {
                // PostgreSQL and ClickHouse disagree on backslash escapes;
                // refuse to guess where such a literal ends.
                '\\' if chars.peek() == Some(&'\'') => {
                    return Err(StoreError::Rejected(
                        "backslash-escaped quote in string literal".into(),
                    ));
                }
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                }
                '\'' => state = LexState::Code,
                _ => {}
            },
            LexState::DoubleQuoted => match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                }
                '"' => state = LexState::Code,
                _ => {}
            },
            LexState::Backticked => {
                if c == '`' {
                    state = LexState::Code;
                }
            }
        }
    }

    match state {
        LexState::Code | LexState::LineComment => Ok(out),
        LexState::BlockComment => Err(StoreError::Rejected("unterminated block comment".into())),
        _ => Err(StoreError::Rejected("unterminated quoted text".into())),
    }
}

fn continues_identifier(code: &str) -> bool {
    code.chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// `$$` or `$tag$`, given the characters after the opening `$`.
/// Positional parameters such as `$1` never qualify.
fn opens_dollar_quote(rest: impl Iterator<Item = char>) -> bool {
    let mut first = true;
    for c in rest {
        match c {
            '$' => return true,
            c if c.is_ascii_digit() && first => return false,
            c if c.is_alphanumeric() || c == '_' => first = false,
            _ => return false,
        }
    }
    false
}

fn keywords(code: &str) -> Vec<String> {
    code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty() && !w.starts_with(|c: char| c.is_ascii_digit()))
        .map(|w| w.to_ascii_uppercase())
        .collect()
}
