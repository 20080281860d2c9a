//! INSERT/UPDATE rendering and named-parameter expansion.
//!
//! Statements are rendered with `:name` placeholders so the text is independent of the
//! backend; [`expand_named`] rewrites them into the active dialect's positional form right
//! before execution.

use agentdb_schema::Value;
use std::collections::BTreeMap;

use crate::db::Dialect;
use crate::error::{AgentDbError, Result};

/// `INSERT INTO t (a, b) VALUES (:a, :b)` with an optional `RETURNING` column.
pub fn build_insert(columns: &[&str], table: &str, returning: Option<&str>) -> String {
    let placeholders = columns
        .iter()
        .map(|c| format!(":{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    );
    push_returning(&mut sql, returning);
    sql
}

/// `UPDATE t SET a = :a, b = :b WHERE <clause>` with an optional `RETURNING` column.
pub fn build_update(
    columns: &[&str],
    table: &str,
    where_clause: &str,
    returning: Option<&str>,
) -> String {
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = :{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("UPDATE {table} SET {assignments}");
    if !where_clause.trim().is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(where_clause.trim());
    }
    push_returning(&mut sql, returning);
    sql
}

fn push_returning(sql: &mut String, returning: Option<&str>) {
    if let Some(column) = returning.map(str::trim).filter(|c| !c.is_empty()) {
        sql.push_str(" RETURNING ");
        sql.push_str(column);
    }
}

/// Rewrites `:name` placeholders into positional ones and orders the bound values.
///
/// Quoted literals, quoted identifiers, comments and `::type` casts are left untouched. A
/// name that is used twice binds twice. Decimal values get the dialect's numeric cast since
/// they are bound as text.
pub fn expand_named(
    sql: &str,
    params: &BTreeMap<String, Value>,
    dialect: Dialect,
) -> Result<(String, Vec<Value>)> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = opaque_span(sql, i) {
            out.push_str(&sql[i..end]);
            i = end;
            continue;
        }
        if bytes[i] == b':' {
            match bytes.get(i + 1) {
                Some(b':') => {
                    out.push_str("::");
                    i += 2;
                    continue;
                }
                Some(&n) if is_ident_start(n) => {
                    let start = i + 1;
                    let end = ident_end(bytes, start);
                    let name = &sql[start..end];
                    let value = params
                        .get(name)
                        .ok_or_else(|| AgentDbError::MissingParam(name.to_string()))?;
                    values.push(value.clone());
                    out.push_str(&dialect.placeholder(values.len()));
                    if matches!(value, Value::Decimal(_)) {
                        out.push_str(dialect.decimal_cast());
                    }
                    i = end;
                    continue;
                }
                _ => {}
            }
        }
        let next = i + sql[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&sql[i..next]);
        i = next;
    }

    Ok((out, values))
}

/// Splits a migration script into statements on `;`, dropping empty and comment-only pieces.
///
/// Semicolons inside quotes, comments, dollar-quoted bodies and `BEGIN ... END` blocks
/// (trigger bodies) do not end a statement.
pub fn split_statements(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut has_code = false;
    let mut depth = 0usize;

    while i < bytes.len() {
        if let Some(end) = opaque_span(sql, i) {
            if !matches!(bytes[i], b'-' | b'/') {
                has_code = true;
            }
            i = end;
            continue;
        }
        let b = bytes[i];
        if b == b';' && depth == 0 {
            push_statement(&mut statements, &sql[start..i], has_code);
            has_code = false;
            i += 1;
            start = i;
            continue;
        }
        if is_ident_start(b) && (i == 0 || !is_ident(bytes[i - 1])) {
            let end = ident_end(bytes, i);
            let word = &sql[i..end];
            // A leading BEGIN opens a transaction, not a block.
            if has_code && (word.eq_ignore_ascii_case("BEGIN") || word.eq_ignore_ascii_case("CASE")) {
                depth += 1;
            } else if word.eq_ignore_ascii_case("END") {
                depth = depth.saturating_sub(1);
            }
            has_code = true;
            i = end;
            continue;
        }
        if !b.is_ascii_whitespace() {
            has_code = true;
        }
        i += 1;
    }
    push_statement(&mut statements, &sql[start..], has_code);
    statements
}

fn push_statement(statements: &mut Vec<String>, piece: &str, has_code: bool) {
    if has_code {
        statements.push(piece.trim().to_string());
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    start + bytes[start..].iter().take_while(|&&b| is_ident(b)).count()
}

/// End of the quoted literal, comment or dollar-quoted body starting at byte `i`, if any.
///
/// Unterminated spans run to the end of the input.
fn opaque_span(sql: &str, i: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    match bytes[i] {
        q @ (b'\'' | b'"' | b'`') => {
            let mut j = i + 1;
            while j < bytes.len() {
                if bytes[j] == q {
                    // doubled quote
                    if bytes.get(j + 1) == Some(&q) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(bytes.len())
        }
        b'-' if bytes.get(i + 1) == Some(&b'-') => {
            Some(sql[i..].find('\n').map_or(bytes.len(), |n| i + n))
        }
        b'/' if bytes.get(i + 1) == Some(&b'*') => {
            Some(sql[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2))
        }
        b'$' if i == 0 || !is_ident(bytes[i - 1]) => {
            let tag_end = ident_end(bytes, i + 1);
            if bytes.get(tag_end) != Some(&b'$') || bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                return None;
            }
            let tag = &sql[i..=tag_end];
            let body = tag_end + 1;
            Some(sql[body..].find(tag).map_or(bytes.len(), |n| body + n + tag.len()))
        }
        _ => None,
    }
}
