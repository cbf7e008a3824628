//! Low-level, backtracking-friendly scanning helpers shared by the output-
//! and input-expression recognizers. Every `try_*` function takes a byte
//! position and either returns the position just past what it matched, or
//! `None`/`Err` without having committed any node to the AST — the caller
//! (`parser::parse`) decides what to do with a `None`.

use crate::error::ParseError;

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn char_at(src: &str, pos: usize) -> Option<char> {
    src[pos..].chars().next()
}

pub fn skip_ws(src: &str, mut pos: usize) -> usize {
    while let Some(c) = char_at(src, pos) {
        if c.is_whitespace() {
            pos += c.len_utf8();
        } else {
            break;
        }
    }
    pos
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn try_identifier(src: &str, pos: usize) -> Option<(String, usize)> {
    let mut chars = src[pos..].char_indices();
    let (_, first) = chars.next()?;
    if !is_ident_start(first) {
        return None;
    }
    let mut end = pos + first.len_utf8();
    for (idx, c) in chars {
        if is_ident_continue(c) {
            end = pos + idx + c.len_utf8();
        } else {
            break;
        }
    }
    Some((src[pos..end].to_string(), end))
}

/// Case-insensitive keyword match, requiring the keyword not be a prefix of
/// a longer identifier (e.g. `AS` must not match inside `ASC`).
pub fn try_keyword(src: &str, pos: usize, keyword: &str) -> Option<usize> {
    let end = pos + keyword.len();
    let candidate = src.get(pos..end)?;
    if !candidate.eq_ignore_ascii_case(keyword) {
        return None;
    }
    if let Some(next) = char_at(src, end) {
        if is_ident_continue(next) {
            return None;
        }
    }
    Some(end)
}

pub fn try_char(src: &str, pos: usize, expected: char) -> Option<usize> {
    let c = char_at(src, pos)?;
    if c == expected {
        Some(pos + c.len_utf8())
    } else {
        None
    }
}

/// A qualified name: `ident` optionally followed by `.` then (`ident` or
/// `*`). Returns `(qualifier, name_or_star, end)`.
pub fn try_qualified_name(src: &str, pos: usize) -> Option<(Option<String>, ColumnTail, usize)> {
    let (first, after_first) = try_identifier(src, pos)?;
    match try_char(src, after_first, '.') {
        Some(after_dot) => {
            if let Some(after_star) = try_char(src, after_dot, '*') {
                Some((Some(first), ColumnTail::Star, after_star))
            } else {
                let (name, end) = try_identifier(src, after_dot)?;
                Some((Some(first), ColumnTail::Named(name), end))
            }
        }
        None => Some((None, ColumnTail::Named(first), after_first)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnTail {
    Named(String),
    Star,
}

/// `Type.col` or `Type.*` — a *required* dot, unlike `try_qualified_name`
/// (used for source columns, where the dot is optional).
pub fn try_type_column_ref(src: &str, pos: usize) -> Option<(String, ColumnTail, usize)> {
    let (type_name, after_type) = try_identifier(src, pos)?;
    let after_dot = try_char(src, after_type, '.')?;
    if let Some(after_star) = try_char(src, after_dot, '*') {
        Some((type_name, ColumnTail::Star, after_star))
    } else {
        let (col, end) = try_identifier(src, after_dot)?;
        Some((type_name, ColumnTail::Named(col), end))
    }
}

/// Consume a `'...'` or `"..."` string literal starting at `pos`, if
/// present. Returns the position just past the closing quote.
pub fn try_string_literal(src: &str, pos: usize) -> Result<Option<usize>, ParseError> {
    let quote = match char_at(src, pos) {
        Some(c @ ('\'' | '"')) => c,
        _ => return Ok(None),
    };
    let mut idx = pos + quote.len_utf8();
    loop {
        match char_at(src, idx) {
            None => {
                return Err(ParseError {
                    position: pos,
                    message: "unterminated string literal".to_string(),
                })
            }
            Some(c) if c == quote => return Ok(Some(idx + c.len_utf8())),
            Some(c) => idx += c.len_utf8(),
        }
    }
}

pub fn try_line_comment(src: &str, pos: usize) -> Option<usize> {
    if src[pos..].starts_with("--") {
        let end = src[pos..].find('\n').map(|i| pos + i).unwrap_or(src.len());
        Some(end)
    } else {
        None
    }
}

pub fn try_block_comment(src: &str, pos: usize) -> Result<Option<usize>, ParseError> {
    if !src[pos..].starts_with("/*") {
        return Ok(None);
    }
    match src[pos + 2..].find("*/") {
        Some(rel) => Ok(Some(pos + 2 + rel + 2)),
        None => Err(ParseError { position: pos, message: "unterminated block comment".to_string() }),
    }
}
