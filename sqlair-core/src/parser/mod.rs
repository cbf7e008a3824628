//! The parser (spec.md §4.3): a single left-to-right scan that recognizes
//! string literals and comments (kept verbatim), and the five flavours of
//! I/O expression, emitting pass-through segments for everything else.

pub mod ast;
mod scan;

use crate::error::ParseError;
use ast::{
    Ast, ColumnRef, InsertColumns, InsertRef, InsertValuesExpr, InputExpr, Node, NodeKind,
    OutputExpr, SourceColumn, TypeColumnRef,
};
use scan::ColumnTail;

pub fn parse(src: &str) -> Result<Ast, ParseError> {
    let mut nodes = Vec::new();
    let mut pos = 0usize;
    let mut seg_start = 0usize;

    while pos < src.len() {
        if let Some(end) = scan::try_string_literal(src, pos)? {
            pos = end;
            continue;
        }
        if let Some(end) = scan::try_line_comment(src, pos) {
            pos = end;
            continue;
        }
        if let Some(end) = scan::try_block_comment(src, pos)? {
            pos = end;
            continue;
        }

        if let Some((expr, end)) = try_output_expr(src, pos)? {
            flush_pass_through(&mut nodes, src, seg_start, pos);
            nodes.push(Node { raw: src[pos..end].to_string(), kind: NodeKind::Output(expr) });
            pos = end;
            seg_start = pos;
            continue;
        }

        if let Some((expr, end)) = try_input_expr(src, pos)? {
            flush_pass_through(&mut nodes, src, seg_start, pos);
            nodes.push(Node { raw: src[pos..end].to_string(), kind: NodeKind::Input(expr) });
            pos = end;
            seg_start = pos;
            continue;
        }

        pos += scan::char_at(src, pos).map(|c| c.len_utf8()).unwrap_or(1);
    }

    flush_pass_through(&mut nodes, src, seg_start, src.len());
    Ok(Ast { nodes })
}

fn flush_pass_through(nodes: &mut Vec<Node>, src: &str, start: usize, end: usize) {
    if start < end {
        nodes.push(Node { raw: src[start..end].to_string(), kind: NodeKind::PassThrough });
    }
}

// ---------------------------------------------------------------------
// Output expressions
// ---------------------------------------------------------------------

fn try_output_expr(src: &str, pos: usize) -> Result<Option<(OutputExpr, usize)>, ParseError> {
    if let Some(result) = try_output_as_form(src, pos)? {
        return Ok(Some(result));
    }
    try_output_bare_form(src, pos)
}

/// `<source-list> AS &<target-list>`
fn try_output_as_form(src: &str, pos: usize) -> Result<Option<(OutputExpr, usize)>, ParseError> {
    let Some((sources, after_sources)) = try_source_list(src, pos) else {
        return Ok(None);
    };
    let after_ws = scan::skip_ws(src, after_sources);
    let Some(after_as) = scan::try_keyword(src, after_ws, "AS") else {
        return Ok(None);
    };
    let after_ws2 = scan::skip_ws(src, after_as);
    let Some(after_amp) = scan::try_char(src, after_ws2, '&') else {
        return Ok(None);
    };

    let (targets, end) = parse_target_list(src, after_amp)?;
    validate_star_targets(&targets, pos)?;
    if !has_star(&targets) && sources.len() != targets.len() {
        return Err(ParseError {
            position: pos,
            message: format!(
                "{} source column(s) but {} target(s)",
                sources.len(),
                targets.len()
            ),
        });
    }
    Ok(Some((OutputExpr { sources, targets }, end)))
}

/// `&Type.col`, `&Type.*`, `&(Type.col1, Type.col2)` — requires the `&` be
/// preceded by whitespace or be at the start of the source (spec.md §4.3).
fn try_output_bare_form(src: &str, pos: usize) -> Result<Option<(OutputExpr, usize)>, ParseError> {
    if scan::char_at(src, pos) != Some('&') {
        return Ok(None);
    }
    if pos > 0 {
        let prev = src[..pos].chars().next_back().unwrap();
        if !prev.is_whitespace() {
            return Ok(None);
        }
    }

    let after_amp = pos + 1;
    match scan::char_at(src, after_amp) {
        Some(c) if scan::is_ident_start(c) || c == '(' => {}
        _ => return Ok(None), // bare `&` not followed by an identifier: pass-through
    }

    let (targets, end) = parse_target_list(src, after_amp)?;
    validate_star_targets(&targets, pos)?;
    Ok(Some((OutputExpr { sources: Vec::new(), targets }, end)))
}

fn has_star(targets: &[TypeColumnRef]) -> bool {
    targets.iter().any(|t| matches!(t.column, ColumnRef::Star))
}

fn validate_star_targets(targets: &[TypeColumnRef], pos: usize) -> Result<(), ParseError> {
    let star_count = targets.iter().filter(|t| matches!(t.column, ColumnRef::Star)).count();
    if star_count > 1 {
        return Err(ParseError { position: pos, message: "multiple stars in target list".into() });
    }
    if star_count == 1 && targets.len() > 1 {
        return Err(ParseError {
            position: pos,
            message: "a star target must be the only element of its target list".into(),
        });
    }
    Ok(())
}

/// `Type.col` / `Type.*` / `(Type.col1, Type.col2, ...)`.
fn parse_target_list(src: &str, pos: usize) -> Result<(Vec<TypeColumnRef>, usize), ParseError> {
    if scan::try_char(src, pos, '(').is_some() {
        let mut idx = pos + 1;
        let mut targets = Vec::new();
        loop {
            idx = scan::skip_ws(src, idx);
            let (type_name, tail, after) = scan::try_type_column_ref(src, idx).ok_or_else(|| {
                ParseError { position: idx, message: "expected Type.col or Type.* in target list".into() }
            })?;
            targets.push(TypeColumnRef { type_name, column: tail_to_ref(tail) });
            idx = scan::skip_ws(src, after);
            match scan::char_at(src, idx) {
                Some(',') => {
                    idx += 1;
                    continue;
                }
                Some(')') => {
                    idx += 1;
                    break;
                }
                _ => {
                    return Err(ParseError {
                        position: idx,
                        message: "missing closing bracket in target list".into(),
                    })
                }
            }
        }
        Ok((targets, idx))
    } else {
        let (type_name, tail, end) = scan::try_type_column_ref(src, pos).ok_or_else(|| ParseError {
            position: pos,
            message: "malformed output expression: expected Type.col or Type.*".into(),
        })?;
        Ok((vec![TypeColumnRef { type_name, column: tail_to_ref(tail) }], end))
    }
}

fn tail_to_ref(tail: ColumnTail) -> ColumnRef {
    match tail {
        ColumnTail::Named(n) => ColumnRef::Named(n),
        ColumnTail::Star => ColumnRef::Star,
    }
}

/// `col`, `(col[, col]*)`, or `t.*`.
fn try_source_list(src: &str, pos: usize) -> Option<(Vec<SourceColumn>, usize)> {
    if scan::try_char(src, pos, '(').is_some() {
        let mut idx = pos + 1;
        let mut cols = Vec::new();
        loop {
            idx = scan::skip_ws(src, idx);
            let (qualifier, tail, after) = scan::try_qualified_name(src, idx)?;
            cols.push(match tail {
                ColumnTail::Named(name) => SourceColumn::Named { qualifier, name },
                ColumnTail::Star => SourceColumn::QualifiedStar { qualifier: qualifier? },
            });
            idx = scan::skip_ws(src, after);
            match scan::char_at(src, idx) {
                Some(',') => {
                    idx += 1;
                    continue;
                }
                Some(')') => {
                    idx += 1;
                    break;
                }
                _ => return None,
            }
        }
        Some((cols, idx))
    } else {
        let (qualifier, tail, end) = scan::try_qualified_name(src, pos)?;
        let col = match tail {
            ColumnTail::Named(name) => SourceColumn::Named { qualifier, name },
            ColumnTail::Star => SourceColumn::QualifiedStar { qualifier: qualifier? },
        };
        Some((vec![col], end))
    }
}

// ---------------------------------------------------------------------
// Input expressions
// ---------------------------------------------------------------------

fn try_input_expr(src: &str, pos: usize) -> Result<Option<(InputExpr, usize)>, ParseError> {
    match scan::char_at(src, pos) {
        Some('(') => try_insert_values(src, pos),
        Some('$') => try_dollar_expr(src, pos),
        _ => Ok(None),
    }
}

fn try_dollar_expr(src: &str, pos: usize) -> Result<Option<(InputExpr, usize)>, ParseError> {
    let after_dollar = pos + 1;
    let Some(c) = scan::char_at(src, after_dollar) else { return Ok(None) };
    if !scan::is_ident_start(c) {
        return Ok(None); // bare `$`: pass-through
    }

    let (type_name, after_type) = scan::try_identifier(src, after_dollar).expect("checked above");

    // `$Type[:]`
    if let Some(after_bracket) = scan::try_char(src, after_type, '[') {
        let after_colon = scan::try_char(src, after_bracket, ':').ok_or_else(|| ParseError {
            position: pos,
            message: "malformed whole-sequence expression: expected `[:]`".into(),
        })?;
        let end = scan::try_char(src, after_colon, ']').ok_or_else(|| ParseError {
            position: pos,
            message: "malformed whole-sequence expression: missing closing `]`".into(),
        })?;
        return Ok(Some((InputExpr::WholeSequence { type_name }, end)));
    }

    let after_dot = scan::try_char(src, after_type, '.').ok_or_else(|| ParseError {
        position: pos,
        message: "malformed input expression: expected `.` or `[:]` after type name".into(),
    })?;

    if scan::try_char(src, after_dot, '*').is_some() {
        return Err(ParseError {
            position: pos,
            message: "`$Type.*` is only allowed inside an insert-values expression".into(),
        });
    }

    let (column, end) = scan::try_identifier(src, after_dot).ok_or_else(|| ParseError {
        position: after_dot,
        message: "invalid identifier after `.`".into(),
    })?;

    Ok(Some((InputExpr::Member { type_name, column }, end)))
}

/// `(col-list-or-star) VALUES (input-ref-list)`
fn try_insert_values(src: &str, pos: usize) -> Result<Option<(InputExpr, usize)>, ParseError> {
    let mut idx = pos + 1;
    idx = scan::skip_ws(src, idx);

    let columns = if scan::try_char(src, idx, '*').is_some() {
        idx += 1;
        InsertColumns::Star
    } else {
        let mut cols = Vec::new();
        loop {
            idx = scan::skip_ws(src, idx);
            let Some((name, after)) = scan::try_identifier(src, idx) else {
                return Ok(None);
            };
            cols.push(name);
            idx = scan::skip_ws(src, after);
            match scan::char_at(src, idx) {
                Some(',') => {
                    idx += 1;
                    continue;
                }
                Some(')') => break,
                _ => return Ok(None),
            }
        }
        InsertColumns::Explicit(cols)
    };

    idx = match scan::try_char(src, idx, ')') {
        Some(after) => after,
        None => return Ok(None),
    };

    idx = scan::skip_ws(src, idx);
    let Some(after_values) = scan::try_keyword(src, idx, "VALUES") else {
        return Ok(None);
    };
    idx = scan::skip_ws(src, after_values);
    let Some(after_open) = scan::try_char(src, idx, '(') else {
        return Err(ParseError {
            position: idx,
            message: "expected `(` after VALUES in insert-values expression".into(),
        });
    };
    idx = after_open;

    let mut refs = Vec::new();
    loop {
        idx = scan::skip_ws(src, idx);
        let Some('$') = scan::char_at(src, idx) else {
            return Err(ParseError {
                position: idx,
                message: "expected `$Type.col` or `$Type.*` in insert-values list".into(),
            });
        };
        let (type_name, tail, after) = scan::try_type_column_ref(src, idx + 1).ok_or_else(|| {
            ParseError { position: idx, message: "malformed input reference in insert-values list".into() }
        })?;
        refs.push(match tail {
            ColumnTail::Named(column) => InsertRef::Member { type_name, column },
            ColumnTail::Star => InsertRef::Star { type_name },
        });
        idx = scan::skip_ws(src, after);
        match scan::char_at(src, idx) {
            Some(',') => {
                idx += 1;
                continue;
            }
            Some(')') => {
                idx += 1;
                break;
            }
            _ => {
                return Err(ParseError {
                    position: idx,
                    message: "missing closing bracket in insert-values list".into(),
                })
            }
        }
    }

    // Several record-stars may appear in one insert-values list (each
    // contributes its own tagged columns); only a *mapping*-star is capped
    // at one (spec.md §4.3). Which refs are record- vs mapping-typed isn't
    // known until the type-bound stage has a catalogue, so that cap is
    // enforced in `bind_explicit_insert_columns`, not here.

    Ok(Some((InputExpr::InsertValues(InsertValuesExpr { columns, refs }), idx)))
}
