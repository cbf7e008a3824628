//! The primed stage (spec.md §4.5): combines a [`BoundStatement`] with the
//! argument values supplied for one particular call into the final SQL text
//! plus the ordered plan a driver needs (one `?` parameter per input slot, one
//! [`Locator`] per output column). Unlike binding, priming happens on every
//! call, because bulk-insert row counts, whole-sequence arity, and
//! omit-empty suppression are all only known once the arguments are in hand.

use crate::bind::{BoundInput, BoundNode, BoundStatement};
use crate::error::Error;
use crate::locator::{Arguments, Locator, ParamValues};
use crate::types::value::Value;

#[derive(Debug, Clone)]
pub struct PrimedStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub output_columns: Vec<Locator>,
}

pub fn prime(bound: &BoundStatement, args: &Arguments<'_>) -> Result<PrimedStatement, Error> {
    let mut sql = String::new();
    let mut params = Vec::new();
    let mut output_columns = Vec::new();
    // spec.md §4.4/§8 scenario 2: every rendered output column gets an
    // opaque `_sqlair_<N>` alias, numbered across the whole statement, so
    // scanning can tolerate joined tables with identically named columns.
    let mut next_alias = 0usize;

    for node in &bound.nodes {
        match node {
            BoundNode::PassThrough(text) => sql.push_str(text),
            BoundNode::Output(output) => {
                for (idx, col) in output.columns.iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(", ");
                    }
                    sql.push_str(&col.sql);
                    sql.push_str(" AS _sqlair_");
                    sql.push_str(&next_alias.to_string());
                    next_alias += 1;
                    output_columns.push(col.locator);
                }
            }
            BoundNode::Input(input) => render_input(input, args, &mut sql, &mut params)?,
        }
    }

    Ok(PrimedStatement { sql, params, output_columns })
}

fn render_input(
    input: &BoundInput,
    args: &Arguments<'_>,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<(), Error> {
    match input {
        BoundInput::Member(locator) => {
            match locator.locate_params(args)? {
                ParamValues::Scalar(v) => {
                    sql.push('?');
                    params.push(v);
                }
                ParamValues::Vector(_) => {
                    // A bulk ("Many") argument was bound to a single scalar
                    // member reference outside an insert-values expression:
                    // there is no SQL shape for "one placeholder, many rows"
                    // here, so this is a caller mistake at the value layer.
                    return Err(Error::Value(crate::error::ValueError::WrongOutputKind {
                        type_name: locator.type_name().to_string(),
                    }));
                }
            }
            Ok(())
        }
        BoundInput::WholeSequence(locator) => {
            let values = match locator.locate_params(args)? {
                ParamValues::Vector(v) => v,
                ParamValues::Scalar(v) => vec![v],
            };
            if values.is_empty() {
                // `IN ()` is rejected by most dialects; `IN (NULL)` matches
                // nothing instead, which is the intended no-match behaviour.
                sql.push_str("NULL");
            } else {
                for (idx, v) in values.into_iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(v);
                }
            }
            Ok(())
        }
        BoundInput::InsertValues(biv) => render_insert_values(biv, args, sql, params),
    }
}

fn render_insert_values(
    biv: &crate::bind::BoundInsertValues,
    args: &Arguments<'_>,
    sql: &mut String,
    params: &mut Vec<Value>,
) -> Result<(), Error> {
    let per_locator: Vec<ParamValues> =
        biv.locators.iter().map(|l| l.locate_params(args)).collect::<Result<_, _>>()?;

    let row_count = per_locator
        .iter()
        .filter_map(|pv| match pv {
            ParamValues::Vector(v) => Some(v.len()),
            ParamValues::Scalar(_) => None,
        })
        .try_fold(None::<usize>, |acc, len| match acc {
            None => Ok(Some(len)),
            Some(prev) if prev == len => Ok(Some(prev)),
            Some(_) => Err(Error::Value(crate::error::ValueError::AmbiguousBulkInsert {
                type_name: "<insert-values>".to_string(),
            })),
        })?;

    match row_count {
        Some(rows) => {
            sql.push('(');
            sql.push_str(&biv.columns.join(", "));
            sql.push_str(") VALUES ");
            for row in 0..rows {
                if row > 0 {
                    sql.push_str(", ");
                }
                sql.push('(');
                for (idx, pv) in per_locator.iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    let v = match pv {
                        ParamValues::Vector(vs) => vs[row].clone(),
                        ParamValues::Scalar(v) => v.clone(),
                    };
                    params.push(v);
                }
                sql.push(')');
            }
        }
        None => {
            // Single row: omit-empty members drop both their column and
            // their placeholder (spec.md §4.5), a suppression that only
            // applies outside bulk mode.
            let mut kept_columns = Vec::new();
            let mut kept_values = Vec::new();
            for (idx, (locator, pv)) in biv.locators.iter().zip(per_locator.into_iter()).enumerate() {
                if locator.is_omitted_scalar(args)? {
                    continue;
                }
                kept_columns.push(biv.columns[idx].clone());
                match pv {
                    ParamValues::Scalar(v) => kept_values.push(v),
                    ParamValues::Vector(mut vs) => kept_values.push(vs.pop().unwrap_or(Value::Null)),
                }
            }
            sql.push('(');
            sql.push_str(&kept_columns.join(", "));
            sql.push_str(") VALUES (");
            for (idx, v) in kept_values.into_iter().enumerate() {
                if idx > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                params.push(v);
            }
            sql.push(')');
        }
    }

    Ok(())
}
