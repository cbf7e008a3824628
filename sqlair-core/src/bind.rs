//! The type-bound stage (spec.md §4.4): resolves a parsed [`Ast`] against a
//! [`Catalogue`], turning every I/O node into a [`Locator`]-carrying bound
//! node. Everything that can be decided without knowing the call-time
//! argument values — which member a tag names, what the expanded column list
//! of a `*` is, whether a target is duplicated — is decided here, once per
//! logical statement; the primed stage (spec.md §4.5) only has to deal with
//! argument-shape-dependent rendering (bulk inserts, whole-sequence arity).

use std::any::TypeId;

use crate::error::BindError;
use crate::locator::Locator;
use crate::parser::ast::{
    Ast, ColumnRef, InputExpr, InsertColumns, InsertRef, NodeKind, OutputExpr, SourceColumn,
};
use crate::types::{Catalogue, CatalogueLookup, InsertStarSource, MappingDescriptor, MemberDescriptor, RecordDescriptor};

#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub nodes: Vec<BoundNode>,
}

#[derive(Debug, Clone)]
pub enum BoundNode {
    PassThrough(String),
    Input(BoundInput),
    Output(BoundOutput),
}

#[derive(Debug, Clone)]
pub enum BoundInput {
    Member(Locator),
    WholeSequence(Locator),
    InsertValues(BoundInsertValues),
}

#[derive(Debug, Clone)]
pub struct BoundInsertValues {
    pub columns: Vec<String>,
    pub locators: Vec<Locator>,
}

#[derive(Debug, Clone)]
pub struct BoundOutputColumn {
    /// The text to splice into the rendered `SELECT` list for this column
    /// (spec.md §4.5); for the bare `&Type.col`/`&Type.*` forms this is
    /// simply the member's tag, since no source column was written by hand.
    pub sql: String,
    pub locator: Locator,
}

#[derive(Debug, Clone)]
pub struct BoundOutput {
    pub columns: Vec<BoundOutputColumn>,
}

pub fn bind(ast: &Ast, catalogue: &Catalogue) -> Result<BoundStatement, BindError> {
    let mut nodes = Vec::with_capacity(ast.nodes.len());
    for node in &ast.nodes {
        let bound = match &node.kind {
            NodeKind::PassThrough => BoundNode::PassThrough(node.raw.clone()),
            NodeKind::Input(expr) => BoundNode::Input(bind_input(expr, catalogue)?),
            NodeKind::Output(expr) => BoundNode::Output(bind_output(expr, catalogue)?),
        };
        nodes.push(bound);
    }
    Ok(BoundStatement { nodes })
}

fn lookup_to_locator(lookup: CatalogueLookup) -> Locator {
    match lookup {
        CatalogueLookup::RecordMember { type_id, type_name, member } => {
            Locator::RecordField { type_id, type_name, member }
        }
        CatalogueLookup::MapKey { type_id, type_name, mapping, key } => {
            Locator::MapKey { type_id, type_name, mapping, key }
        }
        CatalogueLookup::WholeSequence { type_id, type_name, sequence } => {
            Locator::WholeSequence { type_id, type_name, sequence }
        }
    }
}

fn locator_target_key(locator: &Locator) -> (TypeId, &'static str) {
    match locator {
        Locator::RecordField { type_id, member, .. } => (*type_id, member.tag),
        Locator::MapKey { type_id, key, .. } => (*type_id, key),
        Locator::WholeSequence { type_id, .. } => (*type_id, "*"),
    }
}

fn check_no_duplicate_targets(columns: &[BoundOutputColumn]) -> Result<(), BindError> {
    let mut seen = std::collections::HashSet::new();
    for c in columns {
        let key = locator_target_key(&c.locator);
        if !seen.insert(key) {
            return Err(BindError::DuplicateTarget { column: c.sql.clone() });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------

fn bind_input(expr: &InputExpr, catalogue: &Catalogue) -> Result<BoundInput, BindError> {
    match expr {
        InputExpr::Member { type_name, column } => {
            let lookup = catalogue.member(type_name, column)?;
            Ok(BoundInput::Member(lookup_to_locator(lookup)))
        }
        InputExpr::WholeSequence { type_name } => {
            let lookup = catalogue.slice(type_name)?;
            Ok(BoundInput::WholeSequence(lookup_to_locator(lookup)))
        }
        InputExpr::InsertValues(iv) => {
            Ok(BoundInput::InsertValues(bind_insert_values(iv, catalogue)?))
        }
    }
}

fn bind_insert_values(
    iv: &crate::parser::ast::InsertValuesExpr,
    catalogue: &Catalogue,
) -> Result<BoundInsertValues, BindError> {
    match &iv.columns {
        InsertColumns::Star => {
            if iv.refs.len() != 1 {
                return Err(BindError::LengthMismatch { sources: 1, targets: iv.refs.len() });
            }
            match &iv.refs[0] {
                InsertRef::Star { type_name } => match catalogue.insert_star(type_name)? {
                    InsertStarSource::Record(type_id, record) => {
                        let columns = record.members.iter().map(|m| m.tag.to_string()).collect();
                        let locators = record
                            .members
                            .iter()
                            .map(|m| Locator::RecordField { type_id, type_name: record.type_name, member: m })
                            .collect();
                        Ok(BoundInsertValues { columns, locators })
                    }
                    // `(*)` derives the column list entirely from record-star
                    // tags; a map's keys aren't known until call time, so a
                    // lone map-star has no column list to catch (spec.md
                    // §4.3: "a map-star target must be preceded by an
                    // explicit column list").
                    InsertStarSource::Mapping(..) => Err(BindError::MapStarWithoutExplicitColumns {
                        type_name: type_name.clone(),
                    }),
                },
                InsertRef::Member { type_name, .. } => {
                    Err(BindError::StarOnNonRecord { type_name: type_name.clone() })
                }
            }
        }
        InsertColumns::Explicit(names) => bind_explicit_insert_columns(names, &iv.refs, catalogue),
    }
}

fn bind_explicit_insert_columns(
    names: &[String],
    refs: &[InsertRef],
    catalogue: &Catalogue,
) -> Result<BoundInsertValues, BindError> {
    let mut locators: Vec<Option<Locator>> = vec![None; names.len()];
    let mut star_records: Vec<(TypeId, &'static RecordDescriptor)> = Vec::new();
    let mut map_star: Option<(TypeId, &'static MappingDescriptor)> = None;

    for r in refs {
        match r {
            InsertRef::Member { type_name, column } => {
                let idx = names.iter().position(|n| n == column).ok_or_else(|| {
                    BindError::UnknownTag { type_name: type_name.clone(), tag: column.clone() }
                })?;
                let lookup = catalogue.member(type_name, column)?;
                locators[idx] = Some(lookup_to_locator(lookup));
            }
            InsertRef::Star { type_name } => match catalogue.insert_star(type_name)? {
                InsertStarSource::Record(type_id, record) => star_records.push((type_id, record)),
                InsertStarSource::Mapping(type_id, mapping) => {
                    if map_star.is_some() {
                        return Err(BindError::MultipleMapStars { type_name: type_name.clone() });
                    }
                    map_star = Some((type_id, mapping));
                }
            },
        }
    }

    for (idx, name) in names.iter().enumerate() {
        if locators[idx].is_some() {
            continue;
        }
        let from_record = star_records.iter().find_map(|(type_id, record)| {
            record
                .member(name)
                .map(|member: &'static MemberDescriptor| Locator::RecordField {
                    type_id: *type_id,
                    type_name: record.type_name,
                    member,
                })
        });
        if let Some(locator) = from_record {
            locators[idx] = Some(locator);
            continue;
        }
        // A mapping-star "catches" whatever explicit column names no
        // record-star or member ref claimed (spec.md §4.3/§4.4).
        if let Some((type_id, mapping)) = map_star {
            let key: &'static str = Box::leak(name.clone().into_boxed_str());
            locators[idx] = Some(Locator::MapKey { type_id, type_name: mapping.type_name, mapping, key });
            continue;
        }
        return Err(BindError::UnknownTag {
            type_name: "<insert-values>".to_string(),
            tag: name.clone(),
        });
    }

    Ok(BoundInsertValues {
        columns: names.to_vec(),
        locators: locators.into_iter().map(|l| l.expect("filled above")).collect(),
    })
}

// ---------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------

fn bind_output(expr: &OutputExpr, catalogue: &Catalogue) -> Result<BoundOutput, BindError> {
    let output = if expr.sources.is_empty() {
        bind_bare_output(expr, catalogue)?
    } else {
        bind_as_output(expr, catalogue)?
    };
    check_no_duplicate_targets(&output.columns)?;
    Ok(output)
}

/// `&Type.col` / `&Type.*` / `&(Type.col1, Type.col2)`: no source list was
/// written, so the rendered SQL column list is synthesized from tags.
fn bind_bare_output(expr: &OutputExpr, catalogue: &Catalogue) -> Result<BoundOutput, BindError> {
    let mut columns = Vec::new();
    for target in &expr.targets {
        match &target.column {
            ColumnRef::Star => {
                let (type_id, record) = catalogue.all(&target.type_name)?;
                for member in record.members {
                    columns.push(BoundOutputColumn {
                        sql: member.tag.to_string(),
                        locator: Locator::RecordField { type_id, type_name: record.type_name, member },
                    });
                }
            }
            ColumnRef::Named(tag) => {
                let lookup = catalogue.member(&target.type_name, tag)?;
                columns.push(BoundOutputColumn { sql: tag.clone(), locator: lookup_to_locator(lookup) });
            }
        }
    }
    Ok(BoundOutput { columns })
}

/// `<source-list> AS &<target-list>`.
fn bind_as_output(expr: &OutputExpr, catalogue: &Catalogue) -> Result<BoundOutput, BindError> {
    let is_star_target = expr.targets.len() == 1 && matches!(expr.targets[0].column, ColumnRef::Star);

    if is_star_target {
        let target = &expr.targets[0];
        let (type_id, record) = catalogue.all(&target.type_name)?;
        let mut columns = Vec::new();
        for src in &expr.sources {
            match src {
                SourceColumn::Named { qualifier, name } => {
                    let member = record.member(name).ok_or_else(|| BindError::UnknownTag {
                        type_name: target.type_name.clone(),
                        tag: name.clone(),
                    })?;
                    let sql = match qualifier {
                        Some(q) => format!("{}.{}", q, name),
                        None => name.clone(),
                    };
                    columns.push(BoundOutputColumn {
                        sql,
                        locator: Locator::RecordField { type_id, type_name: record.type_name, member },
                    });
                }
                SourceColumn::QualifiedStar { qualifier } => {
                    for member in record.members {
                        columns.push(BoundOutputColumn {
                            sql: format!("{}.{}", qualifier, member.tag),
                            locator: Locator::RecordField { type_id, type_name: record.type_name, member },
                        });
                    }
                }
            }
        }
        return Ok(BoundOutput { columns });
    }

    if expr.sources.len() != expr.targets.len() {
        return Err(BindError::LengthMismatch { sources: expr.sources.len(), targets: expr.targets.len() });
    }

    let mut columns = Vec::with_capacity(expr.targets.len());
    for (src, target) in expr.sources.iter().zip(expr.targets.iter()) {
        let tag = match &target.column {
            ColumnRef::Named(n) => n.clone(),
            ColumnRef::Star => return Err(BindError::MultiStarTarget),
        };
        let lookup = catalogue.member(&target.type_name, &tag)?;
        let sql = match src {
            SourceColumn::Named { qualifier: Some(q), name } => format!("{}.{}", q, name),
            SourceColumn::Named { qualifier: None, name } => name.clone(),
            SourceColumn::QualifiedStar { qualifier } => format!("{}.*", qualifier),
        };
        columns.push(BoundOutputColumn { sql, locator: lookup_to_locator(lookup) });
    }
    Ok(BoundOutput { columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::types::value::Value;
    use crate::types::{SqlairType, TypeDescriptor};
    use std::any::Any;
    use std::sync::{Arc, OnceLock};

    struct Person {
        id: i64,
        name: String,
        team: String,
    }

    fn person_members() -> &'static [MemberDescriptor] {
        static CELL: OnceLock<Vec<MemberDescriptor>> = OnceLock::new();
        CELL.get_or_init(|| {
            vec![
                MemberDescriptor {
                    field_name: "id",
                    tag: "id",
                    omit_empty: false,
                    path: &[],
                    get: Arc::new(|s: &dyn Any| Value::Int(s.downcast_ref::<Person>().unwrap().id)),
                    is_zero: Arc::new(|s: &dyn Any| s.downcast_ref::<Person>().unwrap().id == 0),
                    set: Arc::new(|s: &mut dyn Any, v: Value| {
                        s.downcast_mut::<Person>().unwrap().id = match v {
                            Value::Int(i) => i,
                            Value::Null => 0,
                            _ => {
                                return Err(crate::error::ValueError::WrongOutputKind {
                                    type_name: "Person".into(),
                                });
                            }
                        };
                        Ok(())
                    }),
                },
                MemberDescriptor {
                    field_name: "name",
                    tag: "name",
                    omit_empty: false,
                    path: &[],
                    get: Arc::new(|s: &dyn Any| Value::Text(s.downcast_ref::<Person>().unwrap().name.clone())),
                    is_zero: Arc::new(|s: &dyn Any| s.downcast_ref::<Person>().unwrap().name.is_empty()),
                    set: Arc::new(|s: &mut dyn Any, v: Value| {
                        s.downcast_mut::<Person>().unwrap().name = match v {
                            Value::Text(t) => t,
                            Value::Null => String::new(),
                            _ => {
                                return Err(crate::error::ValueError::WrongOutputKind {
                                    type_name: "Person".into(),
                                });
                            }
                        };
                        Ok(())
                    }),
                },
                MemberDescriptor {
                    field_name: "team",
                    tag: "team",
                    omit_empty: true,
                    path: &[],
                    get: Arc::new(|s: &dyn Any| Value::Text(s.downcast_ref::<Person>().unwrap().team.clone())),
                    is_zero: Arc::new(|s: &dyn Any| s.downcast_ref::<Person>().unwrap().team.is_empty()),
                    set: Arc::new(|s: &mut dyn Any, v: Value| {
                        s.downcast_mut::<Person>().unwrap().team = match v {
                            Value::Text(t) => t,
                            Value::Null => String::new(),
                            _ => {
                                return Err(crate::error::ValueError::WrongOutputKind {
                                    type_name: "Person".into(),
                                });
                            }
                        };
                        Ok(())
                    }),
                },
            ]
        })
    }

    fn person_descriptor() -> &'static TypeDescriptor {
        static CELL: OnceLock<TypeDescriptor> = OnceLock::new();
        CELL.get_or_init(|| TypeDescriptor::Record(RecordDescriptor { type_name: "Person", members: person_members() }))
    }

    impl SqlairType for Person {
        fn type_name() -> &'static str {
            "Person"
        }
        fn descriptor() -> &'static TypeDescriptor {
            person_descriptor()
        }
    }

    fn catalogue_with_person() -> Catalogue {
        let cat = Catalogue::new();
        cat.register::<Person>().unwrap();
        cat
    }

    #[test]
    fn bare_star_expands_lexicographically() {
        let cat = catalogue_with_person();
        let ast = parse("SELECT &Person.* FROM person").unwrap();
        let bound = bind(&ast, &cat).unwrap();
        let output = bound
            .nodes
            .iter()
            .find_map(|n| match n {
                BoundNode::Output(o) => Some(o),
                _ => None,
            })
            .unwrap();
        let tags: Vec<_> = output.columns.iter().map(|c| c.sql.as_str()).collect();
        assert_eq!(tags, vec!["id", "name", "team"]);
    }

    #[test]
    fn as_star_matches_by_tag_name() {
        let cat = catalogue_with_person();
        let ast = parse("SELECT name, team AS &Person.* FROM person").unwrap();
        let bound = bind(&ast, &cat).unwrap();
        let output = bound
            .nodes
            .iter()
            .find_map(|n| match n {
                BoundNode::Output(o) => Some(o),
                _ => None,
            })
            .unwrap();
        assert_eq!(output.columns.len(), 2);
        assert_eq!(output.columns[0].sql, "name");
        assert_eq!(output.columns[1].sql, "team");
    }

    #[test]
    fn unknown_tag_in_as_star_is_error() {
        let cat = catalogue_with_person();
        let ast = parse("SELECT name, nonexistent AS &Person.* FROM person").unwrap();
        assert!(bind(&ast, &cat).is_err());
    }

    #[test]
    fn insert_values_star_expands_record() {
        let cat = catalogue_with_person();
        let ast = parse("INSERT INTO person (*) VALUES ($Person.*)").unwrap();
        let bound = bind(&ast, &cat).unwrap();
        let iv = bound
            .nodes
            .iter()
            .find_map(|n| match n {
                BoundNode::Input(BoundInput::InsertValues(iv)) => Some(iv),
                _ => None,
            })
            .unwrap();
        assert_eq!(iv.columns, vec!["id", "name", "team"]);
    }

    #[test]
    fn insert_values_explicit_mixes_member_and_star() {
        let cat = catalogue_with_person();
        let ast = parse("INSERT INTO person (id, name, team) VALUES ($Person.id, $Person.*)").unwrap();
        let bound = bind(&ast, &cat).unwrap();
        let iv = bound
            .nodes
            .iter()
            .find_map(|n| match n {
                BoundNode::Input(BoundInput::InsertValues(iv)) => Some(iv),
                _ => None,
            })
            .unwrap();
        assert_eq!(iv.columns, vec!["id", "name", "team"]);
        assert_eq!(iv.locators.len(), 3);
    }

    #[test]
    fn unknown_type_is_error() {
        let cat = catalogue_with_person();
        let ast = parse("WHERE id = $Ghost.id").unwrap();
        assert!(matches!(bind(&ast, &cat), Err(BindError::UnknownType { .. })));
    }

    struct Address {
        city: String,
    }

    fn address_members() -> &'static [MemberDescriptor] {
        static CELL: OnceLock<Vec<MemberDescriptor>> = OnceLock::new();
        CELL.get_or_init(|| {
            vec![MemberDescriptor {
                field_name: "city",
                tag: "city",
                omit_empty: false,
                path: &[],
                get: Arc::new(|s: &dyn Any| Value::Text(s.downcast_ref::<Address>().unwrap().city.clone())),
                is_zero: Arc::new(|s: &dyn Any| s.downcast_ref::<Address>().unwrap().city.is_empty()),
                set: Arc::new(|_: &mut dyn Any, _: Value| Ok(())),
            }]
        })
    }

    fn address_descriptor() -> &'static TypeDescriptor {
        static CELL: OnceLock<TypeDescriptor> = OnceLock::new();
        CELL.get_or_init(|| TypeDescriptor::Record(RecordDescriptor { type_name: "Address", members: address_members() }))
    }

    impl SqlairType for Address {
        fn type_name() -> &'static str {
            "Address"
        }
        fn descriptor() -> &'static TypeDescriptor {
            address_descriptor()
        }
    }

    #[test]
    fn insert_values_accepts_two_record_stars() {
        let cat = catalogue_with_person();
        cat.register::<Address>().unwrap();
        let ast =
            parse("INSERT INTO person (id, name, team, city) VALUES ($Person.*, $Address.*)").unwrap();
        let bound = bind(&ast, &cat).unwrap();
        let iv = bound
            .nodes
            .iter()
            .find_map(|n| match n {
                BoundNode::Input(BoundInput::InsertValues(iv)) => Some(iv),
                _ => None,
            })
            .unwrap();
        assert_eq!(iv.columns, vec!["id", "name", "team", "city"]);
        assert_eq!(iv.locators.len(), 4);
    }

    struct Extra(std::collections::HashMap<String, String>);

    fn extra_get(s: &dyn std::any::Any, key: &str) -> Option<Value> {
        s.downcast_ref::<Extra>().unwrap().0.get(key).cloned().map(Value::Text)
    }

    fn extra_set(s: &mut dyn std::any::Any, key: &str, v: Value) -> Result<(), crate::error::ValueError> {
        let text = match v {
            Value::Text(t) => t,
            Value::Null => String::new(),
            _ => return Err(crate::error::ValueError::WrongOutputKind { type_name: "Extra".into() }),
        };
        s.downcast_mut::<Extra>().unwrap().0.insert(key.to_string(), text);
        Ok(())
    }

    fn extra_descriptor() -> &'static TypeDescriptor {
        static CELL: OnceLock<TypeDescriptor> = OnceLock::new();
        CELL.get_or_init(|| {
            TypeDescriptor::Mapping(MappingDescriptor { type_name: "Extra", get: extra_get, set: extra_set })
        })
    }

    impl SqlairType for Extra {
        fn type_name() -> &'static str {
            "Extra"
        }
        fn descriptor() -> &'static TypeDescriptor {
            extra_descriptor()
        }
    }

    #[test]
    fn insert_values_map_star_catches_unclaimed_columns() {
        let cat = catalogue_with_person();
        cat.register::<Extra>().unwrap();
        let ast = parse("INSERT INTO person (id, name, team) VALUES ($Person.id, $Extra.*)").unwrap();
        let bound = bind(&ast, &cat).unwrap();
        let iv = bound
            .nodes
            .iter()
            .find_map(|n| match n {
                BoundNode::Input(BoundInput::InsertValues(iv)) => Some(iv),
                _ => None,
            })
            .unwrap();
        assert_eq!(iv.columns, vec!["id", "name", "team"]);
        assert!(matches!(iv.locators[0], Locator::RecordField { .. }));
        assert!(matches!(iv.locators[1], Locator::MapKey { key: "name", .. }));
        assert!(matches!(iv.locators[2], Locator::MapKey { key: "team", .. }));
    }

    #[test]
    fn insert_values_rejects_second_map_star() {
        let cat = catalogue_with_person();
        cat.register::<Extra>().unwrap();
        let ast = parse("INSERT INTO person (id, name) VALUES ($Extra.*, $Extra.*)").unwrap();
        assert!(matches!(bind(&ast, &cat), Err(BindError::MultipleMapStars { .. })));
    }

    #[test]
    fn insert_values_map_star_needs_explicit_columns() {
        let cat = Catalogue::new();
        cat.register::<Extra>().unwrap();
        let ast = parse("INSERT INTO extra (*) VALUES ($Extra.*)").unwrap();
        assert!(matches!(bind(&ast, &cat), Err(BindError::MapStarWithoutExplicitColumns { .. })));
    }
}
