//! Value locators (spec.md §4.2): per-expression objects that, given the
//! call-time map of argument values, fetch input parameters or build scan
//! targets.
//!
//! The locator itself is a monomorphic tagged enum (spec.md §9 REDESIGN
//! FLAGS: "the locator interface is monomorphic... rather than virtual
//! dispatch") wrapping the catalogue's type-erased accessor function
//! pointers (`types::MemberDescriptor`/`MappingDescriptor`/
//! `SequenceDescriptor`).

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::ValueError;
use crate::types::{MappingDescriptor, MemberDescriptor, SequenceDescriptor};
use crate::types::value::Value;

/// One argument supplied by the caller for a single query, keyed by its
/// sample type's `TypeId` in [`Arguments`].
pub enum InputArgument<'a> {
    One(&'a dyn Any),
    /// Bulk-insert detection (spec.md §4.2): a slice of the record/map type.
    Many(Vec<&'a dyn Any>),
}

/// The type→value map supplied fresh on every call (spec.md §4.2).
#[derive(Default)]
pub struct Arguments<'a> {
    inputs: HashMap<TypeId, InputArgument<'a>>,
}

impl<'a> Arguments<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `type_name` is only used to label an error; callers pass
    /// `T::type_name()` from the call site that already knows `T`.
    pub fn insert_one(
        &mut self,
        type_id: TypeId,
        type_name: &'static str,
        value: &'a dyn Any,
    ) -> Result<(), ValueError> {
        match self.inputs.get(&type_id) {
            // spec.md §4.2: "mixing a direct R argument with its slice form
            // is an error (unclear if bulk insert intended)".
            Some(InputArgument::Many(_)) => {
                return Err(ValueError::AmbiguousBulkInsert { type_name: type_name.to_string() });
            }
            Some(InputArgument::One(_)) => {
                return Err(ValueError::DuplicateType { type_name: type_name.to_string() });
            }
            None => {}
        }
        self.inputs.insert(type_id, InputArgument::One(value));
        Ok(())
    }

    pub fn insert_many(
        &mut self,
        type_id: TypeId,
        type_name: &'static str,
        values: Vec<&'a dyn Any>,
    ) -> Result<(), ValueError> {
        match self.inputs.get(&type_id) {
            Some(InputArgument::One(_)) => {
                return Err(ValueError::AmbiguousBulkInsert { type_name: type_name.to_string() });
            }
            Some(InputArgument::Many(_)) => {
                return Err(ValueError::DuplicateType { type_name: type_name.to_string() });
            }
            None => {}
        }
        self.inputs.insert(type_id, InputArgument::Many(values));
        Ok(())
    }

    pub fn get(&self, type_id: TypeId) -> Option<&InputArgument<'a>> {
        self.inputs.get(&type_id)
    }
}

/// A resolved value-locator, embedded in a type-bound expression (spec.md
/// §4.4).
#[derive(Clone, Copy)]
pub enum Locator {
    RecordField { type_id: TypeId, type_name: &'static str, member: &'static MemberDescriptor },
    MapKey { type_id: TypeId, type_name: &'static str, mapping: &'static MappingDescriptor, key: &'static str },
    WholeSequence { type_id: TypeId, type_name: &'static str, sequence: &'static SequenceDescriptor },
}

/// The outcome of resolving one input locator against the argument map:
/// either a single bound value, or (bulk insert) one value per row.
pub enum ParamValues {
    Scalar(Value),
    Vector(Vec<Value>),
}

impl Locator {
    pub fn type_id(&self) -> TypeId {
        match self {
            Locator::RecordField { type_id, .. } => *type_id,
            Locator::MapKey { type_id, .. } => *type_id,
            Locator::WholeSequence { type_id, .. } => *type_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Locator::RecordField { type_name, .. } => type_name,
            Locator::MapKey { type_name, .. } => type_name,
            Locator::WholeSequence { type_name, .. } => type_name,
        }
    }

    /// Locate-params contract (spec.md §4.2 table): extract one value (or,
    /// in bulk-insert mode, one value per row) from `args`.
    pub fn locate_params(&self, args: &Arguments<'_>) -> Result<ParamValues, ValueError> {
        let arg = args.get(self.type_id()).ok_or_else(|| ValueError::TypeNotSupplied {
            type_name: self.type_name().to_string(),
        })?;

        match self {
            Locator::RecordField { member, .. } => match arg {
                InputArgument::One(v) => Ok(ParamValues::Scalar((member.get)(*v))),
                InputArgument::Many(values) => {
                    if values.is_empty() {
                        return Err(ValueError::EmptyBulkInsert {
                            type_name: self.type_name().to_string(),
                        });
                    }
                    let mut out = Vec::with_capacity(values.len());
                    let mut any_omitted = false;
                    let mut any_kept = false;
                    for v in values {
                        if member.omit_empty && (member.is_zero)(*v) {
                            any_omitted = true;
                        } else {
                            any_kept = true;
                        }
                        out.push((member.get)(*v));
                    }
                    if member.omit_empty && any_omitted && any_kept {
                        return Err(ValueError::MixedOmitInBulkInsert {
                            type_name: self.type_name().to_string(),
                            column: member.tag.to_string(),
                        });
                    }
                    Ok(ParamValues::Vector(out))
                }
            },
            Locator::MapKey { mapping, key, .. } => match arg {
                InputArgument::One(v) => (mapping.get)(*v, key)
                    .map(ParamValues::Scalar)
                    .ok_or_else(|| ValueError::MissingKey {
                        type_name: self.type_name().to_string(),
                        key: key.to_string(),
                    }),
                InputArgument::Many(values) => {
                    if values.is_empty() {
                        return Err(ValueError::EmptyBulkInsert {
                            type_name: self.type_name().to_string(),
                        });
                    }
                    let mut out = Vec::with_capacity(values.len());
                    for v in values {
                        let value = (mapping.get)(*v, key).ok_or_else(|| ValueError::MissingKey {
                            type_name: self.type_name().to_string(),
                            key: key.to_string(),
                        })?;
                        out.push(value);
                    }
                    Ok(ParamValues::Vector(out))
                }
            },
            Locator::WholeSequence { sequence, .. } => match arg {
                InputArgument::One(v) => Ok(ParamValues::Vector((sequence.expand)(*v))),
                InputArgument::Many(_) => Err(ValueError::WrongOutputKind {
                    type_name: self.type_name().to_string(),
                }),
            },
        }
    }

    /// Whether this locator's value is the omit-empty zero value for a
    /// single-row insert (spec.md §4.5: suppressed in single-row mode only).
    /// Bulk (`Many`) arguments are never omitted here; mixed omission across
    /// rows of a bulk insert is instead rejected by [`Locator::locate_params`].
    pub fn is_omitted_scalar(&self, args: &Arguments<'_>) -> Result<bool, ValueError> {
        let Locator::RecordField { member, .. } = self else {
            return Ok(false);
        };
        if !member.omit_empty {
            return Ok(false);
        }
        match args.get(self.type_id()) {
            Some(InputArgument::One(v)) => Ok((member.is_zero)(*v)),
            _ => Ok(false),
        }
    }

    /// Locate-scan-target contract (spec.md §4.2 table): build a
    /// [`ScanProxy`] that commits a scanned column value into `dest`.
    pub fn locate_scan_target<'d>(&self, dest: &'d mut dyn Any) -> Result<ScanProxy<'d>, ValueError> {
        match self {
            Locator::RecordField { member, .. } => {
                Ok(ScanProxy::Record { dest, set: member.set.clone() })
            }
            Locator::MapKey { mapping, key, .. } => {
                Ok(ScanProxy::Map { dest, key, set: mapping.set })
            }
            Locator::WholeSequence { .. } => Err(ValueError::WrongOutputKind {
                type_name: self.type_name().to_string(),
            }),
        }
    }
}

/// The indirection used during row scanning (spec.md Glossary: "Scan
/// proxy"). Modelled as an enum distinguishing the record-field and
/// map-key cases, following the teacher's `ext::maybe_owned::MaybeOwned`
/// borrowed-vs-owned pattern rather than a `dyn Any`-downcasting trait
/// object, so the commit path stays a single indirect call instead of two.
pub enum ScanProxy<'d> {
    Record {
        dest: &'d mut dyn Any,
        set: std::sync::Arc<dyn Fn(&mut dyn Any, Value) -> Result<(), ValueError> + Send + Sync>,
    },
    Map {
        dest: &'d mut dyn Any,
        key: &'static str,
        set: fn(&mut dyn Any, &str, Value) -> Result<(), ValueError>,
    },
}

impl<'d> ScanProxy<'d> {
    /// Commit a successfully scanned column value into the destination.
    /// A `Value::Null` zeroes non-nullable fields and inserts `None` into
    /// `Option<T>` fields, per `FromValue`'s NULL handling (spec.md §4.2).
    pub fn commit(self, value: Value) -> Result<(), ValueError> {
        match self {
            ScanProxy::Record { dest, set } => set(dest, value),
            ScanProxy::Map { dest, key, set } => set(dest, key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordDescriptor, TypeDescriptor};
    use std::sync::{Arc, OnceLock};

    struct Manager {
        name: String,
    }

    fn manager_members() -> &'static [MemberDescriptor] {
        static CELL: OnceLock<Vec<MemberDescriptor>> = OnceLock::new();
        CELL.get_or_init(|| {
            vec![MemberDescriptor {
                field_name: "name",
                tag: "manager_name",
                omit_empty: false,
                path: &[],
                get: Arc::new(|s: &dyn Any| Value::Text(s.downcast_ref::<Manager>().unwrap().name.clone())),
                is_zero: Arc::new(|s: &dyn Any| s.downcast_ref::<Manager>().unwrap().name.is_empty()),
                set: Arc::new(|s: &mut dyn Any, v: Value| {
                    s.downcast_mut::<Manager>().unwrap().name = match v {
                        Value::Text(t) => t,
                        Value::Null => String::new(),
                        _ => return Err(ValueError::WrongOutputKind { type_name: "Manager".into() }),
                    };
                    Ok(())
                }),
            }]
        })
    }

    #[allow(dead_code)]
    fn manager_descriptor() -> &'static TypeDescriptor {
        static CELL: OnceLock<TypeDescriptor> = OnceLock::new();
        CELL.get_or_init(|| {
            TypeDescriptor::Record(RecordDescriptor { type_name: "Manager", members: manager_members() })
        })
    }

    #[test]
    fn record_field_locate_params() {
        let m = Manager { name: "Alex".into() };
        let mut args = Arguments::new();
        args.insert_one(TypeId::of::<Manager>(), "Manager", &m).unwrap();

        let locator = Locator::RecordField {
            type_id: TypeId::of::<Manager>(),
            type_name: "Manager",
            member: &manager_members()[0],
        };

        match locator.locate_params(&args).unwrap() {
            ParamValues::Scalar(Value::Text(t)) => assert_eq!(t, "Alex"),
            _ => panic!("expected scalar text"),
        }
    }

    #[test]
    fn missing_type_is_error() {
        let args = Arguments::new();
        let locator = Locator::RecordField {
            type_id: TypeId::of::<Manager>(),
            type_name: "Manager",
            member: &manager_members()[0],
        };
        assert!(matches!(
            locator.locate_params(&args),
            Err(ValueError::TypeNotSupplied { .. })
        ));
    }

    #[test]
    fn scan_proxy_commits_into_record_field() {
        let mut m = Manager { name: String::new() };
        let locator = Locator::RecordField {
            type_id: TypeId::of::<Manager>(),
            type_name: "Manager",
            member: &manager_members()[0],
        };
        let proxy = locator.locate_scan_target(&mut m).unwrap();
        proxy.commit(Value::Text("Jordan".into())).unwrap();
        assert_eq!(m.name, "Jordan");
    }
}
