//! The type catalogue (spec.md §4.1): a runtime registry of record, mapping,
//! and sequence type descriptors, keyed by type name.
//!
//! Per spec.md §9 REDESIGN FLAGS, descriptor construction does not happen by
//! walking runtime reflection on every lookup. Instead `#[derive(SqlairType)]`
//! (crate `sqlair-macros`) builds each type's [`TypeDescriptor`] once, behind
//! a `OnceLock`, at first use; the catalogue only stores and looks up the
//! resulting `&'static` value.

pub mod tag;
pub mod value;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::CatalogError;
use value::Value;

/// Implemented by `#[derive(SqlairType)]`. Never implement this by hand;
/// the derive macro is responsible for keeping `descriptor()` consistent
/// with the struct it is attached to.
pub trait SqlairType: Any {
    /// The name the catalogue and the `$`/`&` grammar refer to this type by.
    fn type_name() -> &'static str
    where
        Self: Sized;

    /// The compile-time-built descriptor for this type.
    fn descriptor() -> &'static TypeDescriptor
    where
        Self: Sized;
}

/// One of the three shapes a sample type can take (spec.md §3).
#[derive(Debug)]
pub enum TypeDescriptor {
    Record(RecordDescriptor),
    Mapping(MappingDescriptor),
    Sequence(SequenceDescriptor),
}

impl TypeDescriptor {
    pub fn type_name(&self) -> &'static str {
        match self {
            TypeDescriptor::Record(r) => r.type_name,
            TypeDescriptor::Mapping(m) => m.type_name,
            TypeDescriptor::Sequence(s) => s.type_name,
        }
    }
}

/// A struct-like type: an ordered list of tagged members.
///
/// `members` is listed in column-tag lexicographic order (spec.md §3: "to
/// give deterministic star expansion"); the derive macro sorts it once at
/// construction time.
pub struct RecordDescriptor {
    pub type_name: &'static str,
    pub members: &'static [MemberDescriptor],
}

impl std::fmt::Debug for RecordDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDescriptor")
            .field("type_name", &self.type_name)
            .field("members", &self.members.iter().map(|m| m.tag).collect::<Vec<_>>())
            .finish()
    }
}

impl RecordDescriptor {
    pub fn member(&self, tag: &str) -> Option<&'static MemberDescriptor> {
        self.members.iter().find(|m| m.tag == tag)
    }
}

/// One tagged member of a [`RecordDescriptor`].
///
/// `get`/`set` are generated by the derive macro and already know how to
/// reach through embedded fields (the access path from spec.md §3 is baked
/// into the closure body, not represented as data here); `path` is kept only
/// for diagnostics.
///
/// Plain `fn` pointers would be enough for a type's own direct fields, but
/// an `#[sqlair(embed)]` field promotes the *embedded* type's members into
/// this one's member list, and the embedded type's own accessors are only
/// discoverable at runtime, via its `descriptor()` call — a value a bare
/// `fn` item cannot close over. `Arc<dyn Fn>` is the smallest change that
/// keeps the call site monomorphic (one indirect call, no downcasting)
/// while letting a promoted member's accessor carry the embedded member's
/// own accessor with it: the derive macro builds the flattened member list
/// once, behind a `OnceLock`, composing each promoted accessor as
/// `move |outer| (embedded_member.get)(project_to_embedded_field(outer))`.
pub struct MemberDescriptor {
    pub field_name: &'static str,
    pub tag: &'static str,
    pub omit_empty: bool,
    pub path: &'static [&'static str],
    pub get: Arc<dyn Fn(&dyn Any) -> Value + Send + Sync>,
    pub is_zero: Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>,
    pub set: Arc<dyn Fn(&mut dyn Any, Value) -> Result<(), crate::error::ValueError> + Send + Sync>,
}

impl std::fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("field_name", &self.field_name)
            .field("tag", &self.tag)
            .field("omit_empty", &self.omit_empty)
            .field("path", &self.path)
            .finish()
    }
}

/// A string-keyed association type (spec.md §3: "any key is admissible").
pub struct MappingDescriptor {
    pub type_name: &'static str,
    pub get: fn(&dyn Any, &str) -> Option<Value>,
    pub set: fn(&mut dyn Any, &str, Value) -> Result<(), crate::error::ValueError>,
}

impl std::fmt::Debug for MappingDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingDescriptor").field("type_name", &self.type_name).finish()
    }
}

/// A named ordered collection, usable only as a whole-slice `$T[:]` input.
pub struct SequenceDescriptor {
    pub type_name: &'static str,
    pub expand: fn(&dyn Any) -> Vec<Value>,
}

impl std::fmt::Debug for SequenceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceDescriptor").field("type_name", &self.type_name).finish()
    }
}

/// A runtime catalogue of registered sample types (spec.md §4.1).
#[derive(Default)]
pub struct Catalogue {
    inner: RwLock<CatalogueInner>,
}

#[derive(Default)]
struct CatalogueInner {
    by_type_id: HashMap<TypeId, &'static TypeDescriptor>,
    name_owner: HashMap<&'static str, TypeId>,
}

/// A resolved reference into the catalogue: either a single member of a
/// record/mapping type, or a whole-sequence reference. This is what
/// spec.md §4.2 calls a "locator" at the catalogue-lookup level; the
/// type-bound stage (§4.4) wraps it with the `crate::locator::Locator`
/// machinery that actually walks argument maps.
#[derive(Debug, Clone, Copy)]
pub enum CatalogueLookup {
    RecordMember { type_id: TypeId, type_name: &'static str, member: &'static MemberDescriptor },
    MapKey { type_id: TypeId, type_name: &'static str, mapping: &'static MappingDescriptor, key: &'static str },
    WholeSequence { type_id: TypeId, type_name: &'static str, sequence: &'static SequenceDescriptor },
}

/// The resolved target of one `$T.*` ref inside an insert-values expression.
/// See [`Catalogue::insert_star`].
#[derive(Debug, Clone, Copy)]
pub enum InsertStarSource {
    Record(TypeId, &'static RecordDescriptor),
    Mapping(TypeId, &'static MappingDescriptor),
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, failing if a *different* type already claims the same
    /// name (spec.md §4.1: "catalogue keys are type names").
    pub fn register<T: SqlairType>(&self) -> Result<(), CatalogError> {
        let type_id = TypeId::of::<T>();
        let descriptor = T::descriptor();
        let name = T::type_name();

        if let TypeDescriptor::Record(r) = descriptor {
            if r.members.is_empty() {
                // Not an error to *register* a zero-tagged record; it only
                // fails when `all()` (star expansion) is requested for it,
                // per spec.md §4.1. We still check for duplicate tags here.
            }
            let mut seen = std::collections::HashSet::new();
            for m in r.members {
                if !seen.insert(m.tag) {
                    return Err(CatalogError::DuplicateTag {
                        type_name: name.to_string(),
                        tag: m.tag.to_string(),
                    });
                }
            }
        }

        let mut inner = self.inner.write().expect("sqlair catalogue lock poisoned");
        if let Some(&existing) = inner.name_owner.get(name) {
            if existing != type_id {
                return Err(CatalogError::DuplicateTypeName { type_name: name.to_string() });
            }
        } else {
            inner.name_owner.insert(name, type_id);
        }
        inner.by_type_id.insert(type_id, descriptor);
        tracing::trace!(type_name = name, "registered sqlair type");
        Ok(())
    }

    fn find(&self, type_name: &str) -> Option<(TypeId, &'static TypeDescriptor)> {
        let inner = self.inner.read().expect("sqlair catalogue lock poisoned");
        let type_id = *inner.name_owner.get(type_name)?;
        let descriptor = *inner.by_type_id.get(&type_id)?;
        Some((type_id, descriptor))
    }

    fn available_names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("sqlair catalogue lock poisoned");
        let mut names: Vec<String> = inner.name_owner.keys().map(|s| s.to_string()).collect();
        names.sort();
        names
    }

    fn unknown_type(&self, type_name: &str) -> CatalogError {
        CatalogError::UnsupportedKind { type_name: type_name.to_string() }
    }

    fn unknown_type_bind_error(&self, type_name: &str) -> crate::error::BindError {
        crate::error::BindError::UnknownType {
            type_name: type_name.to_string(),
            available: self.available_names(),
        }
    }

    /// `member(typeName, columnTag)` from spec.md §4.1.
    pub fn member(&self, type_name: &str, tag: &str) -> Result<CatalogueLookup, crate::error::BindError> {
        let (type_id, descriptor) =
            self.find(type_name).ok_or_else(|| self.unknown_type_bind_error(type_name))?;

        match descriptor {
            TypeDescriptor::Record(r) => {
                let member = r
                    .member(tag)
                    .ok_or_else(|| crate::error::BindError::UnknownTag {
                        type_name: type_name.to_string(),
                        tag: tag.to_string(),
                    })?;
                Ok(CatalogueLookup::RecordMember { type_id, type_name: r.type_name, member })
            }
            TypeDescriptor::Mapping(m) => {
                // A leaked 'static str per distinct key is acceptable here:
                // keys come from parsed query text, which is itself leaked
                // once per logical statement by the type-bound stage cache.
                let key: &'static str = Box::leak(tag.to_string().into_boxed_str());
                Ok(CatalogueLookup::MapKey { type_id, type_name: m.type_name, mapping: m, key })
            }
            TypeDescriptor::Sequence(_) => Err(crate::error::BindError::StarOnNonRecord {
                type_name: type_name.to_string(),
            }),
        }
    }

    /// `all(typeName)` from spec.md §4.1: every tagged member, lexicographic
    /// order. Fails for mapping/sequence descriptors and zero-tag records.
    pub fn all(&self, type_name: &str) -> Result<(TypeId, &'static RecordDescriptor), crate::error::BindError> {
        let (type_id, descriptor) =
            self.find(type_name).ok_or_else(|| self.unknown_type_bind_error(type_name))?;

        match descriptor {
            TypeDescriptor::Record(r) if r.members.is_empty() => {
                Err(crate::error::BindError::StarOnZeroTagStruct { type_name: type_name.to_string() })
            }
            TypeDescriptor::Record(r) => Ok((type_id, r)),
            _ => Err(crate::error::BindError::StarOnNonRecord { type_name: type_name.to_string() }),
        }
    }

    /// The two shapes an insert-values `$T.*` ref can resolve to (spec.md
    /// §4.3/§4.4): a record-star contributes all of its tagged columns; a
    /// mapping-star instead catches whatever explicit column names are left
    /// over once every other ref has claimed one.
    pub fn insert_star(&self, type_name: &str) -> Result<InsertStarSource, crate::error::BindError> {
        let (type_id, descriptor) =
            self.find(type_name).ok_or_else(|| self.unknown_type_bind_error(type_name))?;

        match descriptor {
            TypeDescriptor::Record(r) if r.members.is_empty() => {
                Err(crate::error::BindError::StarOnZeroTagStruct { type_name: type_name.to_string() })
            }
            TypeDescriptor::Record(r) => Ok(InsertStarSource::Record(type_id, r)),
            TypeDescriptor::Mapping(m) => Ok(InsertStarSource::Mapping(type_id, m)),
            TypeDescriptor::Sequence(_) => {
                Err(crate::error::BindError::StarOnNonRecord { type_name: type_name.to_string() })
            }
        }
    }

    /// `slice(typeName)` from spec.md §4.1: whole-sequence input.
    pub fn slice(&self, type_name: &str) -> Result<CatalogueLookup, crate::error::BindError> {
        let (type_id, descriptor) =
            self.find(type_name).ok_or_else(|| self.unknown_type_bind_error(type_name))?;

        match descriptor {
            TypeDescriptor::Sequence(s) => {
                Ok(CatalogueLookup::WholeSequence { type_id, type_name: s.type_name, sequence: s })
            }
            _ => Err(crate::error::BindError::StarOnNonRecord { type_name: type_name.to_string() }),
        }
    }

    pub fn type_id_of(&self, type_name: &str) -> Option<TypeId> {
        self.find(type_name).map(|(id, _)| id)
    }
}
