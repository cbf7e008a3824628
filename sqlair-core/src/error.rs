//! Error and Result types.
//!
//! One flat enum per the error taxonomy in spec.md §7: parse errors, type-bind
//! errors, catalogue errors, runtime value-location errors, and an opaque
//! driver-error family. `Display`/`source` are hand-written rather than
//! derived, matching the teacher's own `error.rs`.

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};

/// A specialized `Result` type for sqlair.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A generic error covering every way a sqlair operation can fail.
#[derive(Debug)]
pub enum Error {
    /// The source string could not be parsed (spec.md §7 "Parse errors").
    Parse(ParseError),

    /// An expression did not type-check against the catalogue (spec.md §7
    /// "Type-bind errors").
    Bind(BindError),

    /// A type could not be registered, or described itself inconsistently
    /// (spec.md §7 "Catalogue errors").
    Catalog(CatalogError),

    /// A value supplied at query time did not satisfy a locator (spec.md §7
    /// "Runtime validation errors").
    Value(ValueError),

    /// An error was returned by the driver, tagged with the phase that
    /// failed (spec.md §7 "Driver errors").
    Driver {
        phase: DriverPhase,
        source: Box<dyn StdError + Send + Sync>,
    },

    /// No rows were returned by a query that expected exactly one
    /// (`ErrNoRows`, spec.md §6).
    NotFound,

    /// More than one row was returned by a query that expected exactly one.
    FoundMoreThanOne,
}

/// Which driver operation produced a [`Error::Driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Connect,
    Prepare,
    Execute,
    Query,
    Scan,
    Close,
    Begin,
    Commit,
    Rollback,
}

impl Display for DriverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverPhase::Connect => "connect",
            DriverPhase::Prepare => "prepare",
            DriverPhase::Execute => "execute",
            DriverPhase::Query => "query",
            DriverPhase::Scan => "scan",
            DriverPhase::Close => "close",
            DriverPhase::Begin => "begin",
            DriverPhase::Commit => "commit",
            DriverPhase::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at byte {}: {}", self.position, self.message)
    }
}

#[derive(Debug, Clone)]
pub enum BindError {
    UnknownType {
        type_name: String,
        available: Vec<String>,
    },
    UnknownTag {
        type_name: String,
        tag: String,
    },
    StarOnZeroTagStruct {
        type_name: String,
    },
    StarOnNonRecord {
        type_name: String,
    },
    LengthMismatch {
        sources: usize,
        targets: usize,
    },
    MultiStarTarget,
    DuplicateTarget {
        column: String,
    },
    /// spec.md §4.3: "at most one `$T.*` targeting a mapping type is
    /// allowed" in one insert-values expression.
    MultipleMapStars {
        type_name: String,
    },
    /// spec.md §4.3: "a map-star target must be preceded by an explicit
    /// column list" — there is no unclaimed column name for it to catch
    /// under the `(*)` column-list form.
    MapStarWithoutExplicitColumns {
        type_name: String,
    },
}

impl Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::UnknownType { type_name, available } => write!(
                f,
                "unknown type {:?} (available: {})",
                type_name,
                available.join(", ")
            ),
            BindError::UnknownTag { type_name, tag } => {
                write!(f, "type {:?} has no member tagged {:?}", type_name, tag)
            }
            BindError::StarOnZeroTagStruct { type_name } => write!(
                f,
                "cannot expand {}.* : type has no tagged members",
                type_name
            ),
            BindError::StarOnNonRecord { type_name } => write!(
                f,
                "cannot expand {}.* : type is not a record type",
                type_name
            ),
            BindError::LengthMismatch { sources, targets } => write!(
                f,
                "{} source columns but {} targets",
                sources, targets
            ),
            BindError::MultiStarTarget => {
                f.write_str("at most one star is allowed among the targets of one expression")
            }
            BindError::DuplicateTarget { column } => {
                write!(f, "column {:?} targeted more than once", column)
            }
            BindError::MultipleMapStars { type_name } => write!(
                f,
                "at most one mapping-star is allowed in an insert-values list; {} is a second",
                type_name
            ),
            BindError::MapStarWithoutExplicitColumns { type_name } => write!(
                f,
                "{}.* targets a mapping type and must be preceded by an explicit column list",
                type_name
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CatalogError {
    UnsupportedKind { type_name: String },
    DuplicateTypeName { type_name: String },
    UnexportedTaggedField { type_name: String, field: String },
    DuplicateTag { type_name: String, tag: String },
    ZeroTaggedFields { type_name: String },
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::UnsupportedKind { type_name } => {
                write!(f, "{} is not a record, map, or sequence type", type_name)
            }
            CatalogError::DuplicateTypeName { type_name } => write!(
                f,
                "two distinct types are both named {:?}; catalogue keys are type names",
                type_name
            ),
            CatalogError::UnexportedTaggedField { type_name, field } => write!(
                f,
                "{}: field {:?} carries a column tag but is not accessible",
                type_name, field
            ),
            CatalogError::DuplicateTag { type_name, tag } => write!(
                f,
                "{}: column tag {:?} is used by more than one member",
                type_name, tag
            ),
            CatalogError::ZeroTaggedFields { type_name } => {
                write!(f, "{} has no tagged members", type_name)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum ValueError {
    NilInput { type_name: String },
    NilOutput,
    WrongOutputKind { type_name: String },
    DuplicateType { type_name: String },
    TypeNotSupplied { type_name: String },
    MissingKey { type_name: String, key: String },
    MissingIndex { type_name: String, index: usize },
    AmbiguousBulkInsert { type_name: String },
    EmptyBulkInsert { type_name: String },
    MixedOmitInBulkInsert { type_name: String, column: String },
}

impl Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::NilInput { type_name } => {
                write!(f, "input argument of type {} was nil", type_name)
            }
            ValueError::NilOutput => f.write_str("output argument was nil"),
            ValueError::WrongOutputKind { type_name } => write!(
                f,
                "output argument of type {} must be a pointer to a record or mapping type",
                type_name
            ),
            ValueError::DuplicateType { type_name } => {
                write!(f, "type {} was supplied more than once", type_name)
            }
            ValueError::TypeNotSupplied { type_name } => write!(
                f,
                "statement requires an argument of type {} but none was supplied",
                type_name
            ),
            ValueError::MissingKey { type_name, key } => {
                write!(f, "{} has no value for key {:?}", type_name, key)
            }
            ValueError::MissingIndex { type_name, index } => write!(
                f,
                "{} slice argument has a nil element at index {}",
                type_name, index
            ),
            ValueError::AmbiguousBulkInsert { type_name } => write!(
                f,
                "unclear if bulk insert intended: both {} and []{} were supplied",
                type_name, type_name
            ),
            ValueError::EmptyBulkInsert { type_name } => write!(
                f,
                "bulk insert slice argument of type []{} has length 0",
                type_name
            ),
            ValueError::MixedOmitInBulkInsert { type_name, column } => write!(
                f,
                "{}: column {:?} is omitted on some rows but not others in the same bulk insert",
                type_name, column
            ),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Driver { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(e) => Display::fmt(e, f),
            Error::Bind(e) => Display::fmt(e, f),
            Error::Catalog(e) => Display::fmt(e, f),
            Error::Value(e) => Display::fmt(e, f),
            Error::Driver { phase, source } => write!(f, "driver error during {}: {}", phase, source),
            Error::NotFound => f.write_str("found no rows when we expected at least one"),
            Error::FoundMoreThanOne => {
                f.write_str("found more than one row when we expected exactly one")
            }
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<BindError> for Error {
    fn from(e: BindError) -> Self {
        Error::Bind(e)
    }
}

impl From<CatalogError> for Error {
    fn from(e: CatalogError) -> Self {
        Error::Catalog(e)
    }
}

impl From<ValueError> for Error {
    fn from(e: ValueError) -> Self {
        Error::Value(e)
    }
}

impl Error {
    pub fn driver(phase: DriverPhase, source: impl StdError + Send + Sync + 'static) -> Self {
        Error::Driver { phase, source: Box::new(source) }
    }
}
