//! The closed set of scalar values sqlair moves between Rust values and the
//! driver boundary. Concrete drivers (outside this crate's scope, per
//! spec.md §1) are expected to encode/decode against this enum; it plays
//! the role the teacher's per-database `Encode`/`Decode` traits play, but
//! monomorphic rather than trait-object based, since sqlair has no
//! database-specific wire types to abstract over.

use crate::error::ValueError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Converts a Rust value into a [`Value`] for binding as a query argument.
pub trait IntoValue {
    fn into_value(self) -> Value;
    /// Used for omit-empty semantics (spec.md §4.2): is this the zero value
    /// for its type?
    fn is_zero_value(&self) -> bool;
}

/// Converts a [`Value`] scanned from a row back into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl IntoValue for $t {
                fn into_value(self) -> Value {
                    Value::Int(self as i64)
                }
                fn is_zero_value(&self) -> bool {
                    *self == 0
                }
            }

            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, ValueError> {
                    match value {
                        Value::Int(i) => Ok(i as $t),
                        Value::Null => Ok(0 as $t),
                        other => Err(ValueError::WrongOutputKind {
                            type_name: format!("{:?} is not an integer", other),
                        }),
                    }
                }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
    fn is_zero_value(&self) -> bool {
        !*self
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(ValueError::WrongOutputKind { type_name: format!("{:?} is not a bool", other) }),
        }
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
    fn is_zero_value(&self) -> bool {
        *self == 0.0
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(f) => Ok(f as f32),
            Value::Null => Ok(0.0),
            other => Err(ValueError::WrongOutputKind { type_name: format!("{:?} is not a float", other) }),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
    fn is_zero_value(&self) -> bool {
        *self == 0.0
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Null => Ok(0.0),
            other => Err(ValueError::WrongOutputKind { type_name: format!("{:?} is not a float", other) }),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
    fn is_zero_value(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(t) => Ok(t),
            Value::Null => Ok(String::new()),
            other => Err(ValueError::WrongOutputKind { type_name: format!("{:?} is not text", other) }),
        }
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Blob(self)
    }
    fn is_zero_value(&self) -> bool {
        self.is_empty()
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Blob(b) => Ok(b),
            Value::Null => Ok(Vec::new()),
            other => Err(ValueError::WrongOutputKind { type_name: format!("{:?} is not a blob", other) }),
        }
    }
}

/// `Option<T>` is how sqlair represents "NULL-safe" scanning (spec.md §4.2's
/// scan proxy, Glossary "Scan proxy"): a field typed `Option<T>` can coexist
/// with a NULL result column without an intermediate proxy allocation.
impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
    fn is_zero_value(&self) -> bool {
        self.is_none()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
