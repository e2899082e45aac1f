//! Dynamic SQL values.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A dynamically-typed SQL value.
///
/// Besides parameter binding and result fetching, values are the keys
/// relation caches are matched on during batch loads; see
/// [`Value::key_eq`] and [`Value::hash_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

/// Normalized view of a value used for key comparison.
#[derive(PartialEq, Eq, Hash)]
enum Key<'a> {
    Null,
    Bool(bool),
    Integer(i64),
    Float(u64),
    Text(&'a str),
    Bytes(&'a [u8]),
    Json(String),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL-ish name of the variant, used in conversion errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
        }
    }

    /// Integers widen; booleans stored as integers are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(i64::from(v)),
            Value::BigInt(v) => Some(v),
            Value::Bool(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            Value::Int(v) => Some(v != 0),
            Value::BigInt(v) => Some(v != 0),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            Value::Int(v) => Some(f64::from(v)),
            Value::BigInt(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn key(&self) -> Key<'_> {
        match self {
            Value::Null => Key::Null,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(v) => Key::Integer(i64::from(*v)),
            Value::BigInt(v) => Key::Integer(*v),
            Value::Double(f) => Key::Float(f.to_bits()),
            Value::Text(s) => Key::Text(s),
            Value::Bytes(b) => Key::Bytes(b),
            Value::Json(j) => Key::Json(j.to_string()),
        }
    }

    /// Compare two values as lookup keys.
    ///
    /// Integer variants compare by their widened value, so a `BigInt(1)`
    /// foreign key matches an `Int(1)` primary key coming back from a driver.
    pub fn key_eq(&self, other: &Value) -> bool {
        self.key() == other.key()
    }

    /// Hash this value consistently with [`Value::key_eq`].
    pub fn hash_key<H: Hasher>(&self, hasher: &mut H) {
        self.key().hash(hasher);
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => BigInt,
    f64 => Double,
    String => Text,
    Vec<u8> => Bytes,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
