//! Result rows as returned by a [`Connection`](crate::Connection).

use crate::error::{Error, Result, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column layout shared by every row of one result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // First occurrence wins for duplicated names.
            positions.entry(name.clone()).or_insert(i);
        }
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(column_names)), values)
    }

    /// A row sharing its column layout with the rest of its result set.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.get(self.columns.index_of(name)?)
    }

    /// Typed value of column `name`.
    ///
    /// Conversion errors name the column, so a failing
    /// [`Model::from_row`](crate::Model::from_row) points at the field.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let annotate = |mut err: TypeError| {
            err.column = Some(name.to_owned());
            Error::Type(err)
        };
        let Some(value) = self.get_by_name(name) else {
            return Err(annotate(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "no such column".to_owned(),
                column: None,
            }));
        };
        match T::from_value(value) {
            Err(Error::Type(err)) => Err(annotate(err)),
            other => other,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    /// (column, value) pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(&self.values)
    }

    /// Keep only the named columns, in the order given.
    ///
    /// Unknown names are skipped.
    pub fn project(&self, names: &[&str]) -> Row {
        let (kept_names, kept_values) = names
            .iter()
            .filter_map(|name| Some(((*name).to_owned(), self.get_by_name(name)?.clone())))
            .unzip();
        Row::new(kept_names, kept_values)
    }
}

/// Conversion from a [`Value`] to a Rust type.
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_owned(),
        column: None,
    })
}

macro_rules! from_value_via {
    ($($ty:ty => $accessor:expr),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self> {
                    let accessor: fn(&Value) -> Option<$ty> = $accessor;
                    accessor(value).ok_or_else(|| mismatch(stringify!($ty), value))
                }
            }
        )*
    };
}

from_value_via! {
    bool => Value::as_bool,
    i64 => Value::as_i64,
    i32 => |v| v.as_i64().and_then(|i| i32::try_from(i).ok()),
    f64 => Value::as_f64,
    String => |v| v.as_str().map(str::to_owned),
    Vec<u8> => |v| match v {
        Value::Bytes(b) => Some(b.clone()),
        Value::Text(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    },
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hero() -> Row {
        Row::new(
            vec!["id".to_string(), "name".to_string(), "team_id".to_string()],
            vec![Value::BigInt(1), Value::Text("Deadpond".into()), Value::Null],
        )
    }

    #[test]
    fn test_get_named_typed() {
        let row = hero();
        assert_eq!(row.get_named::<i64>("id").unwrap(), 1);
        assert_eq!(row.get_named::<i32>("id").unwrap(), 1);
        assert_eq!(row.get_named::<String>("name").unwrap(), "Deadpond");
        assert_eq!(row.get_named::<Option<i64>>("team_id").unwrap(), None);
        assert_eq!(row.get_named::<Value>("team_id").unwrap(), Value::Null);
    }

    #[test]
    fn test_get_named_reports_column() {
        let row = hero();
        match row.get_named::<i64>("name").unwrap_err() {
            Error::Type(te) => {
                assert_eq!(te.column.as_deref(), Some("name"));
                assert_eq!(te.actual, "text");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match row.get_named::<i64>("missing").unwrap_err() {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("missing")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rows_share_column_layout() {
        let columns = Arc::new(ColumnInfo::new(vec!["id".into(), "id".into()]));
        let a = Row::with_columns(Arc::clone(&columns), vec![Value::Int(1), Value::Int(2)]);
        let b = Row::with_columns(Arc::clone(&columns), vec![Value::Int(3), Value::Int(4)]);
        assert!(Arc::ptr_eq(&a.column_info(), &b.column_info()));
        assert_eq!(a.get_by_name("id"), Some(&Value::Int(1)));
        assert_eq!(b.iter().count(), 2);
    }

    #[test]
    fn test_project_keeps_requested_order() {
        let row = hero().project(&["name", "id", "nope"]);
        let names: Vec<&str> = row.column_names().collect();
        assert_eq!(names, vec!["name", "id"]);
        assert_eq!(row.get(1), Some(&Value::BigInt(1)));
    }
}
