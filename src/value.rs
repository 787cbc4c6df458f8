//! Statement arguments and result rows exchanged with the per-shard engine.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "NULL",
      Value::Integer(_) => "INTEGER",
      Value::Real(_) => "REAL",
      Value::Text(_) => "TEXT",
      Value::Blob(_) => "BLOB",
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => f.write_str("NULL"),
      Value::Integer(v) => write!(f, "{}", v),
      Value::Real(v) => write!(f, "{}", v),
      Value::Text(v) => write!(f, "'{}'", v),
      Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Integer(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Integer(v.into())
  }
}

impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Value::Integer(v.into())
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Integer(v as i64)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Real(v)
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Text(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Text(v.to_owned())
  }
}

impl From<Vec<u8>> for Value {
  fn from(v: Vec<u8>) -> Self {
    Value::Blob(v)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map_or(Value::Null, Into::into)
  }
}

/// Builds a `Vec<Value>` argument list from heterogeneous expressions.
///
/// ```
/// use shardroute::{args, Value};
///
/// let list = args![42_i64, "pending", 9.5];
/// assert_eq!(list[1], Value::Text("pending".into()));
/// ```
#[macro_export]
macro_rules! args {
  () => { ::std::vec::Vec::<$crate::Value>::new() };
  ($($v:expr),+ $(,)?) => { ::std::vec![$($crate::Value::from($v)),+] };
}

/// Conversion out of a [`Value`].
pub trait FromValue: Sized {
  fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> Error {
  Error::engine(format!("expected {}, found {}", expected, value.type_name()))
}

impl FromValue for i64 {
  fn from_value(value: &Value) -> Result<Self> {
    match value {
      Value::Integer(v) => Ok(*v),
      other => Err(mismatch("INTEGER", other)),
    }
  }
}

impl FromValue for bool {
  fn from_value(value: &Value) -> Result<Self> {
    i64::from_value(value).map(|v| v != 0)
  }
}

impl FromValue for f64 {
  fn from_value(value: &Value) -> Result<Self> {
    match value {
      Value::Real(v) => Ok(*v),
      Value::Integer(v) => Ok(*v as f64),
      other => Err(mismatch("REAL", other)),
    }
  }
}

impl FromValue for String {
  fn from_value(value: &Value) -> Result<Self> {
    match value {
      Value::Text(v) => Ok(v.clone()),
      other => Err(mismatch("TEXT", other)),
    }
  }
}

impl FromValue for Vec<u8> {
  fn from_value(value: &Value) -> Result<Self> {
    match value {
      Value::Blob(v) => Ok(v.clone()),
      other => Err(mismatch("BLOB", other)),
    }
  }
}

impl FromValue for Value {
  fn from_value(value: &Value) -> Result<Self> {
    Ok(value.clone())
  }
}

impl<T: FromValue> FromValue for Option<T> {
  fn from_value(value: &Value) -> Result<Self> {
    match value {
      Value::Null => Ok(None),
      other => T::from_value(other).map(Some),
    }
  }
}

/// One result row. Column names are shared by every row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  columns: Arc<[String]>,
  values: Vec<Value>,
}

impl Row {
  /// # Errors
  ///
  /// Returns `Error::Engine` if `values` does not have one entry per column.
  pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Result<Self> {
    if columns.len() != values.len() {
      return Err(Error::engine(format!(
        "row has {} values for {} columns",
        values.len(),
        columns.len()
      )));
    }
    Ok(Self { columns, values })
  }

  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  pub fn values(&self) -> &[Value] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Raw value by column name (case-insensitive, as SQL identifiers are).
  pub fn value(&self, column: &str) -> Option<&Value> {
    self
      .columns
      .iter()
      .position(|c| c.eq_ignore_ascii_case(column))
      .and_then(|i| self.values.get(i))
  }

  /// Typed value by column name.
  pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
    let value = self
      .value(column)
      .ok_or_else(|| Error::engine(format!("no such column: {}", column)))?;
    T::from_value(value)
  }

  /// Typed value by position.
  pub fn get_at<T: FromValue>(&self, index: usize) -> Result<T> {
    let value = self
      .values
      .get(index)
      .ok_or_else(|| Error::engine(format!("column index {} out of range ({} columns)", index, self.len())))?;
    T::from_value(value)
  }

  pub fn into_values(self) -> Vec<Value> {
    self.values
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row() -> Row {
    let columns: Arc<[String]> = vec!["account_id".to_string(), "balance".to_string(), "note".to_string()].into();
    Row::new(columns, vec![Value::Integer(7), Value::Real(10.5), Value::Null]).unwrap()
  }

  #[test]
  fn test_typed_access() {
    let row = row();

    assert_eq!(row.get::<i64>("account_id").unwrap(), 7);
    assert_eq!(row.get::<f64>("BALANCE").unwrap(), 10.5);
    assert_eq!(row.get::<Option<String>>("note").unwrap(), None);
    assert_eq!(row.get_at::<i64>(0).unwrap(), 7);
  }

  #[test]
  fn test_row_width_must_match_columns() {
    let columns: Arc<[String]> = vec!["a".to_string(), "b".to_string()].into();

    assert!(matches!(
      Row::new(columns.clone(), vec![Value::Integer(1)]),
      Err(Error::Engine(_))
    ));
    assert!(matches!(
      Row::new(columns, vec![Value::Null, Value::Null, Value::Null]),
      Err(Error::Engine(_))
    ));
  }

  #[test]
  fn test_type_mismatch_is_engine_error() {
    let row = row();
    assert!(matches!(row.get::<String>("account_id"), Err(Error::Engine(_))));
    assert!(matches!(row.get::<i64>("missing"), Err(Error::Engine(_))));
    assert!(matches!(row.get_at::<i64>(9), Err(Error::Engine(_))));
  }

  #[test]
  fn test_args_macro() {
    let list = args![1_i64, "x", None::<i64>, true];
    assert_eq!(
      list,
      vec![Value::Integer(1), Value::Text("x".into()), Value::Null, Value::Integer(1)]
    );
    assert!(args![].is_empty());
  }
}
