//! Typed column values
//!
//! The mapper classifies every model field into one of the semantic column
//! types below; values travel between field accessors and bound SQL
//! parameters as [`ScalarValue`]s. Doubles hash and compare by bit pattern
//! so a scalar can key the cache maps.

use std::fmt;
use std::hash::{Hash, Hasher};

use sqlx::Row;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};

use crate::Result;

/// Semantic column type of a mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
   Integer,
   Long,
   Boolean,
   Double,
   Text,
}

impl ColumnType {
   /// SQLite column type used in CREATE TABLE
   pub fn sql_type(self) -> &'static str {
      match self {
         ColumnType::Integer | ColumnType::Long | ColumnType::Boolean => "INTEGER",
         ColumnType::Double => "REAL",
         ColumnType::Text => "TEXT",
      }
   }
}

/// One typed column value
///
/// Holds either a mapped field's value or a primary-key value. `Eq` and
/// `Hash` treat `Double` by bit pattern, which is stricter than float
/// equality but stable - the only requirement for a map key.
#[derive(Debug, Clone)]
pub enum ScalarValue {
   Integer(i32),
   Long(i64),
   Boolean(bool),
   Double(f64),
   Text(String),
}

impl ScalarValue {
   /// Column type this value binds as
   pub fn column_type(&self) -> ColumnType {
      match self {
         ScalarValue::Integer(_) => ColumnType::Integer,
         ScalarValue::Long(_) => ColumnType::Long,
         ScalarValue::Boolean(_) => ColumnType::Boolean,
         ScalarValue::Double(_) => ColumnType::Double,
         ScalarValue::Text(_) => ColumnType::Text,
      }
   }

   /// The engine's default value for a column type, used when a row holds
   /// NULL (for example after a migration added the column)
   pub fn default_for(column_type: ColumnType) -> Self {
      match column_type {
         ColumnType::Integer => ScalarValue::Integer(0),
         ColumnType::Long => ScalarValue::Long(0),
         ColumnType::Boolean => ScalarValue::Boolean(false),
         ColumnType::Double => ScalarValue::Double(0.0),
         ColumnType::Text => ScalarValue::Text(String::new()),
      }
   }
}

impl PartialEq for ScalarValue {
   fn eq(&self, other: &Self) -> bool {
      match (self, other) {
         (ScalarValue::Integer(a), ScalarValue::Integer(b)) => a == b,
         (ScalarValue::Long(a), ScalarValue::Long(b)) => a == b,
         (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a == b,
         (ScalarValue::Double(a), ScalarValue::Double(b)) => a.to_bits() == b.to_bits(),
         (ScalarValue::Text(a), ScalarValue::Text(b)) => a == b,
         _ => false,
      }
   }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
   fn hash<H: Hasher>(&self, state: &mut H) {
      core::mem::discriminant(self).hash(state);
      match self {
         ScalarValue::Integer(v) => v.hash(state),
         ScalarValue::Long(v) => v.hash(state),
         ScalarValue::Boolean(v) => v.hash(state),
         ScalarValue::Double(v) => v.to_bits().hash(state),
         ScalarValue::Text(v) => v.hash(state),
      }
   }
}

impl fmt::Display for ScalarValue {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         ScalarValue::Integer(v) => write!(f, "{v}"),
         ScalarValue::Long(v) => write!(f, "{v}"),
         ScalarValue::Boolean(v) => write!(f, "{}", i32::from(*v)),
         ScalarValue::Double(v) => write!(f, "{v}"),
         ScalarValue::Text(v) => write!(f, "{v}"),
      }
   }
}

impl From<i32> for ScalarValue {
   fn from(v: i32) -> Self {
      ScalarValue::Integer(v)
   }
}

impl From<i64> for ScalarValue {
   fn from(v: i64) -> Self {
      ScalarValue::Long(v)
   }
}

impl From<bool> for ScalarValue {
   fn from(v: bool) -> Self {
      ScalarValue::Boolean(v)
   }
}

impl From<f64> for ScalarValue {
   fn from(v: f64) -> Self {
      ScalarValue::Double(v)
   }
}

impl From<String> for ScalarValue {
   fn from(v: String) -> Self {
      ScalarValue::Text(v)
   }
}

impl From<&str> for ScalarValue {
   fn from(v: &str) -> Self {
      ScalarValue::Text(v.to_owned())
   }
}

/// Bind an owned scalar as the next query parameter
pub(crate) fn bind_scalar<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   value: ScalarValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match value {
      ScalarValue::Integer(v) => query.bind(v),
      ScalarValue::Long(v) => query.bind(v),
      ScalarValue::Boolean(v) => query.bind(v),
      ScalarValue::Double(v) => query.bind(v),
      ScalarValue::Text(v) => query.bind(v),
   }
}

/// Bind a typed NULL as the next query parameter
pub(crate) fn bind_null<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   column_type: ColumnType,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match column_type {
      ColumnType::Integer => query.bind(None::<i32>),
      ColumnType::Long => query.bind(None::<i64>),
      ColumnType::Boolean => query.bind(None::<bool>),
      ColumnType::Double => query.bind(None::<f64>),
      ColumnType::Text => query.bind(None::<String>),
   }
}

/// Decode the column at `index` as `column_type`, `None` for SQL NULL
pub(crate) fn decode_scalar(
   row: &SqliteRow,
   index: usize,
   column_type: ColumnType,
) -> Result<Option<ScalarValue>> {
   let value = match column_type {
      ColumnType::Integer => row.try_get::<Option<i32>, _>(index)?.map(ScalarValue::Integer),
      ColumnType::Long => row.try_get::<Option<i64>, _>(index)?.map(ScalarValue::Long),
      ColumnType::Boolean => row
         .try_get::<Option<bool>, _>(index)?
         .map(ScalarValue::Boolean),
      ColumnType::Double => row.try_get::<Option<f64>, _>(index)?.map(ScalarValue::Double),
      ColumnType::Text => row.try_get::<Option<String>, _>(index)?.map(ScalarValue::Text),
   };
   Ok(value)
}
