//! Per-type schema descriptors
//!
//! A [`SchemaDescriptor`] is derived once per model type, on first access,
//! and lives for the rest of the process. It fixes the column list and
//! types, locates the primary field, and memoizes every SQL string the
//! engine will ever issue for the type - identical SQL text then reuses the
//! compiled statement in each lane's prepared-statement cache.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::Result;
use crate::error::Error;
use crate::model::{FieldDescriptor, FieldKind, Model};
use crate::value::{ColumnType, ScalarValue};

/// Text column holding the externally-serialized ("in/out") fields
pub(crate) const EXTRA_COLUMN: &str = "extra_props";

/// Derived, process-lifetime metadata for one model type
pub(crate) struct SchemaDescriptor<M: Model> {
   pub fields: Vec<FieldDescriptor<M>>,

   /// `{table}_index`, the companion container-index table
   pub index_table: String,

   // Memoized SQL text, built once so every lane reuses compiled statements
   pub select_sql: String,
   pub select_join_sql: String,
   pub select_by_pk_sql: String,
   pub replace_sql: String,
   pub container_replace_sql: String,
   pub container_min_sql: String,

   /// Smallest `update_time` ever written per container, so repeated head
   /// inserts skip the MIN() query
   pub container_min_update_time: Mutex<HashMap<i64, f64>>,

   /// Largest tail `update_time` written per container; tail stamps bump
   /// past it so same-instant inserts keep their insertion order
   pub container_last_update_time: Mutex<HashMap<i64, f64>>,
}

impl<M: Model> SchemaDescriptor<M> {
   pub fn build() -> Result<Self> {
      let table = M::table_name();
      let fields = M::fields();

      let Some(primary) = fields.first() else {
         return Err(Error::Mapping {
            table,
            field: "(primary)",
         });
      };
      // The primary field locates rows and keys container-index entries;
      // a nested reference cannot serve as either.
      if matches!(primary.kind, FieldKind::Nested(_)) {
         return Err(Error::Mapping {
            table,
            field: primary.name,
         });
      }

      let index_table = format!("{table}_index");
      let columns: Vec<&str> = fields.iter().map(|f| f.name).collect();
      let column_list = columns.join(", ");
      let qualified_list = columns
         .iter()
         .map(|c| format!("{table}.{c}"))
         .collect::<Vec<_>>()
         .join(", ");
      let placeholders = vec!["?"; columns.len() + 1].join(", ");

      let select_sql = format!("SELECT {column_list}, {EXTRA_COLUMN} FROM {table}");
      let select_join_sql = format!(
         "SELECT {qualified_list}, {table}.{EXTRA_COLUMN} FROM {table}, {index_table} AS i"
      );
      let select_by_pk_sql = format!(
         "SELECT {column_list}, {EXTRA_COLUMN} FROM {table} WHERE {primary} = ?",
         primary = primary.name
      );
      let replace_sql =
         format!("REPLACE INTO {table} ({column_list}, {EXTRA_COLUMN}) VALUES ({placeholders})");
      let container_replace_sql = format!(
         "REPLACE INTO {index_table} (id, container_hash, primary_key, update_time) VALUES (?, ?, ?, ?)"
      );
      let container_min_sql =
         format!("SELECT MIN(update_time) FROM {index_table} WHERE container_hash = ?");

      Ok(Self {
         fields,
         index_table,
         select_sql,
         select_join_sql,
         select_by_pk_sql,
         replace_sql,
         container_replace_sql,
         container_min_sql,
         container_min_update_time: Mutex::new(HashMap::new()),
         container_last_update_time: Mutex::new(HashMap::new()),
      })
   }

   pub fn table(&self) -> &'static str {
      M::table_name()
   }

   pub fn primary(&self) -> &FieldDescriptor<M> {
      &self.fields[0]
   }

   pub fn primary_column_type(&self) -> ColumnType {
      self.primary().kind.column_type()
   }

   /// Primary-key value of an instance; `None` is a mapping failure that
   /// aborts the whole operation
   pub fn primary_value(&self, instance: &M) -> Option<ScalarValue> {
      self.primary().kind.read(instance)
   }

   /// Mapped column names, in declared order
   pub fn column_names(&self) -> Vec<&'static str> {
      self.fields.iter().map(|f| f.name).collect()
   }

   pub fn create_table_sql(&self) -> String {
      let table = self.table();
      let mut sql = format!("CREATE TABLE IF NOT EXISTS {table} ({EXTRA_COLUMN} TEXT");
      for field in &self.fields {
         sql.push_str(", ");
         sql.push_str(field.name);
         sql.push(' ');
         sql.push_str(field.kind.column_type().sql_type());
      }
      sql.push_str(&format!(", PRIMARY KEY({})", self.primary().name));
      sql.push(')');
      sql
   }

   pub fn create_index_table_sql(&self) -> String {
      format!(
         "CREATE TABLE IF NOT EXISTS {index_table} (id TEXT, container_hash INTEGER, \
          primary_key {pk_type}, update_time REAL, PRIMARY KEY(id))",
         index_table = self.index_table,
         pk_type = self.primary_column_type().sql_type()
      )
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[derive(Clone, Default)]
   struct Sample {
      id: i64,
      label: String,
      weight: f64,
   }

   impl Model for Sample {
      fn table_name() -> &'static str {
         "sample"
      }

      fn fields() -> Vec<FieldDescriptor<Self>> {
         vec![
            FieldDescriptor {
               name: "id",
               kind: FieldKind::Long {
                  get: |m| m.id,
                  set: |m, v| m.id = v,
               },
            },
            FieldDescriptor {
               name: "label",
               kind: FieldKind::Text {
                  get: |m| m.label.clone(),
                  set: |m, v| m.label = v,
               },
            },
            FieldDescriptor {
               name: "weight",
               kind: FieldKind::Double {
                  get: |m| m.weight,
                  set: |m, v| m.weight = v,
               },
            },
         ]
      }

      fn new_empty() -> Self {
         Self::default()
      }
   }

   #[test]
   fn create_table_sql_types_columns() {
      let desc = SchemaDescriptor::<Sample>::build().unwrap();
      assert_eq!(
         desc.create_table_sql(),
         "CREATE TABLE IF NOT EXISTS sample (extra_props TEXT, id INTEGER, label TEXT, \
          weight REAL, PRIMARY KEY(id))"
      );
   }

   #[test]
   fn index_table_uses_primary_key_type() {
      let desc = SchemaDescriptor::<Sample>::build().unwrap();
      assert_eq!(
         desc.create_index_table_sql(),
         "CREATE TABLE IF NOT EXISTS sample_index (id TEXT, container_hash INTEGER, \
          primary_key INTEGER, update_time REAL, PRIMARY KEY(id))"
      );
   }

   #[test]
   fn replace_sql_binds_every_mapped_column() {
      let desc = SchemaDescriptor::<Sample>::build().unwrap();
      assert_eq!(
         desc.replace_sql,
         "REPLACE INTO sample (id, label, weight, extra_props) VALUES (?, ?, ?, ?)"
      );
      assert_eq!(
         desc.select_by_pk_sql,
         "SELECT id, label, weight, extra_props FROM sample WHERE id = ?"
      );
   }
}
