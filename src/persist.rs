//! Row and container-index persistence
//!
//! The concrete [`QueuedWrite`] implementations the write-behind engine
//! applies, plus row hydration for the query side. Field values move
//! through the declared accessors only; nested references are persisted and
//! resolved recursively through their own mappers, always on the caller's
//! connection.

use std::marker::PhantomData;

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnection, SqliteRow};

use crate::Result;
use crate::descriptor::SchemaDescriptor;
use crate::error::Error;
use crate::model::{FieldKind, Model};
use crate::schema::ensure_table;
use crate::store::Store;
use crate::value::{ScalarValue, bind_null, bind_scalar, decode_scalar};
use crate::writeback::QueuedWrite;

fn now_epoch() -> f64 {
   std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs_f64()
}

/// Upsert one row, optionally recording container membership
pub(crate) struct RowUpsert<M: Model> {
   pub instance: M,
   /// `(container id, at_top)` when the save targets a container
   pub container: Option<(i64, bool)>,
}

impl<M: Model> QueuedWrite for RowUpsert<M> {
   fn table(&self) -> &'static str {
      M::table_name()
   }

   fn prepare<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(ensure_table::<M>(store, conn))
   }

   fn apply<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(async move {
         let descriptor = store.descriptor::<M>()?;

         if let Some((container_id, at_top)) = self.container {
            let primary_key =
               descriptor
                  .primary_value(&self.instance)
                  .ok_or_else(|| Error::Mapping {
                     table: descriptor.table(),
                     field: descriptor.primary().name,
                  })?;
            upsert_container_entry(&descriptor, primary_key, container_id, at_top, conn).await?;
         }

         replace_row(&descriptor, &self.instance, conn).await
      })
   }
}

/// Delete one row and prune its container-index entries
pub(crate) struct RowDelete<M: Model> {
   pub primary_key: ScalarValue,
   pub _marker: PhantomData<fn() -> M>,
}

impl<M: Model> QueuedWrite for RowDelete<M> {
   fn table(&self) -> &'static str {
      M::table_name()
   }

   fn prepare<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(ensure_table::<M>(store, conn))
   }

   fn apply<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(async move {
         let descriptor = store.descriptor::<M>()?;

         let delete_sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            descriptor.table(),
            descriptor.primary().name
         );
         bind_scalar(sqlx::query(&delete_sql), self.primary_key.clone())
            .execute(&mut *conn)
            .await?;

         // A row without its index entries would resurrect in container
         // scans, so membership is pruned together with the row.
         let prune_sql = format!(
            "DELETE FROM {} WHERE primary_key = ?",
            descriptor.index_table
         );
         bind_scalar(sqlx::query(&prune_sql), self.primary_key.clone())
            .execute(&mut *conn)
            .await?;
         Ok(())
      })
   }
}

/// Remove one container membership without touching the row
pub(crate) struct ContainerEntryDelete<M: Model> {
   pub primary_key: ScalarValue,
   pub container_id: i64,
   pub _marker: PhantomData<fn() -> M>,
}

impl<M: Model> QueuedWrite for ContainerEntryDelete<M> {
   fn table(&self) -> &'static str {
      M::table_name()
   }

   fn prepare<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(ensure_table::<M>(store, conn))
   }

   fn apply<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(async move {
         let descriptor = store.descriptor::<M>()?;

         let remove_sql = format!(
            "DELETE FROM {} WHERE container_hash = ? AND primary_key = ?",
            descriptor.index_table
         );
         bind_scalar(
            sqlx::query(&remove_sql).bind(self.container_id),
            self.primary_key.clone(),
         )
         .execute(&mut *conn)
         .await?;
         Ok(())
      })
   }
}

/// REPLACE the instance's row, binding every mapped field in declared order
/// plus the externally-serialized blob
async fn replace_row<M: Model>(
   descriptor: &SchemaDescriptor<M>,
   instance: &M,
   conn: &mut SqliteConnection,
) -> Result<()> {
   let mut query = sqlx::query(&descriptor.replace_sql);
   for field in &descriptor.fields {
      query = match field.kind.read(instance) {
         Some(value) => bind_scalar(query, value),
         // an absent nested reference stores NULL
         None => bind_null(query, field.kind.column_type()),
      };
   }
   query = bind_scalar(
      query,
      ScalarValue::Text(instance.encode_extra().unwrap_or_default()),
   );
   query.execute(&mut *conn).await?;
   Ok(())
}

/// REPLACE the container-index entry for `(primary_key, container_id)`.
///
/// Head inserts are stamped one second below the container's smallest
/// `update_time` so they sort before everything already present; tail
/// inserts take the current wall-clock time.
async fn upsert_container_entry<M: Model>(
   descriptor: &SchemaDescriptor<M>,
   primary_key: ScalarValue,
   container_id: i64,
   at_top: bool,
   conn: &mut SqliteConnection,
) -> Result<()> {
   let update_time = if at_top {
      head_timestamp(descriptor, container_id, conn).await?
   } else {
      tail_timestamp(descriptor, container_id)
   };

   let entry_id = format!("{primary_key}-{container_id}");
   let mut query = sqlx::query(&descriptor.container_replace_sql)
      .bind(entry_id)
      .bind(container_id);
   query = bind_scalar(query, primary_key);
   query = query.bind(update_time);
   query.execute(&mut *conn).await?;
   Ok(())
}

/// Timestamp for a tail insert: wall-clock time, bumped past the previous
/// tail stamp so inserts landing on the same clock reading keep their
/// insertion order under `ORDER BY update_time`.
fn tail_timestamp<M: Model>(descriptor: &SchemaDescriptor<M>, container_id: i64) -> f64 {
   let mut last = descriptor.container_last_update_time.lock();
   let mut update_time = now_epoch();
   if let Some(previous) = last.get(&container_id) {
      if update_time <= *previous {
         update_time = previous + 1e-6;
      }
   }
   last.insert(container_id, update_time);
   update_time
}

/// Timestamp for a head insert: smallest update_time in the container minus
/// one. The minimum is memoized per container so repeated head inserts skip
/// the MIN() query; only a head insert can lower it.
async fn head_timestamp<M: Model>(
   descriptor: &SchemaDescriptor<M>,
   container_id: i64,
   conn: &mut SqliteConnection,
) -> Result<f64> {
   let memoized = descriptor
      .container_min_update_time
      .lock()
      .get(&container_id)
      .copied();

   let current_min = match memoized {
      Some(min) => Some(min),
      None => sqlx::query_scalar::<_, Option<f64>>(&descriptor.container_min_sql)
         .bind(container_id)
         .fetch_one(&mut *conn)
         .await?,
   };

   let update_time = match current_min {
      Some(min) => min - 1.0,
      None => now_epoch(),
   };
   descriptor
      .container_min_update_time
      .lock()
      .insert(container_id, update_time);
   Ok(update_time)
}

/// Rebuild an instance from a row: mapped fields in declared column order,
/// nested references resolved through their own mappers on the same
/// connection, then the externally-serialized blob.
pub(crate) fn hydrate_row<'a, M: Model>(
   store: &'a Store,
   descriptor: &'a SchemaDescriptor<M>,
   row: &'a SqliteRow,
   conn: &'a mut SqliteConnection,
) -> BoxFuture<'a, Result<M>> {
   Box::pin(async move {
      let mut instance = M::new_empty();

      for (index, field) in descriptor.fields.iter().enumerate() {
         match &field.kind {
            FieldKind::Nested(nested) => {
               if let Some(primary_key) = decode_scalar(row, index, nested.primary_column_type())? {
                  nested
                     .hydrate(&mut instance, primary_key, store, conn)
                     .await?;
               }
            }
            kind => {
               let column_type = kind.column_type();
               let value = decode_scalar(row, index, column_type)?
                  .unwrap_or_else(|| ScalarValue::default_for(column_type));
               kind.write_scalar(&mut instance, value);
            }
         }
      }

      if let Some(raw) = decode_scalar(
         row,
         descriptor.fields.len(),
         crate::value::ColumnType::Text,
      )? {
         if let ScalarValue::Text(blob) = raw {
            if !blob.is_empty() {
               instance.decode_extra(&blob);
            }
         }
      }

      Ok(instance)
   })
}
