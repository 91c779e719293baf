//! Conditional queries with sharded parallel execution
//!
//! A [`Condition`] describes a predicate fragment, an order-by fragment,
//! limit/offset, direction, and an optional container id. Whole-table and
//! whole-container scans are sharded: the total row count is computed once,
//! split evenly across every lane (the final lane absorbs the remainder so
//! shard counts sum exactly), and the shards execute concurrently. Results
//! are reassembled in ascending offset order, never re-sorted - each
//! sub-query already carries the requested ordering.
//!
//! Counts always execute unsharded.

use std::sync::Arc;

use tracing::error;

use crate::Result;
use crate::descriptor::SchemaDescriptor;
use crate::model::Model;
use crate::schema::ensure_table;
use crate::store::Store;
use crate::value::decode_scalar;

/// Condition for [`Store::query`] and [`Store::count_where`]
///
/// Built with chained setters:
///
/// ```
/// use sqlx_sqlite_modelstore::Condition;
///
/// let condition = Condition::new()
///     .where_clause("age > 30")
///     .order_by("age")
///     .limit(30)
///     .offset(0)
///     .ascending(false);
/// ```
#[derive(Debug, Clone)]
pub struct Condition {
   pub(crate) where_sql: Option<String>,
   pub(crate) order_by: Option<String>,
   pub(crate) limit: Option<i64>,
   pub(crate) offset: Option<i64>,
   pub(crate) ascending: bool,
   /// 0 means "no container"
   pub(crate) container_id: i64,
}

impl Default for Condition {
   fn default() -> Self {
      Self {
         where_sql: None,
         order_by: None,
         limit: None,
         offset: None,
         ascending: true,
         container_id: 0,
      }
   }
}

impl Condition {
   pub fn new() -> Self {
      Self::default()
   }

   /// Boolean predicate fragment, e.g. `"age > 30"`. The fragment is
   /// spliced into the statement verbatim; it must come from trusted code,
   /// not user input.
   pub fn where_clause(mut self, fragment: impl Into<String>) -> Self {
      self.where_sql = Some(fragment.into());
      self
   }

   /// Column (or fragment) to order by. Defaults to `rowid` for table scans
   /// and `update_time` for container scans.
   pub fn order_by(mut self, fragment: impl Into<String>) -> Self {
      self.order_by = Some(fragment.into());
      self
   }

   pub fn limit(mut self, limit: i64) -> Self {
      self.limit = Some(limit);
      self
   }

   pub fn offset(mut self, offset: i64) -> Self {
      self.offset = Some(offset);
      self
   }

   pub fn ascending(mut self, ascending: bool) -> Self {
      self.ascending = ascending;
      self
   }

   /// Restrict the query to one container's members
   pub fn container(mut self, container_id: i64) -> Self {
      self.container_id = container_id;
      self
   }

   fn order_clause(&self, default_column: &str) -> String {
      let column = self.order_by.as_deref().unwrap_or(default_column);
      let direction = if self.ascending { "ASC" } else { "DESC" };
      format!(" ORDER BY {column} {direction}")
   }
}

/// Split `total` rows starting at `offset` into per-lane `(offset, limit)`
/// bounds. Every lane gets `total / lanes`; the final lane absorbs the
/// remainder so the limits sum exactly to `total`.
fn shard_bounds(total: i64, offset: i64, lanes: usize) -> Vec<(i64, i64)> {
   let lanes = lanes.max(1) as i64;
   let base = total / lanes;
   let remainder = total % lanes;

   let mut bounds = Vec::new();
   let mut cursor = offset;
   for lane in 0..lanes {
      let limit = base + if lane == lanes - 1 { remainder } else { 0 };
      if limit == 0 {
         continue;
      }
      bounds.push((cursor, limit));
      cursor += limit;
   }
   bounds
}

/// Execute a conditional query, sharded across every lane.
pub(crate) async fn run_query<M: Model>(store: &Store, condition: Condition) -> Result<Vec<M>> {
   let inner = store.active()?;
   inner.writer().wait_ready().await;

   // One schema pass up front so the shards start from Ready
   {
      let lane = inner.pool().acquire();
      let mut conn = lane.connect().await?;
      ensure_table::<M>(store, &mut conn).await?;
   }
   let descriptor = inner.registry().descriptor::<M>()?;

   let total = match condition.limit {
      Some(limit) => limit,
      None => run_count::<M>(store, &condition).await?,
   };
   let offset = condition.offset.unwrap_or(0);
   if total <= 0 {
      return Ok(Vec::new());
   }

   let bounds = shard_bounds(total, offset, inner.pool().len());
   let shards = bounds.iter().map(|(shard_offset, shard_limit)| {
      let sub_condition = condition
         .clone()
         .offset(*shard_offset)
         .limit(*shard_limit);
      run_shard::<M>(store, Arc::clone(&descriptor), sub_condition)
   });

   // Reassemble in ascending offset order; sub-queries already carry the
   // requested ordering, so no re-sort happens here.
   let mut results = Vec::new();
   for shard in futures::future::join_all(shards).await {
      match shard {
         Ok(mut rows) => results.append(&mut rows),
         Err(e) => error!(table = M::table_name(), error = %e, "Query shard failed"),
      }
   }
   Ok(results)
}

/// One bounded sub-query on one lane
async fn run_shard<M: Model>(
   store: &Store,
   descriptor: Arc<SchemaDescriptor<M>>,
   condition: Condition,
) -> Result<Vec<M>> {
   let inner = store.active()?;
   let lane = inner.pool().acquire();
   let mut conn = lane.connect().await?;

   let limit_clause = format!(
      " LIMIT {} OFFSET {}",
      condition.limit.unwrap_or(-1),
      condition.offset.unwrap_or(0)
   );

   if condition.container_id != 0 {
      if let Some(where_sql) = &condition.where_sql {
         // container + predicate: join against the container index
         let sql = format!(
            "{join} WHERE {table}.{primary} = i.primary_key AND i.container_hash = {container} \
             AND ({where_sql}){order}{limit}",
            join = descriptor.select_join_sql,
            table = descriptor.table(),
            primary = descriptor.primary().name,
            container = condition.container_id,
            order = condition.order_clause("i.update_time"),
            limit = limit_clause,
         );
         let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
         let mut instances = Vec::with_capacity(rows.len());
         for row in &rows {
            instances.push(crate::persist::hydrate_row(store, &descriptor, row, &mut conn).await?);
         }
         Ok(instances)
      } else {
         // container only: read primary keys from the index, hydrate each
         // through the cache-first path on this same lane
         let sql = format!(
            "SELECT primary_key FROM {index_table} AS i WHERE i.container_hash = {container}\
             {order}{limit}",
            index_table = descriptor.index_table,
            container = condition.container_id,
            order = condition.order_clause("i.update_time"),
            limit = limit_clause,
         );
         let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
         let mut instances = Vec::with_capacity(rows.len());
         for row in &rows {
            let Some(primary_key) = decode_scalar(row, 0, descriptor.primary_column_type())?
            else {
               continue;
            };
            if let Some(instance) = store.find_on_lane::<M>(primary_key, &mut conn).await? {
               instances.push(instance);
            }
         }
         Ok(instances)
      }
   } else {
      let mut sql = descriptor.select_sql.clone();
      if let Some(where_sql) = &condition.where_sql {
         sql.push_str(" WHERE ");
         sql.push_str(where_sql);
      }
      sql.push_str(&condition.order_clause("rowid"));
      sql.push_str(&limit_clause);

      let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
      let mut instances = Vec::with_capacity(rows.len());
      for row in &rows {
         instances.push(crate::persist::hydrate_row(store, &descriptor, row, &mut conn).await?);
      }
      Ok(instances)
   }
}

/// Count matching rows. Always unsharded.
pub(crate) async fn run_count<M: Model>(store: &Store, condition: &Condition) -> Result<i64> {
   let inner = store.active()?;
   inner.writer().wait_ready().await;

   let lane = inner.pool().acquire();
   let mut conn = lane.connect().await?;
   ensure_table::<M>(store, &mut conn).await?;
   let descriptor = inner.registry().descriptor::<M>()?;

   let sql = if condition.container_id != 0 {
      if let Some(where_sql) = &condition.where_sql {
         format!(
            "SELECT COUNT(*) FROM {table}, {index_table} AS i \
             WHERE {table}.{primary} = i.primary_key AND i.container_hash = {container} \
             AND ({where_sql})",
            table = descriptor.table(),
            index_table = descriptor.index_table,
            primary = descriptor.primary().name,
            container = condition.container_id,
         )
      } else {
         format!(
            "SELECT COUNT(*) FROM {index_table} AS i WHERE i.container_hash = {container}",
            index_table = descriptor.index_table,
            container = condition.container_id,
         )
      }
   } else if let Some(where_sql) = &condition.where_sql {
      format!(
         "SELECT COUNT(*) FROM {table} WHERE {where_sql}",
         table = descriptor.table()
      )
   } else {
      format!("SELECT COUNT(*) FROM {table}", table = descriptor.table())
   };

   let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
   Ok(count)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn shards_sum_exactly_with_remainder() {
      let bounds = shard_bounds(103, 0, 17);
      assert_eq!(bounds.len(), 17);
      assert_eq!(bounds.iter().map(|(_, limit)| limit).sum::<i64>(), 103);
      // contiguous, ascending offsets
      let mut expected_offset = 0;
      for (offset, limit) in &bounds {
         assert_eq!(*offset, expected_offset);
         expected_offset += limit;
      }
      // final lane absorbs the remainder: 103 = 17 * 6 + 1
      assert_eq!(bounds.last(), Some(&(96, 7)));
   }

   #[test]
   fn fewer_rows_than_lanes_collapses_to_one_shard() {
      let bounds = shard_bounds(3, 0, 5);
      assert_eq!(bounds, vec![(0, 3)]);
   }

   #[test]
   fn offset_moves_every_shard() {
      let bounds = shard_bounds(10, 40, 2);
      assert_eq!(bounds, vec![(40, 5), (45, 5)]);
   }

   #[test]
   fn single_lane_takes_everything() {
      let bounds = shard_bounds(12, 0, 1);
      assert_eq!(bounds, vec![(0, 12)]);
   }

   #[test]
   fn condition_defaults() {
      let condition = Condition::new();
      assert!(condition.ascending);
      assert_eq!(condition.container_id, 0);
      assert!(condition.where_sql.is_none());
   }

   #[test]
   fn order_clause_prefers_explicit_fragment() {
      let condition = Condition::new().order_by("age").ascending(false);
      assert_eq!(condition.order_clause("rowid"), " ORDER BY age DESC");
      assert_eq!(Condition::new().order_clause("rowid"), " ORDER BY rowid ASC");
   }
}
