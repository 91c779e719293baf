//! The store: explicit, process-wide entry point for every operation
//!
//! A [`Store`] owns the lane pool, the schema registry, the write-behind
//! engine, and the change notifier. It is explicitly constructed (no global
//! instance) and cheaply cloneable; clones share the same services.
//!
//! Write semantics are at-least-once and best-effort: `save` and `delete`
//! update the memory cache synchronously, buffer the database work, and
//! return immediately with no error channel. Reads are served from the
//! cache when possible and fall through to the database otherwise, sharded
//! across the pool. Errors on either path are logged and become absent or
//! empty results - availability over strict signaling.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use sqlx_sqlite_lane_pool::{LanePool, LanePoolConfig};

use crate::Result;
use crate::cache::ModelCache;
use crate::descriptor::SchemaDescriptor;
use crate::error::Error;
use crate::model::{FieldKind, Model};
use crate::notify::ChangeNotifier;
use crate::persist::{ContainerEntryDelete, RowDelete, RowUpsert, hydrate_row};
use crate::query::{Condition, run_count, run_query};
use crate::schema::{SchemaRegistry, ensure_table};
use crate::value::{ScalarValue, bind_scalar};
use crate::writeback::{WriteBehind, spawn_flush_worker};

/// Configuration for [`Store::open`]
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_modelstore::StoreConfig;
///
/// // Use defaults
/// let config = StoreConfig::default();
///
/// // Override just one field
/// let config = StoreConfig {
///     flush_interval_ms: 250,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
   /// Lane pool settings (pool size, busy timeout, statement cache)
   pub pool: LanePoolConfig,

   /// Base debounce interval between flushes, in milliseconds
   ///
   /// Default: 1000
   pub flush_interval_ms: u64,

   /// Upper bound the flush interval backs off to under sustained load,
   /// in milliseconds
   ///
   /// Default: 8000
   pub flush_max_interval_ms: u64,
}

impl Default for StoreConfig {
   fn default() -> Self {
      Self {
         pool: LanePoolConfig::default(),
         flush_interval_ms: 1000,
         flush_max_interval_ms: 8000,
      }
   }
}

pub(crate) struct StoreInner {
   pool: Arc<LanePool>,
   registry: SchemaRegistry,
   writer: WriteBehind,
   notifier: Arc<ChangeNotifier>,
   adopted: bool,
   tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StoreInner {
   pub fn pool(&self) -> &Arc<LanePool> {
      &self.pool
   }

   pub fn registry(&self) -> &SchemaRegistry {
      &self.registry
   }

   pub fn writer(&self) -> &WriteBehind {
      &self.writer
   }

   pub fn notifier(&self) -> &ChangeNotifier {
      &self.notifier
   }

   pub fn adopted_previous_version(&self) -> bool {
      self.adopted
   }
}

/// Embedded object store over SQLite
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_modelstore::{FieldDescriptor, FieldKind, Model, Store};
///
/// #[derive(Clone, Default)]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Model for User {
///     fn table_name() -> &'static str {
///         "user"
///     }
///     fn fields() -> Vec<FieldDescriptor<Self>> {
///         vec![
///             FieldDescriptor {
///                 name: "id",
///                 kind: FieldKind::Long { get: |m| m.id, set: |m, v| m.id = v },
///             },
///             FieldDescriptor {
///                 name: "name",
///                 kind: FieldKind::Text { get: |m| m.name.clone(), set: |m, v| m.name = v },
///             },
///         ]
///     }
///     fn new_empty() -> Self {
///         Self::default()
///     }
/// }
///
/// # async fn example() {
/// // Bump the version string whenever the model layout changes
/// let store = Store::open("./data", "1", None).await;
///
/// let alice = User { id: 1, name: "Alice".into() };
/// store.save(&alice); // cache now, database later, never blocks
///
/// let found: Option<User> = store.find(1i64).await; // cache hit, no query
/// assert_eq!(found.map(|u| u.name), Some("Alice".into()));
///
/// store.close().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Store {
   inner: Option<Arc<StoreInner>>,
}

impl Store {
   /// Open (or create) the versioned database under `base_dir` and start
   /// the background services.
   ///
   /// If a database file for a different version exists it is renamed to
   /// the new version's path and first access to each table migrates it in
   /// place. If the storage directory cannot be created, the returned store
   /// is *inert*: every operation is a silent best-effort no-op. Use
   /// [`is_active`](Self::is_active) to tell the two apart.
   ///
   /// Must be called from within a tokio runtime.
   pub async fn open(
      base_dir: impl AsRef<Path>,
      version: &str,
      custom_config: Option<StoreConfig>,
   ) -> Store {
      let config = custom_config.unwrap_or_default();

      let (pool, adopted) =
         match LanePool::open(base_dir.as_ref(), version, Some(config.pool.clone())).await {
            Ok(opened) => opened,
            Err(e) => {
               warn!(error = %e, "Store initialization failed; store is inert");
               return Store { inner: None };
            }
         };

      let notifier = ChangeNotifier::new();
      let inner = Arc::new(StoreInner {
         pool,
         registry: SchemaRegistry::new(),
         writer: WriteBehind::new(config.flush_interval_ms, config.flush_max_interval_ms),
         notifier: Arc::clone(&notifier),
         adopted,
         tasks: Mutex::new(Vec::new()),
      });

      let store = Store { inner: Some(inner) };
      if let Ok(inner) = store.active() {
         let flush_worker = spawn_flush_worker(store.clone());
         let notify_task = notifier.spawn();
         inner.tasks.lock().extend([flush_worker, notify_task]);
         // The initialization flush must complete before reads that depend
         // on previously persisted data; waiting here makes every read
         // after open safe without its own gate having to block.
         inner.writer.wait_ready().await;
      }
      store
   }

   /// Whether the store opened a database (false for inert stores and after
   /// [`close`](Self::close))
   pub fn is_active(&self) -> bool {
      self
         .inner
         .as_ref()
         .is_some_and(|inner| !inner.pool.is_closed())
   }

   pub(crate) fn active(&self) -> Result<&Arc<StoreInner>> {
      self.inner.as_ref().ok_or(Error::Inactive)
   }

   pub(crate) fn descriptor<M: Model>(&self) -> Result<Arc<SchemaDescriptor<M>>> {
      self.active()?.registry.descriptor::<M>()
   }

   fn cache<M: Model>(&self) -> Option<Arc<ModelCache<M>>> {
      Some(self.inner.as_ref()?.registry.cache::<M>())
   }

   // ---- writes -----------------------------------------------------------

   /// Upsert an instance: cache synchronously, database via the write-behind
   /// buffer. Returns immediately.
   pub fn save<M: Model>(&self, instance: &M) {
      self.save_impl(instance, None);
   }

   /// Upsert an instance and record its membership in `container_id`, at
   /// the head (`at_top`) or tail of the container.
   pub fn save_in<M: Model>(&self, instance: &M, container_id: i64, at_top: bool) {
      self.save_impl(instance, Some((container_id, at_top)));
   }

   fn save_impl<M: Model>(&self, instance: &M, container: Option<(i64, bool)>) {
      let Some(inner) = &self.inner else {
         return;
      };
      let descriptor = match inner.registry.descriptor::<M>() {
         Ok(descriptor) => descriptor,
         Err(e) => {
            error!(table = M::table_name(), error = %e, "Save aborted");
            return;
         }
      };
      let Some(primary_key) = descriptor.primary_value(instance) else {
         error!(table = M::table_name(), "Save aborted: primary value unavailable");
         return;
      };

      let cache = inner.registry.cache::<M>();
      cache.insert(primary_key.clone(), instance.clone());
      if let Some((container_id, at_top)) = container {
         cache.insert_container(primary_key, container_id, at_top, instance.clone());
      }

      // Nested references persist through their own mappers, recursively.
      // Cycles are the caller's responsibility to avoid.
      for field in &descriptor.fields {
         if let FieldKind::Nested(nested) = &field.kind {
            nested.enqueue_save(instance, self);
         }
      }

      inner.notifier.set_type_hook(M::table_name(), M::changed);
      inner.writer.push(Box::new(RowUpsert {
         instance: instance.clone(),
         container,
      }));
   }

   /// Delete an instance's row and every container membership it holds.
   /// Cache synchronously, database via the write-behind buffer.
   pub fn delete<M: Model>(&self, instance: &M) {
      let Some(inner) = &self.inner else {
         return;
      };
      let Some(primary_key) = self.primary_of(instance) else {
         return;
      };

      inner.registry.cache::<M>().remove(&primary_key);
      inner.notifier.set_type_hook(M::table_name(), M::changed);
      inner.writer.push(Box::new(RowDelete::<M> {
         primary_key,
         _marker: PhantomData,
      }));
   }

   /// Remove an instance from one container without deleting its row
   pub fn delete_from<M: Model>(&self, instance: &M, container_id: i64) {
      let Some(inner) = &self.inner else {
         return;
      };
      let Some(primary_key) = self.primary_of(instance) else {
         return;
      };

      inner
         .registry
         .cache::<M>()
         .remove_from_container(&primary_key, container_id);
      inner.notifier.set_type_hook(M::table_name(), M::changed);
      inner.writer.push(Box::new(ContainerEntryDelete::<M> {
         primary_key,
         container_id,
         _marker: PhantomData,
      }));
   }

   fn primary_of<M: Model>(&self, instance: &M) -> Option<ScalarValue> {
      match self.descriptor::<M>() {
         Ok(descriptor) => {
            let primary = descriptor.primary_value(instance);
            if primary.is_none() {
               error!(table = M::table_name(), "Operation aborted: primary value unavailable");
            }
            primary
         }
         Err(e) => {
            error!(table = M::table_name(), error = %e, "Operation aborted");
            None
         }
      }
   }

   // ---- reads ------------------------------------------------------------

   /// Find an instance by primary-key value.
   ///
   /// A cache hit returns without touching the database; a miss waits for
   /// the initialization flush, queries on one lane, and populates the
   /// cache.
   pub async fn find<M: Model>(&self, primary_key: impl Into<ScalarValue>) -> Option<M> {
      let primary_key = primary_key.into();
      let inner = self.inner.as_ref()?;

      if let Some(hit) = inner.registry.cache::<M>().get(&primary_key) {
         return Some(hit);
      }

      inner.writer.wait_ready().await;
      let result: Result<Option<M>> = async {
         let lane = inner.pool.acquire();
         let mut conn = lane.connect().await?;
         self.find_on_lane::<M>(primary_key, &mut conn).await
      }
      .await;

      match result {
         Ok(found) => found,
         Err(e) => {
            error!(table = M::table_name(), error = %e, "find failed");
            None
         }
      }
   }

   /// Cache-first lookup that stays on the supplied lane connection; the
   /// reentrant path used by nested-field hydration and container scans.
   pub(crate) async fn find_on_lane<M: Model>(
      &self,
      primary_key: ScalarValue,
      conn: &mut SqliteConnection,
   ) -> Result<Option<M>> {
      let inner = self.active()?;
      let cache = inner.registry.cache::<M>();
      if let Some(hit) = cache.get(&primary_key) {
         return Ok(Some(hit));
      }

      ensure_table::<M>(self, conn).await?;
      let descriptor = inner.registry.descriptor::<M>()?;

      let row = bind_scalar(
         sqlx::query(&descriptor.select_by_pk_sql),
         primary_key.clone(),
      )
      .fetch_optional(&mut *conn)
      .await?;
      let Some(row) = row else {
         return Ok(None);
      };

      let instance = hydrate_row(self, &descriptor, &row, conn).await?;
      cache.insert(primary_key, instance.clone());
      Ok(Some(instance))
   }

   /// All instances of `M`, ascending or descending by insertion order.
   ///
   /// Served from cache when the cache holds anything for the type;
   /// otherwise a sharded table scan that populates the cache.
   pub async fn query_all<M: Model>(&self, ascending: bool) -> Vec<M> {
      let Some(inner) = &self.inner else {
         return Vec::new();
      };

      let cache = inner.registry.cache::<M>();
      if let Some(cached) = cache.all(ascending) {
         return cached;
      }

      let results = self.query::<M>(Condition::new().ascending(ascending)).await;
      if let Ok(descriptor) = inner.registry.descriptor::<M>() {
         for instance in &results {
            if let Some(primary_key) = descriptor.primary_value(instance) {
               cache.insert(primary_key, instance.clone());
            }
         }
      }
      results
   }

   /// All members of one container, ordered by the container's
   /// `update_time` (head inserts first when ascending)
   pub async fn query_all_in<M: Model>(&self, ascending: bool, container_id: i64) -> Vec<M> {
      let Some(inner) = &self.inner else {
         return Vec::new();
      };

      let cache = inner.registry.cache::<M>();
      if let Some(cached) = cache.container_all(container_id, ascending) {
         return cached;
      }

      let results = self
         .query::<M>(Condition::new().ascending(ascending).container(container_id))
         .await;
      if let Ok(descriptor) = inner.registry.descriptor::<M>() {
         for instance in &results {
            if let Some(primary_key) = descriptor.primary_value(instance) {
               cache.insert(primary_key.clone(), instance.clone());
               // repopulating in read order: append to the side that
               // reproduces this order on the next cache scan
               cache.insert_container(primary_key, container_id, !ascending, instance.clone());
            }
         }
      }
      results
   }

   /// Conditional query, sharded across the pool. See [`Condition`].
   pub async fn query<M: Model>(&self, condition: Condition) -> Vec<M> {
      if self.inner.is_none() {
         return Vec::new();
      }
      match run_query::<M>(self, condition).await {
         Ok(results) => results,
         Err(e) => {
            error!(table = M::table_name(), error = %e, "query failed");
            Vec::new()
         }
      }
   }

   /// Number of rows in the type's table
   pub async fn count<M: Model>(&self) -> i64 {
      self.count_where::<M>(Condition::new()).await
   }

   /// Number of rows matching a condition (container and/or predicate)
   pub async fn count_where<M: Model>(&self, condition: Condition) -> i64 {
      if self.inner.is_none() {
         return 0;
      }
      match run_count::<M>(self, &condition).await {
         Ok(count) => count,
         Err(e) => {
            error!(table = M::table_name(), error = %e, "count failed");
            0
         }
      }
   }

   // ---- bulk + maintenance -----------------------------------------------

   /// Clear the type's table, its container index, and its cache
   pub async fn remove_all<M: Model>(&self) {
      let Some(inner) = &self.inner else {
         return;
      };
      inner.registry.cache::<M>().clear();

      let result: Result<()> = async {
         inner.writer.wait_ready().await;
         let lane = inner.pool.acquire();
         let mut conn = lane.connect().await?;
         ensure_table::<M>(self, &mut conn).await?;
         let descriptor = inner.registry.descriptor::<M>()?;

         sqlx::query(&format!("DELETE FROM {}", descriptor.table()))
            .execute(&mut *conn)
            .await?;
         sqlx::query(&format!("DELETE FROM {}", descriptor.index_table))
            .execute(&mut *conn)
            .await?;
         Ok(())
      }
      .await;

      if let Err(e) = result {
         error!(table = M::table_name(), error = %e, "remove_all failed");
      }
   }

   /// Empty one container. Rows and their cached instances are untouched;
   /// only the membership goes away.
   pub async fn remove_all_in<M: Model>(&self, container_id: i64) {
      let Some(inner) = &self.inner else {
         return;
      };
      inner.registry.cache::<M>().clear_container(container_id);

      let result: Result<()> = async {
         inner.writer.wait_ready().await;
         let lane = inner.pool.acquire();
         let mut conn = lane.connect().await?;
         ensure_table::<M>(self, &mut conn).await?;
         let descriptor = inner.registry.descriptor::<M>()?;

         sqlx::query(&format!(
            "DELETE FROM {} WHERE container_hash = ?",
            descriptor.index_table
         ))
         .bind(container_id)
         .execute(&mut *conn)
         .await?;
         Ok(())
      }
      .await;

      if let Err(e) = result {
         error!(table = M::table_name(), error = %e, "remove_all_in failed");
      }
   }

   /// Create a single-column index on the type's table
   pub async fn create_index<M: Model>(&self, field: &str) {
      self
         .index_statement::<M>(field, |table, index_name| {
            format!("CREATE INDEX IF NOT EXISTS {index_name} ON {table} ({field})")
         })
         .await;
   }

   /// Drop an index created with [`create_index`](Self::create_index)
   pub async fn drop_index<M: Model>(&self, field: &str) {
      self
         .index_statement::<M>(field, |_, index_name| {
            format!("DROP INDEX IF EXISTS {index_name}")
         })
         .await;
   }

   async fn index_statement<M: Model>(
      &self,
      field: &str,
      build: impl FnOnce(&str, &str) -> String,
   ) {
      let Some(inner) = &self.inner else {
         return;
      };

      let result: Result<()> = async {
         let lane = inner.pool.acquire();
         let mut conn = lane.connect().await?;
         ensure_table::<M>(self, &mut conn).await?;

         let table = M::table_name();
         let index_name = format!("{field}_{table}_idx");
         sqlx::query(&build(table, &index_name))
            .execute(&mut *conn)
            .await?;
         Ok(())
      }
      .await;

      if let Err(e) = result {
         error!(table = M::table_name(), field, error = %e, "index statement failed");
      }
   }

   // ---- cache + notifications --------------------------------------------

   /// Register a listener called (coalesced) after batches of writes to `M`
   /// commit
   pub fn add_change_listener<M: Model>(&self, listener: impl Fn() + Send + Sync + 'static) {
      if let Some(inner) = &self.inner {
         inner.notifier.add_listener(M::table_name(), listener);
      }
   }

   /// Drop every cached instance and container list for `M`. The next read
   /// falls through to the database.
   pub fn clear_cache<M: Model>(&self) {
      if let Some(cache) = self.cache::<M>() {
         cache.clear();
      }
   }

   // ---- lifecycle --------------------------------------------------------

   /// Force a full drain of the write-behind buffer, bypassing the
   /// debounce, and wait for it to commit.
   pub async fn flush(&self) {
      let Some(inner) = &self.inner else {
         return;
      };
      inner.writer.drain(self, true).await;
   }

   /// Drain outstanding writes, stop the background services, and close
   /// every lane. Operations after close behave like operations on an
   /// inert store.
   pub async fn close(&self) {
      let Some(inner) = &self.inner else {
         return;
      };

      inner.writer.stop();
      inner.notifier.stop();

      let handles: Vec<JoinHandle<()>> = inner.tasks.lock().drain(..).collect();
      for handle in handles {
         let _ = handle.await;
      }

      inner.pool.close().await;
   }
}
