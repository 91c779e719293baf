//! Schema registry and the create/migrate state machine
//!
//! Every model type moves through `Uninitialized -> Initializing -> Ready`
//! exactly once per process, gated by one global registration lock plus a
//! per-type state flag. The very first database operation for a type either
//! creates its tables or migrates them in place, depending on whether the
//! pool adopted a previous version's database file.
//!
//! A type whose create or migrate fails is marked `Failed` and stays
//! un-queryable until the process restarts; the error is logged, never
//! surfaced.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, error};

use crate::Result;
use crate::cache::ModelCache;
use crate::descriptor::{EXTRA_COLUMN, SchemaDescriptor};
use crate::error::Error;
use crate::model::Model;
use crate::store::Store;

/// Terminal states of the per-type schema machine; a type absent from the
/// map is `Uninitialized`, and `Initializing` is holding the edit lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableState {
   Ready,
   Failed,
}

/// Process-wide registry of descriptors, caches, and table states
///
/// Explicitly constructed and owned by the store - there is no global
/// instance. The registry maps a type identifier to its schema descriptor
/// and cache; both are created lazily on first access and live as long as
/// the store.
pub(crate) struct SchemaRegistry {
   descriptors: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
   caches: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
   states: RwLock<HashMap<TypeId, TableState>>,
   /// Global type-registration lock: one create/migrate at a time
   edit_lock: tokio::sync::Mutex<()>,
}

impl SchemaRegistry {
   pub fn new() -> Self {
      Self {
         descriptors: RwLock::new(HashMap::new()),
         caches: RwLock::new(HashMap::new()),
         states: RwLock::new(HashMap::new()),
         edit_lock: tokio::sync::Mutex::new(()),
      }
   }

   /// Schema descriptor for `M`, building it on first access
   pub fn descriptor<M: Model>(&self) -> Result<Arc<SchemaDescriptor<M>>> {
      if let Some(existing) = self.descriptors.read().get(&TypeId::of::<M>()) {
         if let Ok(descriptor) = Arc::clone(existing).downcast::<SchemaDescriptor<M>>() {
            return Ok(descriptor);
         }
      }

      let built = Arc::new(SchemaDescriptor::<M>::build()?);
      let mut descriptors = self.descriptors.write();
      let entry = descriptors
         .entry(TypeId::of::<M>())
         .or_insert_with(|| Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
      // Entries are keyed by TypeId: the stored value is always this
      // concrete type.
      Ok(Arc::clone(entry)
         .downcast::<SchemaDescriptor<M>>()
         .unwrap_or(built))
   }

   /// Memory cache for `M`, created with the type's cache policy on first access
   pub fn cache<M: Model>(&self) -> Arc<ModelCache<M>> {
      if let Some(existing) = self.caches.read().get(&TypeId::of::<M>()) {
         if let Ok(cache) = Arc::clone(existing).downcast::<ModelCache<M>>() {
            return cache;
         }
      }

      let mut caches = self.caches.write();
      let entry = caches
         .entry(TypeId::of::<M>())
         .or_insert_with(|| Arc::new(ModelCache::<M>::new(M::cache_policy())));
      match Arc::clone(entry).downcast::<ModelCache<M>>() {
         Ok(cache) => cache,
         Err(_) => {
            let fresh = Arc::new(ModelCache::<M>::new(M::cache_policy()));
            *entry = Arc::clone(&fresh) as Arc<dyn Any + Send + Sync>;
            fresh
         }
      }
   }

   fn state<M: Model>(&self) -> Option<TableState> {
      self.states.read().get(&TypeId::of::<M>()).copied()
   }

   fn set_state<M: Model>(&self, state: TableState) {
      self.states.write().insert(TypeId::of::<M>(), state);
   }
}

/// Run the exactly-once create-or-migrate action for `M` on the caller's
/// lane connection.
///
/// Cheap after the first call: a `Ready` flag short-circuits before the
/// lock. Concurrent first calls serialize on the registration lock and the
/// loser sees the winner's flag on re-check.
pub(crate) async fn ensure_table<M: Model>(
   store: &Store,
   conn: &mut SqliteConnection,
) -> Result<()> {
   let inner = store.active()?;
   let registry = inner.registry();

   match registry.state::<M>() {
      Some(TableState::Ready) => return Ok(()),
      Some(TableState::Failed) => return Err(Error::SchemaUnavailable(M::table_name())),
      None => {}
   }

   let _guard = registry.edit_lock.lock().await;
   match registry.state::<M>() {
      Some(TableState::Ready) => return Ok(()),
      Some(TableState::Failed) => return Err(Error::SchemaUnavailable(M::table_name())),
      None => {}
   }

   let result = match registry.descriptor::<M>() {
      Ok(descriptor) => {
         if inner.adopted_previous_version() {
            migrate_table(&descriptor, conn).await
         } else {
            create_table(&descriptor, conn).await
         }
      }
      Err(e) => Err(e),
   };

   match result {
      Ok(()) => {
         debug!(table = M::table_name(), "Table ready");
         registry.set_state::<M>(TableState::Ready);
         Ok(())
      }
      Err(e) => {
         error!(
            table = M::table_name(),
            error = %e,
            "Schema create/migrate failed; type is un-queryable until restart"
         );
         registry.set_state::<M>(TableState::Failed);
         Err(Error::SchemaUnavailable(M::table_name()))
      }
   }
}

async fn create_table<M: Model>(
   descriptor: &SchemaDescriptor<M>,
   conn: &mut SqliteConnection,
) -> Result<()> {
   sqlx::query(&descriptor.create_table_sql())
      .execute(&mut *conn)
      .await?;
   sqlx::query(&descriptor.create_index_table_sql())
      .execute(&mut *conn)
      .await?;
   Ok(())
}

/// Migrate a table adopted from a previous version: rename aside, create the
/// current layout, copy the intersecting columns by name, drop the old copy.
///
/// Any failure leaves `{table}_migrate_tmp` in place rather than losing
/// data - there is no automatic rollback of the rename.
async fn migrate_table<M: Model>(
   descriptor: &SchemaDescriptor<M>,
   conn: &mut SqliteConnection,
) -> Result<()> {
   let table = descriptor.table();

   // A type added after the previous version has nothing to migrate
   let existing: Option<(String,)> =
      sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
         .bind(table)
         .fetch_optional(&mut *conn)
         .await?;
   if existing.is_none() {
      return create_table(descriptor, conn).await;
   }

   let temp = format!("{table}_migrate_tmp");
   sqlx::query(&format!("ALTER TABLE {table} RENAME TO {temp}"))
      .execute(&mut *conn)
      .await?;
   create_table(descriptor, conn).await?;

   let old_columns = table_columns(&temp, conn).await?;
   let mut current: HashSet<&str> = descriptor.column_names().into_iter().collect();
   current.insert(EXTRA_COLUMN);
   let shared: Vec<String> = old_columns
      .into_iter()
      .filter(|column| current.contains(column.as_str()))
      .collect();

   if !shared.is_empty() {
      let column_list = shared.join(", ");
      sqlx::query(&format!(
         "INSERT INTO {table} ({column_list}) SELECT {column_list} FROM {temp}"
      ))
      .execute(&mut *conn)
      .await?;
   }

   sqlx::query(&format!("DROP TABLE {temp}"))
      .execute(&mut *conn)
      .await?;
   Ok(())
}

async fn table_columns(table: &str, conn: &mut SqliteConnection) -> Result<Vec<String>> {
   use sqlx::Row;

   let rows = sqlx::query(&format!("PRAGMA table_info('{table}')"))
      .fetch_all(&mut *conn)
      .await?;
   let mut columns = Vec::with_capacity(rows.len());
   for row in rows {
      columns.push(row.try_get::<String, _>("name")?);
   }
   Ok(columns)
}
