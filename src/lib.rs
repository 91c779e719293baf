//! Embedded object store over SQLite with write-behind persistence.
//!
//! Model instances map to rows in a local SQLite database, are cached
//! transparently in memory, and are written back asynchronously in batched
//! transactions - the calling thread never waits on the database to save.
//! Built for client applications that want low-latency reads and
//! write-coalescing writes against an application-private database file.
//!
//! # Pieces
//!
//! - [`Store`] - entry point; owns the lane pool, schema registry,
//!   write-behind engine, and change notifier
//! - [`Model`] - the contract a persistable type implements: a declared
//!   field-descriptor table (field 0 is the primary key), a zero-arg
//!   constructor, an optional cache policy and extra-props codec
//! - [`Condition`] - builder for conditional queries, executed sharded
//!   across every pooled connection
//! - Containers - named, integer-identified lists a subset of a type's
//!   instances can belong to, independent of table storage, with head/tail
//!   insertion (`save_in`, `query_all_in`, `delete_from`, `remove_all_in`)
//!
//! # Semantics
//!
//! Writes are **at-least-once and best-effort**: `save` updates the memory
//! cache synchronously, buffers the row work, and returns - there is no
//! error channel back to the caller, and a buffered write cannot be
//! retracted except by a compensating delete. Reads prefer the cache; a
//! miss waits for the one-time initialization flush and then queries the
//! database. Failed reads are logged and come back absent/empty.
//!
//! # Example
//!
//! ```no_run
//! use sqlx_sqlite_modelstore::{Condition, FieldDescriptor, FieldKind, Model, Store};
//!
//! #[derive(Clone, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     age: i32,
//! }
//!
//! impl Model for User {
//!     fn table_name() -> &'static str {
//!         "user"
//!     }
//!     fn fields() -> Vec<FieldDescriptor<Self>> {
//!         vec![
//!             FieldDescriptor {
//!                 name: "id",
//!                 kind: FieldKind::Long { get: |m| m.id, set: |m, v| m.id = v },
//!             },
//!             FieldDescriptor {
//!                 name: "name",
//!                 kind: FieldKind::Text { get: |m| m.name.clone(), set: |m, v| m.name = v },
//!             },
//!             FieldDescriptor {
//!                 name: "age",
//!                 kind: FieldKind::Integer { get: |m| m.age, set: |m, v| m.age = v },
//!             },
//!         ]
//!     }
//!     fn new_empty() -> Self {
//!         Self::default()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Store::open("./data", "1", None).await;
//!
//!     store.save(&User { id: 1, name: "Alice".into(), age: 34 });
//!     store.save_in(&User { id: 2, name: "Bob".into(), age: 29 }, 7, true);
//!
//!     // Cache hit - no query runs
//!     let alice: Option<User> = store.find(1i64).await;
//!     assert!(alice.is_some());
//!
//!     // Sharded scan across the pool
//!     let adults: Vec<User> = store
//!         .query(Condition::new().where_clause("age >= 18").order_by("age"))
//!         .await;
//!     drop(adults);
//!
//!     store.close().await;
//! }
//! ```

mod cache;
mod descriptor;
mod error;
mod model;
mod notify;
mod persist;
mod query;
mod schema;
mod store;
mod value;
mod writeback;

pub use error::{Error, Result};
pub use model::{CachePolicy, FieldDescriptor, FieldKind, Model, NestedField, NestedModel};
pub use query::Condition;
pub use store::{Store, StoreConfig};
pub use value::{ColumnType, ScalarValue};

// Re-export lane pool types for configuration and advanced usage
pub use sqlx_sqlite_lane_pool::{LanePool, LanePoolConfig};
