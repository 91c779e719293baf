//! The model contract
//!
//! A persistable type declares its storage layout through an explicit
//! field-descriptor table: one [`FieldDescriptor`] per mapped field, each
//! carrying a typed accessor pair. Field 0 is the primary field (the unique
//! key). Fields that are not listed are the "in/out" fields: they are
//! excluded from column mapping and ride along in a single text blob column
//! through [`Model::encode_extra`] / [`Model::decode_extra`].
//!
//! There is no reflection anywhere: all reads and writes of field values go
//! through the declared accessor functions, so the hot path pays no
//! per-call introspection cost.

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteConnection;

use crate::Result;
use crate::store::Store;
use crate::value::{ColumnType, ScalarValue};

/// How a model type's instances are held in the memory cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
   /// Primary-key map plus append-ordered scan list; containers keep head
   /// and tail insertion lists. Fast scans and stable ordering.
   #[default]
   OrderedAppend,
   /// Primary-key map only; container membership is timestamped and sorted
   /// on demand. Fast membership updates under heavy container churn.
   TimestampOrdered,
}

/// One mapped field of a model type: a column name plus a typed accessor pair
pub struct FieldDescriptor<M> {
   /// Column name; also the name used by `create_index`/`drop_index` and
   /// condition fragments
   pub name: &'static str,
   /// Typed access to the field's storage
   pub kind: FieldKind<M>,
}

/// Typed accessor pair for one field
///
/// Scalar variants hold plain `fn` pointers - the descriptor table is built
/// once per process and the accessors are called on every mapped read and
/// write. The `Nested` variant stores a reference to another model type,
/// persisted by that type's primary-key value.
pub enum FieldKind<M> {
   Integer {
      get: fn(&M) -> i32,
      set: fn(&mut M, i32),
   },
   Long {
      get: fn(&M) -> i64,
      set: fn(&mut M, i64),
   },
   Boolean {
      get: fn(&M) -> bool,
      set: fn(&mut M, bool),
   },
   Double {
      get: fn(&M) -> f64,
      set: fn(&mut M, f64),
   },
   Text {
      get: fn(&M) -> String,
      set: fn(&mut M, String),
   },
   /// A reference to another model instance, stored as that instance's
   /// primary-key value
   Nested(Box<dyn NestedField<M>>),
}

impl<M> FieldKind<M> {
   /// Column type this field maps to. Nested fields map to the referenced
   /// type's primary-key column type.
   pub fn column_type(&self) -> ColumnType {
      match self {
         FieldKind::Integer { .. } => ColumnType::Integer,
         FieldKind::Long { .. } => ColumnType::Long,
         FieldKind::Boolean { .. } => ColumnType::Boolean,
         FieldKind::Double { .. } => ColumnType::Double,
         FieldKind::Text { .. } => ColumnType::Text,
         FieldKind::Nested(nested) => nested.primary_column_type(),
      }
   }

   /// Read the field's column value. For nested fields this is the
   /// referenced instance's primary-key value; `None` when the reference is
   /// absent.
   pub(crate) fn read(&self, instance: &M) -> Option<ScalarValue> {
      match self {
         FieldKind::Integer { get, .. } => Some(ScalarValue::Integer(get(instance))),
         FieldKind::Long { get, .. } => Some(ScalarValue::Long(get(instance))),
         FieldKind::Boolean { get, .. } => Some(ScalarValue::Boolean(get(instance))),
         FieldKind::Double { get, .. } => Some(ScalarValue::Double(get(instance))),
         FieldKind::Text { get, .. } => Some(ScalarValue::Text(get(instance))),
         FieldKind::Nested(nested) => nested.primary_value(instance),
      }
   }

   /// Write a decoded scalar back into the field. Nested fields are
   /// hydrated separately and ignore this path.
   pub(crate) fn write_scalar(&self, instance: &mut M, value: ScalarValue) {
      match (self, value) {
         (FieldKind::Integer { set, .. }, ScalarValue::Integer(v)) => set(instance, v),
         (FieldKind::Long { set, .. }, ScalarValue::Long(v)) => set(instance, v),
         (FieldKind::Boolean { set, .. }, ScalarValue::Boolean(v)) => set(instance, v),
         (FieldKind::Double { set, .. }, ScalarValue::Double(v)) => set(instance, v),
         (FieldKind::Text { set, .. }, ScalarValue::Text(v)) => set(instance, v),
         _ => {}
      }
   }
}

/// A persistable model type
///
/// Field 0 of [`fields`](Self::fields) is the primary field and must be a
/// scalar; its value uniquely identifies an instance. Instances are owned by
/// the caller - the cache and the pending-write buffer hold copies keyed by
/// primary-key value.
///
/// # Example
///
/// ```
/// use sqlx_sqlite_modelstore::{FieldDescriptor, FieldKind, Model};
///
/// #[derive(Clone, Default)]
/// struct User {
///     id: i64,
///     name: String,
///     age: i32,
/// }
///
/// impl Model for User {
///     fn table_name() -> &'static str {
///         "user"
///     }
///
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
///             FieldDescriptor {
///                 name: "age",
///                 kind: FieldKind::Integer { get: |m| m.age, set: |m, v| m.age = v },
///             },
///         ]
///     }
///
///     fn new_empty() -> Self {
///         Self::default()
///     }
/// }
/// ```
pub trait Model: Clone + Send + Sync + 'static {
   /// Table name; also identifies the type to change listeners
   fn table_name() -> &'static str;

   /// The declared field-descriptor table. Field 0 is the primary field.
   fn fields() -> Vec<FieldDescriptor<Self>>;

   /// Construct an empty instance for hydration to fill in
   fn new_empty() -> Self;

   /// Cache policy for this type, fixed at first access
   fn cache_policy() -> CachePolicy {
      CachePolicy::default()
   }

   /// Encode the externally-serialized fields into a single text blob.
   /// Return `None` when the type has no such fields.
   fn encode_extra(&self) -> Option<String> {
      None
   }

   /// Decode the externally-serialized blob back into the instance
   fn decode_extra(&mut self, _raw: &str) {}

   /// Post-write notification hook: called once per committed batch of
   /// writes to this type, coalesced like listeners registered with
   /// [`Store::add_change_listener`](crate::Store::add_change_listener).
   /// Default does nothing.
   fn changed() {}
}

/// Storage behavior of a nested ("custom") field
///
/// Implemented by [`NestedModel`] for the ordinary case of an
/// `Option<OtherModel>` field. The referenced instance is persisted through
/// its own mapper before the parent row stores its scalar primary-key
/// value, and hydrated - cache first - after the parent row is read back.
pub trait NestedField<M>: Send + Sync {
   /// Table name of the referenced model type
   fn target_table(&self) -> &'static str;

   /// Column type of the referenced type's primary field
   fn primary_column_type(&self) -> ColumnType;

   /// Primary-key value of the referenced instance, `None` when absent
   fn primary_value(&self, owner: &M) -> Option<ScalarValue>;

   /// Buffer a write for the referenced instance through its own mapper.
   /// Called synchronously while the owner is being saved; cycles are the
   /// caller's responsibility to avoid.
   fn enqueue_save(&self, owner: &M, store: &Store);

   /// Resolve the referenced instance from its stored primary-key value and
   /// write it into the owner. Must stay on the supplied connection.
   fn hydrate<'a>(
      &'a self,
      owner: &'a mut M,
      primary_key: ScalarValue,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>>;
}

/// A nested field holding `Option<N>` for some other model type `N`
pub struct NestedModel<M, N: Model> {
   pub get: fn(&M) -> Option<N>,
   pub set: fn(&mut M, Option<N>),
}

impl<M: Send + Sync, N: Model> NestedField<M> for NestedModel<M, N> {
   fn target_table(&self) -> &'static str {
      N::table_name()
   }

   fn primary_column_type(&self) -> ColumnType {
      N::fields()
         .first()
         .map(|f| f.kind.column_type())
         .unwrap_or(ColumnType::Long)
   }

   fn primary_value(&self, owner: &M) -> Option<ScalarValue> {
      let child = (self.get)(owner)?;
      let fields = N::fields();
      fields.first()?.kind.read(&child)
   }

   fn enqueue_save(&self, owner: &M, store: &Store) {
      if let Some(child) = (self.get)(owner) {
         store.save(&child);
      }
   }

   fn hydrate<'a>(
      &'a self,
      owner: &'a mut M,
      primary_key: ScalarValue,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>> {
      Box::pin(async move {
         let child = store.find_on_lane::<N>(primary_key, conn).await?;
         (self.set)(owner, child);
         Ok(())
      })
   }
}
