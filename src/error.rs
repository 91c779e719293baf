//! Error types for sqlx-sqlite-modelstore
//!
//! These errors flow through internal code with `?` but are never surfaced
//! to callers on the hot path: public read operations translate them into
//! absent/empty results and public write operations complete asynchronously
//! with no error channel. Every swallowed error is recorded with `tracing`.

use thiserror::Error;

/// Errors that may occur inside the store
#[derive(Error, Debug)]
pub enum Error {
   /// Error from the lane pool (file management, connection setup)
   #[error("Lane pool error: {0}")]
   Pool(#[from] sqlx_sqlite_lane_pool::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// The model type's table could not be created or migrated; the type
   /// stays un-queryable until the process restarts
   #[error("Schema unavailable for model type '{0}'")]
   SchemaUnavailable(&'static str),

   /// A field's storage location or value could not be resolved; the whole
   /// save/load operation for the instance aborts
   #[error("Cannot map field '{field}' of model type '{table}'")]
   Mapping {
      table: &'static str,
      field: &'static str,
   },

   /// The store was opened inert (storage directory unavailable) or has
   /// been closed
   #[error("Store is inactive")]
   Inactive,
}

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
