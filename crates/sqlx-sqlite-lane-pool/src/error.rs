//! Error types for sqlx-sqlite-lane-pool

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-lane-pool
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// The storage directory could not be created or entered
   #[error("Storage directory unavailable: {0}")]
   StorageUnavailable(String),

   /// Lane pool has been closed and cannot be used
   #[error("Lane pool has been closed")]
   PoolClosed,
}
