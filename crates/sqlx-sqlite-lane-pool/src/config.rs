//! Configuration for the lane pool

use serde::{Deserialize, Serialize};

/// Configuration for a [`LanePool`](crate::LanePool)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_lane_pool::LanePoolConfig;
///
/// // Use defaults
/// let config = LanePoolConfig::default();
///
/// // Override just one field
/// let config = LanePoolConfig {
///     lanes: 8,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanePoolConfig {
   /// Number of lanes (serialized connections) in the pool
   ///
   /// The pool size is fixed at open time and never grows.
   ///
   /// Default: 4
   pub lanes: usize,

   /// Busy timeout applied to every lane connection (in seconds)
   ///
   /// Lanes write concurrently to the same database file, so a writer
   /// must wait for the engine-level write lock rather than fail fast.
   ///
   /// Default: 5
   pub busy_timeout_secs: u64,

   /// Capacity of each connection's prepared-statement cache
   ///
   /// Identical SQL text reuses the compiled statement. The SQL text space
   /// per model type is small and finite, so a generous capacity means the
   /// cache never evicts in practice.
   ///
   /// Default: 1024
   pub statement_cache_capacity: usize,
}

impl Default for LanePoolConfig {
   fn default() -> Self {
      Self {
         lanes: 4,
         busy_timeout_secs: 5,
         statement_cache_capacity: 1024,
      }
   }
}
