//! A lane: one SQLite connection that executes all submitted SQL in order

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
   SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};

use crate::Result;
use crate::config::LanePoolConfig;

/// One serialized execution context bound to a single database connection.
///
/// A lane is an SQLx pool capped at exactly one connection. Whoever holds the
/// [`LaneGuard`] owns the connection; everyone else queues. Statements
/// submitted through one lane therefore execute strictly in submission
/// order, which is what batch transactions and migrations rely on.
#[derive(Debug)]
pub struct Lane {
   index: usize,
   conn: Pool<Sqlite>,
}

impl Lane {
   pub(crate) async fn open(path: &Path, index: usize, config: &LanePoolConfig) -> Result<Self> {
      let options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(true)
         .journal_mode(SqliteJournalMode::Wal)
         .synchronous(SqliteSynchronous::Normal)
         .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
         .statement_cache_capacity(config.statement_cache_capacity)
         .pragma("wal_autocheckpoint", "100");

      // max_connections(1) is the serialization guarantee: a second caller
      // cannot obtain the connection until the first guard is dropped.
      let conn = SqlitePoolOptions::new()
         .max_connections(1)
         .min_connections(1)
         .connect_with(options)
         .await?;

      Ok(Self { index, conn })
   }

   /// Position of this lane within its pool
   pub fn index(&self) -> usize {
      self.index
   }

   /// Take exclusive ownership of the lane's connection.
   ///
   /// Waits until the connection is free. The returned guard derefs to
   /// `SqliteConnection` for direct use with sqlx queries and returns the
   /// connection to the lane when dropped.
   pub async fn connect(&self) -> Result<LaneGuard> {
      let conn = self.conn.acquire().await?;
      Ok(LaneGuard {
         conn,
         index: self.index,
      })
   }

   pub(crate) async fn close(&self) {
      self.conn.close().await;
   }

   pub(crate) fn pool(&self) -> &Pool<Sqlite> {
      &self.conn
   }
}

/// RAII guard for exclusive access to a lane's connection
///
/// Only one `LaneGuard` per lane can exist at a time (enforced by the lane's
/// max_connections=1 pool). The guard derefs to `SqliteConnection`, allowing
/// direct use with sqlx queries; internal callers thread `&mut *guard`
/// through nested operations that must stay on the same lane.
#[derive(Debug)]
pub struct LaneGuard {
   conn: PoolConnection<Sqlite>,
   index: usize,
}

impl LaneGuard {
   /// Index of the lane this guard belongs to
   pub fn lane_index(&self) -> usize {
      self.index
   }
}

impl Deref for LaneGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &*self.conn
   }
}

impl DerefMut for LaneGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut *self.conn
   }
}

// Drop is automatically implemented - PoolConnection returns itself to the lane
