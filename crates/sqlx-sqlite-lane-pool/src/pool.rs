//! The lane pool: a fixed set of serialized connections

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::error;

use crate::Result;
use crate::config::LanePoolConfig;
use crate::error::Error;
use crate::lane::Lane;
use crate::version::resolve_versioned_file;

/// Fixed-size pool of [`Lane`]s sharing one database file.
///
/// The pool opens `config.lanes` connections up front and never grows.
/// [`acquire`](Self::acquire) hands lanes out round-robin; a caller that
/// needs several statements on the same connection holds on to the lane (and
/// its guard) for the duration.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_lane_pool::LanePool;
///
/// # async fn example() -> sqlx_sqlite_lane_pool::Result<()> {
/// let (pool, _adopted) = LanePool::open("./data", "1", None).await?;
///
/// let lane = pool.acquire();
/// let mut conn = lane.connect().await?;
/// let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&mut *conn).await?;
/// assert_eq!(row.0, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LanePool {
   lanes: Vec<Arc<Lane>>,
   next: AtomicUsize,
   closed: AtomicBool,
   path: PathBuf,
}

impl LanePool {
   /// Open the pool for the database file belonging to `version` under `base_dir`.
   ///
   /// The second element of the returned tuple is `true` when files from a
   /// previous version were adopted (renamed into place); the caller should
   /// then treat first access to each table as a migration rather than a
   /// fresh creation.
   ///
   /// # Arguments
   ///
   /// * `base_dir` - Application-private directory holding the database files
   /// * `version` - Caller-chosen version string; bump it when the model layout changes
   /// * `custom_config` - Optional pool configuration. Pass `None` for the
   ///   defaults (4 lanes, 5 second busy timeout).
   pub async fn open(
      base_dir: impl AsRef<Path>,
      version: &str,
      custom_config: Option<LanePoolConfig>,
   ) -> Result<(Arc<Self>, bool)> {
      let config = custom_config.unwrap_or_default();
      let (path, adopted) = resolve_versioned_file(base_dir.as_ref(), version)?;

      let lane_count = config.lanes.max(1);
      let mut lanes = Vec::with_capacity(lane_count);
      for index in 0..lane_count {
         lanes.push(Arc::new(Lane::open(&path, index, &config).await?));
      }

      Ok((
         Arc::new(Self {
            lanes,
            next: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            path,
         }),
         adopted,
      ))
   }

   /// Round-robin the next lane.
   ///
   /// Returns immediately: the lane itself serializes access when its
   /// connection is eventually taken with [`Lane::connect`].
   pub fn acquire(&self) -> Arc<Lane> {
      let index = self.next.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
      Arc::clone(&self.lanes[index])
   }

   /// Get a specific lane by index
   pub fn lane(&self, index: usize) -> Option<Arc<Lane>> {
      self.lanes.get(index).cloned()
   }

   /// Number of lanes in the pool (fixed at open time)
   pub fn len(&self) -> usize {
      self.lanes.len()
   }

   /// Always false: pools hold at least one lane
   pub fn is_empty(&self) -> bool {
      self.lanes.is_empty()
   }

   /// Whether [`close`](Self::close) has been called
   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Path of the underlying database file
   pub fn database_path(&self) -> &Path {
      &self.path
   }

   /// Close every lane and checkpoint the WAL.
   ///
   /// Waits for in-flight guards to be returned. After closing, acquiring a
   /// connection from any lane returns an error.
   pub async fn close(&self) {
      if self.closed.swap(true, Ordering::SeqCst) {
         return;
      }

      // Flush the WAL into the main file before the connections go away, so
      // a subsequent open (possibly under a renamed version path) sees the
      // complete data without replaying the log.
      if let Some(lane) = self.lanes.first() {
         match lane.pool().acquire().await {
            Ok(mut conn) => {
               let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                  .execute(&mut *conn)
                  .await;
            }
            Err(e) => error!("Failed to checkpoint WAL on close: {}", e),
         }
      }

      for lane in &self.lanes {
         lane.close().await;
      }
   }

   /// Guard helper used by callers that want a closed-pool error instead of
   /// a hung acquire.
   pub fn check_open(&self) -> Result<()> {
      if self.is_closed() {
         return Err(Error::PoolClosed);
      }
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn round_robin_cycles_all_lanes() {
      let dir = tempfile::tempdir().unwrap();
      let config = LanePoolConfig {
         lanes: 3,
         ..Default::default()
      };
      let (pool, adopted) = LanePool::open(dir.path(), "1", Some(config)).await.unwrap();
      assert!(!adopted);
      assert_eq!(pool.len(), 3);

      let indexes: Vec<usize> = (0..6).map(|_| pool.acquire().index()).collect();
      assert_eq!(indexes, vec![0, 1, 2, 0, 1, 2]);

      pool.close().await;
   }

   #[tokio::test]
   async fn single_lane_serializes_statements() {
      use std::time::{Duration, Instant};

      let dir = tempfile::tempdir().unwrap();
      let config = LanePoolConfig {
         lanes: 1,
         ..Default::default()
      };
      let (pool, _) = LanePool::open(dir.path(), "1", Some(config)).await.unwrap();

      let lane = pool.acquire();
      let mut conn = lane.connect().await.unwrap();
      sqlx::query("CREATE TABLE counter (id INTEGER PRIMARY KEY, value INTEGER)")
         .execute(&mut *conn)
         .await
         .unwrap();
      sqlx::query("INSERT INTO counter (id, value) VALUES (1, 0)")
         .execute(&mut *conn)
         .await
         .unwrap();
      drop(conn);

      // 3 concurrent tasks against the same lane must execute one at a time
      let start = Instant::now();
      let mut handles = vec![];
      for _ in 0..3 {
         let lane = Arc::clone(&lane);
         handles.push(tokio::spawn(async move {
            let mut conn = lane.connect().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            sqlx::query("UPDATE counter SET value = value + 1 WHERE id = 1")
               .execute(&mut *conn)
               .await
               .unwrap();
         }));
      }
      for handle in handles {
         handle.await.unwrap();
      }

      let mut conn = lane.connect().await.unwrap();
      let (value,): (i64,) = sqlx::query_as("SELECT value FROM counter WHERE id = 1")
         .fetch_one(&mut *conn)
         .await
         .unwrap();
      drop(conn);

      assert_eq!(value, 3, "All 3 writes should have been serialized");
      assert!(
         start.elapsed().as_millis() >= 25,
         "Serialized writes took {}ms (expected >=25ms, would be ~10ms if concurrent)",
         start.elapsed().as_millis()
      );

      pool.close().await;
   }

   #[tokio::test]
   async fn lanes_run_concurrently_with_each_other() {
      use std::time::{Duration, Instant};

      let dir = tempfile::tempdir().unwrap();
      let (pool, _) = LanePool::open(dir.path(), "1", None).await.unwrap();

      let start = Instant::now();
      let mut handles = vec![];
      for _ in 0..4 {
         let lane = pool.acquire();
         handles.push(tokio::spawn(async move {
            let mut conn = lane.connect().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            let (one,): (i64,) = sqlx::query_as("SELECT 1")
               .fetch_one(&mut *conn)
               .await
               .unwrap();
            assert_eq!(one, 1);
         }));
      }
      for handle in handles {
         handle.await.unwrap();
      }

      // 4 tasks on 4 distinct lanes: ~10ms in parallel, 40ms+ if serialized
      assert!(
         start.elapsed().as_millis() < 35,
         "Parallel lanes took {}ms (expected <35ms)",
         start.elapsed().as_millis()
      );

      pool.close().await;
   }

   #[tokio::test]
   async fn close_marks_pool_closed() {
      let dir = tempfile::tempdir().unwrap();
      let (pool, _) = LanePool::open(dir.path(), "1", None).await.unwrap();

      pool.close().await;
      assert!(pool.is_closed());
      assert!(matches!(pool.check_open(), Err(Error::PoolClosed)));
   }
}
