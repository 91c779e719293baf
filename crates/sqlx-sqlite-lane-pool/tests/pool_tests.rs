//! Integration tests for lane pools against real database files

use sqlx_sqlite_lane_pool::{LanePool, LanePoolConfig};

#[tokio::test]
async fn wal_mode_is_enabled_on_every_lane() {
   let dir = tempfile::tempdir().unwrap();
   let config = LanePoolConfig {
      lanes: 2,
      ..Default::default()
   };
   let (pool, _) = LanePool::open(dir.path(), "1", Some(config)).await.unwrap();

   for index in 0..pool.len() {
      let lane = pool.lane(index).unwrap();
      let mut conn = lane.connect().await.unwrap();

      let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
         .fetch_one(&mut *conn)
         .await
         .unwrap();
      assert_eq!(mode.to_lowercase(), "wal");

      let (sync,): (i32,) = sqlx::query_as("PRAGMA synchronous")
         .fetch_one(&mut *conn)
         .await
         .unwrap();
      assert_eq!(sync, 1, "synchronous should be NORMAL");
   }

   pool.close().await;
}

#[tokio::test]
async fn lanes_share_one_database_file() {
   let dir = tempfile::tempdir().unwrap();
   let (pool, _) = LanePool::open(dir.path(), "1", None).await.unwrap();

   // write through one lane, read through another
   let writer = pool.lane(0).unwrap();
   let mut conn = writer.connect().await.unwrap();
   sqlx::query("CREATE TABLE shared (id INTEGER PRIMARY KEY, value TEXT)")
      .execute(&mut *conn)
      .await
      .unwrap();
   sqlx::query("INSERT INTO shared (id, value) VALUES (1, 'hello')")
      .execute(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   let reader = pool.lane(pool.len() - 1).unwrap();
   let mut conn = reader.connect().await.unwrap();
   let (value,): (String,) = sqlx::query_as("SELECT value FROM shared WHERE id = 1")
      .fetch_one(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   assert_eq!(value, "hello");
   pool.close().await;
}

#[tokio::test]
async fn close_checkpoints_the_wal() {
   let dir = tempfile::tempdir().unwrap();
   let (pool, _) = LanePool::open(dir.path(), "1", None).await.unwrap();
   let db_path = pool.database_path().to_path_buf();

   let lane = pool.acquire();
   let mut conn = lane.connect().await.unwrap();
   sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
      .execute(&mut *conn)
      .await
      .unwrap();
   sqlx::query("INSERT INTO t (id) VALUES (1)")
      .execute(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   pool.close().await;

   // after the checkpoint the WAL is either gone or empty
   let wal_path = db_path.with_extension("db-wal");
   if wal_path.exists() {
      let wal_size = std::fs::metadata(&wal_path).unwrap().len();
      assert_eq!(wal_size, 0, "WAL should be truncated on close");
   }
}

#[tokio::test]
async fn reopening_a_version_sees_persisted_data() {
   let dir = tempfile::tempdir().unwrap();

   {
      let (pool, adopted) = LanePool::open(dir.path(), "3", None).await.unwrap();
      assert!(!adopted);
      let lane = pool.acquire();
      let mut conn = lane.connect().await.unwrap();
      sqlx::query("CREATE TABLE kept (id INTEGER PRIMARY KEY)")
         .execute(&mut *conn)
         .await
         .unwrap();
      sqlx::query("INSERT INTO kept (id) VALUES (42)")
         .execute(&mut *conn)
         .await
         .unwrap();
      drop(conn);
      pool.close().await;
   }

   let (pool, adopted) = LanePool::open(dir.path(), "3", None).await.unwrap();
   assert!(!adopted, "same version must not be treated as an upgrade");

   let lane = pool.acquire();
   let mut conn = lane.connect().await.unwrap();
   let (id,): (i64,) = sqlx::query_as("SELECT id FROM kept")
      .fetch_one(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   assert_eq!(id, 42);
   pool.close().await;
}

#[tokio::test]
async fn version_bump_adopts_the_old_file() {
   let dir = tempfile::tempdir().unwrap();

   {
      let (pool, _) = LanePool::open(dir.path(), "1", None).await.unwrap();
      let lane = pool.acquire();
      let mut conn = lane.connect().await.unwrap();
      sqlx::query("CREATE TABLE carried (id INTEGER PRIMARY KEY)")
         .execute(&mut *conn)
         .await
         .unwrap();
      sqlx::query("INSERT INTO carried (id) VALUES (7)")
         .execute(&mut *conn)
         .await
         .unwrap();
      drop(conn);
      pool.close().await;
   }

   let (pool, adopted) = LanePool::open(dir.path(), "2", None).await.unwrap();
   assert!(adopted, "a version bump must adopt the previous file");

   let lane = pool.acquire();
   let mut conn = lane.connect().await.unwrap();
   let (id,): (i64,) = sqlx::query_as("SELECT id FROM carried")
      .fetch_one(&mut *conn)
      .await
      .unwrap();
   drop(conn);

   assert_eq!(id, 7);
   pool.close().await;
}
