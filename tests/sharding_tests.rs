//! Sharded query correctness: scans must return exactly the stored rows,
//! in order, for any pool size - divisible or not.

use sqlx_sqlite_modelstore::{
   Condition, FieldDescriptor, FieldKind, LanePoolConfig, Model, Store, StoreConfig,
};

#[derive(Clone, Debug, Default, PartialEq)]
struct Row {
   id: i64,
   bucket: i32,
}

impl Model for Row {
   fn table_name() -> &'static str {
      "row"
   }

   fn fields() -> Vec<FieldDescriptor<Self>> {
      vec![
         FieldDescriptor {
            name: "id",
            kind: FieldKind::Long {
               get: |m| m.id,
               set: |m, v| m.id = v,
            },
         },
         FieldDescriptor {
            name: "bucket",
            kind: FieldKind::Integer {
               get: |m| m.bucket,
               set: |m, v| m.bucket = v,
            },
         },
      ]
   }

   fn new_empty() -> Self {
      Self::default()
   }
}

fn config_with_lanes(lanes: usize) -> StoreConfig {
   StoreConfig {
      pool: LanePoolConfig {
         lanes,
         ..Default::default()
      },
      ..Default::default()
   }
}

async fn populate(store: &Store, rows: i64) {
   for id in 1..=rows {
      store.save(&Row {
         id,
         bucket: (id % 5) as i32,
      });
   }
   store.flush().await;
   store.clear_cache::<Row>();
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_returns_every_row_for_awkward_pool_sizes() {
   // 103 is deliberately not divisible by any of these pool sizes
   for lanes in [1, 2, 5, 17] {
      let dir = tempfile::tempdir().unwrap();
      let store = Store::open(dir.path(), "1", Some(config_with_lanes(lanes))).await;
      populate(&store, 103).await;

      let ids: Vec<i64> = store
         .query_all::<Row>(true)
         .await
         .into_iter()
         .map(|r| r.id)
         .collect();

      assert_eq!(
         ids,
         (1..=103).collect::<Vec<i64>>(),
         "pool of {lanes} lanes must return all 103 rows in order"
      );

      store.close().await;
   }
}

#[tokio::test(flavor = "multi_thread")]
async fn descending_scan_reverses_the_order() {
   let dir = tempfile::tempdir().unwrap();
   let store = Store::open(dir.path(), "1", Some(config_with_lanes(4))).await;
   populate(&store, 24).await;

   let ids: Vec<i64> = store
      .query_all::<Row>(false)
      .await
      .into_iter()
      .map(|r| r.id)
      .collect();

   assert_eq!(ids, (1..=24).rev().collect::<Vec<i64>>());

   store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_container_scan_is_exact() {
   let dir = tempfile::tempdir().unwrap();
   let store = Store::open(dir.path(), "1", Some(config_with_lanes(5))).await;

   for id in 1..=37 {
      store.save_in(
         &Row {
            id,
            bucket: 0,
         },
         11,
         false,
      );
   }
   store.flush().await;
   store.clear_cache::<Row>();

   let ids: Vec<i64> = store
      .query_all_in::<Row>(true, 11)
      .await
      .into_iter()
      .map(|r| r.id)
      .collect();

   assert_eq!(ids, (1..=37).collect::<Vec<i64>>());

   store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_conditional_query_matches_unsharded_count() {
   let dir = tempfile::tempdir().unwrap();
   let store = Store::open(dir.path(), "1", Some(config_with_lanes(3))).await;
   populate(&store, 50).await;

   let condition = Condition::new().where_clause("bucket = 2");
   let count = store.count_where::<Row>(condition.clone()).await;
   let rows = store.query::<Row>(condition).await;

   assert_eq!(count, 10);
   assert_eq!(rows.len() as i64, count);
   assert!(rows.iter().all(|r| r.bucket == 2));

   store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_offset_and_limit_select_a_window() {
   let dir = tempfile::tempdir().unwrap();
   let store = Store::open(dir.path(), "1", Some(config_with_lanes(4))).await;
   populate(&store, 30).await;

   let ids: Vec<i64> = store
      .query::<Row>(Condition::new().offset(10).limit(12))
      .await
      .into_iter()
      .map(|r| r.id)
      .collect();

   assert_eq!(ids, (11..=22).collect::<Vec<i64>>());

   store.close().await;
}
