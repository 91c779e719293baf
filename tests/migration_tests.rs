//! Version adoption and in-place table migration

use sqlx_sqlite_modelstore::{FieldDescriptor, FieldKind, Model, Store};

// The "old" layout, persisted under version 1
#[derive(Clone, Debug, Default, PartialEq)]
struct AccountV1 {
   id: i64,
   name: String,
}

impl Model for AccountV1 {
   fn table_name() -> &'static str {
      "account"
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
            name: "name",
            kind: FieldKind::Text {
               get: |m| m.name.clone(),
               set: |m, v| m.name = v,
            },
         },
      ]
   }

   fn new_empty() -> Self {
      Self::default()
   }
}

// The same table after the application added a column and bumped to version 2
#[derive(Clone, Debug, Default, PartialEq)]
struct AccountV2 {
   id: i64,
   name: String,
   age: i32,
}

impl Model for AccountV2 {
   fn table_name() -> &'static str {
      "account"
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
            name: "name",
            kind: FieldKind::Text {
               get: |m| m.name.clone(),
               set: |m, v| m.name = v,
            },
         },
         FieldDescriptor {
            name: "age",
            kind: FieldKind::Integer {
               get: |m| m.age,
               set: |m, v| m.age = v,
            },
         },
      ]
   }

   fn new_empty() -> Self {
      Self::default()
   }
}

// A type that only exists in version 2
#[derive(Clone, Debug, Default, PartialEq)]
struct Note {
   id: i64,
   body: String,
}

impl Model for Note {
   fn table_name() -> &'static str {
      "note"
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
            name: "body",
            kind: FieldKind::Text {
               get: |m| m.body.clone(),
               set: |m, v| m.body = v,
            },
         },
      ]
   }

   fn new_empty() -> Self {
      Self::default()
   }
}

#[tokio::test]
async fn added_column_gets_the_default_and_old_data_survives() {
   let dir = tempfile::tempdir().unwrap();

   // Version 1: persist two accounts with the old layout
   {
      let store = Store::open(dir.path(), "1", None).await;
      store.save(&AccountV1 {
         id: 1,
         name: "Ada".into(),
      });
      store.save(&AccountV1 {
         id: 2,
         name: "Grace".into(),
      });
      store.flush().await;
      store.close().await;
   }

   // Version 2: the old file is renamed into place and the first access
   // migrates the table in place
   let store = Store::open(dir.path(), "2", None).await;

   assert!(dir.path().join("modelstore-2.db").exists());
   assert!(!dir.path().join("modelstore-1.db").exists());

   assert_eq!(store.count::<AccountV2>().await, 2);

   let ada: Option<AccountV2> = store.find(1i64).await;
   let ada = ada.expect("pre-migration row must survive");
   assert_eq!(ada.name, "Ada");
   assert_eq!(ada.age, 0, "added column takes the engine default");

   let names: Vec<String> = store
      .query_all::<AccountV2>(true)
      .await
      .into_iter()
      .map(|a| a.name)
      .collect();
   assert_eq!(names, vec!["Ada".to_string(), "Grace".to_string()]);

   store.close().await;
}

#[tokio::test]
async fn writes_after_migration_land_in_the_new_layout() {
   let dir = tempfile::tempdir().unwrap();

   {
      let store = Store::open(dir.path(), "1", None).await;
      store.save(&AccountV1 {
         id: 1,
         name: "old".into(),
      });
      store.flush().await;
      store.close().await;
   }

   let store = Store::open(dir.path(), "2", None).await;
   store.save(&AccountV2 {
      id: 2,
      name: "new".into(),
      age: 44,
   });
   store.flush().await;
   store.clear_cache::<AccountV2>();

   assert_eq!(store.count::<AccountV2>().await, 2);
   let newer: Option<AccountV2> = store.find(2i64).await;
   assert_eq!(newer.map(|a| a.age), Some(44));

   store.close().await;
}

#[tokio::test]
async fn types_added_in_the_new_version_are_created_not_migrated() {
   let dir = tempfile::tempdir().unwrap();

   {
      let store = Store::open(dir.path(), "1", None).await;
      store.save(&AccountV1 {
         id: 1,
         name: "seed".into(),
      });
      store.flush().await;
      store.close().await;
   }

   let store = Store::open(dir.path(), "2", None).await;
   store.save(&Note {
      id: 1,
      body: "fresh table on the adopted file".into(),
   });
   store.flush().await;
   store.clear_cache::<Note>();

   let note: Option<Note> = store.find(1i64).await;
   assert_eq!(
      note.map(|n| n.body),
      Some("fresh table on the adopted file".to_string())
   );

   store.close().await;
}

#[tokio::test]
async fn same_version_reopen_does_not_migrate() {
   let dir = tempfile::tempdir().unwrap();

   {
      let store = Store::open(dir.path(), "1", None).await;
      store.save(&AccountV1 {
         id: 7,
         name: "stable".into(),
      });
      store.flush().await;
      store.close().await;
   }

   let store = Store::open(dir.path(), "1", None).await;
   let found: Option<AccountV1> = store.find(7i64).await;
   assert_eq!(found.map(|a| a.name), Some("stable".into()));

   store.close().await;
}
