//! Dual-policy memory cache
//!
//! Every write goes through the cache synchronously before it is buffered
//! for the database, and every read tries the cache before it touches a
//! lane. One cache instance exists per model type, guarded by a single
//! reader/writer lock: reads run concurrently with each other but never
//! with a mutation. Lock hold times are map operations only - no I/O ever
//! happens under the lock.
//!
//! Container read order matches the persisted `update_time` order: a head
//! insert is stamped earlier than everything already in the container, so
//! ascending reads yield head entries newest-first, then tail entries
//! oldest-first.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use crate::model::CachePolicy;
use crate::value::ScalarValue;

/// Memory cache for one model type
pub(crate) struct ModelCache<M> {
   inner: RwLock<CacheInner<M>>,
   /// Last timestamp handed out, so same-instant container inserts still
   /// sort in insertion order
   stamp: Mutex<f64>,
}

enum CacheInner<M> {
   Ordered {
      map: HashMap<ScalarValue, M>,
      /// Primary keys in first-insert order, for full scans
      order: Vec<ScalarValue>,
      containers: HashMap<i64, SidedContainer>,
   },
   Timestamped {
      map: HashMap<ScalarValue, M>,
      containers: HashMap<i64, HashMap<ScalarValue, (f64, M)>>,
   },
}

#[derive(Default)]
struct SidedContainer {
   head: Vec<ScalarValue>,
   tail: Vec<ScalarValue>,
}

fn now_epoch() -> f64 {
   std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs_f64()
}

impl<M: Clone> ModelCache<M> {
   pub fn new(policy: CachePolicy) -> Self {
      let inner = match policy {
         CachePolicy::OrderedAppend => CacheInner::Ordered {
            map: HashMap::new(),
            order: Vec::new(),
            containers: HashMap::new(),
         },
         CachePolicy::TimestampOrdered => CacheInner::Timestamped {
            map: HashMap::new(),
            containers: HashMap::new(),
         },
      };
      Self {
         inner: RwLock::new(inner),
         stamp: Mutex::new(0.0),
      }
   }

   fn next_stamp(&self) -> f64 {
      let mut last = self.stamp.lock();
      let mut stamp = now_epoch();
      if stamp <= *last {
         stamp = *last + 1e-6;
      }
      *last = stamp;
      stamp
   }

   /// Insert or refresh an instance. The scan position of an existing key
   /// is kept; only its stored copy is replaced.
   pub fn insert(&self, primary_key: ScalarValue, instance: M) {
      let mut inner = self.inner.write();
      match &mut *inner {
         CacheInner::Ordered { map, order, .. } => {
            if map.insert(primary_key.clone(), instance).is_none() {
               order.push(primary_key);
            }
         }
         CacheInner::Timestamped { map, .. } => {
            map.insert(primary_key, instance);
         }
      }
   }

   /// Record container membership. Ordered caches append to the head or
   /// tail list; timestamped caches stamp the entry with the current time.
   pub fn insert_container(
      &self,
      primary_key: ScalarValue,
      container_id: i64,
      at_top: bool,
      instance: M,
   ) {
      let mut inner = self.inner.write();
      match &mut *inner {
         CacheInner::Ordered { containers, .. } => {
            let container = containers.entry(container_id).or_default();
            if at_top {
               container.head.push(primary_key);
            } else {
               container.tail.push(primary_key);
            }
         }
         CacheInner::Timestamped { containers, .. } => {
            let stamp = self.next_stamp();
            containers
               .entry(container_id)
               .or_default()
               .insert(primary_key, (stamp, instance));
         }
      }
   }

   pub fn get(&self, primary_key: &ScalarValue) -> Option<M> {
      let inner = self.inner.read();
      match &*inner {
         CacheInner::Ordered { map, .. } => map.get(primary_key).cloned(),
         CacheInner::Timestamped { map, .. } => map.get(primary_key).cloned(),
      }
   }

   /// Remove an instance and every container membership it holds
   pub fn remove(&self, primary_key: &ScalarValue) {
      let mut inner = self.inner.write();
      match &mut *inner {
         CacheInner::Ordered {
            map,
            order,
            containers,
         } => {
            map.remove(primary_key);
            order.retain(|pk| pk != primary_key);
            for container in containers.values_mut() {
               container.head.retain(|pk| pk != primary_key);
               container.tail.retain(|pk| pk != primary_key);
            }
         }
         CacheInner::Timestamped { map, containers } => {
            map.remove(primary_key);
            for container in containers.values_mut() {
               container.remove(primary_key);
            }
         }
      }
   }

   /// Remove one container membership without touching the instance itself
   pub fn remove_from_container(&self, primary_key: &ScalarValue, container_id: i64) {
      let mut inner = self.inner.write();
      match &mut *inner {
         CacheInner::Ordered { containers, .. } => {
            if let Some(container) = containers.get_mut(&container_id) {
               container.head.retain(|pk| pk != primary_key);
               container.tail.retain(|pk| pk != primary_key);
            }
         }
         CacheInner::Timestamped { containers, .. } => {
            if let Some(container) = containers.get_mut(&container_id) {
               container.remove(primary_key);
            }
         }
      }
   }

   /// Full scan from cache, or `None` when the cache holds nothing for the
   /// type and the database must be consulted.
   ///
   /// Ordered caches return first-insert order (reversed for descending);
   /// timestamped caches have no scan order and return map order.
   pub fn all(&self, ascending: bool) -> Option<Vec<M>> {
      let inner = self.inner.read();
      match &*inner {
         CacheInner::Ordered { map, order, .. } => {
            if map.is_empty() {
               return None;
            }
            let mut result: Vec<M> = order.iter().filter_map(|pk| map.get(pk).cloned()).collect();
            if !ascending {
               result.reverse();
            }
            Some(result)
         }
         CacheInner::Timestamped { map, .. } => {
            if map.is_empty() {
               return None;
            }
            Some(map.values().cloned().collect())
         }
      }
   }

   /// Container scan from cache, or `None` when this container has never
   /// been populated.
   ///
   /// Each primary key appears at most once: a key found on both sides is
   /// emitted at its first-seen position.
   pub fn container_all(&self, container_id: i64, ascending: bool) -> Option<Vec<M>> {
      let inner = self.inner.read();
      match &*inner {
         CacheInner::Ordered {
            map, containers, ..
         } => {
            let container = containers.get(&container_id)?;
            let keys: Vec<&ScalarValue> = if ascending {
               container
                  .head
                  .iter()
                  .rev()
                  .chain(container.tail.iter())
                  .collect()
            } else {
               container
                  .tail
                  .iter()
                  .rev()
                  .chain(container.head.iter())
                  .collect()
            };

            let mut seen = HashSet::new();
            let mut result = Vec::new();
            for pk in keys {
               if !seen.insert(pk) {
                  continue;
               }
               if let Some(instance) = map.get(pk) {
                  result.push(instance.clone());
               }
            }
            Some(result)
         }
         CacheInner::Timestamped { containers, .. } => {
            let container = containers.get(&container_id)?;
            let mut entries: Vec<(&f64, &M)> =
               container.values().map(|(ts, m)| (ts, m)).collect();
            entries.sort_by(|a, b| {
               let ordering = a.0.partial_cmp(b.0).unwrap_or(std::cmp::Ordering::Equal);
               if ascending { ordering } else { ordering.reverse() }
            });
            Some(entries.into_iter().map(|(_, m)| m.clone()).collect())
         }
      }
   }

   /// Drop every cached instance and every container list
   pub fn clear(&self) {
      let mut inner = self.inner.write();
      match &mut *inner {
         CacheInner::Ordered {
            map,
            order,
            containers,
         } => {
            map.clear();
            order.clear();
            containers.clear();
         }
         CacheInner::Timestamped { map, containers } => {
            map.clear();
            containers.clear();
         }
      }
   }

   /// Empty one container's lists. Instances stay cached; the emptied
   /// container keeps answering scans (with no members) without falling
   /// through to the database.
   pub fn clear_container(&self, container_id: i64) {
      let mut inner = self.inner.write();
      match &mut *inner {
         CacheInner::Ordered { containers, .. } => {
            if let Some(container) = containers.get_mut(&container_id) {
               container.head.clear();
               container.tail.clear();
            }
         }
         CacheInner::Timestamped { containers, .. } => {
            if let Some(container) = containers.get_mut(&container_id) {
               container.clear();
            }
         }
      }
   }
}
