//! Coalescing change notifications
//!
//! Listeners registered per model type receive one refresh signal per batch
//! of write completions, not one per write. The coalescing is an explicit
//! four-state machine - idle, queued, notifying, needs-another-round -
//! driven by message passing to a dedicated task; no listener ever runs on
//! a flush lane, and a signal arriving mid-notification schedules exactly
//! one more round.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
   Idle,
   Queued,
   Notifying,
   NeedsAnotherRound,
}

/// Per-type listener registry plus the coalescing state machine
pub(crate) struct ChangeNotifier {
   listeners: RwLock<HashMap<&'static str, Vec<Listener>>>,
   /// The model type's own `changed()` hook, one per type
   hooks: Mutex<HashMap<&'static str, fn()>>,
   pending: Mutex<HashSet<&'static str>>,
   phase: Mutex<Phase>,
   wake: Notify,
   stopping: AtomicBool,
}

impl ChangeNotifier {
   pub fn new() -> Arc<Self> {
      Arc::new(Self {
         listeners: RwLock::new(HashMap::new()),
         hooks: Mutex::new(HashMap::new()),
         pending: Mutex::new(HashSet::new()),
         phase: Mutex::new(Phase::Idle),
         wake: Notify::new(),
         stopping: AtomicBool::new(false),
      })
   }

   /// Register (or refresh) a model type's own post-write hook
   pub fn set_type_hook(&self, table: &'static str, hook: fn()) {
      self.hooks.lock().insert(table, hook);
   }

   pub fn add_listener(&self, table: &'static str, listener: impl Fn() + Send + Sync + 'static) {
      self
         .listeners
         .write()
         .entry(table)
         .or_default()
         .push(Arc::new(listener));
   }

   /// Record write completions for the given types and coalesce them into
   /// at most one additional notification round.
   pub fn signal(&self, tables: impl IntoIterator<Item = &'static str>) {
      {
         let mut pending = self.pending.lock();
         for table in tables {
            pending.insert(table);
         }
         if pending.is_empty() {
            return;
         }
      }

      let mut phase = self.phase.lock();
      match *phase {
         Phase::Idle => {
            *phase = Phase::Queued;
            self.wake.notify_one();
         }
         Phase::Queued | Phase::NeedsAnotherRound => {}
         Phase::Notifying => {
            *phase = Phase::NeedsAnotherRound;
         }
      }
   }

   pub fn stop(&self) {
      self.stopping.store(true, Ordering::SeqCst);
      self.wake.notify_one();
   }

   /// Spawn the notification task. Exits when [`stop`](Self::stop) is called.
   pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
      let notifier = Arc::clone(self);
      tokio::spawn(async move {
         loop {
            notifier.wake.notified().await;
            if notifier.stopping.load(Ordering::SeqCst) {
               break;
            }

            loop {
               *notifier.phase.lock() = Phase::Notifying;
               let tables: Vec<&'static str> = notifier.pending.lock().drain().collect();
               trace!(types = tables.len(), "Delivering change notifications");

               // Snapshot listeners so a callback can register or remove
               // listeners without deadlocking against this read.
               for table in tables {
                  let hook = notifier.hooks.lock().get(table).copied();
                  if let Some(hook) = hook {
                     hook();
                  }
                  let snapshot: Vec<Listener> = notifier
                     .listeners
                     .read()
                     .get(table)
                     .map(|listeners| listeners.to_vec())
                     .unwrap_or_default();
                  for listener in snapshot {
                     listener();
                  }
               }

               let mut phase = notifier.phase.lock();
               if *phase == Phase::NeedsAnotherRound {
                  continue;
               }
               *phase = Phase::Idle;
               break;
            }
         }
      })
   }
}
