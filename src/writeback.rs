//! Write-behind buffering and the flush engine
//!
//! Writes never block the caller: they are appended to a staging buffer and
//! applied later by a background worker, batched into one transaction per
//! drain. The worker debounces (no flush more often than the current
//! interval), adapts the interval to load, and re-checks the staging buffer
//! iteratively before yielding its lane so sustained write pressure cannot
//! grow the buffer without bound.
//!
//! Failure semantics: a single failing statement inside the batch is logged
//! and skipped while the transaction commits the statements that succeeded;
//! a failed commit re-stages the whole batch, which retries as a unit on
//! the next flush. There is no error channel back to the caller - these are
//! at-least-once, best-effort write semantics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sqlx::sqlite::SqliteConnection;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::Result;
use crate::store::Store;

/// Batches larger than this are taken as a load signal and back the flush
/// interval off
const HIGH_WATER_BATCH: usize = 512;

/// A buffered write intent: row upsert (optionally with container
/// membership), row delete, or container-entry delete.
///
/// `apply` runs on the flush worker's lane inside the batch transaction and
/// must stay on the supplied connection.
pub(crate) trait QueuedWrite: Send + Sync {
   /// Table name of the model type this write touches, for the
   /// change-notification signal
   fn table(&self) -> &'static str;

   /// Ensure the write's tables exist. Runs on the flush lane *before* the
   /// batch transaction opens: schema DDL must never run inside it, or a
   /// concurrent first-access DDL on another lane could cross-wait between
   /// the registration lock and the engine's write lock.
   fn prepare<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>>;

   fn apply<'a>(
      &'a self,
      store: &'a Store,
      conn: &'a mut SqliteConnection,
   ) -> BoxFuture<'a, Result<()>>;
}

/// The write-behind engine: staging buffer, readiness gate, flush state
pub(crate) struct WriteBehind {
   /// Append-only staging buffer; swapped out atomically at drain time
   staging: Mutex<Vec<Box<dyn QueuedWrite>>>,
   /// Wakes the worker when a write is staged or a stop is requested
   wake: Notify,
   /// Flips to true once the initialization flush has completed
   ready_tx: watch::Sender<bool>,
   ready_rx: watch::Receiver<bool>,
   stopping: AtomicBool,
   /// One in-flight batch commit at a time; also owns the execution buffer
   drain_gate: tokio::sync::Mutex<()>,
   /// Current debounce interval, adapted between base and max
   interval_ms: AtomicU64,
   base_interval_ms: u64,
   max_interval_ms: u64,
   last_flush: Mutex<Instant>,
}

impl WriteBehind {
   pub fn new(base_interval_ms: u64, max_interval_ms: u64) -> Self {
      let (ready_tx, ready_rx) = watch::channel(false);
      Self {
         staging: Mutex::new(Vec::new()),
         wake: Notify::new(),
         ready_tx,
         ready_rx,
         stopping: AtomicBool::new(false),
         drain_gate: tokio::sync::Mutex::new(()),
         interval_ms: AtomicU64::new(base_interval_ms),
         base_interval_ms,
         max_interval_ms: max_interval_ms.max(base_interval_ms),
         last_flush: Mutex::new(Instant::now()),
      }
   }

   /// Stage a write and request a flush. Returns immediately.
   pub fn push(&self, write: Box<dyn QueuedWrite>) {
      self.staging.lock().push(write);
      self.wake.notify_one();
   }

   /// Block until the initialization flush has completed.
   ///
   /// This is the one point where a read waits on a write-behind guarantee.
   pub async fn wait_ready(&self) {
      let mut ready = self.ready_rx.clone();
      let _ = ready.wait_for(|flushed| *flushed).await;
   }

   pub fn stop(&self) {
      self.stopping.store(true, Ordering::SeqCst);
      self.wake.notify_one();
   }

   fn is_stopping(&self) -> bool {
      self.stopping.load(Ordering::SeqCst)
   }

   /// Drain the staging buffer into batched transactions.
   ///
   /// Without `force`, the call debounces: it returns if the last flush is
   /// closer than the current interval or nothing is staged. The drain loop
   /// keeps its lane until the staging buffer stays empty, so work staged
   /// during a commit is applied before the lane is yielded.
   pub async fn drain(&self, store: &Store, force: bool) {
      if !force {
         let interval = Duration::from_millis(self.interval_ms.load(Ordering::Relaxed));
         if self.last_flush.lock().elapsed() < interval {
            return;
         }
         if self.staging.lock().is_empty() {
            return;
         }
      }

      let _gate = self.drain_gate.lock().await;
      let Ok(inner) = store.active() else {
         return;
      };

      let lane = inner.pool().acquire();
      let mut conn = match lane.connect().await {
         Ok(conn) => conn,
         Err(e) => {
            error!(error = %e, "Flush could not acquire a lane");
            return;
         }
      };

      loop {
         let batch: Vec<Box<dyn QueuedWrite>> = std::mem::take(&mut *self.staging.lock());
         if batch.is_empty() {
            break;
         }

         *self.last_flush.lock() = Instant::now();
         let started = Instant::now();
         let batch_len = batch.len();

         match commit_batch(store, &mut conn, &batch).await {
            Ok(touched) => {
               debug!(writes = batch_len, "Flushed batch");
               if let Ok(inner) = store.active() {
                  inner.notifier().signal(touched);
               }
            }
            Err(e) => {
               error!(error = %e, writes = batch_len, "Batch commit failed; batch will retry as a unit");
               let mut staging = self.staging.lock();
               let mut restaged = batch;
               restaged.extend(staging.drain(..));
               *staging = restaged;
               break;
            }
         }

         self.adapt(started.elapsed(), batch_len);
      }
   }

   /// Adaptive throttling: a drain that overruns half its interval or moves
   /// a high-water batch doubles the interval (up to max); a quiet drain
   /// halves it back toward base.
   fn adapt(&self, elapsed: Duration, batch_len: usize) {
      let current = self.interval_ms.load(Ordering::Relaxed);
      let overloaded =
         batch_len >= HIGH_WATER_BATCH || (elapsed.as_millis() as u64).saturating_mul(2) > current;
      let next = if overloaded {
         current.saturating_mul(2).min(self.max_interval_ms)
      } else {
         (current / 2).max(self.base_interval_ms)
      };
      if next != current {
         debug!(from = current, to = next, "Adapted flush interval");
         self.interval_ms.store(next, Ordering::Relaxed);
      }
   }
}

/// Apply one batch inside a single transaction on the supplied connection.
///
/// Returns the table names of the writes that applied, for the change
/// notifier. Individual statement failures are skipped; the commit keeps
/// what succeeded.
async fn commit_batch(
   store: &Store,
   conn: &mut SqliteConnection,
   batch: &[Box<dyn QueuedWrite>],
) -> Result<Vec<&'static str>> {
   // Schema pass first, outside the transaction
   let mut prepared = Vec::with_capacity(batch.len());
   for write in batch {
      match write.prepare(store, conn).await {
         Ok(()) => prepared.push(true),
         Err(e) => {
            warn!(table = write.table(), error = %e, "Skipped unpreparable write in batch");
            prepared.push(false);
         }
      }
   }

   sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

   let mut touched = Vec::new();
   for (write, ready) in batch.iter().zip(&prepared) {
      if !ready {
         continue;
      }
      match write.apply(store, conn).await {
         Ok(()) => touched.push(write.table()),
         Err(e) => {
            warn!(table = write.table(), error = %e, "Skipped failing write in batch");
         }
      }
   }

   if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
      let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
      return Err(e.into());
   }

   touched.dedup();
   Ok(touched)
}

/// Spawn the background flush worker.
///
/// The worker runs the initialization flush first and signals readiness,
/// then loops on wake-or-tick until [`WriteBehind::stop`] is observed, at
/// which point it drains whatever is left and exits - an explicit stop
/// condition instead of a self-rescheduling timer.
pub(crate) fn spawn_flush_worker(store: Store) -> JoinHandle<()> {
   tokio::spawn(async move {
      let Ok(inner) = store.active() else {
         return;
      };
      let writer = inner.writer();

      // Initialization flush: must complete before dependent reads proceed
      writer.drain(&store, true).await;
      let _ = writer.ready_tx.send(true);

      let tick = Duration::from_millis(writer.base_interval_ms.clamp(10, 250));
      loop {
         tokio::select! {
            _ = writer.wake.notified() => {}
            _ = tokio::time::sleep(tick) => {}
         }

         if writer.is_stopping() {
            writer.drain(&store, true).await;
            break;
         }
         writer.drain(&store, false).await;
      }
   })
}
