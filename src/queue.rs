//! Debounced mutation queue for cart quantity edits.
//!
//! Every edit is recorded as a [`PendingEdit`] keyed by cart line and starts a
//! fresh debounce window; a newer edit for the same line cancels the older
//! timer. When the window elapses the final desired quantity is written once,
//! the cart is refetched, and only then is the overlay cleared, so the
//! displayed quantity never flickers back to the stale value. A fetch sent
//! before the write that lands after the refetch would restore the old list,
//! so the overlay stays until every such fetch has resolved and the snapshot
//! comes from a fetch issued after the write.
//!
//! Writes for one line are serialised by a per-line async lock. Failures are
//! not retried: the edit is dropped, a notice is emitted, and the cart is
//! refetched so the UI reverts to the authoritative state.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::error::SyncError;
use crate::events::EventBus;
use crate::models::{CartId, CartLine, CartUpsert};
use crate::store::{FetchSeq, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    /// Debounce timer running.
    Waiting,
    /// Write sent, waiting for the response and the refetch.
    InFlight,
}

#[derive(Debug, Clone)]
pub struct PendingEdit {
    pub desired_quantity: u32,
    pub phase: EditPhase,
    generation: u64,
    timer: CancellationToken,
    line: CartLine,
}

type LineLock = Arc<tokio::sync::Mutex<()>>;

struct QueueInner<B: Backend> {
    backend: Arc<B>,
    store: Arc<SnapshotStore<CartLine>>,
    events: EventBus,
    debounce: Duration,
    pending: Mutex<HashMap<CartId, PendingEdit>>,
    line_locks: Mutex<HashMap<CartId, LineLock>>,
    generation: AtomicU64,
    tracker: TaskTracker,
    closed: CancellationToken,
}

pub struct MutationQueue<B: Backend> {
    inner: Arc<QueueInner<B>>,
}

impl<B: Backend> Clone for MutationQueue<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Clamp a requested quantity into the range a line can hold.
pub fn clamp_quantity(requested: i64) -> u32 {
    u32::try_from(requested.max(0)).unwrap_or(u32::MAX)
}

impl<B: Backend> MutationQueue<B> {
    pub fn new(
        backend: Arc<B>,
        store: Arc<SnapshotStore<CartLine>>,
        events: EventBus,
        debounce: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                backend,
                store,
                events,
                debounce,
                pending: Mutex::new(HashMap::new()),
                line_locks: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                tracker: TaskTracker::new(),
                closed: parent.child_token(),
            }),
        }
    }

    /// Record a desired quantity for `cart_id` and (re)start its debounce
    /// window. Returns the clamped quantity that will be shown immediately.
    /// A quantity of 0 is committed as a line removal.
    pub fn request_change(&self, cart_id: CartId, quantity: i64) -> Result<u32, SyncError> {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return Err(SyncError::Disposed);
        }
        let desired = clamp_quantity(quantity);
        let snapshot = inner.store.snapshot();
        let from_snapshot = snapshot.items.iter().find(|l| l.cart_id == cart_id).cloned();

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = inner.closed.child_token();
        {
            let mut pending = inner.lock_pending();
            let line = match from_snapshot.or_else(|| pending.get(&cart_id).map(|e| e.line.clone())) {
                Some(line) => line,
                None => return Err(SyncError::UnknownLine(cart_id)),
            };
            let edit = PendingEdit {
                desired_quantity: desired,
                phase: EditPhase::Waiting,
                generation,
                timer: timer.clone(),
                line,
            };
            if let Some(previous) = pending.insert(cart_id, edit) {
                previous.timer.cancel();
            }
        }
        debug!(cart_id, desired, generation, "quantity edit queued");

        let task_inner = inner.clone();
        inner.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(task_inner.debounce) => {
                    let _ = commit(task_inner, cart_id, generation).await;
                }
            }
        });
        Ok(desired)
    }

    /// Desired quantity for a line while an edit is waiting or in flight.
    pub fn pending_quantity(&self, cart_id: CartId) -> Option<u32> {
        self.inner
            .lock_pending()
            .get(&cart_id)
            .map(|e| e.desired_quantity)
    }

    pub fn pending(&self) -> HashMap<CartId, PendingEdit> {
        self.inner.lock_pending().clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock_pending().is_empty()
    }

    /// Commit every waiting edit now and wait until all writes have landed.
    /// Returns the first write failure, if any.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let due: Vec<(CartId, u64)> = {
            let pending = self.inner.lock_pending();
            pending
                .iter()
                .filter(|(_, e)| e.phase == EditPhase::Waiting)
                .map(|(id, e)| {
                    e.timer.cancel();
                    (*id, e.generation)
                })
                .collect()
        };
        if !due.is_empty() {
            info!(count = due.len(), "flushing pending quantity edits");
        }
        let outcomes = join_all(
            due.into_iter()
                .map(|(cart_id, generation)| commit(self.inner.clone(), cart_id, generation)),
        )
        .await;

        let locks: Vec<LineLock> = self.inner.lock_locks().values().cloned().collect();
        for lock in locks {
            let _held = lock.lock().await;
        }
        outcomes.into_iter().collect()
    }

    /// Remove a line right away, discarding any edit queued for it.
    pub async fn remove_now(&self, cart_id: CartId) -> Result<(), SyncError> {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return Err(SyncError::Disposed);
        }
        if let Some(edit) = inner.lock_pending().remove(&cart_id) {
            edit.timer.cancel();
        }

        let lock = inner.line_lock(cart_id);
        let held = lock.lock().await;
        let result = inner.backend.remove_cart_line(cart_id).await;
        if let Err(e) = &result {
            warn!(cart_id, error = %e, "cart line removal failed");
            inner.events.report_error("Failed to remove item", e);
        } else {
            info!(cart_id, "cart line removed");
        }
        let _ = inner.store.refresh(inner.backend.fetch_cart()).await;
        drop(held);
        inner.release_line_lock(cart_id, lock);
        result
    }

    /// Drop all pending edits and cancel their timers. Writes already in
    /// flight complete, but their refetch is discarded once the store is
    /// disposed.
    pub fn cancel_all(&self) {
        self.inner.closed.cancel();
        let dropped = {
            let mut pending = self.inner.lock_pending();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            info!(dropped, "pending quantity edits discarded");
        }
    }

    /// [`MutationQueue::cancel_all`], then wait for every queue task to end.
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl<B: Backend> QueueInner<B> {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<CartId, PendingEdit>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_locks(&self) -> std::sync::MutexGuard<'_, HashMap<CartId, LineLock>> {
        self.line_locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn line_lock(&self, cart_id: CartId) -> LineLock {
        self.lock_locks().entry(cart_id).or_default().clone()
    }

    /// Forget the lock for `cart_id` once the map and `lock` are its only
    /// holders.
    fn release_line_lock(&self, cart_id: CartId, lock: LineLock) {
        let mut locks = self.lock_locks();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&cart_id);
        }
    }

    /// Refetch after a committed write. The snapshot has caught up once no
    /// fetch issued before the write is still pending and the applied list
    /// came from a later one.
    async fn refresh_past(&self, issued_before: FetchSeq) {
        let _ = self.store.refresh(self.backend.fetch_cart()).await;
        self.store.settle_through(issued_before).await;
        if !self.store.is_disposed() && !self.store.applied_after(issued_before) {
            debug!(issued_before, "older fetch landed after the write, refetching");
            let _ = self.store.refresh(self.backend.fetch_cart()).await;
        }
    }

    /// Clear the overlay for `cart_id` unless a newer edit replaced it.
    fn clear_if_current(&self, cart_id: CartId, generation: u64) {
        let mut pending = self.lock_pending();
        if pending.get(&cart_id).map(|e| e.generation) == Some(generation) {
            pending.remove(&cart_id);
        }
    }
}

/// Write the edit identified by `generation`, if it is still the current one.
/// A superseded edit is not an error.
async fn commit<B: Backend>(
    inner: Arc<QueueInner<B>>,
    cart_id: CartId,
    generation: u64,
) -> Result<(), SyncError> {
    let lock = inner.line_lock(cart_id);
    let held = lock.lock().await;
    let result = commit_locked(&inner, cart_id, generation).await;
    drop(held);
    inner.release_line_lock(cart_id, lock);
    result
}

async fn commit_locked<B: Backend>(
    inner: &QueueInner<B>,
    cart_id: CartId,
    generation: u64,
) -> Result<(), SyncError> {
    let claimed = {
        let mut pending = inner.lock_pending();
        match pending.get_mut(&cart_id) {
            Some(edit) if edit.generation == generation && edit.phase == EditPhase::Waiting => {
                edit.phase = EditPhase::InFlight;
                Some((edit.desired_quantity, edit.line.clone()))
            }
            _ => None,
        }
    };
    let Some((quantity, line)) = claimed else {
        debug!(cart_id, generation, "edit superseded before commit");
        return Ok(());
    };

    let result = if quantity == 0 {
        inner.backend.remove_cart_line(cart_id).await
    } else {
        inner
            .backend
            .upsert_cart_line(CartUpsert::for_line(&line, quantity))
            .await
    };

    match result {
        Ok(()) => {
            info!(cart_id, quantity, "quantity edit committed");
            let issued_before = inner.store.last_issued();
            inner.refresh_past(issued_before).await;
            inner.clear_if_current(cart_id, generation);
            Ok(())
        }
        Err(e) => {
            warn!(cart_id, quantity, error = %e, "quantity edit failed, reverting to server state");
            inner.clear_if_current(cart_id, generation);
            inner.events.report_error("Failed to update quantity", &e);
            let _ = inner.store.refresh(inner.backend.fetch_cart()).await;
            Err(e)
        }
    }
}
