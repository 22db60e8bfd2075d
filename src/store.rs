//! Synchronized snapshot store.
//!
//! Holds the last authoritative list fetched from the backend. A fetch never
//! patches the list: it replaces the whole snapshot atomically, and whichever
//! response resolves last wins. A failed fetch leaves the previous snapshot in
//! place. Once disposed (view unmounted) late responses are discarded.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::events::{EventBus, Resource, SyncEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    /// Bumped on every applied fetch; 0 means nothing fetched yet.
    pub version: u64,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> Snapshot<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            version: 0,
            fetched_at: None,
        }
    }
}

/// Issue order of a fetch. Every call to [`SnapshotStore::refresh`] takes
/// the next number before its request goes out.
pub type FetchSeq = u64;

struct StoreState<T> {
    snapshot: Arc<Snapshot<T>>,
    last_error: Option<SyncError>,
    issued: FetchSeq,
    /// Issue number of the fetch the current snapshot came from.
    applied: FetchSeq,
    in_flight: BTreeSet<FetchSeq>,
}

pub struct SnapshotStore<T> {
    resource: Resource,
    state: Mutex<StoreState<T>>,
    settled: Notify,
    disposed: CancellationToken,
    events: EventBus,
}

impl<T: Send + Sync + 'static> SnapshotStore<T> {
    /// The store is disposed automatically when `parent` is cancelled
    /// (session close).
    pub fn new(resource: Resource, events: EventBus, parent: &CancellationToken) -> Self {
        Self {
            resource,
            state: Mutex::new(StoreState {
                snapshot: Arc::new(Snapshot::empty()),
                last_error: None,
                issued: 0,
                applied: 0,
                in_flight: BTreeSet::new(),
            }),
            settled: Notify::new(),
            disposed: parent.child_token(),
            events,
        }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.lock().snapshot.clone()
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.lock().last_error.clone()
    }

    pub fn is_loading(&self) -> bool {
        !self.lock().in_flight.is_empty()
    }

    /// Issue number of the most recently started fetch.
    pub fn last_issued(&self) -> FetchSeq {
        self.lock().issued
    }

    /// True when the current snapshot came from a fetch issued after `seq`.
    pub fn applied_after(&self, seq: FetchSeq) -> bool {
        self.lock().applied > seq
    }

    fn has_in_flight_through(&self, seq: FetchSeq) -> bool {
        self.lock().in_flight.range(..=seq).next().is_some()
    }

    /// Wait until every fetch issued at or before `seq` has resolved.
    /// Returns early once the store is disposed.
    pub async fn settle_through(&self, seq: FetchSeq) {
        loop {
            let notified = self.settled.notified();
            if self.is_disposed() || !self.has_in_flight_through(seq) {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.disposed.cancelled() => return,
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }

    /// Stop accepting fetch results. In-flight fetches are abandoned.
    pub fn dispose(&self) {
        self.disposed.cancel();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `load` and replace the snapshot with its result.
    ///
    /// On failure the previous snapshot is kept, the error is recorded and
    /// reported on the event bus, and then returned to the caller.
    pub async fn refresh<F>(&self, load: F) -> Result<Arc<Snapshot<T>>, SyncError>
    where
        F: Future<Output = Result<Vec<T>, SyncError>>,
    {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        let seq = {
            let mut state = self.lock();
            state.issued += 1;
            let seq = state.issued;
            state.in_flight.insert(seq);
            seq
        };

        let result = tokio::select! {
            biased;
            _ = self.disposed.cancelled() => Err(SyncError::Disposed),
            res = load => res,
        };

        let mut state = self.lock();
        state.in_flight.remove(&seq);
        self.settled.notify_waiters();
        if self.disposed.is_cancelled() {
            debug!(resource = ?self.resource, "fetch resolved after dispose, discarded");
            return Err(SyncError::Disposed);
        }

        match result {
            Ok(items) => {
                let version = state.snapshot.version + 1;
                let len = items.len();
                let snapshot = Arc::new(Snapshot {
                    items,
                    version,
                    fetched_at: Some(Utc::now()),
                });
                state.snapshot = snapshot.clone();
                state.applied = seq;
                state.last_error = None;
                drop(state);

                debug!(resource = ?self.resource, version, seq, len, "snapshot replaced");
                self.events.emit(SyncEvent::SnapshotUpdated {
                    resource: self.resource,
                    version,
                    len,
                });
                Ok(snapshot)
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                drop(state);

                if err != SyncError::Disposed {
                    warn!(resource = ?self.resource, error = %err, "fetch failed, keeping previous snapshot");
                    self.events.report_error(failure_title(self.resource), &err);
                }
                Err(err)
            }
        }
    }
}

fn failure_title(resource: Resource) -> &'static str {
    match resource {
        Resource::Cart => "Failed to load cart",
        Resource::StaffOrders | Resource::MyOrders => "Failed to load orders",
    }
}
