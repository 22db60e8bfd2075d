//! Store wired to the push channel.
//!
//! A [`LiveSnapshot`] is what a mounted screen holds: it fetches on mount,
//! refetches on every push signal, and on unmount detaches from the channel
//! and disposes the store so late responses are dropped.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::channel::{ChannelHub, SignalHandler, SubscriptionId};
use crate::error::SyncError;
use crate::store::{Snapshot, SnapshotStore};

/// Produces one fetch of the full list.
pub type Loader<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<T>, SyncError>> + Send + Sync>;

pub struct LiveSnapshot<T> {
    store: Arc<SnapshotStore<T>>,
    loader: Loader<T>,
    hub: Arc<ChannelHub>,
    subscription: Mutex<Option<SubscriptionId>>,
    tasks: TaskTracker,
}

impl<T: Send + Sync + 'static> LiveSnapshot<T> {
    pub fn new(store: Arc<SnapshotStore<T>>, loader: Loader<T>, hub: Arc<ChannelHub>) -> Self {
        Self {
            store,
            loader,
            hub,
            subscription: Mutex::new(None),
            tasks: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore<T>> {
        &self.store
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Subscribe to push signals and run the initial fetch. A failed first
    /// fetch leaves the view mounted with an empty snapshot.
    pub async fn mount(&self) -> Result<Arc<Snapshot<T>>, SyncError> {
        if self.store.is_disposed() {
            return Err(SyncError::Disposed);
        }
        {
            let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
            if subscription.is_none() {
                *subscription = Some(self.hub.attach(self.signal_handler()));
                info!(resource = ?self.store.resource(), "view mounted");
            }
        }
        self.refresh().await
    }

    pub async fn refresh(&self) -> Result<Arc<Snapshot<T>>, SyncError> {
        self.store.refresh((self.loader)()).await
    }

    fn signal_handler(&self) -> SignalHandler {
        let store = self.store.clone();
        let loader = self.loader.clone();
        let tasks = self.tasks.clone();
        Arc::new(move || {
            if tasks.is_closed() {
                return;
            }
            let store = store.clone();
            let fetch = loader();
            debug!(resource = ?store.resource(), "push signal, refetching");
            tasks.spawn(async move {
                let _ = store.refresh(fetch).await;
            });
        })
    }

    /// Detach from the channel, dispose the store and wait for refetches
    /// started by push signals to finish.
    pub async fn unmount(&self) {
        self.store.dispose();
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.hub.detach(id).await;
        }
        self.tasks.close();
        self.tasks.wait().await;
        info!(resource = ?self.store.resource(), "view unmounted");
    }
}
