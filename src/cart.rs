//! Student cart screen.
//!
//! Shows the server's cart with queued quantity edits laid over it. Lines are
//! only ever created or removed by the server; the view never invents a
//! `cartId`.

use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::Backend;
use crate::channel::ChannelHub;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, Resource};
use crate::live::{LiveSnapshot, Loader};
use crate::models::{CartId, CartLine, CartUpsert};
use crate::queue::MutationQueue;
use crate::store::SnapshotStore;

/// A cart line as it should be rendered right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayLine {
    #[serde(flatten)]
    pub line: CartLine,
    /// Pending edit if one exists, otherwise the server's quantity.
    pub quantity: u32,
    pub pending: bool,
}

impl DisplayLine {
    pub fn line_total(&self) -> f64 {
        self.line.unit_price * f64::from(self.quantity)
    }
}

pub struct CartView<B: Backend> {
    backend: Arc<B>,
    live: LiveSnapshot<CartLine>,
    queue: MutationQueue<B>,
    events: EventBus,
}

impl<B: Backend> CartView<B> {
    pub fn new(
        backend: Arc<B>,
        hub: Arc<ChannelHub>,
        config: &SyncConfig,
        events: EventBus,
        session: &CancellationToken,
    ) -> Self {
        let store = Arc::new(SnapshotStore::new(Resource::Cart, events.clone(), session));
        let fetcher = backend.clone();
        let loader: Loader<CartLine> = Arc::new(move || {
            let backend = fetcher.clone();
            async move { backend.fetch_cart().await }.boxed()
        });
        let queue = MutationQueue::new(
            backend.clone(),
            store.clone(),
            events.clone(),
            config.debounce,
            session,
        );
        Self {
            backend,
            live: LiveSnapshot::new(store, loader, hub),
            queue,
            events,
        }
    }

    pub async fn mount(&self) -> Result<(), SyncError> {
        self.live.mount().await.map(|_| ())
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.live.refresh().await.map(|_| ())
    }

    /// Queue an absolute quantity for a line. 0 or less removes it once the
    /// debounce window elapses.
    pub fn request_change(&self, cart_id: CartId, quantity: i64) -> Result<u32, SyncError> {
        self.queue.request_change(cart_id, quantity)
    }

    /// Queue a relative change (the +/- buttons) based on what is displayed.
    pub fn adjust(&self, cart_id: CartId, delta: i64) -> Result<u32, SyncError> {
        let current = self
            .display_quantity(cart_id)
            .ok_or(SyncError::UnknownLine(cart_id))?;
        self.queue
            .request_change(cart_id, i64::from(current).saturating_add(delta))
    }

    pub async fn remove_line(&self, cart_id: CartId) -> Result<(), SyncError> {
        self.queue.remove_now(cart_id).await
    }

    /// Add a product from the menu. The server merges it into an existing
    /// line for the same product.
    pub async fn add_item(&self, product_id: i64, quantity: u32, price: f64) -> Result<(), SyncError> {
        let body = CartUpsert {
            product_id,
            quantity: quantity.max(1),
            price,
            ordered: false,
        };
        if let Err(e) = self.backend.upsert_cart_line(body).await {
            warn!(product_id, error = %e, "add to cart failed");
            self.events.report_error("Failed to add item", &e);
            return Err(e);
        }
        info!(product_id, quantity, "item added to cart");
        let _ = self.live.refresh().await;
        Ok(())
    }

    /// Commit queued edits, then turn the cart into an order. No order is
    /// placed if any queued edit failed to commit.
    pub async fn checkout(&self) -> Result<(), SyncError> {
        if let Err(e) = self.queue.flush().await {
            warn!(error = %e, "checkout aborted, a quantity edit did not commit");
            return Err(e);
        }
        if let Err(e) = self.backend.place_order().await {
            warn!(error = %e, "checkout failed");
            self.events.report_error("Failed to place order", &e);
            return Err(e);
        }
        info!(total = self.total(), "order placed");
        let _ = self.live.refresh().await;
        Ok(())
    }

    pub fn lines(&self) -> Vec<DisplayLine> {
        let snapshot = self.live.store().snapshot();
        snapshot
            .items
            .iter()
            .map(|line| {
                let pending = self.queue.pending_quantity(line.cart_id);
                DisplayLine {
                    line: line.clone(),
                    quantity: pending.unwrap_or(line.quantity),
                    pending: pending.is_some(),
                }
            })
            .collect()
    }

    pub fn display_quantity(&self, cart_id: CartId) -> Option<u32> {
        let snapshot = self.live.store().snapshot();
        let line = snapshot.items.iter().find(|l| l.cart_id == cart_id)?;
        Some(self.queue.pending_quantity(cart_id).unwrap_or(line.quantity))
    }

    pub fn total(&self) -> f64 {
        self.lines().iter().map(DisplayLine::line_total).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.lines().iter().map(|l| l.quantity).sum()
    }

    pub fn has_pending_edits(&self) -> bool {
        self.queue.has_pending()
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.live.store().last_error()
    }

    /// Cancel debounce timers, leave the channel and dispose the store.
    pub async fn unmount(&self) {
        self.queue.shutdown().await;
        self.live.unmount().await;
    }
}
