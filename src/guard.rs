//! Order status transition guard.
//!
//! Staff may only move an order forward along a fixed graph:
//!
//! ```text
//! PENDING    -> PROCESSING, CANCELLED
//! PROCESSING -> COMPLETED, CANCELLED
//! COMPLETED  -> (terminal)
//! CANCELLED  -> (terminal)
//! ```
//!
//! Disallowed requests are rejected locally without touching the network.

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::Backend;
use crate::error::SyncError;
use crate::events::EventBus;
use crate::models::{Order, OrderId, OrderStatus, StatusUpdate};
use crate::store::SnapshotStore;

pub fn allowed_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
        OrderStatus::Processing => &[OrderStatus::Completed, OrderStatus::Cancelled],
        OrderStatus::Completed | OrderStatus::Cancelled => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn check_transition(
    order_id: OrderId,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), SyncError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition { order_id, from, to })
    }
}

pub struct StatusGuard<B: Backend> {
    backend: Arc<B>,
    store: Arc<SnapshotStore<Order>>,
    events: EventBus,
}

impl<B: Backend> StatusGuard<B> {
    pub fn new(backend: Arc<B>, store: Arc<SnapshotStore<Order>>, events: EventBus) -> Self {
        Self {
            backend,
            store,
            events,
        }
    }

    fn current(&self, order_id: OrderId) -> Result<Order, SyncError> {
        self.store
            .snapshot()
            .items
            .iter()
            .find(|o| o.order_id == order_id)
            .cloned()
            .ok_or(SyncError::UnknownOrder(order_id))
    }

    /// Targets the order may move to from its current status.
    pub fn available_transitions(&self, order_id: OrderId) -> Result<Vec<OrderStatus>, SyncError> {
        let order = self.current(order_id)?;
        Ok(allowed_transitions(order.order_status).to_vec())
    }

    /// Validate against the current snapshot, then post the new status and
    /// refetch the order list once.
    pub async fn request_transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<(), SyncError> {
        let order = self.current(order_id)?;
        if let Err(e) = check_transition(order_id, order.order_status, target) {
            warn!(order_id, from = %order.order_status, to = %target, "status transition rejected");
            return Err(e);
        }

        let update = StatusUpdate {
            order_id,
            email: order.ordered_by.clone(),
            order_status: target,
        };
        if let Err(e) = self.backend.update_order_status(update).await {
            warn!(order_id, to = %target, error = %e, "status update failed");
            self.events.report_error("Failed to update order status", &e);
            return Err(e);
        }
        info!(order_id, from = %order.order_status, to = %target, "order status updated");

        let _ = self.store.refresh(self.backend.fetch_staff_orders()).await;
        Ok(())
    }
}
