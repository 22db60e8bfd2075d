//! Order screens: the staff board and the student's order history.
//!
//! Both are read-only snapshots of the order list kept fresh by the push
//! channel. Only the staff board can change an order, and only through the
//! [`StatusGuard`].

use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::channel::ChannelHub;
use crate::error::SyncError;
use crate::events::{EventBus, Resource};
use crate::guard::StatusGuard;
use crate::live::{LiveSnapshot, Loader};
use crate::models::{Order, OrderId, OrderStatus};
use crate::store::SnapshotStore;

/// Which order list a view follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    /// Every order (`GET /staff/orders`).
    Staff,
    /// The signed-in student's orders (`GET /user/orders`).
    Mine,
}

impl OrderScope {
    pub fn resource(self) -> Resource {
        match self {
            OrderScope::Staff => Resource::StaffOrders,
            OrderScope::Mine => Resource::MyOrders,
        }
    }
}

fn order_feed<B: Backend>(
    scope: OrderScope,
    backend: &Arc<B>,
    hub: Arc<ChannelHub>,
    events: &EventBus,
    session: &CancellationToken,
) -> LiveSnapshot<Order> {
    let store = Arc::new(SnapshotStore::new(scope.resource(), events.clone(), session));
    let fetcher = backend.clone();
    let loader: Loader<Order> = Arc::new(move || {
        let backend = fetcher.clone();
        async move {
            match scope {
                OrderScope::Staff => backend.fetch_staff_orders().await,
                OrderScope::Mine => backend.fetch_my_orders().await,
            }
        }
        .boxed()
    });
    LiveSnapshot::new(store, loader, hub)
}

fn newest_first(orders: &[Order]) -> Vec<Order> {
    let mut sorted = orders.to_vec();
    sorted.sort_by(|a, b| b.order_id.cmp(&a.order_id));
    sorted
}

// ---------------------------------------------------------------------------
// Staff board
// ---------------------------------------------------------------------------

pub struct OrderBoard<B: Backend> {
    live: LiveSnapshot<Order>,
    guard: StatusGuard<B>,
}

impl<B: Backend> OrderBoard<B> {
    pub fn new(
        backend: Arc<B>,
        hub: Arc<ChannelHub>,
        events: EventBus,
        session: &CancellationToken,
    ) -> Self {
        let live = order_feed(OrderScope::Staff, &backend, hub, &events, session);
        let guard = StatusGuard::new(backend, live.store().clone(), events);
        Self { live, guard }
    }

    pub async fn mount(&self) -> Result<(), SyncError> {
        self.live.mount().await.map(|_| ())
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.live.refresh().await.map(|_| ())
    }

    pub async fn request_transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
    ) -> Result<(), SyncError> {
        self.guard.request_transition(order_id, target).await
    }

    pub fn available_transitions(&self, order_id: OrderId) -> Result<Vec<OrderStatus>, SyncError> {
        self.guard.available_transitions(order_id)
    }

    /// All orders, newest first.
    pub fn orders(&self) -> Vec<Order> {
        newest_first(&self.live.store().snapshot().items)
    }

    pub fn orders_with_status(&self, status: OrderStatus) -> Vec<Order> {
        self.orders()
            .into_iter()
            .filter(|o| o.order_status == status)
            .collect()
    }

    /// Orders still needing staff attention.
    pub fn pending_orders(&self) -> Vec<Order> {
        self.orders()
            .into_iter()
            .filter(|o| !o.order_status.is_terminal())
            .collect()
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.live.store().last_error()
    }

    pub async fn unmount(&self) {
        self.live.unmount().await;
    }
}

// ---------------------------------------------------------------------------
// Student history
// ---------------------------------------------------------------------------

pub struct OrderHistory {
    live: LiveSnapshot<Order>,
}

impl OrderHistory {
    pub fn new<B: Backend>(
        backend: Arc<B>,
        hub: Arc<ChannelHub>,
        events: EventBus,
        session: &CancellationToken,
    ) -> Self {
        Self {
            live: order_feed(OrderScope::Mine, &backend, hub, &events, session),
        }
    }

    pub async fn mount(&self) -> Result<(), SyncError> {
        self.live.mount().await.map(|_| ())
    }

    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.live.refresh().await.map(|_| ())
    }

    /// The student's orders, newest first.
    pub fn orders(&self) -> Vec<Order> {
        newest_first(&self.live.store().snapshot().items)
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.live.store().last_error()
    }

    pub async fn unmount(&self) {
        self.live.unmount().await;
    }
}
