//! Session-wide owner of the push channel.
//!
//! Cart and order views share one `/ws/orders` connection per session. Each
//! mounted view subscribes a refetch handler; the hub starts the channel on
//! the first subscription and tears it down when the last view unmounts or
//! the session ends.

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{
    ChannelPhase, ChannelStatus, EventChannel, PushConnector, ReconnectPolicy, SharedStatus,
    SignalHandler,
};
use crate::auth::AuthToken;
use crate::events::EventBus;

pub type SubscriptionId = u64;

// ---------------------------------------------------------------------------
// Signal router
// ---------------------------------------------------------------------------

/// Fan-out of channel signals to every subscribed view.
#[derive(Clone, Default)]
pub struct SignalRouter {
    inner: Arc<Mutex<RouterInner>>,
}

#[derive(Default)]
struct RouterInner {
    next_id: SubscriptionId,
    handlers: Vec<(SubscriptionId, SignalHandler)>,
}

impl SignalRouter {
    pub fn subscribe(&self, handler: SignalHandler) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let id = inner.next_id;
        inner.handlers.push((id, handler));
        id
    }

    /// Returns the number of subscribers left.
    pub fn unsubscribe(&self, id: SubscriptionId) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.handlers.retain(|(h, _)| *h != id);
        inner.handlers.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every handler. Handlers run outside the lock so they may
    /// subscribe or unsubscribe.
    pub fn dispatch(&self) {
        let handlers: Vec<SignalHandler> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.handlers.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            handler();
        }
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

type Launcher = Box<dyn Fn(SignalHandler, SharedStatus) -> EventChannel + Send + Sync>;

pub struct ChannelHub {
    router: SignalRouter,
    status: SharedStatus,
    slot: Mutex<Option<EventChannel>>,
    launcher: Launcher,
}

impl ChannelHub {
    pub fn new<C: PushConnector>(
        connector: C,
        url: String,
        token: AuthToken,
        policy: ReconnectPolicy,
        events: EventBus,
    ) -> Self {
        let connector = Arc::new(connector);
        let status = Arc::new(Mutex::new(ChannelStatus::idle(policy.max_attempts())));
        let launcher: Launcher = Box::new(move |on_signal, status| {
            EventChannel::spawn(
                connector.clone(),
                url.clone(),
                token.clone(),
                policy.clone(),
                events.clone(),
                status,
                on_signal,
            )
        });
        Self {
            router: SignalRouter::default(),
            status,
            slot: Mutex::new(None),
            launcher,
        }
    }

    /// Register a view's refetch handler, starting the channel if needed.
    /// A channel that already gave up stays down until [`ChannelHub::reconnect_now`].
    pub fn attach(&self, handler: SignalHandler) -> SubscriptionId {
        let id = self.router.subscribe(handler);
        let mut slot = self.lock_slot();
        if slot.is_none() {
            let router = self.router.clone();
            let dispatch: SignalHandler = Arc::new(move || router.dispatch());
            *slot = Some((self.launcher)(dispatch, self.status.clone()));
            info!(subscription = id, "push channel launched");
        } else {
            debug!(subscription = id, "push channel already running");
        }
        id
    }

    /// Remove a subscription; the last one out closes the channel.
    pub async fn detach(&self, id: SubscriptionId) {
        self.router.unsubscribe(id);
        // Subscribers join the router before taking the slot, so an attach
        // racing this detach either keeps the channel or relaunches it.
        let idle = {
            let mut slot = self.lock_slot();
            if self.router.is_empty() {
                slot.take()
            } else {
                None
            }
        };
        if let Some(mut channel) = idle {
            debug!(subscription = id, "last subscriber left");
            channel.shutdown().await;
        }
    }

    /// Close the socket and cancel any pending reconnect.
    pub async fn stop(&self) {
        let running = self.lock_slot().take();
        if let Some(mut channel) = running {
            channel.shutdown().await;
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<EventChannel>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Manual retry after the channel gave up (the "refresh" path).
    pub async fn reconnect_now(&self) {
        self.stop().await;
        if self.router.is_empty() {
            return;
        }
        let router = self.router.clone();
        let dispatch: SignalHandler = Arc::new(move || router.dispatch());
        let mut slot = self.lock_slot();
        if slot.is_none() {
            *slot = Some((self.launcher)(dispatch, self.status.clone()));
            info!("push channel relaunched");
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_degraded(&self) -> bool {
        self.status().phase == ChannelPhase::Failed
    }

    pub fn subscribers(&self) -> usize {
        self.router.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeConnector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn hub(connector: &FakeConnector) -> ChannelHub {
        ChannelHub::new(
            connector.clone(),
            "ws://kiosk.test/ws/orders".to_string(),
            AuthToken::new("token-123").unwrap(),
            ReconnectPolicy::new(Duration::from_millis(1_000), Duration::from_millis(10_000), 5),
            EventBus::new(),
        )
    }

    fn counter() -> (SignalHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (Arc::new(move || { c.fetch_add(1, Ordering::SeqCst); }), count)
    }

    #[test]
    fn test_router_dispatches_to_all_subscribers() {
        let router = SignalRouter::default();
        let (a, count_a) = counter();
        let (b, count_b) = counter();
        let id_a = router.subscribe(a);
        router.subscribe(b);

        router.dispatch();
        assert_eq!(router.unsubscribe(id_a), 1);
        router.dispatch();

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_views_share_one_connection() {
        let connector = FakeConnector::new();
        let hub = hub(&connector);
        let (cart, cart_count) = counter();
        let (orders, orders_count) = counter();

        let cart_id = hub.attach(cart);
        let orders_id = hub.attach(orders);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempt_times().len(), 1);

        connector.push("New order placed: 7");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cart_count.load(Ordering::SeqCst), 1);
        assert_eq!(orders_count.load(Ordering::SeqCst), 1);

        hub.detach(cart_id).await;
        assert_eq!(hub.status().phase, ChannelPhase::Open);

        hub.detach(orders_id).await;
        assert_eq!(hub.status().phase, ChannelPhase::Stopped);
        assert_eq!(connector.closed_connections(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_attach_racing_last_detach_keeps_a_channel() {
        let connector = FakeConnector::new();
        let hub = Arc::new(hub(&connector));

        for _ in 0..100 {
            let (first, _) = counter();
            let leaving = hub.attach(first);

            let h = hub.clone();
            let detach = tokio::spawn(async move { h.detach(leaving).await });
            let h = hub.clone();
            let attach = tokio::spawn(async move {
                let (second, _) = counter();
                h.attach(second)
            });
            detach.await.unwrap();
            let joined = attach.await.unwrap();

            assert_eq!(hub.subscribers(), 1);
            assert!(hub.lock_slot().is_some());
            hub.detach(joined).await;
            assert!(hub.lock_slot().is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_recovers_from_failed() {
        let connector = FakeConnector::new();
        connector.refuse_connections(true);
        let hub = hub(&connector);
        let (handler, _) = counter();
        hub.attach(handler);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(hub.is_degraded());

        connector.refuse_connections(false);
        hub.reconnect_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hub.status().phase, ChannelPhase::Open);
        assert!(!hub.is_degraded());
    }
}
