//! Authenticated session.
//!
//! A `Session` exists from the moment a bearer token is available until
//! logout. It owns the REST backend, the event bus and the single push
//! channel shared by every screen mounted from it. Closing the session
//! cancels every debounce timer, disposes every store and closes the socket.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{Backend, HttpBackend};
use crate::auth::AuthToken;
use crate::cart::CartView;
use crate::channel::{ChannelHub, ChannelStatus, PushConnector, ReconnectPolicy, WsConnector};
use crate::config::SyncConfig;
use crate::diagnostics;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::orders::{OrderBoard, OrderHistory};
use crate::storage;

pub struct Session<B: Backend = HttpBackend> {
    id: Uuid,
    config: SyncConfig,
    token: AuthToken,
    backend: Arc<B>,
    events: EventBus,
    hub: Arc<ChannelHub>,
    lifetime: CancellationToken,
}

impl Session<HttpBackend> {
    /// Open a session against the configured kiosk server.
    pub fn open(config: SyncConfig, token: AuthToken) -> Result<Self, SyncError> {
        token.ensure_valid()?;
        let backend = HttpBackend::new(&config, token.clone())?;
        Ok(Self::with_parts(config, token, backend, WsConnector::new()))
    }

    /// Reopen the session remembered by [`Session::remember`], if its token
    /// is still valid.
    pub fn restore(config: SyncConfig) -> Result<Option<Self>, SyncError> {
        match storage::load_token() {
            Some(token) => Self::open(config, token).map(Some),
            None => Ok(None),
        }
    }
}

impl<B: Backend> Session<B> {
    pub fn with_parts<C: PushConnector>(
        config: SyncConfig,
        token: AuthToken,
        backend: B,
        connector: C,
    ) -> Self {
        let id = Uuid::new_v4();
        let events = EventBus::new();
        let hub = ChannelHub::new(
            connector,
            config.ws_url.clone(),
            token.clone(),
            ReconnectPolicy::from_config(&config),
            events.clone(),
        );
        info!(
            session_id = %id,
            base_url = %config.base_url,
            ws_url = %config.ws_url,
            account = ?token.subject(),
            "session opened"
        );
        Self {
            id,
            config,
            token,
            backend: Arc::new(backend),
            events,
            hub: Arc::new(hub),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Persist the token so [`Session::restore`] can pick it up next launch.
    pub fn remember(&self) -> Result<(), SyncError> {
        storage::save_token(&self.token)
    }

    pub fn cart_view(&self) -> CartView<B> {
        CartView::new(
            self.backend.clone(),
            self.hub.clone(),
            &self.config,
            self.events.clone(),
            &self.lifetime,
        )
    }

    pub fn order_board(&self) -> OrderBoard<B> {
        OrderBoard::new(
            self.backend.clone(),
            self.hub.clone(),
            self.events.clone(),
            &self.lifetime,
        )
    }

    pub fn order_history(&self) -> OrderHistory {
        OrderHistory::new(
            self.backend.clone(),
            self.hub.clone(),
            self.events.clone(),
            &self.lifetime,
        )
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.hub.status()
    }

    /// Redacted support report for this session.
    pub fn diagnostics(&self) -> serde_json::Value {
        diagnostics::session_report(&self.id.to_string(), &self.config, &self.channel_status())
    }

    /// True once the push channel gave up; screens should show a banner and
    /// offer a manual refresh.
    pub fn is_degraded(&self) -> bool {
        self.hub.is_degraded()
    }

    /// Manual retry after the push channel gave up.
    pub async fn reconnect(&self) {
        info!(session_id = %self.id, "manual push channel reconnect");
        self.hub.reconnect_now().await;
    }

    /// Tear down every view created from this session and close the socket.
    pub async fn close(&self) {
        if self.lifetime.is_cancelled() {
            return;
        }
        self.lifetime.cancel();
        self.hub.stop().await;
        info!(session_id = %self.id, "session closed");
    }

    /// [`Session::close`] and forget the stored token.
    pub async fn logout(&self) -> Result<(), SyncError> {
        self.close().await;
        if let Err(e) = storage::clear() {
            warn!(session_id = %self.id, error = %e, "failed to clear stored credentials");
            return Err(e);
        }
        Ok(())
    }
}
