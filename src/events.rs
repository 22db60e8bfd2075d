//! Event fan-out from the sync core to the host UI.
//!
//! The host subscribes once per screen and renders toasts, degraded-mode
//! banners and re-renders from these events. Emitting never blocks and never
//! fails: with no subscribers the event is simply dropped.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::channel::ChannelPhase;
use crate::error::SyncError;

const EVENT_BUFFER: usize = 256;

/// Which list a snapshot event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cart,
    StaffOrders,
    MyOrders,
}

/// User-facing notice. `Transient` maps to a toast, `Persistent` to a banner
/// that stays until the session is rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Transient { title: String, message: String },
    Persistent { title: String, message: String },
}

impl Notice {
    pub fn transient(title: &str, message: impl Into<String>) -> Self {
        Notice::Transient {
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn persistent(title: &str, message: impl Into<String>) -> Self {
        Notice::Persistent {
            title: title.to_string(),
            message: message.into(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Notice::Persistent { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    SnapshotUpdated {
        resource: Resource,
        version: u64,
        len: usize,
    },
    ChannelStateChanged {
        phase: ChannelPhase,
        attempt: u32,
    },
    Notice(Notice),
    /// The backend rejected the bearer token; the host must re-authenticate.
    AuthExpired,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            debug!("sync event dropped: no subscribers");
        }
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(SyncEvent::Notice(notice));
    }

    /// Turn a component-local failure into the right user-visible signal.
    pub fn report_error(&self, title: &str, err: &SyncError) {
        if err.is_auth() {
            self.emit(SyncEvent::AuthExpired);
        }
        self.notice(Notice::transient(title, err.to_string()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain whatever is currently buffered on a receiver.
#[cfg(test)]
pub(crate) fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
