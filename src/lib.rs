//! Kiosk Sync - real-time cart and order synchronisation core
//!
//! Keeps the kiosk's cart and order screens in step with the backend:
//! quantity edits are debounced and written once, a single push channel per
//! session turns server messages into refetches, snapshots are replaced
//! wholesale, and order status changes go through a transition guard.
//!
//! The host application opens a [`Session`] once it has a bearer token and
//! mounts views ([`CartView`], [`OrderBoard`], [`OrderHistory`]) from it.
//! Everything user-visible (toasts, degraded-mode banners, re-renders) is
//! delivered as [`SyncEvent`]s on the session's [`EventBus`].

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod auth;
pub mod cart;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod guard;
pub mod live;
pub mod models;
pub mod orders;
pub mod queue;
pub mod session;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{Backend, HttpBackend};
pub use auth::AuthToken;
pub use cart::{CartView, DisplayLine};
pub use channel::{ChannelPhase, ChannelStatus, ReconnectPolicy};
pub use config::SyncConfig;
pub use error::SyncError;
pub use events::{EventBus, Notice, Resource, SyncEvent};
pub use guard::{allowed_transitions, can_transition, StatusGuard};
pub use models::{CartId, CartLine, Order, OrderId, OrderStatus};
pub use orders::{OrderBoard, OrderHistory, OrderScope};
pub use queue::{MutationQueue, PendingEdit};
pub use session::Session;
pub use store::{Snapshot, SnapshotStore};

// ============================================================================
// Logging
// ============================================================================

/// Install structured logging (console + daily rolling JSON file).
///
/// `RUST_LOG` overrides the default filter. The returned guard flushes the
/// file writer when dropped, so the host keeps it alive until exit.
pub fn init_logging() -> Result<WorkerGuard, SyncError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kiosk_sync=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs();

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| SyncError::Config(format!("Cannot create log dir {}: {e}", log_dir.display())))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SyncError::Config(format!("Logging already initialised: {e}")))?;

    info!("Starting kiosk-sync v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}
