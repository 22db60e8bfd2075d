//! Error taxonomy for the sync core.
//!
//! Every public operation returns `Result<T, SyncError>`. Component-local
//! failures (a single fetch, a single mutation) are caught by their owner and
//! turned into user-visible notices; nothing in this crate treats an error as
//! fatal to the process.

use crate::models::OrderStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Timeout, connection refused, DNS failure, dropped socket.
    #[error("network error: {0}")]
    Network(String),

    /// 401/403 or an expired bearer token. Never retried.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Non-success HTTP status other than an auth failure.
    #[error("server rejected request (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("invalid response payload: {0}")]
    Decode(String),

    /// Raised by the status guard before any network call.
    #[error("order {order_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The push channel gave up after exhausting its reconnect attempts.
    #[error("real-time updates unavailable after {attempts} reconnect attempts")]
    ChannelExhausted { attempts: u32 },

    #[error("cart line {0} is not in the current snapshot")]
    UnknownLine(i64),

    #[error("order {0} is not in the current snapshot")]
    UnknownOrder(i64),

    /// The owning view was unmounted.
    #[error("store has been disposed")]
    Disposed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential store error: {0}")]
    Credentials(String),
}

impl SyncError {
    /// Auth failures must bubble up to force re-authentication.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Failures that clear up on their own; shown as a toast, not a banner.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Decode(_) => true,
            SyncError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
