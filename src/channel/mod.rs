//! Reconnecting push channel.
//!
//! One background task per channel drives the whole lifecycle:
//! `Connecting -> Open -> Closed -> (backoff) -> Connecting ...` until the
//! reconnect policy gives up and the channel parks in `Failed`. Because a
//! single task owns the socket, reconnects are strictly sequential and there
//! is never more than one live connection per channel.
//!
//! Inbound messages are not parsed: every data frame invokes the signal
//! handler, which the views use to refetch their snapshot.

pub mod backoff;
pub mod hub;
pub mod transport;

pub use backoff::{Reconnect, ReconnectPolicy};
pub use hub::{ChannelHub, SignalRouter, SubscriptionId};
pub use transport::{PushConnection, PushConnector, PushFrame, WsConnection, WsConnector};

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::auth::AuthToken;
use crate::error::SyncError;
use crate::events::{EventBus, Notice, SyncEvent};

/// Refetch callback invoked once per inbound signal.
pub type SignalHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    /// No channel has been started.
    Idle,
    Connecting,
    Open,
    /// Disconnected, waiting out the backoff delay.
    Closed,
    /// Reconnect attempts exhausted. Terminal.
    Failed,
    /// Torn down by its owner.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub phase: ChannelPhase,
    pub attempt: u32,
    pub max_attempts: u32,
    pub signals_received: u64,
}

impl ChannelStatus {
    pub fn idle(max_attempts: u32) -> Self {
        Self {
            phase: ChannelPhase::Idle,
            attempt: 0,
            max_attempts,
            signals_received: 0,
        }
    }
}

pub type SharedStatus = Arc<Mutex<ChannelStatus>>;

// ---------------------------------------------------------------------------
// Event channel
// ---------------------------------------------------------------------------

/// Handle to a running channel task. Dropping it cancels the task; call
/// [`EventChannel::shutdown`] to also wait for the socket to close.
pub struct EventChannel {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: SharedStatus,
}

impl EventChannel {
    pub fn spawn<C: PushConnector>(
        connector: Arc<C>,
        url: String,
        token: AuthToken,
        policy: ReconnectPolicy,
        events: EventBus,
        status: SharedStatus,
        on_signal: SignalHandler,
    ) -> Self {
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("push_channel", url = %url);
        let task = tokio::spawn(
            run_channel(ChannelTask {
                connector,
                url,
                token,
                policy,
                events,
                status: status.clone(),
                on_signal,
                cancel: cancel.clone(),
            })
            .instrument(span),
        );
        Self {
            cancel,
            task: Some(task),
            status,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Close the socket, cancel any pending reconnect timer, and wait for the
    /// task to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "push channel task ended abnormally");
            }
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Channel task
// ---------------------------------------------------------------------------

struct ChannelTask<C: PushConnector> {
    connector: Arc<C>,
    url: String,
    token: AuthToken,
    policy: ReconnectPolicy,
    events: EventBus,
    status: SharedStatus,
    on_signal: SignalHandler,
    cancel: CancellationToken,
}

impl<C: PushConnector> ChannelTask<C> {
    fn set_phase(&self, phase: ChannelPhase) {
        let attempt = self.policy.attempt();
        {
            let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
            if status.phase == phase && status.attempt == attempt {
                return;
            }
            status.phase = phase;
            status.attempt = attempt;
        }
        debug!(?phase, attempt, "push channel phase change");
        self.events
            .emit(SyncEvent::ChannelStateChanged { phase, attempt });
    }

    fn record_signal(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.signals_received += 1;
    }
}

enum ReadStep {
    Cancelled,
    Frame(Option<Result<PushFrame, SyncError>>),
}

/// How a connection ended.
enum Ended {
    Cancelled,
    Disconnected,
}

async fn run_channel<C: PushConnector>(mut task: ChannelTask<C>) {
    info!(
        max_attempts = task.policy.max_attempts(),
        "push channel started"
    );

    loop {
        task.set_phase(ChannelPhase::Connecting);

        let connected = tokio::select! {
            biased;
            _ = task.cancel.cancelled() => break,
            res = task.connector.connect(&task.url) => res,
        };

        match connected {
            Ok(mut conn) => {
                if let Ended::Cancelled = serve_connection(&mut task, &mut conn).await {
                    conn.close().await;
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, attempt = task.policy.attempt(), "push channel connect failed");
            }
        }

        match task.policy.on_disconnect() {
            Reconnect::After(delay) => {
                task.set_phase(ChannelPhase::Closed);
                info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = task.policy.attempt(),
                    "push channel closed, scheduling reconnect"
                );
                tokio::select! {
                    biased;
                    _ = task.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Reconnect::GiveUp => {
                task.set_phase(ChannelPhase::Failed);
                let err = SyncError::ChannelExhausted {
                    attempts: task.policy.max_attempts(),
                };
                warn!(error = %err, "push channel giving up");
                task.events.notice(Notice::persistent(
                    "Connection Error",
                    "Real-time updates are currently unavailable. Refresh to try again.",
                ));
                return;
            }
        }
    }

    task.set_phase(ChannelPhase::Stopped);
    info!("push channel stopped");
}

/// Authenticate and pump frames until the connection drops or the owner
/// cancels.
async fn serve_connection<C: PushConnector>(
    task: &mut ChannelTask<C>,
    conn: &mut C::Connection,
) -> Ended {
    task.set_phase(ChannelPhase::Open);

    let auth = transport::auth_message(task.token.as_str());
    let sent = tokio::select! {
        biased;
        _ = task.cancel.cancelled() => return Ended::Cancelled,
        res = conn.send_text(auth) => res,
    };
    if let Err(e) = sent {
        warn!(error = %e, "push channel auth message failed");
        return Ended::Disconnected;
    }
    task.policy.on_open();
    task.set_phase(ChannelPhase::Open);
    info!("push channel open");

    loop {
        let step = tokio::select! {
            biased;
            _ = task.cancel.cancelled() => ReadStep::Cancelled,
            frame = conn.next_frame() => ReadStep::Frame(frame),
        };

        match step {
            ReadStep::Cancelled => return Ended::Cancelled,
            ReadStep::Frame(Some(Ok(PushFrame::Signal(payload)))) => {
                debug!(len = payload.len(), "push signal received");
                task.record_signal();
                (task.on_signal)();
            }
            ReadStep::Frame(Some(Ok(PushFrame::Control))) => {}
            ReadStep::Frame(Some(Err(e))) => {
                warn!(error = %e, "push channel read error");
                return Ended::Disconnected;
            }
            ReadStep::Frame(None) => {
                info!("push channel closed by server");
                return Ended::Disconnected;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::test_support::FakeConnector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_handler() -> (SignalHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    fn spawn_channel(connector: &FakeConnector, events: &EventBus) -> (EventChannel, Arc<AtomicUsize>) {
        let (handler, count) = counting_handler();
        let channel = EventChannel::spawn(
            Arc::new(connector.clone()),
            "ws://kiosk.test/ws/orders".to_string(),
            AuthToken::new("token-123").unwrap(),
            ReconnectPolicy::new(Duration::from_millis(1_000), Duration::from_millis(10_000), 5),
            events.clone(),
            Arc::new(Mutex::new(ChannelStatus::idle(5))),
            handler,
        );
        (channel, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_then_failed() {
        let connector = FakeConnector::new();
        connector.refuse_connections(true);
        let events = EventBus::new();
        let mut rx = events.subscribe();

        let (channel, _) = spawn_channel(&connector, &events);
        tokio::time::sleep(Duration::from_secs(120)).await;

        let attempts = connector.attempt_times();
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<u128> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1_000, 2_000, 4_000, 8_000, 10_000]);

        let status = channel.status();
        assert_eq!(status.phase, ChannelPhase::Failed);
        let persistent: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::Notice(n) if n.is_persistent()))
            .collect();
        assert_eq!(persistent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sends_auth_and_resets_attempts() {
        let connector = FakeConnector::new();
        connector.refuse_next(2);
        let events = EventBus::new();

        let (channel, _) = spawn_channel(&connector, &events);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = channel.status();
        assert_eq!(status.phase, ChannelPhase::Open);
        assert_eq!(status.attempt, 0);
        assert_eq!(connector.attempt_times().len(), 3);

        let sent = connector.sent_messages();
        assert_eq!(sent.len(), 1);
        let auth: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(auth["type"], "auth");
        assert_eq!(auth["token"], "token-123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_message_invokes_handler() {
        let connector = FakeConnector::new();
        let events = EventBus::new();
        let (channel, count) = spawn_channel(&connector, &events);
        tokio::time::sleep(Duration::from_millis(10)).await;

        connector.push("Connection established");
        connector.push("New order placed: 41");
        connector.push_control();
        connector.push("{\"not\":\"parsed\"}");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(channel.status().signals_received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_triggers_reconnect() {
        let connector = FakeConnector::new();
        let events = EventBus::new();
        let (channel, count) = spawn_channel(&connector, &events);
        tokio::time::sleep(Duration::from_millis(10)).await;

        connector.drop_connection();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.status().phase, ChannelPhase::Closed);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(channel.status().phase, ChannelPhase::Open);
        assert_eq!(connector.attempt_times().len(), 2);

        connector.push("Order updated");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_socket_and_cancels_timer() {
        let connector = FakeConnector::new();
        let events = EventBus::new();
        let (mut channel, _) = spawn_channel(&connector, &events);
        tokio::time::sleep(Duration::from_millis(10)).await;

        channel.shutdown().await;
        assert_eq!(channel.status().phase, ChannelPhase::Stopped);
        assert_eq!(connector.closed_connections(), 1);

        // Shut down while waiting out a backoff delay: no further attempts.
        connector.refuse_connections(true);
        let (mut retrying, _) = spawn_channel(&connector, &events);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = connector.attempt_times().len();
        retrying.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_times().len(), before);
        assert_eq!(retrying.status().phase, ChannelPhase::Stopped);
    }
}
