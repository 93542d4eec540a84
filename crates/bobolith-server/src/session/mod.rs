//! One appliance connection, from accept to teardown.
//!
//! A [`Session`] is transport-agnostic: it reads [`Frame`]s from a stream and
//! writes them to a sink. The WebSocket adapter lives in `api::ws`.
//!
//! Two tasks cooperate per session:
//! - the receive loop (the caller's task) decodes frames, answers pings and
//!   hands other messages to the appliance's behavior;
//! - the heartbeat monitor (spawned) wakes every timeout period and demotes
//!   or force-closes silent appliances.
//!
//! Both mutate the same cached [`StatusRecord`] under one async mutex that is
//! held across the directory write, so stored status follows the same order
//! as in-memory transitions.

mod registry;

pub use registry::{SessionLease, SessionRegistry, Superseded};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bobolith_protocol::{Message, MessageCodec, Pong};
use bobolith_telemetry::{
    log_appliance_connected, log_appliance_disconnected, log_frame_rejected,
    log_heartbeat_timeout, log_status_changed,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::directory::ApplianceDirectory;
use crate::heartbeat::{Clock, HeartbeatEvent, HeartbeatPolicy, StatusRecord, TimerOutcome};
use crate::routing::SessionConfig;

/// A transport frame as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The appliance closed the connection or the stream ended.
    PeerClosed,
    /// The transport failed while reading.
    TransportError,
    /// An outbound frame could not be written.
    SendFailed,
    /// The appliance stayed silent for two timeout windows.
    HeartbeatTimeout,
    /// Evicted by a newer connection, an operator, or server shutdown.
    Cancelled,
}

impl SessionEnd {
    /// Whether the server decided to close the connection.
    pub fn server_initiated(&self) -> bool {
        matches!(self, SessionEnd::HeartbeatTimeout | SessionEnd::Cancelled)
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SessionEnd::PeerClosed => "peer closed",
            SessionEnd::TransportError => "transport error",
            SessionEnd::SendFailed => "send failed",
            SessionEnd::HeartbeatTimeout => "heartbeat timeout",
            SessionEnd::Cancelled => "cancelled",
        };
        f.write_str(reason)
    }
}

/// Process-wide collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub directory: Arc<dyn ApplianceDirectory>,
    pub codec: MessageCodec,
    pub policy: HeartbeatPolicy,
    pub clock: Arc<dyn Clock>,
}

/// Server side of one appliance connection.
pub struct Session {
    config: SessionConfig,
    context: SessionContext,
}

impl Session {
    pub fn new(config: SessionConfig, context: SessionContext) -> Self {
        Self { config, context }
    }

    /// Run until the transport closes, the heartbeat gives up, or `cancel`
    /// resolves, even while a reply is stuck in `outbound`. The heartbeat
    /// monitor is stopped before the final `Down` status is written.
    pub async fn run<I, O, E, C>(self, inbound: I, outbound: O, cancel: C) -> SessionEnd
    where
        I: Stream<Item = Result<Frame, E>>,
        O: Sink<Frame>,
        O::Error: fmt::Display,
        E: fmt::Display,
        C: Future<Output = ()>,
    {
        tokio::pin!(inbound);
        tokio::pin!(outbound);
        tokio::pin!(cancel);

        let appliance_id = self.config.appliance_id;
        let shared = Arc::new(Mutex::new(self.config.initial.clone()));

        transition(&self.context, appliance_id, &shared, HeartbeatEvent::Connected).await;
        log_appliance_connected!(
            appliance_id = %appliance_id,
            name = %self.config.name,
            behavior = %self.config.behavior_name,
            "Appliance connected"
        );
        self.config.behavior.on_connect(appliance_id).await;

        let (timed_out_tx, mut timed_out_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_heartbeat(
            self.context.clone(),
            appliance_id,
            Arc::clone(&shared),
            timed_out_tx,
        ));

        let end = loop {
            tokio::select! {
                _ = &mut timed_out_rx => break SessionEnd::HeartbeatTimeout,
                _ = &mut cancel => break SessionEnd::Cancelled,
                frame = inbound.next() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        // A peer that stops reading can stall the reply
                        // forever; the stop signals still apply meanwhile.
                        let handled = tokio::select! {
                            result = self.handle_text(&shared, &text, &mut outbound) => result,
                            _ = &mut timed_out_rx => break SessionEnd::HeartbeatTimeout,
                            _ = &mut cancel => break SessionEnd::Cancelled,
                        };
                        if let Err(e) = handled {
                            tracing::warn!(
                                appliance_id = %appliance_id,
                                error = %e,
                                "Failed to send frame, closing session"
                            );
                            break SessionEnd::SendFailed;
                        }
                    }
                    Some(Ok(Frame::Close)) | None => break SessionEnd::PeerClosed,
                    Some(Err(e)) => {
                        tracing::warn!(appliance_id = %appliance_id, error = %e, "Transport error");
                        break SessionEnd::TransportError;
                    }
                }
            }
        };

        monitor.abort();
        let _ = monitor.await;

        transition(&self.context, appliance_id, &shared, HeartbeatEvent::Disconnected).await;

        if end.server_initiated() {
            let close = outbound.send(Frame::Close);
            match tokio::time::timeout(self.context.policy.period(), close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(appliance_id = %appliance_id, error = %e, "Close frame not delivered");
                }
                Err(_) => {
                    tracing::debug!(appliance_id = %appliance_id, "Close frame not delivered in time");
                }
            }
        }

        self.config.behavior.on_disconnect(appliance_id, end).await;
        log_appliance_disconnected!(appliance_id = %appliance_id, reason = %end, "Appliance disconnected");

        end
    }

    /// Handle one inbound text frame. Only a failed send is an error.
    async fn handle_text<S>(
        &self,
        shared: &Mutex<StatusRecord>,
        text: &str,
        outbound: &mut S,
    ) -> Result<(), S::Error>
    where
        S: Sink<Frame> + Unpin,
    {
        let appliance_id = self.config.appliance_id;

        let message = match self.context.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                log_frame_rejected!(appliance_id = %appliance_id, error = %e, "Dropping frame");
                return Ok(());
            }
        };

        let reply = match message {
            Message::Ping(ping) => {
                transition(&self.context, appliance_id, shared, HeartbeatEvent::PingReceived)
                    .await;
                Some(Message::Pong(Pong { text: ping.text }))
            }
            other => self.config.behavior.on_message(appliance_id, other).await,
        };

        let Some(reply) = reply else {
            return Ok(());
        };

        match self.context.codec.encode(&reply) {
            Ok(json) => outbound.send(Frame::Text(json)).await,
            Err(e) => {
                tracing::error!(appliance_id = %appliance_id, error = %e, "Failed to encode reply");
                Ok(())
            }
        }
    }
}

/// Apply a lifecycle event and persist the result.
async fn transition(
    context: &SessionContext,
    appliance_id: Uuid,
    shared: &Mutex<StatusRecord>,
    event: HeartbeatEvent,
) {
    let mut record = shared.lock().await;
    let previous = record.status;
    record.apply(event, context.clock.now());

    if previous != record.status {
        log_status_changed!(
            appliance_id = %appliance_id,
            from = %previous,
            to = %record.status,
            "Appliance status changed"
        );
    }

    persist(context, appliance_id, &record).await;
}

/// Write status to the directory. Failures are tolerated: the next
/// transition writes the full record again.
async fn persist(context: &SessionContext, appliance_id: Uuid, record: &StatusRecord) {
    if let Err(e) = context.directory.save_status(appliance_id, record).await {
        tracing::error!(
            appliance_id = %appliance_id,
            status = %record.status,
            error = %e,
            "Failed to save appliance status"
        );
    }
}

/// Periodic heartbeat check. Sends on `timed_out` and returns when the
/// appliance must be disconnected.
async fn monitor_heartbeat(
    context: SessionContext,
    appliance_id: Uuid,
    shared: Arc<Mutex<StatusRecord>>,
    timed_out: oneshot::Sender<()>,
) {
    let period = context.policy.period();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut record = shared.lock().await;
        match context.policy.evaluate(&record, context.clock.now()) {
            TimerOutcome::Status(next) if next == record.status => {}
            TimerOutcome::Status(next) => {
                log_heartbeat_timeout!(
                    appliance_id = %appliance_id,
                    last_heartbeat_at = ?record.last_heartbeat_at,
                    "Heartbeat timed out"
                );
                log_status_changed!(
                    appliance_id = %appliance_id,
                    from = %record.status,
                    to = %next,
                    "Appliance status changed"
                );
                record.status = next;
                persist(&context, appliance_id, &record).await;
            }
            TimerOutcome::ForceClose => {
                log_heartbeat_timeout!(
                    appliance_id = %appliance_id,
                    last_heartbeat_at = ?record.last_heartbeat_at,
                    "Closing unresponsive appliance"
                );
                let _ = timed_out.send(());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests;
