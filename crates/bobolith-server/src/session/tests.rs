//! Session tests run on a paused tokio clock, so heartbeat windows elapse
//! instantly and deterministically.

use super::*;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::{sink, stream};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::behavior::{ApplianceBehavior, HeartbeatBehavior};
use crate::directory::{Appliance, MemoryDirectory, PersistenceError};
use crate::heartbeat::ApplianceStatus;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Wall clock that follows tokio's (pausable) clock.
struct TestClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl TestClock {
    fn new() -> Self {
        Self {
            base: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            start: Instant::now(),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + TimeDelta::from_std(self.start.elapsed()).unwrap()
    }
}

/// Memory directory that remembers every status it was asked to store.
struct RecordingDirectory {
    inner: MemoryDirectory,
    seed: StatusRecord,
    history: SyncMutex<Vec<ApplianceStatus>>,
    fail_writes: bool,
}

impl RecordingDirectory {
    fn new(appliance: Appliance) -> Self {
        let inner = MemoryDirectory::new();
        let seed = appliance.record.clone();
        inner.insert(appliance);
        Self {
            inner,
            seed,
            history: SyncMutex::new(Vec::new()),
            fail_writes: false,
        }
    }

    fn failing(appliance: Appliance) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(appliance)
        }
    }

    /// Stored statuses with consecutive repeats collapsed.
    fn transitions(&self) -> Vec<ApplianceStatus> {
        let mut seen = self.history.lock().clone();
        seen.dedup();
        seen
    }
}

#[async_trait]
impl ApplianceDirectory for RecordingDirectory {
    async fn get(&self, id: Uuid) -> Result<Option<Appliance>, PersistenceError> {
        self.inner.get(id).await
    }

    async fn save_status(&self, id: Uuid, record: &StatusRecord) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::Corrupt("read-only".to_string()));
        }
        self.history.lock().push(record.status);
        self.inner.save_status(id, record).await
    }

    async fn list(&self) -> Result<Vec<Appliance>, PersistenceError> {
        self.inner.list().await
    }

    async fn mark_all_down(&self) -> Result<u64, PersistenceError> {
        self.inner.mark_all_down().await
    }
}

/// Replies `ack` to every pong and remembers how the session ended.
#[derive(Default)]
struct AckBehavior {
    ended: SyncMutex<Option<SessionEnd>>,
}

#[async_trait]
impl ApplianceBehavior for AckBehavior {
    async fn on_message(&self, _appliance_id: Uuid, message: Message) -> Option<Message> {
        matches!(message, Message::Pong(_)).then(|| Message::pong("ack"))
    }

    async fn on_disconnect(&self, _appliance_id: Uuid, end: SessionEnd) {
        *self.ended.lock() = Some(end);
    }
}

struct Harness {
    id: Uuid,
    directory: Arc<RecordingDirectory>,
    inbound: mpsc::UnboundedSender<Result<Frame, String>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<SessionEnd>,
}

/// A session over `directory` with the test policy and clock.
fn session(
    directory: &Arc<RecordingDirectory>,
    id: Uuid,
    behavior: Arc<dyn ApplianceBehavior>,
) -> Session {
    let context = SessionContext {
        directory: directory.clone(),
        codec: MessageCodec::new(0),
        policy: HeartbeatPolicy::new(TIMEOUT).unwrap(),
        clock: Arc::new(TestClock::new()),
    };
    let config = SessionConfig {
        appliance_id: id,
        name: "soda-machine".to_string(),
        behavior_name: "test".to_string(),
        behavior,
        initial: directory.seed.clone(),
    };
    Session::new(config, context)
}

fn inbound_stream(
    rx: mpsc::UnboundedReceiver<Result<Frame, String>>,
) -> impl Stream<Item = Result<Frame, String>> {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    })
}

/// A sink whose peer never reads: every send waits forever.
fn stalled_sink() -> impl Sink<Frame, Error = &'static str> {
    sink::unfold((), |(), _frame: Frame| async {
        std::future::pending::<Result<(), &'static str>>().await
    })
}

impl Harness {
    fn start(directory: RecordingDirectory, id: Uuid, behavior: Arc<dyn ApplianceBehavior>) -> Self {
        let directory = Arc::new(directory);

        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Frame, String>>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        let outbound = sink::unfold(out_tx, |tx, frame: Frame| async move {
            tx.send(frame).map_err(|_| "peer gone")?;
            Ok::<_, &'static str>(tx)
        });
        let cancel = async move {
            let _ = cancel_rx.await;
        };

        let session = session(&directory, id, behavior);
        let handle = tokio::spawn(session.run(inbound_stream(in_rx), outbound, cancel));

        Self {
            id,
            directory,
            inbound: in_tx,
            outbound: out_rx,
            cancel: Some(cancel_tx),
            handle,
        }
    }

    fn send(&self, text: &str) {
        self.inbound.send(Ok(Frame::Text(text.to_string()))).unwrap();
    }

    async fn status(&self) -> ApplianceStatus {
        self.directory.get(self.id).await.unwrap().unwrap().record.status
    }
}

fn fresh() -> (RecordingDirectory, Uuid) {
    let id = Uuid::new_v4();
    (RecordingDirectory::new(Appliance::new(id, "soda-machine")), id)
}

fn heartbeat() -> Arc<dyn ApplianceBehavior> {
    Arc::new(HeartbeatBehavior)
}

const PING: &str = r#"{"msg_type":"ping","version":0,"ping":"hello"}"#;
const PONG: &str = r#"{"msg_type":"pong","version":0,"pong":"hello"}"#;

#[tokio::test(start_paused = true)]
async fn ping_is_answered_and_marks_appliance_up() {
    let (directory, id) = fresh();
    let mut h = Harness::start(directory, id, heartbeat());

    h.send(PING);
    assert_eq!(h.outbound.recv().await, Some(Frame::Text(PONG.to_string())));

    let stored = h.directory.get(id).await.unwrap().unwrap().record;
    assert_eq!(stored.status, ApplianceStatus::Up);
    assert!(stored.last_connected_at.is_some());
    assert!(stored.last_heartbeat_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn invalid_frames_are_dropped_without_reply() {
    let (directory, id) = fresh();
    let mut h = Harness::start(directory, id, heartbeat());

    h.send(r#"{"msg_type":"ping","version":99,"ping":"old"}"#);
    h.send(r#"{"msg_type":"reboot","version":0}"#);
    h.send("not json");
    h.send(r#"{"msg_type":"pong","version":0,"pong":"unsolicited"}"#);
    h.send(PING);

    // The only reply is the one for the valid ping.
    assert_eq!(h.outbound.recv().await, Some(Frame::Text(PONG.to_string())));
    assert!(!h.handle.is_finished());
    assert!(h.outbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn silent_appliance_is_demoted_then_closed() {
    let (directory, id) = fresh();
    let started = Instant::now();
    let mut h = Harness::start(directory, id, heartbeat());

    h.send(PING);
    assert_eq!(h.outbound.recv().await, Some(Frame::Text(PONG.to_string())));

    let end = (&mut h.handle).await.unwrap();
    assert_eq!(end, SessionEnd::HeartbeatTimeout);
    let elapsed = started.elapsed();
    assert!(elapsed >= 2 * TIMEOUT && elapsed < 2 * TIMEOUT + Duration::from_secs(1));

    assert_eq!(
        h.directory.transitions(),
        vec![
            ApplianceStatus::Up,
            ApplianceStatus::Unresponsive,
            ApplianceStatus::Down
        ]
    );
    assert_eq!(h.outbound.recv().await, Some(Frame::Close));
}

#[tokio::test(start_paused = true)]
async fn status_is_unresponsive_after_one_window() {
    let (directory, id) = fresh();
    let h = Harness::start(directory, id, heartbeat());
    h.send(PING);

    tokio::time::sleep(TIMEOUT - Duration::from_millis(1)).await;
    assert_eq!(h.status().await, ApplianceStatus::Up);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(h.status().await, ApplianceStatus::Unresponsive);
    assert!(!h.handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn regular_pings_keep_appliance_up() {
    let (directory, id) = fresh();
    let mut h = Harness::start(directory, id, heartbeat());

    for _ in 0..6 {
        h.send(PING);
        tokio::time::sleep(TIMEOUT / 2).await;
    }
    assert_eq!(h.status().await, ApplianceStatus::Up);
    assert!(!h.handle.is_finished());

    drop(h.inbound);
    let end = (&mut h.handle).await.unwrap();
    assert_eq!(end, SessionEnd::PeerClosed);
    assert_eq!(
        h.directory.transitions(),
        vec![ApplianceStatus::Up, ApplianceStatus::Down]
    );
}

#[tokio::test(start_paused = true)]
async fn ping_recovers_unresponsive_appliance() {
    let (directory, id) = fresh();
    let h = Harness::start(directory, id, heartbeat());
    h.send(PING);

    tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
    assert_eq!(h.status().await, ApplianceStatus::Unresponsive);

    h.send(PING);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.status().await, ApplianceStatus::Up);

    // The second window is measured from the recovery ping.
    tokio::time::sleep(TIMEOUT).await;
    assert!(!h.handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn appliance_that_never_pings_is_unresponsive() {
    let (directory, id) = fresh();
    let h = Harness::start(directory, id, heartbeat());

    tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
    assert_eq!(h.status().await, ApplianceStatus::Unresponsive);

    tokio::time::sleep(3 * TIMEOUT).await;
    assert_eq!(h.status().await, ApplianceStatus::Unresponsive);
    assert!(!h.handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn stale_heartbeat_from_previous_connection_counts() {
    let id = Uuid::new_v4();
    let mut appliance = Appliance::new(id, "soda-machine");
    appliance.record.last_heartbeat_at = DateTime::from_timestamp(1_600_000_000, 0);
    let mut h = Harness::start(RecordingDirectory::new(appliance), id, heartbeat());

    let end = (&mut h.handle).await.unwrap();
    assert_eq!(end, SessionEnd::HeartbeatTimeout);
    assert_eq!(
        h.directory.transitions(),
        vec![
            ApplianceStatus::Up,
            ApplianceStatus::Unresponsive,
            ApplianceStatus::Down
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn peer_close_marks_appliance_down() {
    let (directory, id) = fresh();
    let behavior = Arc::new(AckBehavior::default());
    let mut h = Harness::start(directory, id, behavior.clone());

    h.inbound.send(Ok(Frame::Close)).unwrap();
    let end = (&mut h.handle).await.unwrap();

    assert_eq!(end, SessionEnd::PeerClosed);
    assert_eq!(h.status().await, ApplianceStatus::Down);
    assert_eq!(*behavior.ended.lock(), Some(SessionEnd::PeerClosed));
    // Peer-initiated: no close frame is echoed.
    assert_eq!(h.outbound.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn transport_error_ends_session() {
    let (directory, id) = fresh();
    let mut h = Harness::start(directory, id, heartbeat());

    h.inbound.send(Err("connection reset".to_string())).unwrap();
    let end = (&mut h.handle).await.unwrap();

    assert_eq!(end, SessionEnd::TransportError);
    assert_eq!(h.status().await, ApplianceStatus::Down);
}

#[tokio::test(start_paused = true)]
async fn cancel_closes_connection() {
    let (directory, id) = fresh();
    let mut h = Harness::start(directory, id, heartbeat());
    h.send(PING);
    assert!(h.outbound.recv().await.is_some());

    let _ = h.cancel.take().unwrap().send(());
    let end = (&mut h.handle).await.unwrap();

    assert_eq!(end, SessionEnd::Cancelled);
    assert_eq!(h.status().await, ApplianceStatus::Down);
    assert_eq!(h.outbound.recv().await, Some(Frame::Close));
}

#[tokio::test(start_paused = true)]
async fn failed_send_ends_session() {
    let (directory, id) = fresh();
    let mut h = Harness::start(directory, id, heartbeat());

    h.outbound.close();
    h.send(PING);
    let end = (&mut h.handle).await.unwrap();

    assert_eq!(end, SessionEnd::SendFailed);
    assert_eq!(h.status().await, ApplianceStatus::Down);
}

#[tokio::test(start_paused = true)]
async fn behavior_reply_is_sent() {
    let (directory, id) = fresh();
    let behavior = Arc::new(AckBehavior::default());
    let mut h = Harness::start(directory, id, behavior);

    h.send(r#"{"msg_type":"pong","version":0,"pong":"status?"}"#);
    assert_eq!(
        h.outbound.recv().await,
        Some(Frame::Text(
            r#"{"msg_type":"pong","version":0,"pong":"ack"}"#.to_string()
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_does_not_drop_connection() {
    let id = Uuid::new_v4();
    let directory = RecordingDirectory::failing(Appliance::new(id, "soda-machine"));
    let mut h = Harness::start(directory, id, heartbeat());

    h.send(PING);
    assert_eq!(h.outbound.recv().await, Some(Frame::Text(PONG.to_string())));
    tokio::time::sleep(TIMEOUT / 2).await;
    assert!(!h.handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn stalled_reply_does_not_block_cancel() {
    let (directory, id) = fresh();
    let directory = Arc::new(directory);
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(session(&directory, id, heartbeat()).run(
        inbound_stream(in_rx),
        stalled_sink(),
        async move {
            let _ = cancel_rx.await;
        },
    ));

    in_tx.send(Ok(Frame::Text(PING.to_string()))).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!handle.is_finished());

    cancel_tx.send(()).unwrap();
    let end = tokio::time::timeout(5 * TIMEOUT, handle)
        .await
        .expect("session should stop while its reply is stuck")
        .unwrap();

    assert_eq!(end, SessionEnd::Cancelled);
    let stored = directory.get(id).await.unwrap().unwrap().record;
    assert_eq!(stored.status, ApplianceStatus::Down);
}

#[tokio::test(start_paused = true)]
async fn stalled_reply_does_not_block_heartbeat_timeout() {
    let (directory, id) = fresh();
    let directory = Arc::new(directory);
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(session(&directory, id, heartbeat()).run(
        inbound_stream(in_rx),
        stalled_sink(),
        std::future::pending::<()>(),
    ));
    in_tx.send(Ok(Frame::Text(PING.to_string()))).unwrap();

    let end = tokio::time::timeout(5 * TIMEOUT, handle)
        .await
        .expect("silent appliance should be closed while its reply is stuck")
        .unwrap();

    assert_eq!(end, SessionEnd::HeartbeatTimeout);
    assert_eq!(
        directory.transitions(),
        vec![
            ApplianceStatus::Up,
            ApplianceStatus::Unresponsive,
            ApplianceStatus::Down
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn no_status_writes_after_teardown() {
    for cancelled in [false, true] {
        // Never pinged, so a surviving monitor would write UNRESPONSIVE at
        // its first tick.
        let (directory, id) = fresh();
        let mut h = Harness::start(directory, id, heartbeat());
        tokio::time::sleep(Duration::from_millis(1)).await;

        if cancelled {
            h.cancel.take().unwrap().send(()).unwrap();
        } else {
            h.inbound.send(Ok(Frame::Close)).unwrap();
        }
        let end = (&mut h.handle).await.unwrap();
        let expected = if cancelled {
            SessionEnd::Cancelled
        } else {
            SessionEnd::PeerClosed
        };
        assert_eq!(end, expected);

        let writes = h.directory.history.lock().clone();
        assert_eq!(writes.last(), Some(&ApplianceStatus::Down));

        tokio::time::sleep(3 * TIMEOUT).await;
        assert_eq!(*h.directory.history.lock(), writes);
        assert_eq!(h.status().await, ApplianceStatus::Down);
    }
}

#[test]
fn only_server_decisions_are_server_initiated() {
    assert!(SessionEnd::HeartbeatTimeout.server_initiated());
    assert!(SessionEnd::Cancelled.server_initiated());
    assert!(!SessionEnd::PeerClosed.server_initiated());
    assert!(!SessionEnd::TransportError.server_initiated());
    assert!(!SessionEnd::SendFailed.server_initiated());
    assert_eq!(SessionEnd::HeartbeatTimeout.to_string(), "heartbeat timeout");
}
