//! Export session lifecycle over the bidirectional stream.
//!
//! The session owns the outbound half of the stream and the task consuming
//! the inbound half. Records go out in exact submission order without waiting
//! for acknowledgment; acknowledgments come back asynchronously and advance
//! the checkpoint through the [`AckTracker`]. Closing drains: `close` does
//! not report completion until every acknowledgment already queued on the
//! wire has reached the tracker, so the checkpoint cannot silently regress
//! on restart.
//!
//! ## Lifecycle
//!
//! `Closed → Open → Closing → Closed`, with terminal `Failed` entered on
//! transport error (including drain timeout). `send` is valid only while
//! `Open`. A graceful peer-initiated end of the acknowledgment stream is a
//! stop signal, not an error: the session moves to `Closed` and later sends
//! report [`SessionError::ClosedByPeer`].

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use relay_proto::export_service_client::ExportServiceClient;
use relay_proto::{Acknowledgment, Record};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::tracker::{AckTracker, CheckpointSink};
use crate::types::ExportRecord;

/// Session states following the lifecycle: Closed → Open → Closing → Closed,
/// with Failed terminal on transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No stream established (initial and terminal)
    Closed = 0,
    /// Stream established, records and acknowledgments flowing
    Open = 1,
    /// End-of-stream signaled, draining trailing acknowledgments
    Closing = 2,
    /// Transport error observed; no forward progress can be assumed
    Failed = 3,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::Closing,
            3 => Self::Failed,
            _ => Self::Closed,
        }
    }
}

/// Shared lifecycle cell: session state plus the first observed transport
/// failure. Shared between the session handle and the reader task.
struct Lifecycle {
    state: AtomicU8,
    closed_by_peer: AtomicBool,
    failure: OnceLock<Status>,
}

impl Lifecycle {
    fn open() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Open as u8),
            closed_by_peer: AtomicBool::new(false),
            failure: OnceLock::new(),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Records the first transport failure and enters `Failed`.
    fn fail(&self, status: Status) {
        let _ = self.failure.set(status);
        self.set_state(SessionState::Failed);
    }

    fn failure(&self) -> Option<Status> {
        self.failure.get().cloned()
    }

    fn mark_closed_by_peer(&self) {
        self.closed_by_peer.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Closed);
    }

    fn closed_by_peer(&self) -> bool {
        self.closed_by_peer.load(Ordering::SeqCst)
    }
}

/// The export session: owns the streaming channel for its lifetime.
///
/// Created from an established stream via [`ExportSession::open`] (dialing
/// through a connected gRPC client) or [`ExportSession::attach`] (directly
/// from the two stream halves, which is also the test seam). Dropping the
/// session without calling [`ExportSession::close`] abandons in-flight
/// acknowledgments; hosts must await `close` to keep the checkpoint
/// contract.
pub struct ExportSession {
    outbound: mpsc::Sender<Record>,
    reader: JoinHandle<Result<(), SessionError>>,
    tracker: Arc<AckTracker>,
    lifecycle: Arc<Lifecycle>,
    drain_timeout: Duration,
}

impl ExportSession {
    /// Opens the export stream over a connected client and starts consuming
    /// acknowledgments.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the stream cannot be
    /// established.
    pub async fn open(
        client: &mut ExportServiceClient<Channel>,
        sink: Arc<dyn CheckpointSink>,
        stream: &StreamConfig,
    ) -> Result<Self, SessionError> {
        let (tx, rx) = mpsc::channel(stream.send_buffer);
        let acks = client
            .export(ReceiverStream::new(rx))
            .await?
            .into_inner();
        Ok(Self::attach(tx, acks, sink, stream.drain_timeout()))
    }

    /// Builds a session from the two halves of an already-established
    /// stream: the outbound record sender and the inbound acknowledgment
    /// stream.
    pub fn attach<S>(
        outbound: mpsc::Sender<Record>,
        acks: S,
        sink: Arc<dyn CheckpointSink>,
        drain_timeout: Duration,
    ) -> Self
    where
        S: Stream<Item = Result<Acknowledgment, Status>> + Send + Unpin + 'static,
    {
        let tracker = Arc::new(AckTracker::new(sink));
        let lifecycle = Arc::new(Lifecycle::open());
        let reader = tokio::spawn(read_acknowledgments(
            Arc::clone(&tracker),
            Arc::clone(&lifecycle),
            acks,
        ));

        debug!("export session opened");
        Self {
            outbound,
            reader,
            tracker,
            lifecycle,
            drain_timeout,
        }
    }

    /// Serializes `record` onto the open stream.
    ///
    /// Records are transmitted in the exact order submitted. This awaits
    /// outbound queue capacity only, never acknowledgment, so producer
    /// throughput is decoupled from peer latency.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotOpen`] outside the `Open` state.
    /// - [`SessionError::ClosedByPeer`] after a graceful peer termination.
    /// - [`SessionError::Transport`] once the session has failed.
    pub async fn send(&self, record: ExportRecord) -> Result<(), SessionError> {
        match self.lifecycle.state() {
            SessionState::Open => {}
            SessionState::Failed => {
                return Err(self.stored_failure());
            }
            SessionState::Closed if self.lifecycle.closed_by_peer() => {
                return Err(SessionError::ClosedByPeer);
            }
            state => return Err(SessionError::NotOpen { state }),
        }

        self.tracker.record_sent(record.position());
        if self.outbound.send(record.into()).await.is_err() {
            // The transport dropped the request stream out from under us.
            let status = Status::unavailable("outbound record stream closed");
            self.lifecycle.fail(status.clone());
            return Err(SessionError::Transport(status));
        }
        Ok(())
    }

    /// Signals end-of-stream and drains trailing acknowledgments.
    ///
    /// Completion is not reported until the inbound stream has ended, so
    /// every acknowledgment the peer put on the wire before seeing our
    /// end-of-stream has reached the tracker. Returns the final checkpoint.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Transport`] if the session failed before or during
    ///   the drain.
    /// - [`SessionError::DrainTimeout`] if the peer does not complete the
    ///   acknowledgment stream within the configured drain timeout.
    pub async fn close(self) -> Result<Option<i64>, SessionError> {
        let Self {
            outbound,
            reader,
            tracker,
            lifecycle,
            drain_timeout,
        } = self;

        if lifecycle.state() == SessionState::Open {
            lifecycle.set_state(SessionState::Closing);
        }
        // End-of-stream to the peer
        drop(outbound);

        let abort_reader = reader.abort_handle();
        match tokio::time::timeout(drain_timeout, reader).await {
            Ok(Ok(Ok(()))) => {
                lifecycle.set_state(SessionState::Closed);
                info!(checkpoint = ?tracker.checkpoint(), "export session closed");
                Ok(tracker.checkpoint())
            }
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(join_error)) => {
                let status = Status::internal(format!("acknowledgment reader died: {join_error}"));
                lifecycle.fail(status.clone());
                Err(SessionError::Transport(status))
            }
            Err(_) => {
                warn!(timeout = ?drain_timeout, "drain timed out, abandoning trailing acknowledgments");
                abort_reader.abort();
                lifecycle.fail(Status::deadline_exceeded("acknowledgment drain timed out"));
                Err(SessionError::DrainTimeout {
                    timeout: drain_timeout,
                })
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Highest position confirmed by the peer so far.
    #[must_use]
    pub fn checkpoint(&self) -> Option<i64> {
        self.tracker.checkpoint()
    }

    /// Highest position submitted to the stream so far.
    #[must_use]
    pub fn last_sent(&self) -> Option<i64> {
        self.tracker.last_sent()
    }

    fn stored_failure(&self) -> SessionError {
        match self.lifecycle.failure() {
            Some(status) => SessionError::Transport(status),
            None => SessionError::NotOpen {
                state: SessionState::Failed,
            },
        }
    }
}

/// Reader task: feeds the tracker until the inbound stream ends, then
/// resolves how the stream ended against the session lifecycle.
async fn read_acknowledgments<S>(
    tracker: Arc<AckTracker>,
    lifecycle: Arc<Lifecycle>,
    acks: S,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Acknowledgment, Status>> + Send + Unpin + 'static,
{
    match tracker.drain(acks).await {
        Ok(()) => {
            if lifecycle.state() == SessionState::Open {
                // Peer completed its half while we were still open: a normal
                // stop signal, but no further records can be confirmed.
                info!(
                    checkpoint = ?tracker.checkpoint(),
                    "peer completed the acknowledgment stream"
                );
                lifecycle.mark_closed_by_peer();
            }
            Ok(())
        }
        Err(status) => {
            warn!(code = ?status.code(), "acknowledgment stream failed");
            lifecycle.fail(status.clone());
            Err(SessionError::Transport(status))
        }
    }
}

/// Errors raised by export session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation requires the `Open` state
    #[error("session is not open (state {state:?})")]
    NotOpen {
        /// State the session was actually in
        state: SessionState,
    },

    /// The peer gracefully terminated the stream; a stop signal rather than
    /// a failure
    #[error("export channel closed by peer")]
    ClosedByPeer,

    /// Channel-level failure during send or receive; the session is `Failed`
    /// and no forward progress can be assumed
    #[error("transport failure: {0}")]
    Transport(#[from] Status),

    /// The peer did not complete the acknowledgment stream during close
    #[error("timed out after {timeout:?} waiting for trailing acknowledgments")]
    DrainTimeout {
        /// Configured drain timeout that expired
        timeout: Duration,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc::Receiver;

    #[derive(Default)]
    struct RecordingSink {
        positions: Mutex<Vec<i64>>,
    }

    impl RecordingSink {
        fn positions(&self) -> Vec<i64> {
            self.positions.lock().unwrap().clone()
        }
    }

    impl CheckpointSink for RecordingSink {
        fn update_last_exported_record_position(&self, position: i64) {
            self.positions.lock().unwrap().push(position);
        }
    }

    struct Harness {
        session: ExportSession,
        sink: Arc<RecordingSink>,
        wire: Receiver<Record>,
        acks: mpsc::Sender<Result<Acknowledgment, Status>>,
    }

    /// Builds a session over in-process channels standing in for the
    /// transport.
    fn harness(drain_timeout: Duration) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let (record_tx, record_rx) = mpsc::channel(8);
        let (ack_tx, ack_rx) = mpsc::channel(8);
        let session = ExportSession::attach(
            record_tx,
            ReceiverStream::new(ack_rx),
            Arc::clone(&sink),
            drain_timeout,
        );
        Harness {
            session,
            sink,
            wire: record_rx,
            acks: ack_tx,
        }
    }

    /// Polls until the session reaches `expected`, with a bounded wait.
    async fn wait_for_state(session: &ExportSession, expected: SessionState) {
        for _ in 0..100 {
            if session.state() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "session never reached {expected:?}, still {:?}",
            session.state()
        );
    }

    #[tokio::test]
    async fn test_records_transmitted_in_submission_order() {
        let mut h = harness(Duration::from_secs(1));

        for position in 1..=3 {
            let payload = vec![position as u8];
            h.session
                .send(ExportRecord::new(position, payload))
                .await
                .unwrap();
        }

        for expected in 1..=3u8 {
            let record = h.wire.recv().await.unwrap();
            assert_eq!(record.serialized, vec![expected]);
        }
        assert_eq!(h.session.last_sent(), Some(3));
        assert_eq!(h.session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_close_drains_buffered_acknowledgments() {
        let h = harness(Duration::from_secs(1));

        h.session
            .send(ExportRecord::new(10, b"r".as_slice()))
            .await
            .unwrap();

        // Acknowledgment is queued on the transport but the peer has not
        // completed its half yet when close begins.
        h.acks.send(Ok(Acknowledgment::at(10))).await.unwrap();
        drop(h.acks);

        let checkpoint = h.session.close().await.unwrap();
        assert_eq!(checkpoint, Some(10));
        assert_eq!(h.sink.positions(), vec![10]);
    }

    #[tokio::test]
    async fn test_close_without_traffic_reports_no_checkpoint() {
        let h = harness(Duration::from_secs(1));
        drop(h.acks);
        assert_eq!(h.session.close().await.unwrap(), None);
        assert!(h.sink.positions().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_fails_session_and_surfaces() {
        let h = harness(Duration::from_secs(1));

        h.acks
            .send(Err(Status::unavailable("link down")))
            .await
            .unwrap();
        wait_for_state(&h.session, SessionState::Failed).await;

        // Surfaced on send...
        let err = h
            .session
            .send(ExportRecord::new(1, b"r".as_slice()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));

        // ...and on close.
        let err = h.session.close().await.unwrap_err();
        match err {
            SessionError::Transport(status) => {
                assert_eq!(status.code(), tonic::Code::Unavailable);
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_graceful_completion_is_stop_signal() {
        let h = harness(Duration::from_secs(1));

        drop(h.acks);
        wait_for_state(&h.session, SessionState::Closed).await;

        let err = h
            .session
            .send(ExportRecord::new(1, b"r".as_slice()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ClosedByPeer));

        // Close after peer completion is trivially drained.
        assert_eq!(h.session.close().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_times_out_when_peer_hangs() {
        let h = harness(Duration::from_millis(50));

        // Keep the acknowledgment stream open so the drain cannot finish.
        let _held_open = h.acks;

        let err = h.session.close().await.unwrap_err();
        match err {
            SessionError::DrainTimeout { timeout } => {
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected DrainTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acknowledgments_advance_checkpoint_while_open() {
        let h = harness(Duration::from_secs(1));

        h.session
            .send(ExportRecord::new(5, b"r".as_slice()))
            .await
            .unwrap();
        h.acks.send(Ok(Acknowledgment::at(5))).await.unwrap();

        for _ in 0..100 {
            if h.session.checkpoint() == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.session.checkpoint(), Some(5));
        assert_eq!(h.session.state(), SessionState::Open);
    }
}
