//! Acknowledgment tracking and checkpoint advancement.
//!
//! The tracker turns an unordered, possibly-duplicated stream of peer
//! acknowledgments into a monotonically advancing checkpoint. The checkpoint
//! is the only state shared between the outbound (send) path and the inbound
//! (acknowledgment) path, and it is a single atomic counter: advancement is a
//! compare-and-set-or-ignore loop, no lock involved.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use relay_proto::Acknowledgment;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, warn};

/// Checkpoint value meaning "nothing confirmed yet".
const UNCONFIRMED: i64 = -1;

/// Receives checkpoint updates as acknowledgments confirm record positions.
///
/// Implemented by the host, which persists the position and uses it for its
/// own retention/compaction decisions. Called exactly once per advancement,
/// with strictly increasing positions.
pub trait CheckpointSink: Send + Sync + 'static {
    fn update_last_exported_record_position(&self, position: i64);
}

/// Tracks the highest acknowledged position and forwards advancements to the
/// [`CheckpointSink`].
///
/// Shared between the session's send path (which records sent positions) and
/// the acknowledgment reader task (which observes confirmations). Both sides
/// touch only atomics.
pub struct AckTracker {
    /// Highest position confirmed by the peer, `UNCONFIRMED` before the
    /// first acknowledgment.
    checkpoint: AtomicI64,

    /// Highest position handed to `send`, used to flag acknowledgments for
    /// positions this session never sent.
    last_sent: AtomicI64,

    sink: Arc<dyn CheckpointSink>,
}

impl AckTracker {
    #[must_use]
    pub fn new(sink: Arc<dyn CheckpointSink>) -> Self {
        Self {
            checkpoint: AtomicI64::new(UNCONFIRMED),
            last_sent: AtomicI64::new(UNCONFIRMED),
            sink,
        }
    }

    /// Records that the record at `position` was submitted to the stream.
    pub fn record_sent(&self, position: i64) {
        self.last_sent.fetch_max(position, Ordering::AcqRel);
    }

    /// Observes one acknowledgment from the peer.
    ///
    /// Advances the checkpoint and notifies the sink if `position` is
    /// strictly greater than the current checkpoint; duplicate or older
    /// acknowledgments are discarded silently. Returns whether the
    /// checkpoint advanced.
    pub fn observe(&self, position: i64) -> bool {
        let mut current = self.checkpoint.load(Ordering::Acquire);
        loop {
            if position <= current {
                return false;
            }
            match self.checkpoint.compare_exchange_weak(
                current,
                position,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if position > self.last_sent.load(Ordering::Acquire) {
                        warn!(
                            position,
                            last_sent = self.last_sent.load(Ordering::Acquire),
                            "peer acknowledged a position beyond the last sent record"
                        );
                    }
                    debug!(position, "checkpoint advanced");
                    self.sink.update_last_exported_record_position(position);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Highest confirmed position, or `None` before the first acknowledgment.
    #[must_use]
    pub fn checkpoint(&self) -> Option<i64> {
        match self.checkpoint.load(Ordering::Acquire) {
            UNCONFIRMED => None,
            position => Some(position),
        }
    }

    /// Highest position submitted to the stream so far.
    #[must_use]
    pub fn last_sent(&self) -> Option<i64> {
        match self.last_sent.load(Ordering::Acquire) {
            UNCONFIRMED => None,
            position => Some(position),
        }
    }

    /// Consumes the inbound acknowledgment stream until it ends.
    ///
    /// Each acknowledgment feeds [`Self::observe`]. A stream-level error is
    /// returned to the caller instead of being swallowed; any record sent
    /// after such an error is undetectably lost, so the session must stop
    /// assuming forward progress.
    ///
    /// # Errors
    ///
    /// Returns the transport [`Status`] that terminated the stream.
    pub async fn drain<S>(&self, mut acks: S) -> Result<(), Status>
    where
        S: Stream<Item = Result<Acknowledgment, Status>> + Unpin,
    {
        while let Some(result) = acks.next().await {
            match result {
                Ok(ack) => {
                    self.observe(ack.position);
                }
                Err(status) => return Err(status),
            }
        }
        Ok(())
    }
}
