//! Shared types at the boundary between the host engine and the session.

/// A positioned unit of data exported by the host engine.
///
/// The host serializes the record before handing it over; the payload is
/// opaque to the session and travels unmodified on the wire. The position is
/// kept alongside so the session can track the highest position submitted,
/// but it is not duplicated into the wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    position: i64,
    serialized: Vec<u8>,
}

impl ExportRecord {
    /// Create a record at `position` with an already-serialized payload.
    pub fn new(position: i64, serialized: impl Into<Vec<u8>>) -> Self {
        Self {
            position,
            serialized: serialized.into(),
        }
    }

    /// Position assigned by the host engine, strictly increasing per stream.
    #[must_use]
    pub const fn position(&self) -> i64 {
        self.position
    }

    /// Serialized payload as produced by the host.
    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

impl From<ExportRecord> for relay_proto::Record {
    fn from(record: ExportRecord) -> Self {
        Self {
            serialized: record.serialized,
        }
    }
}
