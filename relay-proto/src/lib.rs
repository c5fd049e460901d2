//! Protocol buffer definitions for the record-relay export stream.
//!
//! Exposes the generated tonic client and server for the bidirectional
//! `Export` RPC together with small ergonomic constructors for the two wire
//! messages.

// Include the generated protobuf code
tonic::include_proto!("relay.v1");

/// File descriptor set for runtime reflection services.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("relay_descriptor");

impl Record {
    /// Wrap an already-serialized record payload for transmission.
    pub fn new(serialized: impl Into<Vec<u8>>) -> Self {
        Self {
            serialized: serialized.into(),
        }
    }
}

impl Acknowledgment {
    /// Confirmation for the record at `position`.
    #[must_use]
    pub const fn at(position: i64) -> Self {
        Self { position }
    }
}
