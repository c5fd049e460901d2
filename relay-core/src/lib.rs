//! Export session bridging an event-sourced record stream to an external
//! sink over a persistent bidirectional gRPC stream.
//!
//! The host engine pushes records one at a time; the session serializes them
//! onto the stream in submission order and consumes acknowledgments
//! asynchronously, advancing a monotonic checkpoint the host uses for
//! retention decisions. A position is never reported to the checkpoint sink
//! before the peer has confirmed it.

// Safety-focused Clippy lints to prevent unsafe error handling regression
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo
)]

pub mod config;
pub mod connect;
pub mod exporter;
pub mod session;
pub mod tracker;
pub mod types;

pub use config::{ConfigError, ExporterConfig, StreamConfig, TlsConfig};
pub use connect::{ConnectError, connect};
pub use exporter::{ExportError, Exporter, ExporterContext, GrpcExporter};
pub use session::{ExportSession, SessionError, SessionState};
pub use tracker::{AckTracker, CheckpointSink};
pub use types::ExportRecord;
