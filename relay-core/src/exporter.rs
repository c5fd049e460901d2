//! Host-facing exporter contract.
//!
//! The host engine drives the adapter through an explicit trait rather than
//! a reflective plugin surface: `configure` supplies connection parameters,
//! `open` supplies the checkpoint sink and establishes the stream, `export`
//! delivers records one at a time in strictly increasing position order, and
//! `close` drains and releases the channel.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, ExporterConfig};
use crate::connect::{self, ConnectError};
use crate::session::{ExportSession, SessionError, SessionState};
use crate::tracker::CheckpointSink;
use crate::types::ExportRecord;

/// Connection parameters handed to [`Exporter::configure`] by the host.
#[derive(Debug, Clone)]
pub struct ExporterContext {
    config: ExporterConfig,
}

impl ExporterContext {
    #[must_use]
    pub const fn new(config: ExporterConfig) -> Self {
        Self { config }
    }

    /// Builds a context from a TOML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the document does not parse or validate.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(ExporterConfig::from_toml_str(raw)?))
    }

    #[must_use]
    pub const fn config(&self) -> &ExporterConfig {
        &self.config
    }
}

/// Lifecycle contract between the host engine and the export adapter.
///
/// The host calls `configure` once, then `open`, then `export` for each
/// record in strictly increasing position order, and finally `close`.
/// Acknowledgment of exported records is reported asynchronously through the
/// [`CheckpointSink`] passed to `open`; a record is durably exported only
/// once the sink has seen a position at or beyond it.
#[async_trait]
pub trait Exporter: Send {
    /// Supplies connection parameters. No I/O happens here.
    fn configure(&mut self, context: &ExporterContext) -> Result<(), ExportError>;

    /// Connects the transport and opens the export session.
    async fn open(&mut self, sink: Arc<dyn CheckpointSink>) -> Result<(), ExportError>;

    /// Delivers the next record to the stream. Returns without waiting for
    /// acknowledgment.
    async fn export(&mut self, record: ExportRecord) -> Result<(), ExportError>;

    /// Terminates the session, draining trailing acknowledgments first.
    async fn close(&mut self) -> Result<(), ExportError>;
}

/// Exporter bridging the host record stream onto a gRPC export channel.
#[derive(Default)]
pub struct GrpcExporter {
    config: Option<ExporterConfig>,
    session: Option<ExportSession>,
}

impl GrpcExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest position confirmed so far, while the session is open.
    #[must_use]
    pub fn checkpoint(&self) -> Option<i64> {
        self.session.as_ref().and_then(ExportSession::checkpoint)
    }

    fn not_open() -> ExportError {
        ExportError::Session(SessionError::NotOpen {
            state: SessionState::Closed,
        })
    }
}

#[async_trait]
impl Exporter for GrpcExporter {
    fn configure(&mut self, context: &ExporterContext) -> Result<(), ExportError> {
        self.config = Some(context.config().clone());
        Ok(())
    }

    async fn open(&mut self, sink: Arc<dyn CheckpointSink>) -> Result<(), ExportError> {
        if self.session.is_some() {
            return Err(ExportError::AlreadyOpen);
        }
        let config = self.config.as_ref().ok_or(ExportError::NotConfigured)?;

        let mut client = connect::connect(config).await?;
        let session = ExportSession::open(&mut client, sink, &config.stream).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn export(&mut self, record: ExportRecord) -> Result<(), ExportError> {
        match &self.session {
            Some(session) => Ok(session.send(record).await?),
            None => Err(Self::not_open()),
        }
    }

    async fn close(&mut self) -> Result<(), ExportError> {
        match self.session.take() {
            Some(session) => {
                session.close().await?;
                Ok(())
            }
            None => Err(Self::not_open()),
        }
    }
}

/// Errors surfaced to the host through the exporter operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// `open` was called before `configure`
    #[error("exporter has not been configured")]
    NotConfigured,

    /// `open` was called while a session is already open
    #[error("export session is already open")]
    AlreadyOpen,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
