//! Transport establishment for the export channel.
//!
//! Builds a connected gRPC client from an explicit [`ExporterConfig`].
//! Reconnect and retry policy stay with the host; a failed dial is simply
//! returned.

use std::path::PathBuf;

use relay_proto::export_service_client::ExportServiceClient;
use thiserror::Error;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::config::ExporterConfig;

/// Dials the configured endpoint and returns a connected export client.
///
/// # Errors
///
/// Returns [`ConnectError`] if the endpoint is not a valid URI, TLS
/// material cannot be loaded, or the dial fails.
pub async fn connect(config: &ExporterConfig) -> Result<ExportServiceClient<Channel>, ConnectError> {
    let mut endpoint =
        Endpoint::from_shared(config.endpoint.clone()).map_err(|source| ConnectError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            source,
        })?;

    if config.tls.enabled {
        endpoint = endpoint
            .tls_config(tls_config(config)?)
            .map_err(ConnectError::Tls)?;
    }

    debug!(endpoint = %config.endpoint, tls = config.tls.enabled, "dialing export sink");
    let channel = endpoint
        .connect()
        .await
        .map_err(|source| ConnectError::Dial {
            endpoint: config.endpoint.clone(),
            source,
        })?;

    Ok(ExportServiceClient::new(channel))
}

fn tls_config(config: &ExporterConfig) -> Result<ClientTlsConfig, ConnectError> {
    let mut tls = ClientTlsConfig::new().with_native_roots();
    if let Some(domain) = &config.tls.domain_name {
        tls = tls.domain_name(domain.clone());
    }
    if let Some(path) = &config.tls.ca_certificate {
        let pem = std::fs::read(path).map_err(|source| ConnectError::CaCertificate {
            path: path.clone(),
            source,
        })?;
        tls = tls.ca_certificate(Certificate::from_pem(pem));
    }
    Ok(tls)
}

/// Errors raised while establishing the export channel.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Configured endpoint is not a valid URI
    #[error("invalid endpoint {endpoint}")]
    InvalidEndpoint {
        /// The offending endpoint string
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// CA certificate file could not be read
    #[error("failed to read CA certificate {path}")]
    CaCertificate {
        /// Configured certificate path
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TLS settings were rejected by the transport
    #[error("failed to apply TLS settings")]
    Tls(#[source] tonic::transport::Error),

    /// The dial itself failed
    #[error("failed to connect to {endpoint}")]
    Dial {
        /// Endpoint that was dialed
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
}
