//! Exporter configuration.
//!
//! Replaces implicit transport defaults with an explicit, layerable config:
//! hosts typically load a base file and merge runtime overrides on top.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Target endpoint for the export sink, e.g. `https://sink.internal:8080`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            tls: TlsConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid TOML or
    /// does not match the schema, [`ConfigError::Invalid`] if the parsed
    /// values fail validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, plus the
    /// errors of [`Self::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Layer `other` on top of this configuration.
    pub fn merge(&mut self, other: &Self) {
        if !other.endpoint.is_empty() {
            self.endpoint.clone_from(&other.endpoint);
        }
        self.tls.merge(&other.tls);
        self.stream.merge(&other.stream);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "endpoint must not be empty".to_string(),
            });
        }
        if self.stream.send_buffer == 0 {
            return Err(ConfigError::Invalid {
                reason: "stream.send_buffer must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Transport security settings for the export channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// Overrides the domain name used for certificate verification.
    pub domain_name: Option<String>,
    /// PEM-encoded CA certificate to trust in addition to system roots.
    pub ca_certificate: Option<PathBuf>,
}

impl TlsConfig {
    fn merge(&mut self, other: &Self) {
        self.enabled = other.enabled;
        if other.domain_name.is_some() {
            self.domain_name.clone_from(&other.domain_name);
        }
        if other.ca_certificate.is_some() {
            self.ca_certificate.clone_from(&other.ca_certificate);
        }
    }
}

/// Tuning knobs for the export stream itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Outbound queue capacity in records. `send` awaits queue capacity,
    /// never acknowledgment, so this bounds memory rather than latency.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    /// How long `close` waits for trailing acknowledgments before treating
    /// the peer as failed.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl StreamConfig {
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    fn merge(&mut self, other: &Self) {
        if other.send_buffer > 0 {
            self.send_buffer = other.send_buffer;
        }
        if other.drain_timeout_ms > 0 {
            self.drain_timeout_ms = other.drain_timeout_ms;
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            send_buffer: default_send_buffer(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080".to_string()
}

const fn default_send_buffer() -> usize {
    32
}

const fn default_drain_timeout_ms() -> u64 {
    30_000
}

/// Errors raised while loading or validating exporter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config file {path}")]
    Io {
        /// Path that failed to load
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document was not valid TOML for the config schema
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    /// Parsed values failed validation
    #[error("invalid config: {reason}")]
    Invalid {
        /// Why validation rejected the config
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:8080");
        assert!(!config.tls.enabled);
        assert_eq!(config.stream.send_buffer, 32);
        assert_eq!(config.stream.drain_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ExporterConfig::from_toml_str(
            r#"
            endpoint = "https://sink.internal:9090"

            [tls]
            enabled = true
            domain_name = "sink.internal"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "https://sink.internal:9090");
        assert!(config.tls.enabled);
        assert_eq!(config.tls.domain_name.as_deref(), Some("sink.internal"));
        assert_eq!(config.stream.send_buffer, 32);
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let result = ExporterConfig::from_toml_str(r#"endpoint = """#);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_send_buffer_rejected() {
        let result = ExporterConfig::from_toml_str(
            r#"
            [stream]
            send_buffer = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_merge_layers_overrides() {
        let mut base = ExporterConfig::default();
        let overlay = ExporterConfig {
            endpoint: "https://override:7000".to_string(),
            tls: TlsConfig {
                enabled: true,
                ..TlsConfig::default()
            },
            stream: StreamConfig {
                drain_timeout_ms: 5_000,
                ..StreamConfig::default()
            },
        };

        base.merge(&overlay);

        assert_eq!(base.endpoint, "https://override:7000");
        assert!(base.tls.enabled);
        assert_eq!(base.stream.drain_timeout_ms, 5_000);
        // Untouched fields keep their values
        assert_eq!(base.stream.send_buffer, 32);
    }
}
