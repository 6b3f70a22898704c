//! Configuration for the forwarder and its production transport.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Connection and queueing settings.
///
/// Durations are (de)serialized as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Ingest endpoint host name.
    pub host: String,
    /// Ingest endpoint port.
    pub port: u16,
    /// Request transport encryption.
    #[serde(default)]
    pub secure: bool,
    /// Account license key sent in the stream handshake.
    pub license: String,
    /// Agent run token correlating the stream with the application.
    pub run_id: String,
    /// Queue capacity in spans.
    #[serde(default = "default_queue_size")]
    pub queue_size: u64,
    /// Opaque metadata forwarded to the transport.
    #[serde(default)]
    pub request_headers: HashMap<String, String>,

    /// Pause before reconnecting after a transient failure.
    ///
    /// Default: 15s
    #[serde(default = "default_backoff", with = "millis", rename = "backoff_ms")]
    pub backoff: Duration,

    /// Bound on establishing the TCP connection.
    ///
    /// Default: 10s
    #[serde(default = "default_connect_timeout", with = "millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,

    /// Bound on writing one frame. A peer that stops reading fails the
    /// send instead of stalling the stream.
    ///
    /// Default: 10s
    #[serde(default = "default_write_timeout", with = "millis", rename = "write_timeout_ms")]
    pub write_timeout: Duration,

    /// How long `shutdown` lets the transport flush before cutting it.
    ///
    /// Default: 5s
    #[serde(default = "default_shutdown_grace", with = "millis", rename = "shutdown_grace_ms")]
    pub shutdown_grace: Duration,

    /// Capacity of the per-connection asynchronous response channel.
    ///
    /// Default: 64
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
}

fn default_queue_size() -> u64 {
    10_000
}

fn default_backoff() -> Duration {
    Duration::from_secs(15)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_response_buffer() -> usize {
    64
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl ForwarderConfig {
    /// Creates a configuration with default tuning for the given endpoint and
    /// credentials.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        license: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
            license: license.into(),
            run_id: run_id.into(),
            queue_size: default_queue_size(),
            request_headers: HashMap::new(),
            backoff: default_backoff(),
            connect_timeout: default_connect_timeout(),
            write_timeout: default_write_timeout(),
            shutdown_grace: default_shutdown_grace(),
            response_buffer: default_response_buffer(),
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.license.is_empty() {
            return Err(ConfigError::EmptyLicense);
        }
        if self.run_id.is_empty() {
            return Err(ConfigError::EmptyRunId);
        }
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_queue_size(mut self, queue_size: u64) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Settings the stream worker needs regardless of transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Queue capacity in spans.
    ///
    /// Default: 10 000
    pub queue_size: u64,
    /// Pause before reconnecting after a transient failure.
    ///
    /// Default: 15s
    pub backoff: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            backoff: default_backoff(),
        }
    }
}

impl StreamOptions {
    pub fn with_queue_size(mut self, queue_size: u64) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl From<&ForwarderConfig> for StreamOptions {
    fn from(config: &ForwarderConfig) -> Self {
        Self {
            queue_size: config.queue_size,
            backoff: config.backoff,
        }
    }
}
