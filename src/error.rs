/// Errors raised by the pose streaming pipeline.
///
/// Every variant maps to a stable tag via [`StreamError::kind`], which the
/// loops include in their log lines.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Transport setup failed: {0}")]
    TransportSetup(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Read failed: {0}")]
    ReadFailure(#[source] std::io::Error),

    #[error("Malformed record: {0}")]
    Decode(String),

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Implausible sample: moved {distance:.4} m, limit {threshold:.4} m")]
    ImplausibleSample { distance: f64, threshold: f64 },

    #[error("No tracked device available")]
    DeviceUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

impl StreamError {
    /// Stable, machine-friendly tag for log events.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::TransportSetup(_) => "transport_setup",
            StreamError::ConnectionLost(_) => "connection_lost",
            StreamError::ReadFailure(_) => "read_failure",
            StreamError::Decode(_) => "decode",
            StreamError::Encode(_) => "encode",
            StreamError::ImplausibleSample { .. } => "implausible_sample",
            StreamError::DeviceUnavailable => "device_unavailable",
            StreamError::Config(_) => "config",
            StreamError::Io(_) => "io",
            StreamError::Shutdown => "shutdown",
        }
    }

    /// Whether the loop that observed this error can keep running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionLost(_)
                | StreamError::Decode(_)
                | StreamError::Encode(_)
                | StreamError::ImplausibleSample { .. }
                | StreamError::DeviceUnavailable
        )
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for StreamError {
    fn from(e: toml::de::Error) -> Self {
        StreamError::Config(e.to_string())
    }
}
