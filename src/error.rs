use thiserror::Error;

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors raised by the monitoring pipeline.
///
/// None of these are fatal to the process: every long-lived worker logs them at
/// its own boundary and either skips the offending input or reconnects.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid telemetry frame: {0}")]
    Frame(String),

    #[error("Model inference failed: {0}")]
    Inference(String),

    #[error("Control action failed: {0}")]
    Control(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
