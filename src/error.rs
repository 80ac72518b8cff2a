use thiserror::Error;

/// Application-wide error type
///
/// Variants map to the failure classes the engine distinguishes:
/// acquisition failures degrade a capability, transport failures abort a
/// join attempt, channel and upload failures are retried internally and
/// only surfaced once exhausted.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Device acquisition failed: {0}")]
    Acquisition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out waiting for {operation} after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Push channel error: {0}")]
    Channel(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Short message safe to show to end users (no internal detail)
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Acquisition(_) => "A camera or microphone could not be accessed",
            AppError::Transport(_) | AppError::Timeout { .. } => {
                "Could not connect to the call service"
            }
            AppError::Channel(_) => "Lost connection to the alert service",
            AppError::Upload(_) | AppError::Encode(_) => "Monitoring upload failed",
            AppError::Serialization(_) | AppError::Io(_) => "An internal error occurred",
        }
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;
