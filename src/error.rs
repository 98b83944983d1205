use thiserror::Error;

/// Main error type for the watchdog and camera guard
#[derive(Error, Debug)]
pub enum WatchdogError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // System command errors
    #[error("Command `{program}` failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Command `{program}` timed out after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    // Probe / remediation errors
    #[error("Probe {probe} failed: {reason}")]
    Probe { probe: String, reason: String },

    #[error("Remediation {action} failed: {reason}")]
    Remediation { action: String, reason: String },

    #[error("Camera pipeline error: {0}")]
    Camera(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WatchdogError
pub type Result<T> = std::result::Result<T, WatchdogError>;

impl WatchdogError {
    pub fn probe(probe: impl Into<String>, reason: impl Into<String>) -> Self {
        WatchdogError::Probe {
            probe: probe.into(),
            reason: reason.into(),
        }
    }

    pub fn remediation(action: impl Into<String>, reason: impl Into<String>) -> Self {
        WatchdogError::Remediation {
            action: action.into(),
            reason: reason.into(),
        }
    }
}
