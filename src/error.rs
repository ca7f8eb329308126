//! Aegis Error Types

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for Aegis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Aegis error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Daemon errors
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("Command `{0}` timed out")]
    CommandTimeout(String),

    #[error("WireGuard daemon unavailable: {0}")]
    DaemonUnavailable(String),

    // Provisioning errors
    #[error("wireguard.subnet_base is not configured")]
    SubnetNotConfigured,

    #[error("No available IP in subnet range (.{first}-.{last})")]
    AddressPoolExhausted { first: u32, last: u32 },

    #[error("Peer {public_key} ({allowed_ip}) is live but {stage} failed: {reason}")]
    ProvisionDrift {
        public_key: String,
        allowed_ip: String,
        stage: &'static str,
        reason: String,
    },

    #[error("QR encoding failed: {0}")]
    QrEncode(String),

    // Validation errors
    #[error("Invalid WireGuard public key format")]
    InvalidPublicKey,

    #[error("Invalid CIDR format: {0}")]
    InvalidCidr(String),

    #[error("Timezone offset {0} outside -720..=840 minutes")]
    InvalidTimezoneOffset(i32),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller sent something unusable (as opposed to a server-side failure)
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::InvalidPublicKey | Error::InvalidCidr(_) | Error::InvalidTimezoneOffset(_)
        )
    }

    /// Whether the live tunnel may now differ from the persisted config
    pub fn is_drift(&self) -> bool {
        matches!(self, Error::ProvisionDrift { .. })
    }

    /// HTTP status for API responses
    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            Error::DaemonUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
