//! Error types for the PixelAir client.

use std::io::ErrorKind;
use thiserror::Error;

/// Every outcome a caller of the client can observe.
///
/// `DeviceNotFound` and `ResponseTimeout` are ordinary results for devices
/// that are offline or changed address; callers are expected to match on them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport is not running")]
    TransportNotRunning,

    #[error("Address already in use: {0}")]
    AddressInUse(std::io::Error),

    #[error("No response within {timeout_ms} ms from {target}")]
    ResponseTimeout { target: String, timeout_ms: u128 },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Session has no usable address ({0})")]
    NotResolved(String),

    #[error("Failed to load config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::AddrInUse => Error::AddressInUse(e),
            _ => Error::Io(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedPayload(e.to_string())
    }
}

impl Error {
    /// True for the outcomes that mean "the device did not answer".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::ResponseTimeout { .. } | Error::DeviceNotFound(_))
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;
