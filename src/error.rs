//! Error types for the relay
//!
//! This module defines the custom error types used throughout the
//! application and their mapping onto HTTP status codes.

use axum::http::StatusCode;
use std::io;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// All 128 relay slots hold a live session
    #[error("relay capacity exhausted")]
    CapacityExhausted,

    /// The `server` selector named a port outside the probed range
    #[error("server selector out of range: {0}")]
    SelectorInvalid(String),

    /// The `server` selector named no known or online server
    #[error("unknown server: {0}")]
    SelectorUnknown(String),

    /// Malformed frame or protocol violation on the signaling socket
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Peer connection setup or SDP negotiation failed
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// HTTP status code reported when this error aborts a request
    /// before the WebSocket upgrade completes.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::SelectorInvalid(_) => StatusCode::BAD_REQUEST,
            RelayError::SelectorUnknown(_) => StatusCode::NOT_FOUND,
            RelayError::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<webrtc::Error> for RelayError {
    fn from(err: webrtc::Error) -> Self {
        RelayError::WebRtc(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            RelayError::SelectorInvalid("26999".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::SelectorUnknown("10.0.0.1:27015".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::CapacityExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RelayError::Signaling("bad frame".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_display() {
        let err = RelayError::CapacityExhausted;
        assert_eq!(format!("{}", err), "relay capacity exhausted");

        let err = RelayError::SelectorInvalid("99999".to_string());
        assert_eq!(format!("{}", err), "server selector out of range: 99999");

        let err = RelayError::SelectorUnknown("nowhere:1".to_string());
        assert_eq!(format!("{}", err), "unknown server: nowhere:1");

        let err = RelayError::Config("bad value".to_string());
        assert_eq!(format!("{}", err), "configuration error: bad value");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
