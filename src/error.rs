// =============================================================================
// SlideSync Room Sync Engine - Error Module
// =============================================================================
//
// Project: SlideSync - Sliding-Window Room List Sync Engine
// Author: SlideSync Contributors
// Date: 2025-03-08
// Version: 0.3.0
// License: Apache 2.0 / MIT
//
// Description:
//   Crate-wide error type and result alias. Request validation failures are
//   the only client-attributable errors; everything else maps to a server
//   error. Cache-internal failures never surface here, they are logged and
//   demoted to empty results.
//
// =============================================================================

use thiserror::Error;

/// SlideSync engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: unknown sort key, bad range, oversized limits.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The event/state store failed while serving a request.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// SlideSync engine result type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the transport should map this error to a 400-class status
    /// rather than a 500-class one.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidRequest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_error() {
        let error = Error::InvalidRequest("unknown sort key 'by_mood'".to_string());
        assert!(error.to_string().contains("Invalid request"));
        assert!(error.to_string().contains("by_mood"));
        assert!(error.is_client_error());
    }

    #[test]
    fn test_storage_error_is_server_error() {
        let error = Error::Storage("connection refused".to_string());
        assert!(error.to_string().contains("Storage error"));
        assert!(!error.is_client_error());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = Error::from(json_err);
        assert!(error.to_string().contains("Serialization error"));
        assert!(!error.is_client_error());
    }
}
