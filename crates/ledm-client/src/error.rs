//! Error types for scanner client operations

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for scanner client operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors that can occur while talking to the scanner or driving a scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Device answered with an unexpected HTTP status, or the call timed out
    #[error("{operation} failed: {reason}")]
    Protocol {
        operation: &'static str,
        /// `None` when no response arrived before the request timeout
        status: Option<u16>,
        reason: String,
    },

    /// Device answered, but an expected XML element or header is missing
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Writing the output file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scan was cancelled before a job was submitted
    #[error("Scan cancelled")]
    Cancelled,

    /// Another scan is already running on this scanner
    #[error("A scan is already in progress")]
    ScanInProgress,
}

impl ScanError {
    /// Create a protocol error from an unexpected HTTP status
    pub fn unexpected_status(operation: &'static str, status: reqwest::StatusCode) -> Self {
        Self::Protocol {
            operation,
            status: Some(status.as_u16()),
            reason: format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string(),
        }
    }

    /// Create a malformed-response error for a missing XML element
    pub fn missing_element(element: &str) -> Self {
        Self::MalformedResponse(format!("missing <{}> element", element))
    }

    /// Classify a transport failure; timeouts count as protocol errors
    pub(crate) fn from_transport(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Protocol {
                operation,
                status: None,
                reason: "request timed out".to_string(),
            }
        } else {
            Self::Transport(err)
        }
    }

    /// HTTP status carried by a protocol error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for ScanError {
    fn from(err: quick_xml::Error) -> Self {
        Self::MalformedResponse(format!("invalid XML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_message() {
        let err = ScanError::unexpected_status("POST /Scan/Jobs", reqwest::StatusCode::CONFLICT);
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.to_string(), "POST /Scan/Jobs failed: HTTP 409 Conflict");
    }

    #[test]
    fn test_missing_element_message() {
        let err = ScanError::missing_element("ScannerState");
        assert!(matches!(err, ScanError::MalformedResponse(_)));
        assert_eq!(
            err.to_string(),
            "Malformed response: missing <ScannerState> element"
        );
    }
}
