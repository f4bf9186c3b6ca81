// error.rs

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server error: {status} from {url}")]
    Status {
        url: String,
        status: u16,
        body: Option<String>,
    },

    #[error("Malformed response from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
}

impl ArchiverError {
    /// Returns true if the error is likely transient and the operation can be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Status { status, .. } => matches!(status, 502 | 503 | 504),
            Self::Timeout { .. } => true,
            Self::Json { .. } => false,
            Self::InvalidUrl(_) => false,
        }
    }

    /// Returns true if the error indicates a problem with the request itself
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Status { status, .. } => (400..500).contains(status),
            Self::InvalidUrl(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error indicates a server-side problem
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status >= 500)
    }

    pub(crate) fn http(url: &str, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.to_string(),
            source,
        }
    }
}

/// Result type alias for ArchiverError
pub type Result<T> = std::result::Result<T, ArchiverError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ArchiverError {
        ArchiverError::Status {
            url: "http://archiver/mgmt/bpl/archivePV".to_string(),
            status: code,
            body: None,
        }
    }

    #[test]
    fn test_gateway_errors_are_retryable() {
        assert!(status(503).is_retryable());
        assert!(status(504).is_retryable());
        assert!(!status(500).is_retryable());
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn test_error_classification() {
        assert!(status(400).is_client_error());
        assert!(!status(400).is_server_error());
        assert!(status(500).is_server_error());
        assert!(ArchiverError::InvalidUrl("nope".into()).is_client_error());

        let timeout = ArchiverError::Timeout {
            url: "http://archiver".into(),
            after: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_client_error());
    }

    #[test]
    fn test_json_error_is_not_retryable() {
        let source = serde_json::from_str::<Vec<String>>("{").unwrap_err();
        let err = ArchiverError::Json {
            url: "http://archiver".into(),
            source,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Malformed response"));
    }
}
