//! Client error types

use std::time::Duration;

use reqwest::StatusCode;
use tally_core::{DecodeError, SessionError};
use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or transport error, including timeouts
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Server returned an error status that needs no special handling
    #[error("Server error {status}: {message}")]
    RequestFailed { status: u16, message: String },

    /// Server rejected the credentials, even after a refresh where one was possible
    #[error("Authentication rejected ({status}): {message}")]
    AuthRejected { status: u16, message: String },

    /// Server asked the client to slow down
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// The refresh token has expired, or there is no session to refresh
    #[error("Session expired")]
    SessionExpired,

    /// The refresh call failed for a reason other than rejection
    #[error("Token refresh failed: {message}")]
    RefreshFailed {
        status: Option<u16>,
        message: String,
    },

    /// A token returned by the server could not be decoded
    #[error("Invalid token: {0}")]
    Decode(#[from] DecodeError),

    /// The session could not be persisted
    #[error("Session storage failed: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::AuthRejected {
                status: status.as_u16(),
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                retry_after: None,
                message,
            },
            _ => Self::RequestFailed {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Whether the server refused the caller's credentials
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Whether this error ended the session
    ///
    /// An [`ClientError::AuthRejected`] only ends the session when it was raised
    /// for an authenticated request; check the session to tell the cases apart.
    pub const fn is_session_terminal(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::AuthRejected { .. })
    }

    /// HTTP status behind this error, if the server answered
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } | Self::AuthRejected { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::RefreshFailed { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Decode(e) => Self::Decode(e),
            SessionError::Storage(e) => Self::Storage(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ClientError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            ClientError::AuthRejected { status: 401, .. }
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::FORBIDDEN, String::new()),
            ClientError::AuthRejected { status: 403, .. }
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ClientError::RateLimited { retry_after: None, .. }
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::NOT_FOUND, "missing".into()),
            ClientError::RequestFailed { status: 404, ref message } if message == "missing"
        ));
    }

    #[test]
    fn test_session_error_conversion() {
        let err: ClientError = SessionError::Decode(DecodeError::MissingClaim("exp")).into();
        assert!(matches!(err, ClientError::Decode(DecodeError::MissingClaim("exp"))));

        let err: ClientError =
            SessionError::Storage(tally_core::CoreError::io_error("disk full")).into();
        assert!(matches!(err, ClientError::Storage(ref m) if m.contains("disk full")));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(ClientError::SessionExpired.is_session_terminal());
        assert!(!ClientError::SessionExpired.is_auth_rejection());
        let rate_limited = ClientError::RateLimited {
            retry_after: None,
            message: String::new(),
        };
        assert!(!rate_limited.is_session_terminal());
        assert_eq!(rate_limited.status(), Some(429));
    }
}
