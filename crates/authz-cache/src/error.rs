//! Error taxonomy for the decision cache
//!
//! Cache-internal conditions (miss, expiry, eviction) are ordinary control flow
//! and never surface here. Only provider and transport failures on the miss
//! path, stream problems and bad configuration are errors.

use thiserror::Error;

/// Result type for decision cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache, the client and the event subscriber
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Network failure or timeout talking to the decision provider
    #[error("Decision provider unavailable: {message}")]
    RemoteUnavailable {
        /// Description of the transport failure
        message: String,
    },

    /// The decision provider answered with a non-success status
    #[error("Decision provider returned {status}: {body}")]
    RemoteDecisionError {
        /// HTTP status code of the response
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// A stream payload could not be parsed as structured data
    #[error("Malformed event: {message}")]
    MalformedEvent {
        /// Parser diagnostic
        message: String,
    },

    /// The event stream connection failed or ended
    #[error("Event stream disconnected: {message}")]
    StreamDisconnected {
        /// Why the stream was lost
        message: String,
    },

    /// A required identifying field or configuration value is missing or invalid
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// The caller is not permitted to perform the requested action
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Who was denied what
        message: String,
    },
}

impl CacheError {
    /// Create a provider-unavailable error
    pub fn remote_unavailable(message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: message.into(),
        }
    }

    /// Create a provider decision error from a status and body
    pub fn remote_decision(status: u16, body: impl Into<String>) -> Self {
        Self::RemoteDecisionError {
            status,
            body: body.into(),
        }
    }

    /// Create a malformed-event error
    pub fn malformed_event(message: impl Into<String>) -> Self {
        Self::MalformedEvent {
            message: message.into(),
        }
    }

    /// Create a stream-disconnected error
    pub fn stream_disconnected(message: impl Into<String>) -> Self {
        Self::StreamDisconnected {
            message: message.into(),
        }
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a permission-denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::StreamDisconnected { .. }
        ) || matches!(self, Self::RemoteDecisionError { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::remote_decision(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::remote_decision(200, format!("undecodable response: {err}"));
        }
        Self::remote_unavailable(err.to_string())
    }
}
