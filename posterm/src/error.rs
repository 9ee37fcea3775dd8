//! Error types for terminal payment operations.
//!
//! Every fallible operation in this crate surfaces a [`PosError`]. Ports
//! (the session authority and the device transport) report their own
//! narrower errors, which convert into [`PosError`] at the crate boundary so
//! callers only ever see the typed taxonomy, never a raw transport error.

use crate::device::DeviceConnectionState;

/// Base error type for terminal payment operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PosError {
    /// The installation has never been registered, so no identity exists.
    #[error("installation is not provisioned")]
    NotProvisioned,

    /// The session authority could not be reached.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The session authority refused the request, or no valid session exists.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// A payload could not be decoded into the expected structure.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// No device session is currently connected.
    #[error("no connected device session")]
    NotConnected,

    /// The device did not answer within the configured timeout.
    #[error("device transport timed out")]
    TransportTimeout,

    /// The device transport reported a failure.
    #[error("device transport error: {0}")]
    TransportError(String),

    /// The caller cancelled the operation before it resolved.
    #[error("operation cancelled")]
    Cancelled,

    /// A device lifecycle action was requested from a state that does not allow it.
    #[error("cannot {action} while device is {}", state_label(.from))]
    InvalidState {
        /// The state the controller was in, `None` when no device is known.
        from: Option<DeviceConnectionState>,
        /// The rejected action (e.g. `"connect"`).
        action: &'static str,
    },
}

impl PosError {
    /// Creates a malformed-payload error from any displayable cause.
    #[must_use]
    pub fn malformed(cause: impl std::fmt::Display) -> Self {
        Self::MalformedPayload(cause.to_string())
    }

    /// Returns `true` when the error was produced by caller cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for PosError {
    fn from(value: serde_json::Error) -> Self {
        Self::malformed(value)
    }
}

fn state_label(state: &Option<DeviceConnectionState>) -> &'static str {
    state.as_ref().map_or("unknown", DeviceConnectionState::as_str)
}

/// Error reported by a [`SessionAuthority`](crate::session::SessionAuthority).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The request never produced an HTTP response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The authority answered with a non-success status.
    #[error("rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the authority.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<SessionError> for PosError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::Transport(msg) => Self::NetworkError(msg),
            SessionError::Rejected { status, body } => {
                Self::AuthRejected(format!("status {status}: {body}"))
            }
            SessionError::Decode(msg) => Self::MalformedPayload(msg),
        }
    }
}

/// Error reported by a [`DeviceTransport`](crate::device::DeviceTransport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct TransportFailure {
    /// Human-readable failure reason.
    pub reason: String,
}

impl TransportFailure {
    /// Creates a new transport failure.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<TransportFailure> for PosError {
    fn from(value: TransportFailure) -> Self {
        Self::TransportError(value.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_maps_to_taxonomy() {
        let rejected: PosError = SessionError::Rejected {
            status: 401,
            body: "denied".into(),
        }
        .into();
        assert!(matches!(rejected, PosError::AuthRejected(_)));

        let network: PosError = SessionError::Transport("refused".into()).into();
        assert_eq!(network, PosError::NetworkError("refused".into()));

        let decode: PosError = SessionError::Decode("eof".into()).into();
        assert!(matches!(decode, PosError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = PosError::InvalidState {
            from: Some(DeviceConnectionState::Connecting),
            action: "connect",
        };
        assert_eq!(err.to_string(), "cannot connect while device is connecting");

        let err = PosError::InvalidState {
            from: None,
            action: "disconnect",
        };
        assert_eq!(err.to_string(), "cannot disconnect while device is unknown");
    }
}
