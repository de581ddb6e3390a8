//! # Error Handling
//!
//! Custom error types for the session engine and how lower-level failures
//! are converted into them.
//!
//! ## Error Categories:
//! - **Connect/Transport**: the live socket failed to open or died mid-session
//! - **Codec**: malformed wire audio (bad base64, truncated sample data)
//! - **Device**: camera/microphone could not be acquired
//! - **Verification**: the recognition service rejected or errored
//! - **InvalidIdentity**: a session was started with incomplete identity fields
//! - **Api**: a collaborator REST endpoint misbehaved
//! - **Config**: configuration file or environment variable problems
//!
//! ## Propagation policy:
//! Transport-level and device-level failures are handled locally inside the
//! session task (caught, logged, converted into a state transition). These
//! types exist so the conversion points have something precise to log and so
//! callers of the library API get a typed failure rather than a string.

use std::fmt;

/// Custom error types for the session engine.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(SessionError::InvalidIdentity("subject".to_string()));
/// ```
#[derive(Debug)]
pub enum SessionError {
    /// The WebSocket connection could not be established
    Connect(String),

    /// The established connection failed while in use
    Transport(String),

    /// Wire audio payload could not be decoded (bad base64, odd byte count)
    Codec(String),

    /// Camera or microphone could not be acquired or was lost
    Device(String),

    /// The recognition service rejected the captured face or errored
    Verification(String),

    /// A required session identity field is empty (the field name)
    InvalidIdentity(String),

    /// A collaborator REST endpoint returned an unusable response
    Api(String),

    /// An event arrived that is not legal in the current verification state
    State(String),

    /// Configuration file or environment variable problems
    Config(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(msg) => write!(f, "Connection error: {}", msg),
            SessionError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SessionError::Codec(msg) => write!(f, "Codec error: {}", msg),
            SessionError::Device(msg) => write!(f, "Device error: {}", msg),
            SessionError::Verification(msg) => write!(f, "Verification error: {}", msg),
            SessionError::InvalidIdentity(field) => {
                write!(f, "Session identity field '{}' must not be empty", field)
            }
            SessionError::Api(msg) => write!(f, "Collaborator API error: {}", msg),
            SessionError::State(msg) => write!(f, "State error: {}", msg),
            SessionError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Socket failures become transport errors.
///
/// ## Note:
/// `connect()` maps handshake failures to `Connect` itself, before any of
/// these conversions run; everything after the handshake is `Transport`.
impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// JSON failures on the wire are codec-level problems.
///
/// ## Why Codec and not Transport:
/// A malformed payload on a healthy socket is a content problem. Inbound
/// dispatch catches these per-message and drops the message; the session
/// stays up.
impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Codec(format!("JSON error: {}", err))
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(err: base64::DecodeError) -> Self {
        SessionError::Codec(format!("base64 error: {}", err))
    }
}

/// Collaborator HTTP failures (recognition, analysis, chat).
impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Api(err.to_string())
    }
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

/// Type alias for Results that use the engine's error type.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = SessionError::InvalidIdentity("chapter".to_string());
        assert_eq!(
            err.to_string(),
            "Session identity field 'chapter' must not be empty"
        );

        let err = SessionError::Codec("odd byte count".to_string());
        assert!(err.to_string().contains("odd byte count"));
    }

    #[test]
    fn test_json_error_becomes_codec() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SessionError = parse_err.into();
        assert!(matches!(err, SessionError::Codec(_)));
    }
}
