//! # Error Handling
//!
//! Defines the error taxonomy for the relay client and how external failures
//! map into it.
//!
//! ## Error Categories:
//! - **Transport**: socket open failure, unexpected close, protocol-level errors
//! - **Decode**: malformed base64/PCM payload in an inbound playAudio instruction
//! - **Permission**: microphone device could not be acquired
//! - **Config**: configuration file or environment variable problems
//!
//! Non-JSON or unrecognized inbound text is deliberately NOT an error: the
//! session degrades it to an opaque log line. No failure here is fatal to the
//! process; each one terminates a single attempted action and the caller may
//! retry.

use std::fmt;

/// Custom error types for the relay client.
///
/// Each variant holds a human-readable detail string. Errors are reported to
/// the session log sink and never propagate past the operation that produced
/// them.
#[derive(Debug)]
pub enum RelayError {
    /// Socket open failure, unexpected close, or protocol-level socket error
    Transport(String),

    /// Malformed base64 or PCM data in an inbound audio instruction
    Decode(String),

    /// Microphone access denied or no capture device available
    Permission(String),

    /// Configuration file or environment variable problems
    Config(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Decode(msg) => write!(f, "Decode error: {}", msg),
            RelayError::Permission(msg) => write!(f, "Permission error: {}", msg),
            RelayError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

/// Socket-level failures from the WebSocket library become transport errors.
impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

/// Invalid base64 in an inbound playAudio payload becomes a decode error.
/// The session drops the instruction and keeps running.
impl From<base64::DecodeError> for RelayError {
    fn from(err: base64::DecodeError) -> Self {
        RelayError::Decode(err.to_string())
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

/// Shorthand for Results that use the relay error type.
pub type RelayResult<T> = Result<T, RelayError>;
