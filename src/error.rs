//! Error types for the orchestrator and its control channel.
//!
//! [`ControlError`] covers everything that can go wrong while talking to the
//! control port. [`StartError`] is what a startup attempt resolves with when
//! it fails: each variant names the stage that broke.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the control channel.
#[derive(Error, Debug)]
pub enum ControlError {
    /// I/O error occurred during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection to the control port failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The control port rejected our credential.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command was rejected by Tor.
    #[error("Command rejected (code {code}): {message}")]
    CommandRejected {
        /// The status code returned by Tor.
        code: u16,
        /// The human-readable error message.
        message: String,
    },

    /// Protocol error - unexpected response format.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Parsing error when interpreting Tor's response.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// A command was issued on a channel that is not connected.
    #[error("Control channel is not connected")]
    NotConnected,
}

/// Result type alias for control channel operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// A pluggable transport failed to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport {transport} failed to start: {reason}")]
pub struct TransportError {
    /// Name of the transport that failed.
    pub transport: String,
    /// Reason reported by the transport.
    pub reason: String,
}

impl TransportError {
    /// Create a new transport error.
    pub fn new(transport: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            reason: reason.into(),
        }
    }
}

/// The client process could not be launched.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Spawning the binary failed.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        /// The binary we tried to run.
        binary: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The data directory could not be prepared.
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        /// Directory path.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Why a startup attempt failed.
///
/// Several callers can wait on one attempt, so the error is `Clone`; wrapped
/// sources are shared behind `Arc`.
#[derive(Error, Debug, Clone)]
pub enum StartError {
    /// The selected transport failed to start. No process was launched.
    #[error("transport start failed: {0}")]
    TransportStart(#[from] TransportError),

    /// The client process could not be launched.
    #[error("process launch failed: {0}")]
    ProcessLaunch(#[source] Arc<ProcessError>),

    /// The control endpoint was unreachable after the settling delay.
    /// The process is left running so a retry can reuse it.
    #[error("control port connect failed: {0}")]
    ControlConnect(#[source] Arc<ControlError>),

    /// The authentication cookie was missing or unreadable.
    #[error("Tor cookie unreadable")]
    CookieUnreadable(#[source] Arc<io::Error>),

    /// The control endpoint rejected the cookie.
    #[error("authentication failed: {0}")]
    Authentication(#[source] Arc<ControlError>),

    /// Subscribing to bootstrap events was rejected.
    #[error("event subscription failed: {0}")]
    EventSubscription(#[source] Arc<ControlError>),

    /// The SOCKS listener reply did not parse as a usable address.
    #[error("no usable SOCKS address: {0}")]
    NoUsableProxyAddress(String),

    /// An external connection strategy exhausted every option.
    #[error("smart connect failed")]
    SmartConnect,

    /// The attempt was interrupted by stop() or the manager went away.
    #[error("startup cancelled")]
    Cancelled,
}

impl From<ProcessError> for StartError {
    fn from(e: ProcessError) -> Self {
        StartError::ProcessLaunch(Arc::new(e))
    }
}

impl StartError {
    /// Whether a failed attempt left the client process running.
    pub fn leaves_process_running(&self) -> bool {
        matches!(self, StartError::ControlConnect(_))
    }
}

/// Tor control protocol reply status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 250 - OK
    Ok = 250,
    /// 251 - Operation was unnecessary
    OperationUnnecessary = 251,
    /// 451 - Resource exhausted
    ResourceExhausted = 451,
    /// 500 - Syntax error: protocol
    SyntaxErrorProtocol = 500,
    /// 510 - Unrecognized command
    UnrecognizedCommand = 510,
    /// 512 - Syntax error in command argument
    SyntaxErrorArgument = 512,
    /// 513 - Unrecognized command argument
    UnrecognizedArgument = 513,
    /// 514 - Authentication required
    AuthenticationRequired = 514,
    /// 515 - Bad authentication
    BadAuthentication = 515,
    /// 550 - Unspecified Tor error
    UnspecifiedError = 550,
    /// 552 - Unrecognized entity
    UnrecognizedEntity = 552,
    /// 553 - Invalid configuration value
    InvalidConfigValue = 553,
    /// 650 - Asynchronous event notification
    AsyncEvent = 650,
    /// Unknown status code
    Unknown = 0,
}

impl StatusCode {
    /// Parse a status code from a u16 value.
    pub fn from_u16(code: u16) -> Self {
        match code {
            250 => StatusCode::Ok,
            251 => StatusCode::OperationUnnecessary,
            451 => StatusCode::ResourceExhausted,
            500 => StatusCode::SyntaxErrorProtocol,
            510 => StatusCode::UnrecognizedCommand,
            512 => StatusCode::SyntaxErrorArgument,
            513 => StatusCode::UnrecognizedArgument,
            514 => StatusCode::AuthenticationRequired,
            515 => StatusCode::BadAuthentication,
            550 => StatusCode::UnspecifiedError,
            552 => StatusCode::UnrecognizedEntity,
            553 => StatusCode::InvalidConfigValue,
            650 => StatusCode::AsyncEvent,
            _ => StatusCode::Unknown,
        }
    }

    /// Check if this status code indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::OperationUnnecessary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_parsing() {
        assert_eq!(StatusCode::from_u16(250), StatusCode::Ok);
        assert_eq!(StatusCode::from_u16(515), StatusCode::BadAuthentication);
        assert_eq!(StatusCode::from_u16(9999), StatusCode::Unknown);
    }

    #[test]
    fn test_status_code_success() {
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::OperationUnnecessary.is_success());
        assert!(!StatusCode::BadAuthentication.is_success());
    }

    #[test]
    fn test_only_connect_failure_keeps_process() {
        let connect = StartError::ControlConnect(Arc::new(ControlError::ConnectionClosed));
        assert!(connect.leaves_process_running());

        let cookie = StartError::CookieUnreadable(Arc::new(io::Error::from(io::ErrorKind::NotFound)));
        assert!(!cookie.leaves_process_running());
        assert_eq!(cookie.to_string(), "Tor cookie unreadable");
    }
}
