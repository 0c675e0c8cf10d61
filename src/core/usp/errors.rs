//! Error taxonomy for the USP connection client.
//!
//! Three families of failures exist:
//!
//! - **Transport** errors (socket, TLS negotiation, unexpected HTTP status
//!   during the WebSocket upgrade, handshake timeout)
//! - **Protocol** errors reported by the service after a successful handshake
//! - **Usage** errors caused by lifecycle misuse (writing after `term()`,
//!   connecting on a stopped service)
//!
//! Transport and protocol errors are never returned to the caller. They are
//! turned into [`ErrorEvent`](super::events::ErrorEvent)s and delivered through
//! the connection's event path; an event converts back into a [`UspError`]
//! for callers that want a `Result`. Usage errors are returned synchronously.

use std::fmt;

/// Error codes carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The socket could not be opened or was dropped.
    ConnectionError,
    /// The service rejected the credentials (HTTP 401/403 on upgrade).
    AuthenticationError,
    /// The WebSocket upgrade was answered with a non-101 HTTP status.
    UpgradeRejected,
    /// TLS negotiation failed.
    SecurityError,
    /// The handshake did not complete within the connect timeout.
    HandshakeTimeout,
    /// The connected session stopped draining audio within the write timeout.
    WriteTimeout,
    /// Sending on an established socket failed.
    TransportError,
    /// The service reported a recognition error.
    ServiceError,
    /// The service sent a message that could not be parsed.
    BadResponse,
    /// The session task panicked.
    RuntimeError,
}

impl ErrorCode {
    /// Whether this code belongs to the transport layer.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::ServiceError | Self::BadResponse)
    }

    /// Whether an error with this code ends the session.
    ///
    /// Every transport failure is fatal, a write timeout included, since
    /// continuing would send a stream with a gap. Service-reported errors and
    /// unparseable messages are surfaced but the session stays open.
    pub fn is_fatal(&self) -> bool {
        self.is_transport()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "connection_error",
            Self::AuthenticationError => "authentication_error",
            Self::UpgradeRejected => "upgrade_rejected",
            Self::SecurityError => "security_error",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::WriteTimeout => "write_timeout",
            Self::TransportError => "transport_error",
            Self::ServiceError => "service_error",
            Self::BadResponse => "bad_response",
            Self::RuntimeError => "runtime_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle misuse, reported synchronously.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("thread service has not been initialized")]
    ServiceNotRunning,
    #[error("thread service has been terminated")]
    ServiceTerminated,
    #[error("connection has been terminated")]
    Terminated,
    #[error("events have already been taken from this connection")]
    EventsAlreadyTaken,
}

/// Error type for USP operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UspError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid usage: {0}")]
    Usage(#[from] UsageError),
    #[error("Transport error ({code}): {message}")]
    Transport { code: ErrorCode, message: String },
    #[error("Protocol error ({code}): {message}")]
    Protocol { code: ErrorCode, message: String },
}

impl UspError {
    pub fn transport(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    pub fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// The error code for transport and protocol errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Transport { code, .. } | Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}
