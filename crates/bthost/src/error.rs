//! Error types shared across the host layers
//!
//! `HostError` covers failures that originate inside the host stack, `StatusCode` is the
//! subset of controller status codes the host reacts to, and `HciError` combines both so
//! connection procedures can report either through one result type.

use thiserror::Error;

/// Failures generated by the host itself
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    #[error("Not found")]
    NotFound,

    #[error("Not ready")]
    NotReady,

    #[error("Timed out")]
    TimedOut,

    #[error("Invalid parameters")]
    InvalidParameters,

    #[error("Canceled")]
    Canceled,

    #[error("Operation already in progress")]
    InProgress,

    #[error("Not supported")]
    NotSupported,

    #[error("Packet malformed")]
    PacketMalformed,

    #[error("Link disconnected")]
    LinkDisconnected,

    #[error("Insufficient security")]
    InsufficientSecurity,

    #[error("Failed")]
    Failed,
}

/// Controller status codes the host stack acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    UnknownCommand,
    UnknownConnectionId,
    PageTimeout,
    AuthenticationFailure,
    ConnectionTimeout,
    ConnectionLimitExceeded,
    ConnectionAlreadyExists,
    CommandDisallowed,
    RemoteUserTerminatedConnection,
    ConnectionTerminatedByLocalHost,
    UnspecifiedError,
    ConnectionFailedToBeEstablished,
    /// Any code this stack has no dedicated handling for
    Other(u8),
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => StatusCode::Success,
            0x01 => StatusCode::UnknownCommand,
            0x02 => StatusCode::UnknownConnectionId,
            0x04 => StatusCode::PageTimeout,
            0x05 => StatusCode::AuthenticationFailure,
            0x08 => StatusCode::ConnectionTimeout,
            0x09 => StatusCode::ConnectionLimitExceeded,
            0x0B => StatusCode::ConnectionAlreadyExists,
            0x0C => StatusCode::CommandDisallowed,
            0x13 => StatusCode::RemoteUserTerminatedConnection,
            0x16 => StatusCode::ConnectionTerminatedByLocalHost,
            0x1F => StatusCode::UnspecifiedError,
            0x3E => StatusCode::ConnectionFailedToBeEstablished,
            other => StatusCode::Other(other),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(value: StatusCode) -> Self {
        match value {
            StatusCode::Success => 0x00,
            StatusCode::UnknownCommand => 0x01,
            StatusCode::UnknownConnectionId => 0x02,
            StatusCode::PageTimeout => 0x04,
            StatusCode::AuthenticationFailure => 0x05,
            StatusCode::ConnectionTimeout => 0x08,
            StatusCode::ConnectionLimitExceeded => 0x09,
            StatusCode::ConnectionAlreadyExists => 0x0B,
            StatusCode::CommandDisallowed => 0x0C,
            StatusCode::RemoteUserTerminatedConnection => 0x13,
            StatusCode::ConnectionTerminatedByLocalHost => 0x16,
            StatusCode::UnspecifiedError => 0x1F,
            StatusCode::ConnectionFailedToBeEstablished => 0x3E,
            StatusCode::Other(code) => code,
        }
    }
}

/// Error reported by connection procedures: either the controller or the host failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HciError {
    #[error("Controller status: {0:?}")]
    Controller(StatusCode),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

impl HciError {
    /// Whether this error is the given controller status
    pub fn is(&self, status: StatusCode) -> bool {
        matches!(self, HciError::Controller(code) if *code == status)
    }

    /// Whether this error is the given host error
    pub fn is_host_error(&self, error: HostError) -> bool {
        matches!(self, HciError::Host(e) if *e == error)
    }
}

impl From<StatusCode> for HciError {
    fn from(status: StatusCode) -> Self {
        HciError::Controller(status)
    }
}

/// Result type for procedures that complete with a controller or host status
pub type HciResult<T> = std::result::Result<T, HciError>;
