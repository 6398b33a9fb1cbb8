//! ATT error codes and the error type of the attribute layer
use super::constants::*;
use super::Handle;
use std::fmt;
use thiserror::Error;

/// Error codes carried in an ATT Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    DatabaseOutOfSync,
    ValueNotAllowed,
    /// 0x80-0x9F, defined by the application
    ApplicationError(u8),
    /// 0xE0-0xFF, defined by a profile
    CommonProfileError(u8),
    /// Reserved code
    Reserved(u8),
}

impl AttErrorCode {
    fn description(&self) -> &'static str {
        match self {
            AttErrorCode::InvalidHandle => "invalid handle",
            AttErrorCode::ReadNotPermitted => "read not permitted",
            AttErrorCode::WriteNotPermitted => "write not permitted",
            AttErrorCode::InvalidPdu => "invalid PDU",
            AttErrorCode::InsufficientAuthentication => "insuff. authentication",
            AttErrorCode::RequestNotSupported => "request not supported",
            AttErrorCode::InvalidOffset => "invalid offset",
            AttErrorCode::InsufficientAuthorization => "insuff. authorization",
            AttErrorCode::PrepareQueueFull => "prepare queue full",
            AttErrorCode::AttributeNotFound => "attribute not found",
            AttErrorCode::AttributeNotLong => "attribute not long",
            AttErrorCode::InsufficientEncryptionKeySize => "insuff. encryption key size",
            AttErrorCode::InvalidAttributeValueLength => "invalid attribute value length",
            AttErrorCode::UnlikelyError => "unlikely error",
            AttErrorCode::InsufficientEncryption => "insuff. encryption",
            AttErrorCode::UnsupportedGroupType => "unsupported group type",
            AttErrorCode::InsufficientResources => "insuff. resources",
            AttErrorCode::DatabaseOutOfSync => "database out of sync",
            AttErrorCode::ValueNotAllowed => "value not allowed",
            AttErrorCode::ApplicationError(_) => "application error",
            AttErrorCode::CommonProfileError(_) => "common profile error",
            AttErrorCode::Reserved(_) => "(unknown)",
        }
    }
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                AttErrorCode::InsufficientEncryptionKeySize
            }
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::UnlikelyError,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ERROR_DATABASE_OUT_OF_SYNC => AttErrorCode::DatabaseOutOfSync,
            ATT_ERROR_VALUE_NOT_ALLOWED => AttErrorCode::ValueNotAllowed,
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::ApplicationError(code)
            }
            ATT_ERROR_COMMON_PROFILE_ERROR_START..=ATT_ERROR_COMMON_PROFILE_ERROR_END => {
                AttErrorCode::CommonProfileError(code)
            }
            _ => AttErrorCode::Reserved(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> Self {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => {
                ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            }
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::UnlikelyError => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::DatabaseOutOfSync => ATT_ERROR_DATABASE_OUT_OF_SYNC,
            AttErrorCode::ValueNotAllowed => ATT_ERROR_VALUE_NOT_ALLOWED,
            AttErrorCode::ApplicationError(code)
            | AttErrorCode::CommonProfileError(code)
            | AttErrorCode::Reserved(code) => code,
        }
    }
}

impl fmt::Display for AttErrorCode {
    /// "<reason> (ATT 0x<code>)"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code: u8 = (*self).into();
        write!(f, "{} (ATT 0x{})", self.description(), hex::encode([code]))
    }
}

/// Errors raised by the attribute layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttError {
    /// A protocol error that should be reported to the peer
    #[error("{0}")]
    Protocol(AttErrorCode),

    #[error("No free handle range for {0} attributes")]
    OutOfHandles(usize),

    #[error("No grouping starts at handle 0x{0:04X}")]
    GroupingNotFound(Handle),

    #[error("Grouping at handle 0x{0:04X} is already complete")]
    GroupingComplete(Handle),

    #[error("Grouping at handle 0x{0:04X} is not complete")]
    GroupingIncomplete(Handle),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<AttErrorCode> for AttError {
    fn from(code: AttErrorCode) -> Self {
        AttError::Protocol(code)
    }
}

impl AttError {
    /// The code to put in an Error Response for this error
    pub fn to_error_code(&self) -> AttErrorCode {
        match self {
            AttError::Protocol(code) => *code,
            AttError::OutOfHandles(_) => AttErrorCode::InsufficientResources,
            AttError::GroupingNotFound(_) => AttErrorCode::AttributeNotFound,
            AttError::InvalidParameter(_) => AttErrorCode::InvalidAttributeValueLength,
            AttError::GroupingComplete(_) | AttError::GroupingIncomplete(_) => {
                AttErrorCode::UnlikelyError
            }
        }
    }
}

/// Result type of the attribute layer
pub type AttResult<T> = Result<T, AttError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_string_format() {
        assert_eq!(
            AttErrorCode::InsufficientEncryptionKeySize.to_string(),
            "insuff. encryption key size (ATT 0x0c)"
        );
        assert_eq!(
            AttErrorCode::ReadNotPermitted.to_string(),
            "read not permitted (ATT 0x02)"
        );
        assert_eq!(
            AttError::from(AttErrorCode::ApplicationError(0x85)).to_string(),
            "application error (ATT 0x85)"
        );
    }

    #[test]
    fn test_code_ranges() {
        assert_eq!(AttErrorCode::from(0x0A), AttErrorCode::AttributeNotFound);
        assert_eq!(AttErrorCode::from(0x90), AttErrorCode::ApplicationError(0x90));
        assert_eq!(AttErrorCode::from(0xFE), AttErrorCode::CommonProfileError(0xFE));
        assert_eq!(AttErrorCode::from(0x50), AttErrorCode::Reserved(0x50));
        assert_eq!(u8::from(AttErrorCode::ValueNotAllowed), 0x13);
    }
}
