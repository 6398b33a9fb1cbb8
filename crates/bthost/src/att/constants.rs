//! ATT protocol constants

/// An attribute handle
pub type Handle = u16;

/// Reserved, never assigned to an attribute
pub const INVALID_HANDLE: Handle = 0x0000;
pub const HANDLE_MIN: Handle = 0x0001;
pub const HANDLE_MAX: Handle = 0xFFFF;

/// Longest value an attribute may hold
pub const MAX_ATTRIBUTE_VALUE_LENGTH: usize = 512;

/// Key size assumed when an access requirement does not name one
pub const MAX_ENCRYPTION_KEY_SIZE: u8 = 16;

pub const LE_MIN_MTU: u16 = 23;
pub const BREDR_MIN_MTU: u16 = 48;

// Error codes
pub const ATT_ERROR_INVALID_HANDLE: u8 = 0x01;
pub const ATT_ERROR_READ_NOT_PERMITTED: u8 = 0x02;
pub const ATT_ERROR_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const ATT_ERROR_INVALID_PDU: u8 = 0x04;
pub const ATT_ERROR_INSUFFICIENT_AUTHENTICATION: u8 = 0x05;
pub const ATT_ERROR_REQUEST_NOT_SUPPORTED: u8 = 0x06;
pub const ATT_ERROR_INVALID_OFFSET: u8 = 0x07;
pub const ATT_ERROR_INSUFFICIENT_AUTHORIZATION: u8 = 0x08;
pub const ATT_ERROR_PREPARE_QUEUE_FULL: u8 = 0x09;
pub const ATT_ERROR_ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
pub const ATT_ERROR_ATTRIBUTE_NOT_LONG: u8 = 0x0B;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE: u8 = 0x0C;
pub const ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;
pub const ATT_ERROR_UNLIKELY: u8 = 0x0E;
pub const ATT_ERROR_INSUFFICIENT_ENCRYPTION: u8 = 0x0F;
pub const ATT_ERROR_UNSUPPORTED_GROUP_TYPE: u8 = 0x10;
pub const ATT_ERROR_INSUFFICIENT_RESOURCES: u8 = 0x11;
pub const ATT_ERROR_DATABASE_OUT_OF_SYNC: u8 = 0x12;
pub const ATT_ERROR_VALUE_NOT_ALLOWED: u8 = 0x13;
pub const ATT_ERROR_APPLICATION_ERROR_START: u8 = 0x80;
pub const ATT_ERROR_APPLICATION_ERROR_END: u8 = 0x9F;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_START: u8 = 0xE0;
pub const ATT_ERROR_COMMON_PROFILE_ERROR_END: u8 = 0xFF;

// Grouping declaration types
pub const PRIMARY_SERVICE_GROUP_TYPE: u16 = 0x2800;
pub const SECONDARY_SERVICE_GROUP_TYPE: u16 = 0x2801;
pub const INCLUDE_DECLARATION_TYPE: u16 = 0x2802;
pub const CHARACTERISTIC_DECLARATION_TYPE: u16 = 0x2803;
