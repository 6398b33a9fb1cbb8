use std::time::Duration;

// Address types
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;
pub const PUBLIC_IDENTITY_ADDRESS: u8 = 0x02;
pub const RANDOM_IDENTITY_ADDRESS: u8 = 0x03;

/// A page timeout is retried only while the first Create Connection of a request was sent
/// less than this long ago
pub const PAGE_TIMEOUT_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// LE connections that fail to be established (0x3E) are attempted at most this many times
pub const MAX_LE_CONNECTION_ATTEMPTS: u32 = 3;
