//! L2CAP protocol constants

use super::types::ChannelId;
use std::time::Duration;

// Channel identifiers
pub const INVALID_CHANNEL_ID: ChannelId = 0x0000;
pub const SIGNALING_CHANNEL_ID: ChannelId = 0x0001;
pub const CONNECTIONLESS_CHANNEL_ID: ChannelId = 0x0002;
pub const ATT_CHANNEL_ID: ChannelId = 0x0004;
pub const LE_SIGNALING_CHANNEL_ID: ChannelId = 0x0005;
pub const LE_SMP_CHANNEL_ID: ChannelId = 0x0006;
pub const SMP_CHANNEL_ID: ChannelId = 0x0007;
pub const FIRST_DYNAMIC_CHANNEL_ID: ChannelId = 0x0040;
pub const LAST_ACL_DYNAMIC_CHANNEL_ID: ChannelId = 0xFFFF;
pub const LAST_LE_DYNAMIC_CHANNEL_ID: ChannelId = 0x007F;

// Frame layout
pub const BASIC_HEADER_SIZE: usize = 4;
pub const COMMAND_HEADER_SIZE: usize = 4;
pub const ENHANCED_CONTROL_FIELD_SIZE: usize = 2;
pub const SDU_HEADER_SIZE: usize = 2;

// MTUs
pub const DEFAULT_MTU: u16 = 672;
pub const MIN_ACL_MTU: u16 = 48;
pub const MIN_LE_MTU: u16 = 23;
pub const MAX_MTU: u16 = 0xFFFF;

/// Highest credit count a credit-based channel may hold
pub const MAX_CREDIT_COUNT: u16 = 0xFFFF;

// Signaling command codes
pub const COMMAND_REJECT: u8 = 0x01;
pub const CONNECTION_REQUEST: u8 = 0x02;
pub const CONNECTION_RESPONSE: u8 = 0x03;
pub const CONFIGURATION_REQUEST: u8 = 0x04;
pub const CONFIGURATION_RESPONSE: u8 = 0x05;
pub const DISCONNECTION_REQUEST: u8 = 0x06;
pub const DISCONNECTION_RESPONSE: u8 = 0x07;
pub const ECHO_REQUEST: u8 = 0x08;
pub const ECHO_RESPONSE: u8 = 0x09;
pub const INFORMATION_REQUEST: u8 = 0x0A;
pub const INFORMATION_RESPONSE: u8 = 0x0B;
pub const CONNECTION_PARAMETER_UPDATE_REQUEST: u8 = 0x12;
pub const CONNECTION_PARAMETER_UPDATE_RESPONSE: u8 = 0x13;
pub const LE_CREDIT_BASED_CONNECTION_REQUEST: u8 = 0x14;
pub const LE_CREDIT_BASED_CONNECTION_RESPONSE: u8 = 0x15;
pub const LE_FLOW_CONTROL_CREDIT: u8 = 0x16;
pub const CREDIT_BASED_CONNECTION_REQUEST: u8 = 0x17;
pub const CREDIT_BASED_CONNECTION_RESPONSE: u8 = 0x18;

// Signaling timers
pub const SIGNALING_RTX_TIMEOUT: Duration = Duration::from_secs(1);
pub const SIGNALING_ERTX_TIMEOUT: Duration = Duration::from_secs(60);
pub const SIGNALING_MAX_TRANSMISSIONS: u8 = 3;

// Enhanced retransmission mode
pub const ERTM_RETRANSMISSION_TIMEOUT: Duration = Duration::from_secs(2);
pub const ERTM_MONITOR_TIMEOUT: Duration = Duration::from_secs(12);
pub const ERTM_SEQ_MODULUS: u8 = 64;
pub const ERTM_MAX_TX_WINDOW: u8 = 63;
pub const ERTM_DEFAULT_TX_WINDOW: u8 = 63;
pub const ERTM_DEFAULT_MAX_TRANSMISSIONS: u8 = 3;
