//! Type definitions shared by the L2CAP components

use super::constants::*;
use crate::error::HostError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type ChannelId = u16;
pub type ConnectionHandle = u16;
pub type Psm = u16;
pub type CommandCode = u8;
pub type CommandId = u8;

/// Identifies a channel across all links: `(link_handle << 16) | local_id`
pub type UniqueChannelId = u32;

/// Combine a link handle and local channel ID into a [`UniqueChannelId`]
pub fn unique_channel_id(link_handle: ConnectionHandle, local_id: ChannelId) -> UniqueChannelId {
    (link_handle as u32) << 16 | local_id as u32
}

/// Error types specific to L2CAP operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum L2capError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("SDU of {size} bytes exceeds maximum of {max}")]
    SduTooLarge { size: usize, max: u16 },

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel not activated")]
    NotActivated,

    #[error("Operation not supported in {0}")]
    NotSupported(AnyChannelMode),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

pub type L2capResult<T> = std::result::Result<T, L2capError>;

/// Transport of the link a channel runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Acl,
    Le,
}

/// Modes negotiated through the configuration process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetransmissionAndFlowControlMode {
    Basic = 0x00,
    EnhancedRetransmission = 0x03,
}

/// Modes negotiated by a credit-based connection request; the value is the request code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditBasedFlowControlMode {
    LeCreditBasedFlowControl = 0x14,
    EnhancedCreditBasedFlowControl = 0x17,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyChannelMode {
    RetransmissionAndFlowControl(RetransmissionAndFlowControlMode),
    CreditBasedFlowControl(CreditBasedFlowControlMode),
}

impl AnyChannelMode {
    pub fn is_credit_based(&self) -> bool {
        matches!(self, AnyChannelMode::CreditBasedFlowControl(_))
    }
}

impl From<RetransmissionAndFlowControlMode> for AnyChannelMode {
    fn from(mode: RetransmissionAndFlowControlMode) -> Self {
        AnyChannelMode::RetransmissionAndFlowControl(mode)
    }
}

impl From<CreditBasedFlowControlMode> for AnyChannelMode {
    fn from(mode: CreditBasedFlowControlMode) -> Self {
        AnyChannelMode::CreditBasedFlowControl(mode)
    }
}

impl fmt::Display for AnyChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnyChannelMode::RetransmissionAndFlowControl(
                RetransmissionAndFlowControlMode::Basic,
            ) => "basic mode",
            AnyChannelMode::RetransmissionAndFlowControl(
                RetransmissionAndFlowControlMode::EnhancedRetransmission,
            ) => "enhanced retransmission mode",
            AnyChannelMode::CreditBasedFlowControl(
                CreditBasedFlowControlMode::LeCreditBasedFlowControl,
            ) => "LE credit-based flow control mode",
            AnyChannelMode::CreditBasedFlowControl(
                CreditBasedFlowControlMode::EnhancedCreditBasedFlowControl,
            ) => "enhanced credit-based flow control mode",
        };
        f.write_str(name)
    }
}

/// Parameters a channel was opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub mode: AnyChannelMode,
    /// Largest SDU we accept (our MTU)
    pub max_rx_sdu_size: u16,
    /// Largest SDU the peer accepts (its MTU)
    pub max_tx_sdu_size: u16,
    /// ERTM: I-frames we may have unacknowledged
    pub n_frames_in_tx_window: u8,
    /// ERTM: transmissions of one I-frame before the link is given up, 0 for unlimited
    pub max_transmissions: u8,
    /// Peer's MPS
    pub max_tx_pdu_payload_size: u16,
    pub psm: Option<Psm>,
    pub flush_timeout: Option<Duration>,
    /// Credit-based modes: credits the peer granted at connection time
    pub remote_initial_credits: u16,
}

impl Default for ChannelInfo {
    fn default() -> Self {
        Self::make_basic_mode(DEFAULT_MTU, DEFAULT_MTU, None)
    }
}

impl ChannelInfo {
    /// Parameters for a Basic mode channel
    pub fn make_basic_mode(max_rx_sdu_size: u16, max_tx_sdu_size: u16, psm: Option<Psm>) -> Self {
        Self {
            mode: RetransmissionAndFlowControlMode::Basic.into(),
            max_rx_sdu_size,
            max_tx_sdu_size,
            n_frames_in_tx_window: 0,
            max_transmissions: 0,
            max_tx_pdu_payload_size: max_tx_sdu_size,
            psm,
            flush_timeout: None,
            remote_initial_credits: 0,
        }
    }

    pub fn make_enhanced_retransmission_mode(
        max_rx_sdu_size: u16,
        max_tx_sdu_size: u16,
        n_frames_in_tx_window: u8,
        max_transmissions: u8,
        max_tx_pdu_payload_size: u16,
        psm: Option<Psm>,
    ) -> Self {
        Self {
            mode: RetransmissionAndFlowControlMode::EnhancedRetransmission.into(),
            max_rx_sdu_size,
            max_tx_sdu_size,
            n_frames_in_tx_window: n_frames_in_tx_window.min(ERTM_MAX_TX_WINDOW),
            max_transmissions,
            max_tx_pdu_payload_size,
            psm,
            flush_timeout: None,
            remote_initial_credits: 0,
        }
    }

    /// Parameters for a credit-based channel. The peer starts with `remote_initial_credits`.
    pub fn make_credit_based_flow_control_mode(
        mode: CreditBasedFlowControlMode,
        max_rx_sdu_size: u16,
        max_tx_sdu_size: u16,
        max_tx_pdu_payload_size: u16,
        remote_initial_credits: u16,
        psm: Option<Psm>,
    ) -> Self {
        Self {
            mode: mode.into(),
            max_rx_sdu_size,
            max_tx_sdu_size,
            n_frames_in_tx_window: 0,
            max_transmissions: 0,
            max_tx_pdu_payload_size,
            psm,
            flush_timeout: None,
            remote_initial_credits,
        }
    }
}

/// Signaling channel tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingConfig {
    /// Response timeout for the first transmission, doubled on each retransmission
    pub rtx_timeout: Duration,
    /// Extended timeout used once the peer signals that more responses follow
    pub ertx_timeout: Duration,
    /// Transmissions of a request before it times out
    pub max_transmissions: u8,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            rtx_timeout: SIGNALING_RTX_TIMEOUT,
            ertx_timeout: SIGNALING_ERTX_TIMEOUT,
            max_transmissions: SIGNALING_MAX_TRANSMISSIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_distinguishes_handle_and_cid() {
        assert_eq!(unique_channel_id(0x0001, 0x0040), 0x0001_0040);
        assert_ne!(unique_channel_id(0x0001, 0x0040), unique_channel_id(0x0002, 0x0040));
        assert_ne!(unique_channel_id(0x0001, 0x0040), unique_channel_id(0x0001, 0x0041));
    }

    #[test]
    fn test_mode_display_and_values() {
        let mode: AnyChannelMode = CreditBasedFlowControlMode::LeCreditBasedFlowControl.into();
        assert!(mode.is_credit_based());
        assert_eq!(mode.to_string(), "LE credit-based flow control mode");
        assert_eq!(CreditBasedFlowControlMode::EnhancedCreditBasedFlowControl as u8, 0x17);
        assert_eq!(RetransmissionAndFlowControlMode::EnhancedRetransmission as u8, 0x03);
    }

    #[test]
    fn test_ertm_window_is_clamped() {
        let info = ChannelInfo::make_enhanced_retransmission_mode(100, 100, 200, 3, 50, None);
        assert_eq!(info.n_frames_in_tx_window, ERTM_MAX_TX_WINDOW);
    }
}
