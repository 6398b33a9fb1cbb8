//! L2CAP frame and signaling payload codecs
//!
//! Parsing goes through `byteorder` cursors and reports short input as `None`;
//! serialization writes into fixed-size buffers.

use super::constants::*;
use super::types::*;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Basic L2CAP header preceding every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicHeader {
    /// Length of the information payload
    pub length: u16,
    pub channel_id: ChannelId,
}

impl BasicHeader {
    /// Create a new L2CAP basic header
    pub fn new(length: u16, channel_id: ChannelId) -> Self {
        Self { length, channel_id }
    }

    /// Parse a header from the start of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let length = cursor.read_u16::<LittleEndian>().ok()?;
        let channel_id = cursor.read_u16::<LittleEndian>().ok()?;
        Some(Self { length, channel_id })
    }

    pub fn to_bytes(&self) -> [u8; BASIC_HEADER_SIZE] {
        let mut bytes = [0u8; BASIC_HEADER_SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.length);
        LittleEndian::write_u16(&mut bytes[2..4], self.channel_id);
        bytes
    }
}

/// Prefix `payload` with a basic header addressed to `channel_id`
pub fn build_basic_frame(channel_id: ChannelId, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(BASIC_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&BasicHeader::new(payload.len() as u16, channel_id).to_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a complete frame into its header and information payload. Returns None if the
/// frame is shorter than its header claims.
pub fn parse_basic_frame(frame: &[u8]) -> Option<(BasicHeader, &[u8])> {
    let header = BasicHeader::parse(frame)?;
    let end = BASIC_HEADER_SIZE + header.length as usize;
    let payload = frame.get(BASIC_HEADER_SIZE..end)?;
    Some((header, payload))
}

/// Header of one command inside a C-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub code: CommandCode,
    pub id: CommandId,
    pub length: u16,
}

impl CommandHeader {
    /// Create a new signaling command header
    pub fn new(code: CommandCode, id: CommandId, length: u16) -> Self {
        Self { code, id, length }
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let code = cursor.read_u8().ok()?;
        let id = cursor.read_u8().ok()?;
        let length = cursor.read_u16::<LittleEndian>().ok()?;
        Some(Self { code, id, length })
    }

    pub fn to_bytes(&self) -> [u8; COMMAND_HEADER_SIZE] {
        let mut bytes = [0u8; COMMAND_HEADER_SIZE];
        bytes[0] = self.code;
        bytes[1] = self.id;
        LittleEndian::write_u16(&mut bytes[2..4], self.length);
        bytes
    }
}

/// Encode one signaling command: header followed by `payload`
pub fn build_command(code: CommandCode, id: CommandId, payload: &[u8]) -> Vec<u8> {
    let mut command = Vec::with_capacity(COMMAND_HEADER_SIZE + payload.len());
    command.extend_from_slice(&CommandHeader::new(code, id, payload.len() as u16).to_bytes());
    command.extend_from_slice(payload);
    command
}

/// SAR field of an I-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationStatus {
    Unsegmented = 0,
    FirstSegment = 1,
    LastSegment = 2,
    ContinuingSegment = 3,
}

impl From<u16> for SegmentationStatus {
    fn from(bits: u16) -> Self {
        match bits & 0b11 {
            0 => SegmentationStatus::Unsegmented,
            1 => SegmentationStatus::FirstSegment,
            2 => SegmentationStatus::LastSegment,
            _ => SegmentationStatus::ContinuingSegment,
        }
    }
}

/// S field of an S-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisoryFunction {
    ReceiverReady = 0,
    Reject = 1,
    ReceiverNotReady = 2,
    SelectiveReject = 3,
}

impl From<u16> for SupervisoryFunction {
    fn from(bits: u16) -> Self {
        match bits & 0b11 {
            0 => SupervisoryFunction::ReceiverReady,
            1 => SupervisoryFunction::Reject,
            2 => SupervisoryFunction::ReceiverNotReady,
            _ => SupervisoryFunction::SelectiveReject,
        }
    }
}

const CTRL_S_FRAME_BIT: u16 = 1 << 0;
const CTRL_TX_SEQ_SHIFT: u16 = 1;
const CTRL_SUPERVISORY_SHIFT: u16 = 2;
const CTRL_POLL_BIT: u16 = 1 << 4;
const CTRL_FINAL_BIT: u16 = 1 << 7;
const CTRL_REQ_SEQ_SHIFT: u16 = 8;
const CTRL_SAR_SHIFT: u16 = 14;
const CTRL_SEQ_MASK: u16 = 0x3F;

/// 16-bit enhanced control field of an ERTM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancedControlField {
    Information {
        tx_seq: u8,
        req_seq: u8,
        final_bit: bool,
        sar: SegmentationStatus,
    },
    Supervisory {
        function: SupervisoryFunction,
        req_seq: u8,
        poll: bool,
        final_bit: bool,
    },
}

impl EnhancedControlField {
    /// I-frame control field
    pub fn information(tx_seq: u8, req_seq: u8, sar: SegmentationStatus) -> Self {
        EnhancedControlField::Information {
            tx_seq: tx_seq & CTRL_SEQ_MASK as u8,
            req_seq: req_seq & CTRL_SEQ_MASK as u8,
            final_bit: false,
            sar,
        }
    }

    /// S-frame control field
    pub fn supervisory(function: SupervisoryFunction, req_seq: u8, poll: bool, final_bit: bool) -> Self {
        EnhancedControlField::Supervisory {
            function,
            req_seq: req_seq & CTRL_SEQ_MASK as u8,
            poll,
            final_bit,
        }
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        let control = Cursor::new(data).read_u16::<LittleEndian>().ok()?;
        Some(Self::from_u16(control))
    }

    pub fn from_u16(control: u16) -> Self {
        let req_seq = ((control >> CTRL_REQ_SEQ_SHIFT) & CTRL_SEQ_MASK) as u8;
        let final_bit = control & CTRL_FINAL_BIT != 0;
        if control & CTRL_S_FRAME_BIT == 0 {
            EnhancedControlField::Information {
                tx_seq: ((control >> CTRL_TX_SEQ_SHIFT) & CTRL_SEQ_MASK) as u8,
                req_seq,
                final_bit,
                sar: SegmentationStatus::from(control >> CTRL_SAR_SHIFT),
            }
        } else {
            EnhancedControlField::Supervisory {
                function: SupervisoryFunction::from(control >> CTRL_SUPERVISORY_SHIFT),
                req_seq,
                poll: control & CTRL_POLL_BIT != 0,
                final_bit,
            }
        }
    }

    pub fn to_u16(&self) -> u16 {
        match *self {
            EnhancedControlField::Information {
                tx_seq,
                req_seq,
                final_bit,
                sar,
            } => {
                let mut control = (tx_seq as u16 & CTRL_SEQ_MASK) << CTRL_TX_SEQ_SHIFT;
                control |= (req_seq as u16 & CTRL_SEQ_MASK) << CTRL_REQ_SEQ_SHIFT;
                control |= (sar as u16) << CTRL_SAR_SHIFT;
                if final_bit {
                    control |= CTRL_FINAL_BIT;
                }
                control
            }
            EnhancedControlField::Supervisory {
                function,
                req_seq,
                poll,
                final_bit,
            } => {
                let mut control = CTRL_S_FRAME_BIT;
                control |= (function as u16) << CTRL_SUPERVISORY_SHIFT;
                control |= (req_seq as u16 & CTRL_SEQ_MASK) << CTRL_REQ_SEQ_SHIFT;
                if poll {
                    control |= CTRL_POLL_BIT;
                }
                if final_bit {
                    control |= CTRL_FINAL_BIT;
                }
                control
            }
        }
    }

    pub fn to_bytes(&self) -> [u8; ENHANCED_CONTROL_FIELD_SIZE] {
        let mut bytes = [0u8; ENHANCED_CONTROL_FIELD_SIZE];
        LittleEndian::write_u16(&mut bytes, self.to_u16());
        bytes
    }

    pub fn req_seq(&self) -> u8 {
        match *self {
            EnhancedControlField::Information { req_seq, .. }
            | EnhancedControlField::Supervisory { req_seq, .. } => req_seq,
        }
    }

    pub fn final_bit(&self) -> bool {
        match *self {
            EnhancedControlField::Information { final_bit, .. }
            | EnhancedControlField::Supervisory { final_bit, .. } => final_bit,
        }
    }
}

/// Read the 2-byte SDU length that starts a segmented SDU
pub fn read_sdu_header(data: &[u8]) -> Option<u16> {
    Cursor::new(data).read_u16::<LittleEndian>().ok()
}

/// Encode the SDU length that starts a segmented SDU
pub fn sdu_header_bytes(sdu_len: u16) -> [u8; SDU_HEADER_SIZE] {
    let mut bytes = [0u8; SDU_HEADER_SIZE];
    LittleEndian::write_u16(&mut bytes, sdu_len);
    bytes
}

/// Reasons carried in a Command Reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    NotUnderstood,
    SignalingMtuExceeded,
    InvalidChannelId,
    Other(u16),
}

impl From<u16> for RejectReason {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => RejectReason::NotUnderstood,
            0x0001 => RejectReason::SignalingMtuExceeded,
            0x0002 => RejectReason::InvalidChannelId,
            other => RejectReason::Other(other),
        }
    }
}

impl From<RejectReason> for u16 {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::NotUnderstood => 0x0000,
            RejectReason::SignalingMtuExceeded => 0x0001,
            RejectReason::InvalidChannelId => 0x0002,
            RejectReason::Other(value) => value,
        }
    }
}

/// Command Reject payload: reason, then reason-specific data
pub fn command_reject_payload(reason: RejectReason, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 2];
    LittleEndian::write_u16(&mut payload, reason.into());
    payload.extend_from_slice(data);
    payload
}

/// Payload shared by Disconnection Request and Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionPayload {
    pub dst_cid: ChannelId,
    pub src_cid: ChannelId,
}

impl DisconnectionPayload {
    pub const SIZE: usize = 4;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let dst_cid = cursor.read_u16::<LittleEndian>().ok()?;
        let src_cid = cursor.read_u16::<LittleEndian>().ok()?;
        Some(Self { dst_cid, src_cid })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.dst_cid);
        LittleEndian::write_u16(&mut bytes[2..4], self.src_cid);
        bytes
    }
}

/// LE Flow Control Credit Indication payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlCreditPayload {
    pub channel_id: ChannelId,
    pub credits: u16,
}

impl FlowControlCreditPayload {
    pub const SIZE: usize = 4;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let channel_id = cursor.read_u16::<LittleEndian>().ok()?;
        let credits = cursor.read_u16::<LittleEndian>().ok()?;
        Some(Self {
            channel_id,
            credits,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.channel_id);
        LittleEndian::write_u16(&mut bytes[2..4], self.credits);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_frame() {
        let frame = build_basic_frame(0x0040, b"hi");
        assert_eq!(frame, vec![0x02, 0x00, 0x40, 0x00, b'h', b'i']);
        let (header, payload) = parse_basic_frame(&frame).unwrap();
        assert_eq!(header, BasicHeader::new(2, 0x0040));
        assert_eq!(payload, b"hi");

        // Header claims more than is present
        assert!(parse_basic_frame(&[0x05, 0x00, 0x40, 0x00, 0x01]).is_none());
        assert!(BasicHeader::parse(&[0x05, 0x00, 0x40]).is_none());
    }

    #[test]
    fn test_command_encoding() {
        let command = build_command(DISCONNECTION_REQUEST, 7, &[0x40, 0x00, 0x41, 0x00]);
        assert_eq!(command, vec![0x06, 0x07, 0x04, 0x00, 0x40, 0x00, 0x41, 0x00]);
        assert_eq!(
            CommandHeader::parse(&command),
            Some(CommandHeader::new(DISCONNECTION_REQUEST, 7, 4))
        );
    }

    #[test]
    fn test_information_control_field_layout() {
        let control = EnhancedControlField::Information {
            tx_seq: 5,
            req_seq: 9,
            final_bit: true,
            sar: SegmentationStatus::FirstSegment,
        };
        // TxSeq bits 1-6, F bit 7, ReqSeq bits 8-13, SAR bits 14-15
        assert_eq!(control.to_u16(), (5 << 1) | (1 << 7) | (9 << 8) | (1 << 14));
        assert_eq!(EnhancedControlField::parse(&control.to_bytes()), Some(control));
        assert_eq!(control.req_seq(), 9);
        assert!(control.final_bit());
    }

    #[test]
    fn test_supervisory_control_field_layout() {
        let control = EnhancedControlField::supervisory(
            SupervisoryFunction::ReceiverNotReady,
            63,
            true,
            false,
        );
        assert_eq!(control.to_u16(), 0x01 | (2 << 2) | (1 << 4) | (63 << 8));
        assert_eq!(EnhancedControlField::from_u16(control.to_u16()), control);

        let srej = EnhancedControlField::from_u16(0x0001 | (3 << 2) | (1 << 7) | (4 << 8));
        assert_eq!(
            srej,
            EnhancedControlField::Supervisory {
                function: SupervisoryFunction::SelectiveReject,
                req_seq: 4,
                poll: false,
                final_bit: true,
            }
        );
    }

    #[test]
    fn test_sequence_numbers_are_six_bits() {
        let control = EnhancedControlField::information(64 + 3, 64 + 1, SegmentationStatus::Unsegmented);
        assert_eq!(control, EnhancedControlField::information(3, 1, SegmentationStatus::Unsegmented));
    }

    #[test]
    fn test_reject_payload() {
        assert_eq!(command_reject_payload(RejectReason::NotUnderstood, &[]), vec![0x00, 0x00]);
        assert_eq!(
            command_reject_payload(RejectReason::InvalidChannelId, &[0x40, 0x00, 0x41, 0x00]),
            vec![0x02, 0x00, 0x40, 0x00, 0x41, 0x00]
        );
        assert_eq!(RejectReason::from(0x0001), RejectReason::SignalingMtuExceeded);
        assert_eq!(u16::from(RejectReason::Other(9)), 9);
    }

    #[test]
    fn test_sdu_header() {
        assert_eq!(sdu_header_bytes(16), [16, 0]);
        assert_eq!(read_sdu_header(&[0x10, 0x01, 0xFF]), Some(0x0110));
        assert_eq!(read_sdu_header(&[0x10]), None);
    }
}
