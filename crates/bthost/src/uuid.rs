//! Bluetooth UUIDs used as attribute types
//!
//! A UUID is always stored as 128 bits in little-endian order. SIG-assigned 16-bit and
//! 32-bit values are expanded with the Bluetooth base UUID, so two UUIDs compare equal
//! no matter which width they were created from.

use rand::RngCore;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// "00000000-0000-1000-8000-00805F9B34FB", little-endian
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Where a 16/32-bit alias lives inside the 128-bit value
const ALIAS_OFFSET: usize = 12;

/// A 128-bit Bluetooth UUID
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

impl Uuid {
    /// From 16 little-endian bytes
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// From a SIG-assigned 16-bit alias
    pub const fn from_u16(alias: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[ALIAS_OFFSET] = alias as u8;
        bytes[ALIAS_OFFSET + 1] = (alias >> 8) as u8;
        Uuid { bytes }
    }

    /// From a SIG-assigned 32-bit alias
    pub const fn from_u32(alias: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[ALIAS_OFFSET] = alias as u8;
        bytes[ALIAS_OFFSET + 1] = (alias >> 8) as u8;
        bytes[ALIAS_OFFSET + 2] = (alias >> 16) as u8;
        bytes[ALIAS_OFFSET + 3] = (alias >> 24) as u8;
        Uuid { bytes }
    }

    /// Decode a 2, 4 or 16 byte little-endian UUID as found in ATT PDUs
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => slice.try_into().ok().map(|b| Uuid::from_u16(u16::from_le_bytes(b))),
            4 => slice.try_into().ok().map(|b| Uuid::from_u32(u32::from_le_bytes(b))),
            16 => slice.try_into().ok().map(Uuid::from_bytes_le),
            _ => None,
        }
    }

    /// A random version 4 UUID, for vendor-specific attribute types
    pub fn random() -> Self {
        let mut be = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut be);
        be[6] = (be[6] & 0x0F) | 0x40;
        be[8] = (be[8] & 0x3F) | 0x80;
        be.reverse();
        Uuid { bytes: be }
    }

    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    fn has_base(&self) -> bool {
        self.bytes[..ALIAS_OFFSET] == BASE_UUID_BYTES[..ALIAS_OFFSET]
    }

    /// The 16-bit alias, if this UUID has one
    pub fn as_u16(&self) -> Option<u16> {
        if self.has_base() && self.bytes[ALIAS_OFFSET + 2] == 0 && self.bytes[ALIAS_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[ALIAS_OFFSET],
                self.bytes[ALIAS_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// The 32-bit alias, if this UUID has one
    pub fn as_u32(&self) -> Option<u32> {
        if self.has_base() {
            let mut alias = [0u8; 4];
            alias.copy_from_slice(&self.bytes[ALIAS_OFFSET..]);
            Some(u32::from_le_bytes(alias))
        } else {
            None
        }
    }

    /// Number of bytes used when this UUID is written into an ATT PDU (2 or 16)
    pub fn compact_size(&self) -> usize {
        if self.as_u16().is_some() {
            2
        } else {
            16
        }
    }

    /// ATT encoding: the 16-bit alias when there is one, otherwise all 128 bits
    pub fn to_compact_bytes(&self) -> Vec<u8> {
        match self.as_u16() {
            Some(alias) => alias.to_le_bytes().to_vec(),
            None => self.bytes.to_vec(),
        }
    }
}

impl From<u16> for Uuid {
    fn from(alias: u16) -> Self {
        Uuid::from_u16(alias)
    }
}

impl From<u32> for Uuid {
    fn from(alias: u32) -> Self {
        Uuid::from_u32(alias)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut be = self.bytes;
        be.reverse();
        let text = hex::encode(be);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &text[0..8],
            &text[8..12],
            &text[12..16],
            &text[16..20],
            &text[20..32]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(alias) => write!(f, "Uuid(0x{:04X})", alias),
            None => write!(f, "Uuid({})", self),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4, 8 or 32 hex digits")]
    WrongDigitCount,
    #[error("UUID contains a non-hex character")]
    NotHex,
    #[error("bad 128-bit UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl From<ParseIntError> for UuidParseError {
    fn from(_: ParseIntError) -> Self {
        UuidParseError::NotHex
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts "180A", "0000180A" or the full hyphenated / unhyphenated 128-bit form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UuidParseError::NotHex);
        }
        match digits.len() {
            4 => Ok(Uuid::from_u16(u16::from_str_radix(&digits, 16)?)),
            8 => Ok(Uuid::from_u32(u32::from_str_radix(&digits, 16)?)),
            32 => {
                let mut bytes = [0u8; 16];
                hex::decode_to_slice(&digits, &mut bytes)?;
                bytes.reverse();
                Ok(Uuid::from_bytes_le(bytes))
            }
            _ => Err(UuidParseError::WrongDigitCount),
        }
    }
}
