use crate::gap::constants::*;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Opaque identifier the host assigns to a remote device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            PUBLIC_IDENTITY_ADDRESS => AddressType::PublicIdentity,
            RANDOM_IDENTITY_ADDRESS => AddressType::RandomIdentity,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
            AddressType::PublicIdentity => PUBLIC_IDENTITY_ADDRESS,
            AddressType::RandomIdentity => RANDOM_IDENTITY_ADDRESS,
        }
    }
}

/// A 48-bit device address plus its type. Bytes are little-endian as on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub address_type: AddressType,
    pub bytes: [u8; 6],
}

impl DeviceAddress {
    pub fn new(address_type: AddressType, bytes: [u8; 6]) -> Self {
        Self {
            address_type,
            bytes,
        }
    }

    pub fn from_slice(address_type: AddressType, slice: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = slice.get(..6)?.try_into().ok()?;
        Some(Self::new(address_type, bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Connection state of a peer on one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Initializing,
    Connected,
}

#[derive(Default)]
struct ConnectionCounts {
    initializing: usize,
    connected: usize,
}

/// Per-peer connection bookkeeping shared by everyone that connects to the peer.
///
/// The state is derived from outstanding tokens: any [`ConnectionToken`] makes the peer
/// connected, otherwise any [`InitializingConnectionToken`] makes it initializing.
#[derive(Clone, Default)]
pub struct PeerConnectionState {
    counts: Arc<Mutex<ConnectionCounts>>,
}

impl PeerConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        let counts = self.counts.lock();
        if counts.connected > 0 {
            ConnectionState::Connected
        } else if counts.initializing > 0 {
            ConnectionState::Initializing
        } else {
            ConnectionState::NotConnected
        }
    }

    /// Mark a connection procedure as in progress until the token is dropped
    pub fn register_initializing_connection(&self) -> InitializingConnectionToken {
        self.counts.lock().initializing += 1;
        InitializingConnectionToken {
            counts: Arc::downgrade(&self.counts),
        }
    }

    /// Mark the peer as connected until the token is dropped
    pub fn register_connection(&self) -> ConnectionToken {
        self.counts.lock().connected += 1;
        ConnectionToken {
            counts: Arc::downgrade(&self.counts),
        }
    }
}

impl fmt::Debug for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerConnectionState").field(&self.state()).finish()
    }
}

/// Keeps a peer in [`ConnectionState::Initializing`] while alive
pub struct InitializingConnectionToken {
    counts: Weak<Mutex<ConnectionCounts>>,
}

impl Drop for InitializingConnectionToken {
    fn drop(&mut self) {
        if let Some(counts) = self.counts.upgrade() {
            let mut counts = counts.lock();
            counts.initializing = counts.initializing.saturating_sub(1);
        }
    }
}

impl fmt::Debug for InitializingConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InitializingConnectionToken")
    }
}

/// Keeps a peer in [`ConnectionState::Connected`] while alive
pub struct ConnectionToken {
    counts: Weak<Mutex<ConnectionCounts>>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if let Some(counts) = self.counts.upgrade() {
            let mut counts = counts.lock();
            counts.connected = counts.connected.saturating_sub(1);
        }
    }
}

impl fmt::Debug for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionToken")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_is_most_significant_byte_first() {
        let addr = DeviceAddress::new(AddressType::Public, [0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(addr.to_string(), "01:02:03:04:05:06");
        assert!(DeviceAddress::from_slice(AddressType::Random, &[1, 2, 3]).is_none());
    }

    #[test]
    fn test_connection_state_follows_tokens() {
        let state = PeerConnectionState::new();
        assert_eq!(state.state(), ConnectionState::NotConnected);

        let init = state.register_initializing_connection();
        assert_eq!(state.state(), ConnectionState::Initializing);

        let conn = state.register_connection();
        assert_eq!(state.state(), ConnectionState::Connected);

        drop(init);
        assert_eq!(state.state(), ConnectionState::Connected);
        drop(conn);
        assert_eq!(state.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn test_token_outliving_state_is_harmless() {
        let state = PeerConnectionState::new();
        let token = state.register_initializing_connection();
        drop(state);
        drop(token);
    }
}
