//! bthost - Bluetooth host building blocks
//!
//! This library provides the per-connection pieces of a Bluetooth host stack: L2CAP
//! channels with their Basic, Enhanced Retransmission and credit-based engines, the
//! signaling channel and its command handler, A2DP offload bookkeeping, the ATT
//! attribute model with its permission checks, and GAP connection-request aggregation.
//!
//! Nothing here talks to a controller directly. Outbound frames, link errors and
//! vendor commands go through small traits ([`l2cap::ChannelLink`],
//! [`l2cap::OffloadCommandSink`]) and all timers are posted to a [`Dispatcher`].

pub mod att;
pub mod dispatcher;
pub mod error;
pub mod gap;
pub mod l2cap;
pub mod smp;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttError, AttErrorCode, Attribute, AttributeGrouping, Database};
pub use dispatcher::{Dispatcher, ManualDispatcher};
pub use error::{HciError, HciResult, HostError, StatusCode};
pub use gap::{DeviceAddress, PeerConnectionState, PeerId};
pub use l2cap::{Channel, ChannelInfo, ChannelLink, CommandHandler, L2capError, SignalingChannel};
pub use smp::{SecurityLevel, SecurityProperties};
pub use uuid::Uuid;
