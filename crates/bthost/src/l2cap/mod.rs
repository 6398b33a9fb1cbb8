//! L2CAP (Logical Link Control and Adaptation Protocol) implementation
//!
//! This module provides the per-channel part of L2CAP:
//! - Channel modes: Basic, Enhanced Retransmission and the credit-based modes
//! - Segmentation and reassembly of SDUs for each mode
//! - The signaling channel with request/response matching and RTX/ERTX timers
//! - Disconnection and flow control credit commands
//! - A2DP hardware offload bookkeeping

pub mod a2dp_offload;
pub mod channel;
pub mod command_handler;
pub mod constants;
pub mod credit_based;
pub mod ertm;
pub mod packet;
pub mod rx_engine;
pub mod signaling;
pub mod tx_engine;
pub mod types;

// Re-export the public API
pub use self::a2dp_offload::{
    A2dpOffloadConfiguration, A2dpOffloadManager, A2dpOffloadStatus, OffloadCommandSink,
};
pub use self::channel::{Channel, ChannelLink};
pub use self::command_handler::{CommandHandler, DisconnectionResponse};
pub use self::rx_engine::RxEngine;
pub use self::signaling::{SignalingChannel, SignalingChannelInterface};
pub use self::tx_engine::TxEngine;
pub use self::types::*;
