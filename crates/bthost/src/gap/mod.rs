//! Generic Access Profile (GAP) connection bookkeeping
//!
//! Peer identity and connection-state tokens, plus the aggregators that fold concurrent
//! connection attempts to one peer into a single link-layer procedure.

pub mod bredr_connection_request;
pub mod constants;
pub mod low_energy_connection_request;
pub mod types;

pub use self::bredr_connection_request::{
    BrEdrConnectionRequest, BrEdrConnectionRequests, OnComplete, RequestDisposition,
};
pub use self::constants::*;
pub use self::low_energy_connection_request::{
    LowEnergyConnectionOptions, LowEnergyConnectionRequest, LowEnergyConnectionRequests,
    LowEnergyOnComplete,
};
pub use self::types::*;
