//! Inbound PDU processing
//!
//! A receive engine takes the information payload of each PDU addressed to its channel
//! and returns an SDU once one is complete.

use log::trace;
use std::sync::Arc;

/// Invoked when an engine detects a framing or protocol error the channel cannot recover
/// from. The owning channel treats this as a link error.
pub type FailureCallback = Arc<dyn Fn() + Send + Sync>;

pub trait RxEngine: Send {
    /// Consume one PDU. Returns the SDU it completed, if any.
    fn process_pdu(&mut self, pdu: &[u8]) -> Option<Vec<u8>>;

    /// Signal that the oldest SDU returned by `process_pdu` has been consumed
    fn acknowledge_read(&mut self) {}
}

/// Basic mode: the PDU payload is the SDU
#[derive(Debug, Default)]
pub struct BasicModeRxEngine;

impl BasicModeRxEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RxEngine for BasicModeRxEngine {
    fn process_pdu(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        trace!("l2cap: basic rx {}", hex::encode(pdu));
        Some(pdu.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_mode_returns_payload() {
        let mut engine = BasicModeRxEngine::new();
        assert_eq!(engine.process_pdu(b"hello"), Some(b"hello".to_vec()));
        assert_eq!(engine.process_pdu(&[]), Some(Vec::new()));
        engine.acknowledge_read();
    }
}
