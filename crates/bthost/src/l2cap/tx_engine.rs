//! Outbound SDU processing
//!
//! A transmit engine turns SDUs from the upper layer into PDUs (information payloads
//! without the basic header) and hands them to its [`SendFrameCallback`].
//!
//! The callback may run synchronously inside [`TxEngine::queue_sdu`] or later, from a
//! timer or when credits arrive. Callers must not hold locks the callback needs.

use super::types::ChannelInfo;
use log::{trace, warn};
use std::sync::Arc;

/// Receives every PDU an engine wants sent
pub type SendFrameCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

pub trait TxEngine: Send {
    /// Queue an SDU for eventual transmission. Returns false if the SDU was rejected.
    fn queue_sdu(&mut self, sdu: Vec<u8>) -> bool;

    /// Grant the engine `credits` more PDUs. Returns false if the engine does not use
    /// credits or the total would overflow.
    fn add_credits(&mut self, _credits: u16) -> bool {
        false
    }
}

/// Basic mode: every SDU goes out as a single PDU
pub struct BasicModeTxEngine {
    max_tx_sdu_size: u16,
    send_frame: SendFrameCallback,
}

impl BasicModeTxEngine {
    pub fn new(info: &ChannelInfo, send_frame: SendFrameCallback) -> Self {
        Self {
            max_tx_sdu_size: info.max_tx_sdu_size,
            send_frame,
        }
    }
}

impl TxEngine for BasicModeTxEngine {
    fn queue_sdu(&mut self, sdu: Vec<u8>) -> bool {
        if sdu.len() > self.max_tx_sdu_size as usize {
            warn!(
                "l2cap: SDU size exceeds channel TxMTU (size: {}, max: {})",
                sdu.len(),
                self.max_tx_sdu_size
            );
            return false;
        }
        trace!("l2cap: basic tx {}", hex::encode(&sdu));
        (self.send_frame)(sdu);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_callback() -> (SendFrameCallback, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        (Arc::new(move |pdu| sink.lock().push(pdu)), sent)
    }

    #[test]
    fn test_basic_mode_sends_sdu_unchanged() {
        let (send, sent) = recording_callback();
        let mut engine = BasicModeTxEngine::new(&ChannelInfo::make_basic_mode(672, 4, None), send);

        assert!(engine.queue_sdu(b"ping".to_vec()));
        assert_eq!(*sent.lock(), vec![b"ping".to_vec()]);
    }

    #[test]
    fn test_basic_mode_rejects_oversized_sdu() {
        let (send, sent) = recording_callback();
        let mut engine = BasicModeTxEngine::new(&ChannelInfo::make_basic_mode(672, 4, None), send);

        assert!(!engine.queue_sdu(b"pings".to_vec()));
        assert!(sent.lock().is_empty());
        assert!(!engine.add_credits(1));
    }
}
