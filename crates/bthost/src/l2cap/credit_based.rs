//! Credit-based flow control engines (LE credit-based and enhanced credit-based modes)
//!
//! Every K-frame costs the sender one credit. The first K-frame of an SDU starts with a
//! 2-byte little-endian SDU length; the remaining K-frames carry payload only.

use super::constants::{MAX_CREDIT_COUNT, SDU_HEADER_SIZE};
use super::packet::{read_sdu_header, sdu_header_bytes};
use super::rx_engine::{FailureCallback, RxEngine};
use super::tx_engine::{SendFrameCallback, TxEngine};
use super::types::ChannelInfo;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// Hands credits back to the peer once an SDU has been consumed
pub type ReturnCreditsCallback = Arc<dyn Fn(u16) + Send + Sync>;

/// Reassembles K-frames into SDUs and tracks the credits each SDU consumed
pub struct CreditBasedFlowControlRxEngine {
    max_rx_sdu_size: u16,
    next_sdu: Option<Vec<u8>>,
    valid_bytes: usize,
    current_sdu_credits: u16,
    unacked_read_credits: VecDeque<u16>,
    failure_callback: FailureCallback,
    return_credits_callback: ReturnCreditsCallback,
}

impl CreditBasedFlowControlRxEngine {
    pub fn new(
        max_rx_sdu_size: u16,
        failure_callback: FailureCallback,
        return_credits_callback: ReturnCreditsCallback,
    ) -> Self {
        Self {
            max_rx_sdu_size,
            next_sdu: None,
            valid_bytes: 0,
            current_sdu_credits: 0,
            unacked_read_credits: VecDeque::new(),
            failure_callback,
            return_credits_callback,
        }
    }

    /// Credits held by SDUs that were returned but not yet acknowledged
    pub fn pending_read_credits(&self) -> usize {
        self.unacked_read_credits.len()
    }

    fn on_failure(&mut self) {
        self.next_sdu = None;
        self.valid_bytes = 0;
        self.current_sdu_credits = 0;
        (self.failure_callback)();
    }
}

impl RxEngine for CreditBasedFlowControlRxEngine {
    fn process_pdu(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        self.current_sdu_credits = self.current_sdu_credits.saturating_add(1);

        let mut payload = pdu;
        if self.next_sdu.is_none() {
            let sdu_size = match read_sdu_header(pdu) {
                Some(size) => size,
                None => {
                    warn!("l2cap: K-frame too short for SDU header ({} bytes)", pdu.len());
                    self.on_failure();
                    return None;
                }
            };
            if sdu_size > self.max_rx_sdu_size {
                warn!(
                    "l2cap: SDU length {} exceeds channel MTU {}",
                    sdu_size, self.max_rx_sdu_size
                );
                self.on_failure();
                return None;
            }
            self.next_sdu = Some(vec![0u8; sdu_size as usize]);
            self.valid_bytes = 0;
            payload = &pdu[SDU_HEADER_SIZE..];
        }

        let sdu_len = self.next_sdu.as_ref().map_or(0, |sdu| sdu.len());
        if self.valid_bytes + payload.len() > sdu_len {
            warn!(
                "l2cap: K-frame overflows SDU (have {}, got {}, declared {})",
                self.valid_bytes,
                payload.len(),
                sdu_len
            );
            self.on_failure();
            return None;
        }

        if let Some(sdu) = self.next_sdu.as_mut() {
            sdu[self.valid_bytes..self.valid_bytes + payload.len()].copy_from_slice(payload);
        }
        self.valid_bytes += payload.len();

        if self.valid_bytes < sdu_len {
            trace!("l2cap: K-frame buffered ({}/{} bytes)", self.valid_bytes, sdu_len);
            return None;
        }

        self.unacked_read_credits.push_back(self.current_sdu_credits);
        self.current_sdu_credits = 0;
        self.valid_bytes = 0;
        self.next_sdu.take()
    }

    fn acknowledge_read(&mut self) {
        let credits = match self.unacked_read_credits.pop_front() {
            Some(credits) => credits,
            None => panic!("acknowledge_read called with no SDU pending acknowledgment"),
        };
        debug!("l2cap: returning {} credits", credits);
        (self.return_credits_callback)(credits);
    }
}

/// Segments SDUs into K-frames and sends them as credits allow
pub struct CreditBasedFlowControlTxEngine {
    max_tx_sdu_size: u16,
    max_tx_pdu_payload_size: u16,
    credits: u16,
    pending_pdus: VecDeque<Vec<u8>>,
    send_frame: SendFrameCallback,
}

impl CreditBasedFlowControlTxEngine {
    pub fn new(info: &ChannelInfo, send_frame: SendFrameCallback) -> Self {
        Self {
            max_tx_sdu_size: info.max_tx_sdu_size,
            max_tx_pdu_payload_size: info.max_tx_pdu_payload_size,
            credits: info.remote_initial_credits,
            pending_pdus: VecDeque::new(),
            send_frame,
        }
    }

    pub fn credits(&self) -> u16 {
        self.credits
    }

    /// K-frames waiting for credits
    pub fn queued_pdus(&self) -> usize {
        self.pending_pdus.len()
    }

    fn segment(&mut self, sdu: &[u8]) {
        let mps = self.max_tx_pdu_payload_size as usize;
        let first_len = sdu.len().min(mps - SDU_HEADER_SIZE);

        let mut first = Vec::with_capacity(SDU_HEADER_SIZE + first_len);
        first.extend_from_slice(&sdu_header_bytes(sdu.len() as u16));
        first.extend_from_slice(&sdu[..first_len]);
        self.pending_pdus.push_back(first);

        for chunk in sdu[first_len..].chunks(mps) {
            self.pending_pdus.push_back(chunk.to_vec());
        }
    }

    fn send_pending(&mut self) {
        while self.credits > 0 {
            let pdu = match self.pending_pdus.pop_front() {
                Some(pdu) => pdu,
                None => break,
            };
            self.credits -= 1;
            trace!("l2cap: K-frame tx {}", hex::encode(&pdu));
            (self.send_frame)(pdu);
        }
        if !self.pending_pdus.is_empty() {
            debug!(
                "l2cap: out of credits with {} K-frames queued",
                self.pending_pdus.len()
            );
        }
    }
}

impl TxEngine for CreditBasedFlowControlTxEngine {
    fn queue_sdu(&mut self, sdu: Vec<u8>) -> bool {
        if sdu.len() > self.max_tx_sdu_size as usize {
            warn!(
                "l2cap: SDU size exceeds channel TxMTU (size: {}, max: {})",
                sdu.len(),
                self.max_tx_sdu_size
            );
            return false;
        }
        if (self.max_tx_pdu_payload_size as usize) <= SDU_HEADER_SIZE {
            warn!(
                "l2cap: MPS {} too small for K-frames",
                self.max_tx_pdu_payload_size
            );
            return false;
        }
        self.segment(&sdu);
        self.send_pending();
        true
    }

    fn add_credits(&mut self, credits: u16) -> bool {
        let total = self.credits as u32 + credits as u32;
        if total > MAX_CREDIT_COUNT as u32 {
            warn!(
                "l2cap: credit overflow ({} + {} > {})",
                self.credits, credits, MAX_CREDIT_COUNT
            );
            return false;
        }
        self.credits = total as u16;
        self.send_pending();
        true
    }
}
