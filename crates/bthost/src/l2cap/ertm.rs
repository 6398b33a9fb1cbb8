//! Enhanced retransmission mode engines
//!
//! The two engines of an ERTM channel are linked: the receive engine feeds the
//! acknowledgments and supervisory requests it sees into the transmit engine, and the
//! transmit engine piggy-backs the receive engine's ReqSeq on outbound I-frames.
//!
//! The transmit engine keeps a window of unacknowledged I-frames. When nothing is acked
//! for the retransmission timeout it polls the peer with an RR(P=1) and starts the monitor
//! timer; each monitor expiry re-polls until `max_transmissions` polls have gone
//! unanswered, at which point the connection is declared failed.
//!
//! No FCS option is negotiated, so frames carry neither FCS nor extended control fields.

use super::constants::*;
use super::packet::{
    read_sdu_header, sdu_header_bytes, EnhancedControlField, SegmentationStatus,
    SupervisoryFunction,
};
use super::rx_engine::{FailureCallback, RxEngine};
use super::tx_engine::{SendFrameCallback, TxEngine};
use super::types::ChannelInfo;
use crate::dispatcher::{Dispatcher, TaskId};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

fn seq_add(seq: u8, n: u8) -> u8 {
    ((seq as u16 + n as u16) % ERTM_SEQ_MODULUS as u16) as u8
}

/// Distance from `from` forward to `to`, modulo the sequence space
fn seq_distance(from: u8, to: u8) -> u8 {
    ((to as u16 + ERTM_SEQ_MODULUS as u16 - from as u16) % ERTM_SEQ_MODULUS as u16) as u8
}

fn build_i_frame(tx_seq: u8, req_seq: u8, sar: SegmentationStatus, payload: &[u8]) -> Vec<u8> {
    let mut frame = EnhancedControlField::information(tx_seq, req_seq, sar)
        .to_bytes()
        .to_vec();
    frame.extend_from_slice(payload);
    frame
}

fn build_s_frame(function: SupervisoryFunction, req_seq: u8, poll: bool, final_bit: bool) -> Vec<u8> {
    EnhancedControlField::supervisory(function, req_seq, poll, final_bit)
        .to_bytes()
        .to_vec()
}

/// Split an SDU into I-frame payloads of at most `mps` bytes. Returns None if the SDU
/// needs segmenting and `mps` cannot hold the SDU length field plus data.
fn segment_sdu(sdu: &[u8], mps: usize) -> Option<Vec<(SegmentationStatus, Vec<u8>)>> {
    if sdu.len() <= mps {
        return Some(vec![(SegmentationStatus::Unsegmented, sdu.to_vec())]);
    }
    if mps <= SDU_HEADER_SIZE {
        return None;
    }

    let first_len = mps - SDU_HEADER_SIZE;
    let mut first = sdu_header_bytes(sdu.len() as u16).to_vec();
    first.extend_from_slice(&sdu[..first_len]);
    let mut segments = vec![(SegmentationStatus::FirstSegment, first)];

    let rest: Vec<&[u8]> = sdu[first_len..].chunks(mps).collect();
    let last = rest.len() - 1;
    for (i, chunk) in rest.into_iter().enumerate() {
        let sar = if i == last {
            SegmentationStatus::LastSegment
        } else {
            SegmentationStatus::ContinuingSegment
        };
        segments.push((sar, chunk.to_vec()));
    }
    Some(segments)
}

struct PendingPdu {
    tx_seq: u8,
    sar: SegmentationStatus,
    payload: Vec<u8>,
    tx_count: u8,
}

struct TxState {
    /// TxSeq of the oldest unacknowledged I-frame
    expected_ack_seq: u8,
    next_tx_seq: u8,
    /// ReqSeq to piggy-back, owned by the receive engine
    req_seqnum: u8,
    remote_busy: bool,
    n_receiver_ready_polls_sent: u8,
    unacked: VecDeque<PendingPdu>,
    queued: VecDeque<(SegmentationStatus, Vec<u8>)>,
    retransmission_timer: Option<TaskId>,
    monitor_timer: Option<TaskId>,
    closed: bool,
}

/// Frames and failures produced while the state lock was held
#[derive(Default)]
struct Outbox {
    frames: Vec<Vec<u8>>,
    failed: bool,
}

struct TxInner {
    state: Mutex<TxState>,
    max_tx_sdu_size: u16,
    max_tx_pdu_payload_size: u16,
    n_frames_in_tx_window: u8,
    max_transmissions: u8,
    send_frame: SendFrameCallback,
    connection_failure: FailureCallback,
    dispatcher: Arc<dyn Dispatcher>,
}

impl TxInner {
    /// Run `f` under the state lock, then send what it produced with the lock released
    fn run<R>(self: &Arc<Self>, f: impl FnOnce(&Arc<Self>, &mut TxState, &mut Outbox) -> R) -> R {
        let mut outbox = Outbox::default();
        let result = {
            let mut state = self.state.lock();
            f(self, &mut state, &mut outbox)
        };
        for frame in outbox.frames {
            (self.send_frame)(frame);
        }
        if outbox.failed {
            (self.connection_failure)();
        }
        result
    }

    fn exceeds_max_transmissions(&self, tx_count: u8) -> bool {
        self.max_transmissions != 0 && tx_count >= self.max_transmissions
    }

    fn start_retransmission_timer(self: &Arc<Self>, state: &mut TxState) {
        if let Some(id) = state.retransmission_timer.take() {
            self.dispatcher.cancel(id);
        }
        let weak = Arc::downgrade(self);
        let id = self.dispatcher.post_after(
            ERTM_RETRANSMISSION_TIMEOUT,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_retransmission_timeout();
                }
            }),
        );
        state.retransmission_timer = Some(id);
    }

    fn stop_retransmission_timer(&self, state: &mut TxState) {
        if let Some(id) = state.retransmission_timer.take() {
            self.dispatcher.cancel(id);
        }
    }

    fn start_monitor_timer(self: &Arc<Self>, state: &mut TxState) {
        if let Some(id) = state.monitor_timer.take() {
            self.dispatcher.cancel(id);
        }
        let weak = Arc::downgrade(self);
        let id = self.dispatcher.post_after(
            ERTM_MONITOR_TIMEOUT,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_monitor_timeout();
                }
            }),
        );
        state.monitor_timer = Some(id);
    }

    fn stop_monitor_timer(&self, state: &mut TxState) {
        if let Some(id) = state.monitor_timer.take() {
            self.dispatcher.cancel(id);
        }
    }

    fn send_receiver_ready_poll(self: &Arc<Self>, state: &mut TxState, outbox: &mut Outbox) {
        state.n_receiver_ready_polls_sent += 1;
        debug!(
            "l2cap: ERTM polling peer (poll {})",
            state.n_receiver_ready_polls_sent
        );
        outbox.frames.push(build_s_frame(
            SupervisoryFunction::ReceiverReady,
            state.req_seqnum,
            true,
            false,
        ));
        self.start_monitor_timer(state);
    }

    fn on_retransmission_timeout(self: &Arc<Self>) {
        self.run(|inner, state, outbox| {
            state.retransmission_timer = None;
            if state.closed {
                return;
            }
            debug!("l2cap: ERTM retransmission timer expired");
            state.n_receiver_ready_polls_sent = 0;
            inner.send_receiver_ready_poll(state, outbox);
        })
    }

    fn on_monitor_timeout(self: &Arc<Self>) {
        self.run(|inner, state, outbox| {
            state.monitor_timer = None;
            if state.closed {
                return;
            }
            if inner.exceeds_max_transmissions(state.n_receiver_ready_polls_sent) {
                warn!(
                    "l2cap: ERTM peer ignored {} polls",
                    state.n_receiver_ready_polls_sent
                );
                outbox.failed = true;
                return;
            }
            inner.send_receiver_ready_poll(state, outbox);
        })
    }

    /// Send queued segments while the window and the peer allow it
    fn send_queued(self: &Arc<Self>, state: &mut TxState, outbox: &mut Outbox) -> usize {
        let mut sent = 0;
        while !state.closed
            && !state.remote_busy
            && state.monitor_timer.is_none()
            && state.unacked.len() < self.n_frames_in_tx_window as usize
        {
            let (sar, payload) = match state.queued.pop_front() {
                Some(segment) => segment,
                None => break,
            };
            let tx_seq = state.next_tx_seq;
            state.next_tx_seq = seq_add(tx_seq, 1);
            trace!("l2cap: ERTM I-frame {} tx {}", tx_seq, hex::encode(&payload));
            outbox
                .frames
                .push(build_i_frame(tx_seq, state.req_seqnum, sar, &payload));
            state.unacked.push_back(PendingPdu {
                tx_seq,
                sar,
                payload,
                tx_count: 1,
            });
            sent += 1;
        }
        if sent > 0 && state.retransmission_timer.is_none() && state.monitor_timer.is_none() {
            self.start_retransmission_timer(state);
        }
        sent
    }

    /// Resend unacked I-frames, all of them or just `only_seq`. Returns frames resent.
    fn retransmit(
        self: &Arc<Self>,
        state: &mut TxState,
        outbox: &mut Outbox,
        only_seq: Option<u8>,
    ) -> usize {
        let req_seq = state.req_seqnum;
        let mut resent = 0;
        for pdu in state
            .unacked
            .iter_mut()
            .filter(|pdu| only_seq.map_or(true, |seq| pdu.tx_seq == seq))
        {
            if self.exceeds_max_transmissions(pdu.tx_count) {
                warn!(
                    "l2cap: ERTM I-frame {} reached {} transmissions",
                    pdu.tx_seq, pdu.tx_count
                );
                outbox.failed = true;
                return resent;
            }
            pdu.tx_count += 1;
            outbox
                .frames
                .push(build_i_frame(pdu.tx_seq, req_seq, pdu.sar, &pdu.payload));
            resent += 1;
        }
        if resent > 0 && state.monitor_timer.is_none() {
            self.start_retransmission_timer(state);
        }
        resent
    }
}

/// Transmit half of an ERTM channel
pub struct EnhancedRetransmissionModeTxEngine {
    inner: Arc<TxInner>,
}

impl TxEngine for EnhancedRetransmissionModeTxEngine {
    fn queue_sdu(&mut self, sdu: Vec<u8>) -> bool {
        if sdu.len() > self.inner.max_tx_sdu_size as usize {
            warn!(
                "l2cap: SDU size exceeds channel TxMTU (size: {}, max: {})",
                sdu.len(),
                self.inner.max_tx_sdu_size
            );
            return false;
        }
        let segments = match segment_sdu(&sdu, self.inner.max_tx_pdu_payload_size as usize) {
            Some(segments) => segments,
            None => {
                warn!(
                    "l2cap: MPS {} too small to segment SDU",
                    self.inner.max_tx_pdu_payload_size
                );
                return false;
            }
        };
        self.inner.run(|inner, state, outbox| {
            if state.closed {
                return false;
            }
            state.queued.extend(segments);
            inner.send_queued(state, outbox);
            true
        })
    }
}

impl Drop for EnhancedRetransmissionModeTxEngine {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        self.inner.stop_retransmission_timer(&mut state);
        self.inner.stop_monitor_timer(&mut state);
    }
}

// Operations the receive engine drives on its linked transmit engine.
impl TxInner {
    /// Process a ReqSeq from the peer. Returns false (after reporting a connection
    /// failure) if `new_seq` acknowledges a frame that was never sent.
    fn update_ack_seq(self: &Arc<Self>, new_seq: u8, is_poll_response: bool) -> bool {
        self.run(|inner, state, outbox| {
            if state.closed {
                return false;
            }
            let n_acked = seq_distance(state.expected_ack_seq, new_seq);
            let n_outstanding = seq_distance(state.expected_ack_seq, state.next_tx_seq);
            if n_acked > n_outstanding {
                warn!(
                    "l2cap: ERTM peer acked {} but only {}..{} outstanding",
                    new_seq, state.expected_ack_seq, state.next_tx_seq
                );
                outbox.failed = true;
                return false;
            }

            for _ in 0..n_acked {
                state.unacked.pop_front();
            }
            state.expected_ack_seq = new_seq;

            let mut resent = 0;
            if is_poll_response && state.monitor_timer.is_some() {
                inner.stop_monitor_timer(state);
                state.n_receiver_ready_polls_sent = 0;
                if !state.remote_busy {
                    resent = inner.retransmit(state, outbox, None);
                }
            }

            if state.unacked.is_empty() {
                inner.stop_retransmission_timer(state);
            } else if (n_acked > 0 || resent > 0)
                && !state.remote_busy
                && state.monitor_timer.is_none()
            {
                inner.start_retransmission_timer(state);
            }

            inner.send_queued(state, outbox);
            true
        })
    }

    /// Record the next TxSeq the receive engine expects and acknowledge it, piggy-backed
    /// on queued data when possible.
    fn update_req_seq(self: &Arc<Self>, req_seq: u8) {
        self.run(|inner, state, outbox| {
            if state.closed {
                return;
            }
            state.req_seqnum = req_seq;
            if inner.send_queued(state, outbox) == 0 {
                outbox.frames.push(build_s_frame(
                    SupervisoryFunction::ReceiverReady,
                    req_seq,
                    false,
                    false,
                ));
            }
        })
    }

    fn set_remote_busy(self: &Arc<Self>) {
        self.run(|inner, state, _| {
            state.remote_busy = true;
            inner.stop_retransmission_timer(state);
        })
    }

    fn clear_remote_busy(self: &Arc<Self>) {
        self.run(|inner, state, outbox| {
            if !state.remote_busy || state.closed {
                return;
            }
            state.remote_busy = false;
            if !state.unacked.is_empty() && state.monitor_timer.is_none() {
                inner.start_retransmission_timer(state);
            }
            inner.send_queued(state, outbox);
        })
    }

    fn retransmit_unacked(self: &Arc<Self>) {
        self.run(|inner, state, outbox| {
            if !state.closed {
                inner.retransmit(state, outbox, None);
            }
        })
    }

    fn retransmit_single(self: &Arc<Self>, tx_seq: u8) {
        self.run(|inner, state, outbox| {
            if !state.closed && inner.retransmit(state, outbox, Some(tx_seq)) == 0 {
                debug!("l2cap: ERTM SREJ for {} which is not outstanding", tx_seq);
            }
        })
    }

    fn send_poll_response(self: &Arc<Self>) {
        self.run(|_, state, outbox| {
            if !state.closed {
                outbox.frames.push(build_s_frame(
                    SupervisoryFunction::ReceiverReady,
                    state.req_seqnum,
                    false,
                    true,
                ));
            }
        })
    }

    fn send_reject(self: &Arc<Self>, req_seq: u8) {
        self.run(|_, state, outbox| {
            if !state.closed {
                outbox.frames.push(build_s_frame(
                    SupervisoryFunction::Reject,
                    req_seq,
                    false,
                    false,
                ));
            }
        })
    }
}

struct Reassembly {
    sdu: Vec<u8>,
    expected_len: usize,
}

/// Receive half of an ERTM channel
pub struct EnhancedRetransmissionModeRxEngine {
    expected_tx_seq: u8,
    reject_sent: bool,
    max_rx_sdu_size: u16,
    reassembly: Option<Reassembly>,
    tx: Arc<TxInner>,
    connection_failure: FailureCallback,
}

impl EnhancedRetransmissionModeRxEngine {
    fn on_failure(&mut self, reason: &str) {
        warn!("l2cap: ERTM rx failure: {}", reason);
        self.reassembly = None;
        (self.connection_failure)();
    }

    fn reassemble(&mut self, sar: SegmentationStatus, payload: &[u8]) -> Option<Vec<u8>> {
        let max = self.max_rx_sdu_size as usize;
        match sar {
            SegmentationStatus::Unsegmented => {
                if self.reassembly.is_some() {
                    self.on_failure("unsegmented frame during reassembly");
                    return None;
                }
                if payload.len() > max {
                    self.on_failure("SDU exceeds MTU");
                    return None;
                }
                Some(payload.to_vec())
            }
            SegmentationStatus::FirstSegment => {
                if self.reassembly.is_some() {
                    self.on_failure("start segment during reassembly");
                    return None;
                }
                let expected_len = match read_sdu_header(payload) {
                    Some(len) => len as usize,
                    None => {
                        self.on_failure("start segment without SDU length");
                        return None;
                    }
                };
                let data = &payload[SDU_HEADER_SIZE..];
                if expected_len > max || data.len() >= expected_len {
                    self.on_failure("bad SDU length in start segment");
                    return None;
                }
                self.reassembly = Some(Reassembly {
                    sdu: data.to_vec(),
                    expected_len,
                });
                None
            }
            SegmentationStatus::ContinuingSegment | SegmentationStatus::LastSegment => {
                let mut reassembly = match self.reassembly.take() {
                    Some(reassembly) => reassembly,
                    None => {
                        self.on_failure("segment without start");
                        return None;
                    }
                };
                reassembly.sdu.extend_from_slice(payload);
                let len = reassembly.sdu.len();
                let is_last = sar == SegmentationStatus::LastSegment;
                if (is_last && len != reassembly.expected_len)
                    || (!is_last && len >= reassembly.expected_len)
                {
                    self.on_failure("segments do not match SDU length");
                    return None;
                }
                if is_last {
                    Some(reassembly.sdu)
                } else {
                    self.reassembly = Some(reassembly);
                    None
                }
            }
        }
    }

    fn process_information_frame(
        &mut self,
        tx_seq: u8,
        sar: SegmentationStatus,
        payload: &[u8],
    ) -> Option<Vec<u8>> {
        if tx_seq != self.expected_tx_seq {
            // Frames ahead of the expected one mean something was lost; anything else is a
            // retransmission of a frame already delivered.
            let ahead = seq_distance(self.expected_tx_seq, tx_seq) < ERTM_SEQ_MODULUS / 2;
            if ahead && !self.reject_sent {
                debug!(
                    "l2cap: ERTM expected I-frame {}, got {}; rejecting",
                    self.expected_tx_seq, tx_seq
                );
                self.reject_sent = true;
                self.tx.send_reject(self.expected_tx_seq);
            } else {
                trace!("l2cap: ERTM dropping I-frame {}", tx_seq);
            }
            return None;
        }

        self.expected_tx_seq = seq_add(self.expected_tx_seq, 1);
        self.reject_sent = false;
        self.tx.update_req_seq(self.expected_tx_seq);
        self.reassemble(sar, payload)
    }

    fn process_supervisory_frame(
        &mut self,
        function: SupervisoryFunction,
        req_seq: u8,
        poll: bool,
        final_bit: bool,
    ) {
        if function != SupervisoryFunction::SelectiveReject
            && !self.tx.update_ack_seq(req_seq, final_bit)
        {
            return;
        }
        match function {
            SupervisoryFunction::ReceiverReady => {
                self.tx.clear_remote_busy();
                if poll {
                    self.tx.send_poll_response();
                }
            }
            SupervisoryFunction::ReceiverNotReady => {
                self.tx.set_remote_busy();
                if poll {
                    self.tx.send_poll_response();
                }
            }
            SupervisoryFunction::Reject => {
                self.tx.clear_remote_busy();
                self.tx.retransmit_unacked();
            }
            SupervisoryFunction::SelectiveReject => self.tx.retransmit_single(req_seq),
        }
    }
}

impl RxEngine for EnhancedRetransmissionModeRxEngine {
    fn process_pdu(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        let control = match EnhancedControlField::parse(pdu) {
            Some(control) => control,
            None => {
                warn!("l2cap: ERTM frame too short ({} bytes)", pdu.len());
                return None;
            }
        };
        let payload = &pdu[ENHANCED_CONTROL_FIELD_SIZE..];

        match control {
            EnhancedControlField::Information {
                tx_seq,
                req_seq,
                final_bit,
                sar,
            } => {
                if !self.tx.update_ack_seq(req_seq, final_bit) {
                    return None;
                }
                self.process_information_frame(tx_seq, sar, payload)
            }
            EnhancedControlField::Supervisory {
                function,
                req_seq,
                poll,
                final_bit,
            } => {
                if !payload.is_empty() {
                    warn!("l2cap: ERTM S-frame with {} byte payload", payload.len());
                    return None;
                }
                self.process_supervisory_frame(function, req_seq, poll, final_bit);
                None
            }
        }
    }
}

/// Build the linked receive and transmit engines of an ERTM channel
pub fn make_linked_ertm_engines(
    info: &ChannelInfo,
    send_frame: SendFrameCallback,
    connection_failure: FailureCallback,
    dispatcher: Arc<dyn Dispatcher>,
) -> (
    EnhancedRetransmissionModeRxEngine,
    EnhancedRetransmissionModeTxEngine,
) {
    let inner = Arc::new(TxInner {
        state: Mutex::new(TxState {
            expected_ack_seq: 0,
            next_tx_seq: 0,
            req_seqnum: 0,
            remote_busy: false,
            n_receiver_ready_polls_sent: 0,
            unacked: VecDeque::new(),
            queued: VecDeque::new(),
            retransmission_timer: None,
            monitor_timer: None,
            closed: false,
        }),
        max_tx_sdu_size: info.max_tx_sdu_size,
        max_tx_pdu_payload_size: info.max_tx_pdu_payload_size,
        n_frames_in_tx_window: info.n_frames_in_tx_window,
        max_transmissions: info.max_transmissions,
        send_frame,
        connection_failure: connection_failure.clone(),
        dispatcher,
    });
    let rx = EnhancedRetransmissionModeRxEngine {
        expected_tx_seq: 0,
        reject_sent: false,
        max_rx_sdu_size: info.max_rx_sdu_size,
        reassembly: None,
        tx: inner.clone(),
        connection_failure,
    };
    (rx, EnhancedRetransmissionModeTxEngine { inner })
}
