//! L2CAP channel
//!
//! A [`Channel`] binds a pair of engines, chosen by the channel mode, to one endpoint of
//! a logical link. Inbound PDUs go through the receive engine and completed SDUs are
//! handed to the upper layer; outbound SDUs go through the transmit engine and leave as
//! basic frames addressed to the remote channel id.
//!
//! Engines run under the channel lock and may call into the [`ChannelLink`] from there,
//! so a link must not call back into the same channel synchronously.

use super::a2dp_offload::{A2dpOffloadConfiguration, A2dpOffloadManager, OffloadCallback};
use super::credit_based::{CreditBasedFlowControlRxEngine, CreditBasedFlowControlTxEngine};
use super::ertm::make_linked_ertm_engines;
use super::packet::build_basic_frame;
use super::rx_engine::{BasicModeRxEngine, FailureCallback, RxEngine};
use super::tx_engine::{BasicModeTxEngine, SendFrameCallback, TxEngine};
use super::types::*;
use crate::dispatcher::Dispatcher;
use crate::error::HostError;
use crate::smp::SecurityProperties;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// The logical link a channel runs over
pub trait ChannelLink: Send + Sync {
    /// Send a complete frame (basic header included) on the link `handle`
    fn send_frame(&self, handle: ConnectionHandle, frame: Vec<u8>);

    /// Report an unrecoverable channel error; the link is expected to disconnect
    fn signal_error(&self, handle: ConnectionHandle);

    /// Return `credits` to the peer for the channel `local_cid`
    fn send_credits(&self, handle: ConnectionHandle, local_cid: ChannelId, credits: u16);

    /// Current security of the link `handle`
    fn security(&self, handle: ConnectionHandle) -> SecurityProperties;

    /// The channel `(handle, local_id)` was deactivated and should no longer get PDUs
    fn remove_channel(&self, _handle: ConnectionHandle, _local_id: ChannelId) {}
}

/// Receives every SDU the channel reassembles
pub type RxCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Runs once when the channel is closed from below
pub type ClosedCallback = Box<dyn FnOnce() + Send>;

struct ChannelState {
    active: bool,
    closed: bool,
    rx_engine: Option<Box<dyn RxEngine>>,
    tx_engine: Option<Box<dyn TxEngine>>,
    rx_callback: Option<RxCallback>,
    closed_callback: Option<ClosedCallback>,
    /// SDUs completed before the channel was activated
    pending_rx_sdus: VecDeque<Vec<u8>>,
}

pub struct Channel {
    local_id: ChannelId,
    remote_id: ChannelId,
    link_handle: ConnectionHandle,
    link_type: LinkType,
    info: ChannelInfo,
    link: Weak<dyn ChannelLink>,
    a2dp_offload_manager: Option<Weak<A2dpOffloadManager>>,
    state: Mutex<ChannelState>,
}

fn make_engines(
    info: &ChannelInfo,
    local_id: ChannelId,
    send_frame: SendFrameCallback,
    failure: FailureCallback,
    link: Weak<dyn ChannelLink>,
    link_handle: ConnectionHandle,
    dispatcher: Arc<dyn Dispatcher>,
) -> (Box<dyn RxEngine>, Box<dyn TxEngine>) {
    match info.mode {
        AnyChannelMode::RetransmissionAndFlowControl(RetransmissionAndFlowControlMode::Basic) => (
            Box::new(BasicModeRxEngine::new()),
            Box::new(BasicModeTxEngine::new(info, send_frame)),
        ),
        AnyChannelMode::RetransmissionAndFlowControl(
            RetransmissionAndFlowControlMode::EnhancedRetransmission,
        ) => {
            let (rx, tx) = make_linked_ertm_engines(info, send_frame, failure, dispatcher);
            (Box::new(rx), Box::new(tx))
        }
        AnyChannelMode::CreditBasedFlowControl(_) => {
            let return_credits = Arc::new(move |credits: u16| {
                if let Some(link) = link.upgrade() {
                    link.send_credits(link_handle, local_id, credits);
                }
            });
            (
                Box::new(CreditBasedFlowControlRxEngine::new(
                    info.max_rx_sdu_size,
                    failure,
                    return_credits,
                )),
                Box::new(CreditBasedFlowControlTxEngine::new(info, send_frame)),
            )
        }
    }
}

impl Channel {
    /// Create an inactive channel bound to `link`. Nothing is delivered until `activate`.
    pub fn new(
        local_id: ChannelId,
        remote_id: ChannelId,
        link_handle: ConnectionHandle,
        link_type: LinkType,
        info: ChannelInfo,
        link: Weak<dyn ChannelLink>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Arc<Self> {
        let endpoint = (local_id, remote_id, link_handle, link_type);
        Self::build(endpoint, info, link, dispatcher, None)
    }

    /// Like [`Channel::new`], with A2DP offload routed through `manager`
    #[allow(clippy::too_many_arguments)]
    pub fn with_a2dp_offload_manager(
        local_id: ChannelId,
        remote_id: ChannelId,
        link_handle: ConnectionHandle,
        link_type: LinkType,
        info: ChannelInfo,
        link: Weak<dyn ChannelLink>,
        dispatcher: Arc<dyn Dispatcher>,
        manager: &Arc<A2dpOffloadManager>,
    ) -> Arc<Self> {
        let endpoint = (local_id, remote_id, link_handle, link_type);
        Self::build(endpoint, info, link, dispatcher, Some(Arc::downgrade(manager)))
    }

    fn build(
        (local_id, remote_id, link_handle, link_type): (ChannelId, ChannelId, ConnectionHandle, LinkType),
        info: ChannelInfo,
        link: Weak<dyn ChannelLink>,
        dispatcher: Arc<dyn Dispatcher>,
        a2dp_offload_manager: Option<Weak<A2dpOffloadManager>>,
    ) -> Arc<Self> {
        let send_link = link.clone();
        let send_frame: SendFrameCallback = Arc::new(move |pdu: Vec<u8>| {
            if let Some(link) = send_link.upgrade() {
                link.send_frame(link_handle, build_basic_frame(remote_id, &pdu));
            }
        });

        // Engine failures surface while the engine is running, so the link hears about
        // them from a separate task.
        let failure_link = link.clone();
        let failure_dispatcher = dispatcher.clone();
        let failure: FailureCallback = Arc::new(move || {
            warn!(
                "l2cap: channel {:#06x} on link {:#06x} failed",
                local_id, link_handle
            );
            let link = failure_link.clone();
            failure_dispatcher.post(Box::new(move || {
                if let Some(link) = link.upgrade() {
                    link.signal_error(link_handle);
                }
            }));
        });

        let (rx_engine, tx_engine) = make_engines(
            &info,
            local_id,
            send_frame,
            failure,
            link.clone(),
            link_handle,
            dispatcher,
        );

        Arc::new(Self {
            local_id,
            remote_id,
            link_handle,
            link_type,
            info,
            link,
            a2dp_offload_manager,
            state: Mutex::new(ChannelState {
                active: false,
                closed: false,
                rx_engine: Some(rx_engine),
                tx_engine: Some(tx_engine),
                rx_callback: None,
                closed_callback: None,
                pending_rx_sdus: VecDeque::new(),
            }),
        })
    }

    /// Channel ID on this side of the link
    pub fn local_id(&self) -> ChannelId {
        self.local_id
    }

    /// Channel ID the peer uses for this channel
    pub fn remote_id(&self) -> ChannelId {
        self.remote_id
    }

    /// Handle of the logical link carrying this channel
    pub fn link_handle(&self) -> ConnectionHandle {
        self.link_handle
    }

    /// LE or BR/EDR
    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Identifier unique across all links, see [`unique_channel_id`]
    pub fn unique_id(&self) -> UniqueChannelId {
        unique_channel_id(self.link_handle, self.local_id)
    }

    /// Parameters the channel was configured with
    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Mode the channel was configured with
    pub fn mode(&self) -> AnyChannelMode {
        self.info.mode
    }

    /// Largest SDU the peer accepts
    pub fn max_tx_sdu_size(&self) -> u16 {
        self.info.max_tx_sdu_size
    }

    /// Largest SDU this side accepts
    pub fn max_rx_sdu_size(&self) -> u16 {
        self.info.max_rx_sdu_size
    }

    /// True between `activate` and close
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// True once the channel has been closed by either side
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Start delivering SDUs to `rx_callback`. SDUs that arrived before activation are
    /// delivered right away. Returns false if the channel is closed or already active.
    pub fn activate(&self, rx_callback: RxCallback, closed_callback: ClosedCallback) -> bool {
        let buffered = {
            let mut state = self.state.lock();
            if state.closed || state.active {
                return false;
            }
            state.active = true;
            state.rx_callback = Some(rx_callback.clone());
            state.closed_callback = Some(closed_callback);
            std::mem::take(&mut state.pending_rx_sdus)
        };

        debug!(
            "l2cap: channel {:#06x} activated with {} buffered SDUs",
            self.local_id,
            buffered.len()
        );
        for sdu in buffered {
            rx_callback(sdu);
            self.acknowledge_read();
        }
        true
    }

    /// Stop the channel without running the closed callback. Pending engine state is
    /// dropped and the link is told to stop routing PDUs here.
    pub fn deactivate(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.active = false;
            state.rx_callback = None;
            state.closed_callback = None;
            state.rx_engine = None;
            state.tx_engine = None;
            state.pending_rx_sdus.clear();
        }
        info!("l2cap: channel {:#06x} deactivated", self.local_id);
        self.stop_offload_on_teardown();
        if let Some(link) = self.link.upgrade() {
            link.remove_channel(self.link_handle, self.local_id);
        }
    }

    /// The link closed this channel. Engines are dropped before the closed callback runs.
    pub fn on_closed(&self) {
        let closed_callback = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.active = false;
            state.rx_callback = None;
            state.rx_engine = None;
            state.tx_engine = None;
            state.pending_rx_sdus.clear();
            state.closed_callback.take()
        };
        info!("l2cap: channel {:#06x} closed", self.local_id);
        self.stop_offload_on_teardown();
        if let Some(callback) = closed_callback {
            callback();
        }
    }

    /// Feed the information payload of a PDU received for this channel
    pub fn handle_rx_pdu(&self, pdu: &[u8]) {
        let delivery = {
            let mut state = self.state.lock();
            if state.closed {
                debug!("l2cap: dropping PDU for closed channel {:#06x}", self.local_id);
                return;
            }
            let sdu = match state.rx_engine.as_mut().and_then(|engine| engine.process_pdu(pdu)) {
                Some(sdu) => sdu,
                None => return,
            };
            if !state.active {
                trace!("l2cap: buffering SDU for inactive channel {:#06x}", self.local_id);
                state.pending_rx_sdus.push_back(sdu);
                return;
            }
            state.rx_callback.clone().map(|callback| (callback, sdu))
        };

        if let Some((callback, sdu)) = delivery {
            callback(sdu);
            self.acknowledge_read();
        }
    }

    fn acknowledge_read(&self) {
        if let Some(engine) = self.state.lock().rx_engine.as_mut() {
            engine.acknowledge_read();
        }
    }

    /// Queue an SDU for transmission. Returns false if the channel is not active, the SDU
    /// is too large, or the channel is offloaded to the controller.
    pub fn send(&self, sdu: Vec<u8>) -> bool {
        if self.is_a2dp_offloaded() {
            warn!(
                "l2cap: channel {:#06x} is offloaded, dropping {} byte SDU",
                self.local_id,
                sdu.len()
            );
            return false;
        }
        let mut state = self.state.lock();
        if !state.active {
            debug!("l2cap: send on inactive channel {:#06x}", self.local_id);
            return false;
        }
        match state.tx_engine.as_mut() {
            Some(engine) => engine.queue_sdu(sdu),
            None => false,
        }
    }

    /// Grant the transmit engine more credits (credit-based modes)
    pub fn add_credits(&self, credits: u16) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        match state.tx_engine.as_mut() {
            Some(engine) => engine.add_credits(credits),
            None => false,
        }
    }

    /// Report an unrecoverable error on the underlying link
    pub fn signal_link_error(&self) {
        if let Some(link) = self.link.upgrade() {
            link.signal_error(self.link_handle);
        }
    }

    /// Security of the underlying link. A dead link reports none.
    pub fn security(&self) -> SecurityProperties {
        match self.link.upgrade() {
            Some(link) => link.security(self.link_handle),
            None => SecurityProperties::none(),
        }
    }

    fn offload_manager(&self) -> Option<Arc<A2dpOffloadManager>> {
        self.a2dp_offload_manager.as_ref().and_then(Weak::upgrade)
    }

    /// Hand this channel's A2DP media to the controller. Fails with
    /// `NotSupported` when no offload manager was attached.
    pub fn start_a2dp_offload(&self, config: &A2dpOffloadConfiguration, callback: OffloadCallback) {
        match self.offload_manager() {
            Some(manager) => manager.start_a2dp_offload(
                config,
                self.local_id,
                self.remote_id,
                self.link_handle,
                self.info.max_tx_sdu_size,
                callback,
            ),
            None => callback(Err(HostError::NotSupported.into())),
        }
    }

    /// Stop an offload started on this channel
    pub fn stop_a2dp_offload(&self, callback: OffloadCallback) {
        match self.offload_manager() {
            Some(manager) => manager.stop_a2dp_offload(self.local_id, self.link_handle, callback),
            None => callback(Err(HostError::NotSupported.into())),
        }
    }

    /// Whether this channel's media is currently offloaded
    pub fn is_a2dp_offloaded(&self) -> bool {
        self.offload_manager()
            .map_or(false, |manager| manager.is_channel_offloaded(self.local_id, self.link_handle))
    }

    fn stop_offload_on_teardown(&self) {
        let local_id = self.local_id;
        if let Some(manager) = self.offload_manager() {
            manager.stop_a2dp_offload(
                local_id,
                self.link_handle,
                Box::new(move |result| {
                    if let Err(err) = result {
                        warn!(
                            "l2cap: stopping A2DP offload for closed channel {:#06x} failed: {}",
                            local_id, err
                        );
                    }
                }),
            );
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("local_id", &format_args!("{:#06x}", self.local_id))
            .field("remote_id", &format_args!("{:#06x}", self.remote_id))
            .field("link_handle", &format_args!("{:#06x}", self.link_handle))
            .field("link_type", &self.link_type)
            .field("mode", &self.info.mode)
            .finish()
    }
}
