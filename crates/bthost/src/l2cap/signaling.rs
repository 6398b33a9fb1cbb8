//! L2CAP signaling channel
//!
//! Carries commands over the fixed signaling channel of a link (CID 0x0001 on ACL,
//! CID 0x0005 on LE). Outbound requests are tracked by identifier until a response,
//! a Command Reject or a timeout resolves them; inbound requests are routed to the
//! delegate registered for their command code.
//!
//! Every outstanding request arms a response timer (RTX). When it expires the request is
//! retransmitted with a doubled timeout, up to `max_transmissions` transmissions, after
//! which its handler sees [`Status::TimedOut`]. A handler that expects further responses
//! re-arms the extended timer (ERTX) instead.

use super::channel::ChannelLink;
use super::constants::*;
use super::packet::{build_basic_frame, build_command, command_reject_payload, CommandHeader, RejectReason};
use super::types::*;
use crate::dispatcher::{Dispatcher, TaskId};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How an outbound request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Reject,
    TimedOut,
}

/// What a response handler wants done with its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHandlerAction {
    ExpectAdditionalResponse,
    CompleteOutboundTransaction,
}

/// Called with the status and payload of each response to an outbound request
pub type ResponseHandler = Box<dyn FnMut(Status, &[u8]) -> ResponseHandlerAction + Send>;

/// Called with the payload of each inbound request and a responder bound to its identifier
pub type RequestDelegate = Arc<dyn Fn(&[u8], Responder) + Send + Sync>;

/// Operations the command handler needs from a signaling channel
pub trait SignalingChannelInterface: Send + Sync {
    /// Send a request and route its responses to `handler`. Returns false if the request
    /// could not be sent.
    fn send_request(&self, code: CommandCode, payload: &[u8], handler: ResponseHandler) -> bool;

    /// Route inbound requests with `code` to `delegate`, replacing any previous delegate
    fn serve_request(&self, code: CommandCode, delegate: RequestDelegate);

    /// Send a command that has no response, such as a credit indication
    fn send_command_without_response(&self, code: CommandCode, payload: &[u8]) -> bool;

    /// Send a response (or Command Reject) to the inbound request `id`
    fn send_response(&self, code: CommandCode, id: CommandId, payload: &[u8]) -> bool;
}

/// Answers one inbound request
pub struct Responder {
    channel: Weak<dyn SignalingChannelInterface>,
    id: CommandId,
    response_code: CommandCode,
}

impl Responder {
    pub fn new(
        channel: Weak<dyn SignalingChannelInterface>,
        id: CommandId,
        response_code: CommandCode,
    ) -> Self {
        Self {
            channel,
            id,
            response_code,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    fn send_command(&self, code: CommandCode, payload: &[u8]) {
        match self.channel.upgrade() {
            Some(channel) => {
                channel.send_response(code, self.id, payload);
            }
            None => debug!("l2cap: signaling channel gone, dropping response {}", self.id),
        }
    }

    /// Send the response payload
    pub fn send(&self, payload: &[u8]) {
        self.send_command(self.response_code, payload);
    }

    pub fn reject_not_understood(&self) {
        self.send_command(
            COMMAND_REJECT,
            &command_reject_payload(RejectReason::NotUnderstood, &[]),
        );
    }

    /// Reject with Invalid CID. The CIDs are from our point of view.
    pub fn reject_invalid_channel_id(&self, local_cid: ChannelId, remote_cid: ChannelId) {
        let mut data = [0u8; 4];
        LittleEndian::write_u16(&mut data[0..2], local_cid);
        LittleEndian::write_u16(&mut data[2..4], remote_cid);
        self.send_command(
            COMMAND_REJECT,
            &command_reject_payload(RejectReason::InvalidChannelId, &data),
        );
    }
}

fn is_response_code(code: CommandCode) -> bool {
    matches!(
        code,
        COMMAND_REJECT
            | CONNECTION_RESPONSE
            | CONFIGURATION_RESPONSE
            | DISCONNECTION_RESPONSE
            | ECHO_RESPONSE
            | INFORMATION_RESPONSE
            | CONNECTION_PARAMETER_UPDATE_RESPONSE
            | LE_CREDIT_BASED_CONNECTION_RESPONSE
            | CREDIT_BASED_CONNECTION_RESPONSE
    )
}

/// Response code paired with a request code
fn response_code_for(request_code: CommandCode) -> CommandCode {
    request_code.wrapping_add(1)
}

struct PendingCommand {
    response_code: CommandCode,
    command: Vec<u8>,
    handler: Option<ResponseHandler>,
    transmit_count: u8,
    timeout: Duration,
    extended: bool,
    timer: Option<TaskId>,
}

struct SignalingState {
    next_id: CommandId,
    pending: HashMap<CommandId, PendingCommand>,
    delegates: HashMap<CommandCode, RequestDelegate>,
}

/// Signaling channel of one link
pub struct SignalingChannel {
    weak_self: Weak<SignalingChannel>,
    link: Weak<dyn ChannelLink>,
    handle: ConnectionHandle,
    link_type: LinkType,
    dispatcher: Arc<dyn Dispatcher>,
    config: SignalingConfig,
    state: Mutex<SignalingState>,
}

impl SignalingChannel {
    pub fn new(
        link: Weak<dyn ChannelLink>,
        handle: ConnectionHandle,
        link_type: LinkType,
        dispatcher: Arc<dyn Dispatcher>,
        config: SignalingConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            link,
            handle,
            link_type,
            dispatcher,
            config,
            state: Mutex::new(SignalingState {
                next_id: 1,
                pending: HashMap::new(),
                delegates: HashMap::new(),
            }),
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Fixed channel this signaling channel runs on
    pub fn channel_id(&self) -> ChannelId {
        match self.link_type {
            LinkType::Acl => SIGNALING_CHANNEL_ID,
            LinkType::Le => LE_SIGNALING_CHANNEL_ID,
        }
    }

    /// Largest C-frame payload accepted or sent
    pub fn mtu(&self) -> u16 {
        match self.link_type {
            LinkType::Acl => MIN_ACL_MTU,
            LinkType::Le => MIN_LE_MTU,
        }
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn as_interface(&self) -> Weak<dyn SignalingChannelInterface> {
        self.weak_self.clone()
    }

    fn send_packet(&self, command: &[u8]) -> bool {
        match self.link.upgrade() {
            Some(link) => {
                trace!("l2cap: signaling tx {}", hex::encode(command));
                link.send_frame(self.handle, build_basic_frame(self.channel_id(), command));
                true
            }
            None => {
                debug!("l2cap: link {:#06x} gone, dropping signaling packet", self.handle);
                false
            }
        }
    }

    /// Next free identifier in 1..=255, skipping those of outstanding requests
    fn allocate_id(state: &mut SignalingState) -> Option<CommandId> {
        for _ in 0..u8::MAX {
            let id = state.next_id;
            state.next_id = if id == u8::MAX { 1 } else { id + 1 };
            if !state.pending.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    fn arm_timer(&self, id: CommandId, pending: &mut PendingCommand) {
        if let Some(timer) = pending.timer.take() {
            self.dispatcher.cancel(timer);
        }
        let weak = self.weak_self.clone();
        pending.timer = Some(self.dispatcher.post_after(
            pending.timeout,
            Box::new(move || {
                if let Some(channel) = weak.upgrade() {
                    channel.on_response_timeout(id);
                }
            }),
        ));
    }

    fn on_response_timeout(&self, id: CommandId) {
        let mut retransmit = None;
        let mut timed_out = None;
        {
            let mut state = self.state.lock();
            let pending = match state.pending.get_mut(&id) {
                Some(pending) => pending,
                None => return,
            };
            pending.timer = None;
            if !pending.extended && pending.transmit_count < self.config.max_transmissions {
                pending.transmit_count += 1;
                pending.timeout *= 2;
                debug!(
                    "l2cap: retransmitting signaling request {} (attempt {})",
                    id, pending.transmit_count
                );
                retransmit = Some(pending.command.clone());
                self.arm_timer(id, pending);
            } else if let Some(pending) = state.pending.remove(&id) {
                warn!("l2cap: signaling request {} timed out", id);
                timed_out = pending.handler;
            }
        }

        if let Some(command) = retransmit {
            self.send_packet(&command);
        }
        if let Some(mut handler) = timed_out {
            handler(Status::TimedOut, &[]);
        }
    }

    fn send_reject(&self, id: CommandId, reason: RejectReason, data: &[u8]) {
        self.send_response(COMMAND_REJECT, id, &command_reject_payload(reason, data));
    }

    /// Process the information payload of a C-frame received on this channel
    pub fn handle_packet(&self, packet: &[u8]) {
        trace!("l2cap: signaling rx {}", hex::encode(packet));

        if packet.len() > self.mtu() as usize {
            warn!(
                "l2cap: signaling packet of {} bytes exceeds MTU {}",
                packet.len(),
                self.mtu()
            );
            if let Some(header) = CommandHeader::parse(packet) {
                let mut data = [0u8; 2];
                LittleEndian::write_u16(&mut data, self.mtu());
                self.send_reject(header.id, RejectReason::SignalingMtuExceeded, &data);
            }
            return;
        }

        let mut remaining = packet;
        while !remaining.is_empty() {
            let header = match CommandHeader::parse(remaining) {
                Some(header) => header,
                None => {
                    warn!("l2cap: truncated signaling command header");
                    return;
                }
            };
            let end = COMMAND_HEADER_SIZE + header.length as usize;
            let malformed = match self.link_type {
                LinkType::Acl => remaining.len() < end,
                LinkType::Le => remaining.len() != end,
            };
            if malformed {
                warn!(
                    "l2cap: signaling command {:#04x} length {} does not match packet",
                    header.code, header.length
                );
                self.send_reject(header.id, RejectReason::NotUnderstood, &[]);
                return;
            }

            let payload = &remaining[COMMAND_HEADER_SIZE..end];
            if header.id == 0 {
                debug!("l2cap: dropping signaling command with identifier 0");
            } else if is_response_code(header.code) {
                self.handle_response(header, payload);
            } else {
                self.handle_request(header, payload);
            }
            remaining = &remaining[end..];
        }
    }

    fn handle_response(&self, header: CommandHeader, payload: &[u8]) {
        let mut handler = {
            let mut state = self.state.lock();
            let pending = match state.pending.get_mut(&header.id) {
                Some(pending) => pending,
                None => {
                    debug!(
                        "l2cap: response {:#04x} with unexpected identifier {}",
                        header.code, header.id
                    );
                    return;
                }
            };
            if header.code != COMMAND_REJECT && header.code != pending.response_code {
                warn!(
                    "l2cap: expected response {:#04x} for {}, got {:#04x}",
                    pending.response_code, header.id, header.code
                );
                return;
            }
            let handler = match pending.handler.take() {
                Some(handler) => handler,
                None => return,
            };
            if let Some(timer) = pending.timer.take() {
                self.dispatcher.cancel(timer);
            }
            handler
        };

        let status = if header.code == COMMAND_REJECT {
            Status::Reject
        } else {
            Status::Success
        };
        let action = handler(status, payload);

        let mut state = self.state.lock();
        match action {
            ResponseHandlerAction::ExpectAdditionalResponse if status == Status::Success => {
                if let Some(pending) = state.pending.get_mut(&header.id) {
                    pending.handler = Some(handler);
                    pending.extended = true;
                    pending.timeout = self.config.ertx_timeout;
                    self.arm_timer(header.id, pending);
                }
            }
            _ => {
                state.pending.remove(&header.id);
            }
        }
    }

    fn handle_request(&self, header: CommandHeader, payload: &[u8]) {
        let delegate = self.state.lock().delegates.get(&header.code).cloned();
        match delegate {
            Some(delegate) => delegate(
                payload,
                Responder::new(
                    self.as_interface(),
                    header.id,
                    response_code_for(header.code),
                ),
            ),
            None => {
                debug!("l2cap: no handler for signaling command {:#04x}", header.code);
                self.send_reject(header.id, RejectReason::NotUnderstood, &[]);
            }
        }
    }
}

impl SignalingChannelInterface for SignalingChannel {
    fn send_request(&self, code: CommandCode, payload: &[u8], handler: ResponseHandler) -> bool {
        if COMMAND_HEADER_SIZE + payload.len() > self.mtu() as usize {
            warn!("l2cap: signaling request {:#04x} exceeds MTU", code);
            return false;
        }
        let (id, command) = {
            let mut state = self.state.lock();
            let id = match Self::allocate_id(&mut state) {
                Some(id) => id,
                None => {
                    warn!("l2cap: no free signaling identifiers");
                    return false;
                }
            };
            let command = build_command(code, id, payload);
            let mut pending = PendingCommand {
                response_code: response_code_for(code),
                command: command.clone(),
                handler: Some(handler),
                transmit_count: 1,
                timeout: self.config.rtx_timeout,
                extended: false,
                timer: None,
            };
            self.arm_timer(id, &mut pending);
            state.pending.insert(id, pending);
            (id, command)
        };
        if self.send_packet(&command) {
            return true;
        }
        // Never sent, so the handler must not hear about it
        let abandoned = self.state.lock().pending.remove(&id);
        if let Some(timer) = abandoned.and_then(|pending| pending.timer) {
            self.dispatcher.cancel(timer);
        }
        false
    }

    fn serve_request(&self, code: CommandCode, delegate: RequestDelegate) {
        self.state.lock().delegates.insert(code, delegate);
    }

    fn send_command_without_response(&self, code: CommandCode, payload: &[u8]) -> bool {
        let id = match Self::allocate_id(&mut self.state.lock()) {
            Some(id) => id,
            None => return false,
        };
        self.send_packet(&build_command(code, id, payload))
    }

    fn send_response(&self, code: CommandCode, id: CommandId, payload: &[u8]) -> bool {
        self.send_packet(&build_command(code, id, payload))
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for pending in state.pending.values_mut() {
            if let Some(timer) = pending.timer.take() {
                self.dispatcher.cancel(timer);
            }
        }
    }
}
