//! Typed signaling commands
//!
//! Wraps a [`SignalingChannelInterface`] with encoders and decoders for the commands the
//! channel layer issues and serves.

use super::constants::*;
use super::packet::{DisconnectionPayload, FlowControlCreditPayload, RejectReason};
use super::signaling::{
    Responder, ResponseHandlerAction, SignalingChannelInterface, Status,
};
use super::types::ChannelId;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::io::Cursor;
use std::sync::Arc;

/// Result of an outbound Disconnection Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionResponse {
    pub status: Status,
    pub local_cid: ChannelId,
    pub remote_cid: ChannelId,
    /// Set when `status` is [`Status::Reject`]
    pub reject_reason: Option<RejectReason>,
}

pub type DisconnectionResponseCallback = Box<dyn FnOnce(DisconnectionResponse) + Send>;

/// Called with `(local_cid, remote_cid, responder)` for each inbound Disconnection Request
pub type DisconnectionRequestCallback =
    Arc<dyn Fn(ChannelId, ChannelId, DisconnectionResponder) + Send + Sync>;

/// Called with `(remote_cid, credits)` for each inbound credit indication
pub type FlowControlCreditCallback = Arc<dyn Fn(ChannelId, u16) + Send + Sync>;

/// Answers an inbound Disconnection Request
pub struct DisconnectionResponder {
    responder: Responder,
    local_cid: ChannelId,
    remote_cid: ChannelId,
}

impl DisconnectionResponder {
    pub fn local_cid(&self) -> ChannelId {
        self.local_cid
    }

    pub fn remote_cid(&self) -> ChannelId {
        self.remote_cid
    }

    pub fn send(&self) {
        let payload = DisconnectionPayload {
            dst_cid: self.local_cid,
            src_cid: self.remote_cid,
        };
        self.responder.send(&payload.to_bytes());
    }

    pub fn reject_not_understood(&self) {
        self.responder.reject_not_understood();
    }

    pub fn reject_invalid_channel_id(&self) {
        self.responder
            .reject_invalid_channel_id(self.local_cid, self.remote_cid);
    }
}

/// Decoded Command Reject. Returns None if the payload is too short for its reason.
fn parse_reject(payload: &[u8]) -> Option<(RejectReason, Option<(ChannelId, ChannelId)>)> {
    let mut cursor = Cursor::new(payload);
    let reason = RejectReason::from(cursor.read_u16::<LittleEndian>().ok()?);
    if reason != RejectReason::InvalidChannelId {
        return Some((reason, None));
    }
    // The rejecting side lists its own CID first
    let remote_cid = cursor.read_u16::<LittleEndian>().ok()?;
    let local_cid = cursor.read_u16::<LittleEndian>().ok()?;
    Some((reason, Some((remote_cid, local_cid))))
}

/// Issues and serves the commands of a signaling channel
#[derive(Clone)]
pub struct CommandHandler {
    sig: Arc<dyn SignalingChannelInterface>,
}

impl CommandHandler {
    pub fn new(sig: Arc<dyn SignalingChannelInterface>) -> Self {
        Self { sig }
    }

    /// Ask the peer to close the channel `(local_cid, remote_cid)`. `callback` runs once
    /// with the response, a reject or a timeout; malformed responses are dropped.
    pub fn send_disconnection_request(
        &self,
        remote_cid: ChannelId,
        local_cid: ChannelId,
        callback: DisconnectionResponseCallback,
    ) -> bool {
        let payload = DisconnectionPayload {
            dst_cid: remote_cid,
            src_cid: local_cid,
        };
        let mut callback = Some(callback);
        self.sig.send_request(
            DISCONNECTION_REQUEST,
            &payload.to_bytes(),
            Box::new(move |status, response| {
                let result = match status {
                    Status::Success => match DisconnectionPayload::parse(response) {
                        Some(parsed) => Some(DisconnectionResponse {
                            status,
                            local_cid: parsed.src_cid,
                            remote_cid: parsed.dst_cid,
                            reject_reason: None,
                        }),
                        None => {
                            warn!(
                                "l2cap: malformed Disconnection Response: {}",
                                hex::encode(response)
                            );
                            None
                        }
                    },
                    Status::Reject => match parse_reject(response) {
                        Some((reason, cids)) => {
                            let (rejected_remote, rejected_local) =
                                cids.unwrap_or((remote_cid, local_cid));
                            Some(DisconnectionResponse {
                                status,
                                local_cid: rejected_local,
                                remote_cid: rejected_remote,
                                reject_reason: Some(reason),
                            })
                        }
                        None => {
                            warn!("l2cap: malformed Command Reject: {}", hex::encode(response));
                            None
                        }
                    },
                    Status::TimedOut => Some(DisconnectionResponse {
                        status,
                        local_cid,
                        remote_cid,
                        reject_reason: None,
                    }),
                };
                if let (Some(result), Some(callback)) = (result, callback.take()) {
                    callback(result);
                }
                ResponseHandlerAction::CompleteOutboundTransaction
            }),
        )
    }

    /// Route inbound Disconnection Requests to `callback`. Requests with a payload of the
    /// wrong size are rejected as not understood.
    pub fn serve_disconnection_request(&self, callback: DisconnectionRequestCallback) {
        self.sig.serve_request(
            DISCONNECTION_REQUEST,
            Arc::new(move |payload, responder| {
                let request = match payload.len() {
                    DisconnectionPayload::SIZE => DisconnectionPayload::parse(payload),
                    _ => None,
                };
                match request {
                    Some(request) => callback(
                        request.dst_cid,
                        request.src_cid,
                        DisconnectionResponder {
                            responder,
                            local_cid: request.dst_cid,
                            remote_cid: request.src_cid,
                        },
                    ),
                    None => {
                        debug!(
                            "l2cap: Disconnection Request with {} byte payload",
                            payload.len()
                        );
                        responder.reject_not_understood();
                    }
                }
            }),
        );
    }

    /// Grant the peer `credits` more K-frames on our channel `local_cid`
    pub fn send_credits(&self, local_cid: ChannelId, credits: u16) -> bool {
        let payload = FlowControlCreditPayload {
            channel_id: local_cid,
            credits,
        };
        self.sig
            .send_command_without_response(LE_FLOW_CONTROL_CREDIT, &payload.to_bytes())
    }

    /// Route inbound credit indications to `callback`
    pub fn serve_credits(&self, callback: FlowControlCreditCallback) {
        self.sig.serve_request(
            LE_FLOW_CONTROL_CREDIT,
            Arc::new(move |payload, _responder| match FlowControlCreditPayload::parse(payload) {
                Some(indication) => callback(indication.channel_id, indication.credits),
                None => warn!(
                    "l2cap: malformed credit indication: {}",
                    hex::encode(payload)
                ),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ManualDispatcher;
    use crate::l2cap::channel::ChannelLink;
    use crate::l2cap::packet::build_command;
    use crate::l2cap::signaling::SignalingChannel;
    use crate::l2cap::tests::FakeLink;
    use crate::l2cap::types::{LinkType, SignalingConfig};
    use parking_lot::Mutex;
    use std::sync::Weak;

    struct Harness {
        sig: Arc<SignalingChannel>,
        link: Arc<FakeLink>,
        dispatcher: Arc<ManualDispatcher>,
        handler: CommandHandler,
    }

    fn harness() -> Harness {
        let link = FakeLink::new();
        let dispatcher = Arc::new(ManualDispatcher::new());
        let weak: Weak<dyn ChannelLink> = Arc::<FakeLink>::downgrade(&link);
        let sig = SignalingChannel::new(
            weak,
            0x0001,
            LinkType::Le,
            dispatcher.clone(),
            SignalingConfig::default(),
        );
        let handler = CommandHandler::new(sig.clone());
        Harness {
            sig,
            link,
            dispatcher,
            handler,
        }
    }

    fn recording_callback() -> (
        DisconnectionResponseCallback,
        Arc<Mutex<Vec<DisconnectionResponse>>>,
    ) {
        let responses = Arc::new(Mutex::new(Vec::new()));
        let sink = responses.clone();
        (Box::new(move |rsp| sink.lock().push(rsp)), responses)
    }

    #[test]
    fn test_disconnection_request_and_response() {
        let h = harness();
        let (callback, responses) = recording_callback();
        assert!(h.handler.send_disconnection_request(0x0041, 0x0040, callback));
        assert_eq!(
            h.link.take_signaling_commands(LE_SIGNALING_CHANNEL_ID),
            vec![build_command(DISCONNECTION_REQUEST, 1, &[0x41, 0x00, 0x40, 0x00])]
        );

        h.sig
            .handle_packet(&build_command(DISCONNECTION_RESPONSE, 1, &[0x41, 0x00, 0x40, 0x00]));
        assert_eq!(
            *responses.lock(),
            vec![DisconnectionResponse {
                status: Status::Success,
                local_cid: 0x0040,
                remote_cid: 0x0041,
                reject_reason: None,
            }]
        );
    }

    #[test]
    fn test_disconnection_rejected_invalid_cid() {
        let h = harness();
        let (callback, responses) = recording_callback();
        assert!(h.handler.send_disconnection_request(0x0041, 0x0040, callback));

        h.sig.handle_packet(&build_command(
            COMMAND_REJECT,
            1,
            &[0x02, 0x00, 0x41, 0x00, 0x40, 0x00],
        ));
        assert_eq!(
            *responses.lock(),
            vec![DisconnectionResponse {
                status: Status::Reject,
                local_cid: 0x0040,
                remote_cid: 0x0041,
                reject_reason: Some(RejectReason::InvalidChannelId),
            }]
        );
    }

    #[test]
    fn test_truncated_reject_not_reported() {
        let h = harness();
        let (callback, responses) = recording_callback();
        assert!(h.handler.send_disconnection_request(0x0041, 0x0040, callback));

        // Invalid CID reason without the two CIDs
        h.sig
            .handle_packet(&build_command(COMMAND_REJECT, 1, &[0x02, 0x00, 0x41, 0x00]));
        assert!(responses.lock().is_empty());
        assert_eq!(h.sig.pending_requests(), 0);
    }

    #[test]
    fn test_disconnection_request_times_out() {
        let h = harness();
        let (callback, responses) = recording_callback();
        assert!(h.handler.send_disconnection_request(0x0041, 0x0040, callback));

        h.dispatcher.advance(SIGNALING_RTX_TIMEOUT * 7);
        assert_eq!(
            *responses.lock(),
            vec![DisconnectionResponse {
                status: Status::TimedOut,
                local_cid: 0x0040,
                remote_cid: 0x0041,
                reject_reason: None,
            }]
        );
    }

    #[test]
    fn test_serve_disconnection_request() {
        let h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.handler
            .serve_disconnection_request(Arc::new(move |local, remote, responder| {
                sink.lock().push((local, remote));
                responder.send();
            }));

        h.sig
            .handle_packet(&build_command(DISCONNECTION_REQUEST, 6, &[0x40, 0x00, 0x41, 0x00]));
        assert_eq!(*seen.lock(), vec![(0x0040, 0x0041)]);
        assert_eq!(
            h.link.take_signaling_commands(LE_SIGNALING_CHANNEL_ID),
            vec![build_command(DISCONNECTION_RESPONSE, 6, &[0x40, 0x00, 0x41, 0x00])]
        );
    }

    #[test]
    fn test_serve_disconnection_request_bad_size() {
        let h = harness();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        h.handler
            .serve_disconnection_request(Arc::new(move |_, _, _| *flag.lock() = true));

        h.sig
            .handle_packet(&build_command(DISCONNECTION_REQUEST, 6, &[0x40, 0x00, 0x41]));
        assert!(!*called.lock());
        assert_eq!(
            h.link.take_signaling_commands(LE_SIGNALING_CHANNEL_ID),
            vec![build_command(COMMAND_REJECT, 6, &[0x00, 0x00])]
        );
    }

    #[test]
    fn test_responder_rejects_invalid_cid() {
        let h = harness();
        h.handler.serve_disconnection_request(Arc::new(|_, _, responder| {
            responder.reject_invalid_channel_id();
        }));
        h.sig
            .handle_packet(&build_command(DISCONNECTION_REQUEST, 2, &[0x40, 0x00, 0x41, 0x00]));
        assert_eq!(
            h.link.take_signaling_commands(LE_SIGNALING_CHANNEL_ID),
            vec![build_command(
                COMMAND_REJECT,
                2,
                &[0x02, 0x00, 0x40, 0x00, 0x41, 0x00]
            )]
        );
    }

    #[test]
    fn test_credits_sent_and_served() {
        let h = harness();
        assert!(h.handler.send_credits(0x0040, 5));
        assert_eq!(
            h.link.take_signaling_commands(LE_SIGNALING_CHANNEL_ID),
            vec![build_command(LE_FLOW_CONTROL_CREDIT, 1, &[0x40, 0x00, 0x05, 0x00])]
        );
        assert_eq!(h.sig.pending_requests(), 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.handler
            .serve_credits(Arc::new(move |cid, credits| sink.lock().push((cid, credits))));
        h.sig
            .handle_packet(&build_command(LE_FLOW_CONTROL_CREDIT, 9, &[0x41, 0x00, 0x03, 0x00]));
        assert_eq!(*seen.lock(), vec![(0x0041, 3)]);
        assert!(h.link.take_signaling_commands(LE_SIGNALING_CHANNEL_ID).is_empty());
    }
}
