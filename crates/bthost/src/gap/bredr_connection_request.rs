//! Aggregation of outgoing BR/EDR connection attempts
//!
//! Every caller that asks for a connection to a peer while a Create Connection is already
//! outstanding is queued on the same [`BrEdrConnectionRequest`] and answered together when
//! the link layer reports the result.

use crate::dispatcher::Dispatcher;
use crate::error::{HciError, HciResult, HostError, StatusCode};
use crate::gap::constants::PAGE_TIMEOUT_RETRY_WINDOW;
use crate::gap::types::{DeviceAddress, InitializingConnectionToken, PeerConnectionState, PeerId};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Called once with the connection reference, or the reason the connection failed
pub type OnComplete<C> = Box<dyn FnOnce(HciResult<C>) + Send>;

/// An in-progress connection to one BR/EDR peer
pub struct BrEdrConnectionRequest<C> {
    dispatcher: Arc<dyn Dispatcher>,
    peer_id: PeerId,
    address: DeviceAddress,
    peer_init_token: Option<InitializingConnectionToken>,
    callbacks: Vec<OnComplete<C>>,
    first_create_connection_req_made: Option<Instant>,
    has_incoming: bool,
}

impl<C> BrEdrConnectionRequest<C> {
    /// Request started by a local caller
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        peer_id: PeerId,
        address: DeviceAddress,
        peer_init_token: InitializingConnectionToken,
        callback: OnComplete<C>,
    ) -> Self {
        Self {
            dispatcher,
            peer_id,
            address,
            peer_init_token: Some(peer_init_token),
            callbacks: vec![callback],
            first_create_connection_req_made: None,
            has_incoming: false,
        }
    }

    /// Request created for a connection the peer initiated
    pub fn new_incoming(
        dispatcher: Arc<dyn Dispatcher>,
        peer_id: PeerId,
        address: DeviceAddress,
        peer_init_token: InitializingConnectionToken,
    ) -> Self {
        Self {
            dispatcher,
            peer_id,
            address,
            peer_init_token: Some(peer_init_token),
            callbacks: Vec::new(),
            first_create_connection_req_made: None,
            has_incoming: true,
        }
    }

    /// Peer this request is for
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Address of the peer being connected
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Queue another local caller on this request
    pub fn add_callback(&mut self, callback: OnComplete<C>) {
        self.callbacks.push(callback);
    }

    /// True while a local caller is waiting for the result
    pub fn awaiting_outgoing(&self) -> bool {
        !self.callbacks.is_empty()
    }

    /// True while the peer is also connecting to us
    pub fn has_incoming(&self) -> bool {
        self.has_incoming
    }

    /// Mark that the peer started connecting
    pub fn begin_incoming(&mut self) {
        self.has_incoming = true;
    }

    /// Mark that the peer's connection attempt finished
    pub fn complete_incoming(&mut self) {
        self.has_incoming = false;
    }

    /// Remember when the first Create Connection for this request went out. Later
    /// attempts do not move the retry window.
    pub fn record_hci_create_connection_attempt(&mut self) {
        if self.first_create_connection_req_made.is_none() {
            self.first_create_connection_req_made = Some(self.dispatcher.now());
        }
    }

    /// Whether a failed attempt may be retried: only page timeouts, and only inside the
    /// retry window measured from the first attempt.
    pub fn should_retry(&self, failure: HciError) -> bool {
        if !failure.is(StatusCode::PageTimeout) {
            return false;
        }
        let first = match self.first_create_connection_req_made {
            Some(first) => first,
            None => return false,
        };
        self.dispatcher.now().saturating_duration_since(first) < PAGE_TIMEOUT_RETRY_WINDOW
    }

    /// Drop the initializing token so observers see the post-completion state, then hand
    /// back the callbacks to answer
    fn finish(&mut self) -> Vec<OnComplete<C>> {
        self.peer_init_token = None;
        let callbacks = std::mem::take(&mut self.callbacks);
        debug!(
            "gap: notifying {} callback(s) for peer {}",
            callbacks.len(),
            self.peer_id
        );
        callbacks
    }

    /// Release the initializing token, then answer every queued caller with `status`.
    /// On success each caller gets its own reference from `generate_ref`.
    pub fn notify_callbacks(&mut self, status: HciResult<()>, mut generate_ref: impl FnMut() -> C) {
        for callback in self.finish() {
            match status {
                Ok(()) => callback(Ok(generate_ref())),
                Err(err) => callback(Err(err)),
            }
        }
    }

    /// Answer every queued caller with `error`
    pub fn notify_failure(&mut self, error: HciError) {
        for callback in self.finish() {
            callback(Err(error));
        }
    }
}

impl<C> Drop for BrEdrConnectionRequest<C> {
    fn drop(&mut self) {
        if !self.callbacks.is_empty() && !std::thread::panicking() {
            panic!(
                "gap: BR/EDR connection request for peer {} dropped with {} callback(s) pending",
                self.peer_id,
                self.callbacks.len()
            );
        }
    }
}

impl<C> fmt::Debug for BrEdrConnectionRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrEdrConnectionRequest")
            .field("peer_id", &self.peer_id)
            .field("address", &self.address)
            .field("callbacks", &self.callbacks.len())
            .field("has_incoming", &self.has_incoming)
            .finish()
    }
}

/// Whether a connect call started a new request or joined one in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDisposition {
    /// The caller must issue Create Connection
    New,
    /// Joined an outstanding request; no new link-layer attempt
    Queued,
}

/// Outstanding BR/EDR connection requests, at most one per peer
pub struct BrEdrConnectionRequests<C> {
    dispatcher: Arc<dyn Dispatcher>,
    requests: HashMap<PeerId, BrEdrConnectionRequest<C>>,
}

impl<C> BrEdrConnectionRequests<C> {
    /// Empty request table. `dispatcher` supplies the clock for retry windows.
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            requests: HashMap::new(),
        }
    }

    /// Ask for a connection to `peer_id`, joining the request in flight if there is one
    pub fn connect(
        &mut self,
        peer_id: PeerId,
        address: DeviceAddress,
        peer_state: &PeerConnectionState,
        callback: OnComplete<C>,
    ) -> RequestDisposition {
        if let Some(request) = self.requests.get_mut(&peer_id) {
            debug!("gap: queuing connection request for peer {}", peer_id);
            request.add_callback(callback);
            return RequestDisposition::Queued;
        }
        info!("gap: connecting to peer {} ({})", peer_id, address);
        let request = BrEdrConnectionRequest::new(
            self.dispatcher.clone(),
            peer_id,
            address,
            peer_state.register_initializing_connection(),
            callback,
        );
        self.requests.insert(peer_id, request);
        RequestDisposition::New
    }

    /// Track a connection the peer initiated. Returns false if a request already exists,
    /// in which case it is marked as also having an incoming connection.
    pub fn begin_incoming(
        &mut self,
        peer_id: PeerId,
        address: DeviceAddress,
        peer_state: &PeerConnectionState,
    ) -> bool {
        if let Some(request) = self.requests.get_mut(&peer_id) {
            request.begin_incoming();
            return false;
        }
        let request = BrEdrConnectionRequest::new_incoming(
            self.dispatcher.clone(),
            peer_id,
            address,
            peer_state.register_initializing_connection(),
        );
        self.requests.insert(peer_id, request);
        true
    }

    /// The request in flight for `peer_id`
    pub fn get(&self, peer_id: PeerId) -> Option<&BrEdrConnectionRequest<C>> {
        self.requests.get(&peer_id)
    }

    /// The request in flight for `peer_id`
    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut BrEdrConnectionRequest<C>> {
        self.requests.get_mut(&peer_id)
    }

    /// Whether a request is in flight for `peer_id`
    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.requests.contains_key(&peer_id)
    }

    /// Number of peers with a request in flight
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Finish the request for `peer_id` and answer its callers. Returns false if there
    /// was no request.
    pub fn complete(
        &mut self,
        peer_id: PeerId,
        status: HciResult<()>,
        generate_ref: impl FnMut() -> C,
    ) -> bool {
        match self.requests.remove(&peer_id) {
            Some(mut request) => {
                request.notify_callbacks(status, generate_ref);
                true
            }
            None => false,
        }
    }

    /// The link to `peer_id` went away before the request resolved
    pub fn on_link_closed(&mut self, peer_id: PeerId) -> bool {
        match self.requests.remove(&peer_id) {
            Some(mut request) => {
                debug!("gap: link to peer {} closed with request pending", peer_id);
                request.notify_failure(HostError::LinkDisconnected.into());
                true
            }
            None => false,
        }
    }
}

impl<C> fmt::Debug for BrEdrConnectionRequests<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrEdrConnectionRequests")
            .field("requests", &self.requests.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ManualDispatcher;
    use crate::gap::types::{AddressType, ConnectionState};
    use parking_lot::Mutex;
    use std::time::Duration;

    const PEER: PeerId = PeerId(1);

    fn address() -> DeviceAddress {
        DeviceAddress::new(AddressType::Public, [1, 2, 3, 4, 5, 6])
    }

    type Results = Arc<Mutex<Vec<HciResult<u32>>>>;

    fn recorder() -> (Results, impl Fn() -> OnComplete<u32>) {
        let results: Results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        let make = move || -> OnComplete<u32> {
            let sink = sink.clone();
            Box::new(move |result| sink.lock().push(result))
        };
        (results, make)
    }

    fn request(
        dispatcher: &Arc<ManualDispatcher>,
        state: &PeerConnectionState,
        callback: OnComplete<u32>,
    ) -> BrEdrConnectionRequest<u32> {
        BrEdrConnectionRequest::new(
            dispatcher.clone(),
            PEER,
            address(),
            state.register_initializing_connection(),
            callback,
        )
    }

    #[test]
    fn test_all_callbacks_get_their_own_reference() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let (results, make) = recorder();
        let mut req = request(&dispatcher, &state, make());
        req.add_callback(make());
        req.add_callback(make());

        let mut next_ref = 0;
        req.notify_callbacks(Ok(()), || {
            next_ref += 1;
            next_ref
        });
        assert_eq!(*results.lock(), vec![Ok(1), Ok(2), Ok(3)]);
        assert!(!req.awaiting_outgoing());
    }

    #[test]
    fn test_init_token_released_before_callbacks_run() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let observed = Arc::new(Mutex::new(None));
        let seen = observed.clone();
        let observer = state.clone();
        let mut req = request(
            &dispatcher,
            &state,
            Box::new(move |_| *seen.lock() = Some(observer.state())),
        );
        assert_eq!(state.state(), ConnectionState::Initializing);

        req.notify_failure(StatusCode::PageTimeout.into());
        assert_eq!(*observed.lock(), Some(ConnectionState::NotConnected));
    }

    #[test]
    fn test_page_timeout_retried_within_window() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let (_results, make) = recorder();
        let mut req = request(&dispatcher, &state, make());
        let page_timeout: HciError = StatusCode::PageTimeout.into();

        // No attempt recorded yet
        assert!(!req.should_retry(page_timeout));

        req.record_hci_create_connection_attempt();
        assert!(req.should_retry(page_timeout));
        assert!(!req.should_retry(StatusCode::AuthenticationFailure.into()));
        assert!(!req.should_retry(HostError::TimedOut.into()));

        dispatcher.advance(Duration::from_secs(20));
        // A later attempt does not restart the window
        req.record_hci_create_connection_attempt();
        dispatcher.advance(Duration::from_secs(9));
        assert!(req.should_retry(page_timeout));

        dispatcher.advance(Duration::from_secs(1));
        assert!(!req.should_retry(page_timeout));

        req.notify_failure(page_timeout);
    }

    #[test]
    fn test_incoming_flag() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let mut req: BrEdrConnectionRequest<u32> = BrEdrConnectionRequest::new_incoming(
            dispatcher,
            PEER,
            address(),
            state.register_initializing_connection(),
        );
        assert!(req.has_incoming());
        assert!(!req.awaiting_outgoing());
        req.complete_incoming();
        assert!(!req.has_incoming());
        req.begin_incoming();
        assert!(req.has_incoming());
    }

    #[test]
    #[should_panic]
    fn test_dropping_with_pending_callbacks_panics() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let (_results, make) = recorder();
        let _req = request(&dispatcher, &state, make());
    }

    #[test]
    fn test_second_connect_joins_outstanding_request() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let (results, make) = recorder();
        let mut requests = BrEdrConnectionRequests::new(dispatcher);

        assert_eq!(requests.connect(PEER, address(), &state, make()), RequestDisposition::New);
        assert_eq!(requests.connect(PEER, address(), &state, make()), RequestDisposition::Queued);
        assert_eq!(requests.len(), 1);
        assert_eq!(state.state(), ConnectionState::Initializing);

        assert!(requests.complete(PEER, Ok(()), || 7));
        assert_eq!(*results.lock(), vec![Ok(7), Ok(7)]);
        assert!(requests.is_empty());
        assert!(!requests.complete(PEER, Ok(()), || 7));
    }

    #[test]
    fn test_link_closed_fails_every_callback_once() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let (results, make) = recorder();
        let mut requests = BrEdrConnectionRequests::new(dispatcher);
        requests.connect(PEER, address(), &state, make());
        requests.connect(PEER, address(), &state, make());

        assert!(requests.on_link_closed(PEER));
        assert!(!requests.on_link_closed(PEER));
        let expected: HciError = HostError::LinkDisconnected.into();
        assert_eq!(*results.lock(), vec![Err(expected), Err(expected)]);
        assert_eq!(state.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn test_incoming_then_outgoing_share_request() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let state = PeerConnectionState::new();
        let (results, make) = recorder();
        let mut requests = BrEdrConnectionRequests::new(dispatcher);

        assert!(requests.begin_incoming(PEER, address(), &state));
        assert_eq!(requests.connect(PEER, address(), &state, make()), RequestDisposition::Queued);
        let req = requests.get(PEER).map(|req| (req.has_incoming(), req.awaiting_outgoing()));
        assert_eq!(req, Some((true, true)));

        requests.complete(PEER, Ok(()), || 3);
        assert_eq!(*results.lock(), vec![Ok(3)]);
    }
}
