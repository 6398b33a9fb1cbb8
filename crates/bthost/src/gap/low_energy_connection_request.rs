//! Aggregation of outgoing LE connection attempts

use crate::error::{HciError, HostError, StatusCode};
use crate::gap::constants::MAX_LE_CONNECTION_ATTEMPTS;
use crate::gap::types::{DeviceAddress, InitializingConnectionToken, PeerConnectionState, PeerId};
use crate::smp::BondableMode;
use crate::uuid::Uuid;
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;

/// Called once with the connection reference, or the reason the connection failed
pub type LowEnergyOnComplete<C> = Box<dyn FnOnce(Result<C, HostError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LowEnergyConnectionOptions {
    pub bondable_mode: BondableMode,
    /// Connection made by the background auto-connect procedure rather than a caller
    pub auto_connect: bool,
    /// Service to discover first, instead of every service on the peer
    pub service_uuid: Option<Uuid>,
}

/// An in-progress connection to one LE peer
pub struct LowEnergyConnectionRequest<C> {
    peer_id: PeerId,
    address: DeviceAddress,
    options: LowEnergyConnectionOptions,
    peer_init_token: Option<InitializingConnectionToken>,
    callbacks: Vec<LowEnergyOnComplete<C>>,
    connection_attempts: u32,
    discovered: bool,
}

impl<C> LowEnergyConnectionRequest<C> {
    /// Start a request with its first caller. The token keeps the peer marked as
    /// initializing until the request finishes.
    pub fn new(
        peer_id: PeerId,
        address: DeviceAddress,
        options: LowEnergyConnectionOptions,
        peer_init_token: InitializingConnectionToken,
        callback: LowEnergyOnComplete<C>,
    ) -> Self {
        Self {
            peer_id,
            address,
            options,
            peer_init_token: Some(peer_init_token),
            callbacks: vec![callback],
            connection_attempts: 0,
            discovered: false,
        }
    }

    /// Peer this request is for
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Address the connection is made to
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Options of the caller that started the request
    pub fn options(&self) -> LowEnergyConnectionOptions {
        self.options
    }

    /// Queue another caller on the request in flight
    pub fn add_callback(&mut self, callback: LowEnergyOnComplete<C>) {
        self.callbacks.push(callback);
    }

    /// Number of connection attempts made so far
    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts
    }

    /// Count one more connection attempt
    pub fn add_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    /// Set once the peer has been seen advertising
    pub fn set_discovered(&mut self) {
        self.discovered = true;
    }

    /// Whether the peer has been seen advertising
    pub fn discovered(&self) -> bool {
        self.discovered
    }

    /// Only "connection failed to be established" is retried, up to the attempt limit
    pub fn should_retry(&self, failure: HciError) -> bool {
        failure.is(StatusCode::ConnectionFailedToBeEstablished)
            && self.connection_attempts < MAX_LE_CONNECTION_ATTEMPTS
    }

    fn finish(&mut self) -> Vec<LowEnergyOnComplete<C>> {
        self.peer_init_token = None;
        std::mem::take(&mut self.callbacks)
    }

    /// Release the initializing token, then answer every queued caller. On success each
    /// caller gets its own reference from `generate_ref`.
    pub fn notify_callbacks(
        &mut self,
        status: Result<(), HostError>,
        mut generate_ref: impl FnMut() -> C,
    ) {
        let callbacks = self.finish();
        debug!(
            "gap: LE request for peer {} done after {} attempt(s), notifying {} callback(s)",
            self.peer_id,
            self.connection_attempts,
            callbacks.len()
        );
        for callback in callbacks {
            match status {
                Ok(()) => callback(Ok(generate_ref())),
                Err(err) => callback(Err(err)),
            }
        }
    }

    /// Release the initializing token and fail every queued caller with `error`
    pub fn notify_failure(&mut self, error: HostError) {
        for callback in self.finish() {
            callback(Err(error));
        }
    }
}

impl<C> Drop for LowEnergyConnectionRequest<C> {
    fn drop(&mut self) {
        if !self.callbacks.is_empty() && !std::thread::panicking() {
            panic!(
                "gap: LE connection request for peer {} dropped with {} callback(s) pending",
                self.peer_id,
                self.callbacks.len()
            );
        }
    }
}

impl<C> fmt::Debug for LowEnergyConnectionRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowEnergyConnectionRequest")
            .field("peer_id", &self.peer_id)
            .field("address", &self.address)
            .field("options", &self.options)
            .field("callbacks", &self.callbacks.len())
            .field("connection_attempts", &self.connection_attempts)
            .finish()
    }
}

/// Outstanding LE connection requests, at most one per peer
pub struct LowEnergyConnectionRequests<C> {
    requests: HashMap<PeerId, LowEnergyConnectionRequest<C>>,
}

impl<C> Default for LowEnergyConnectionRequests<C> {
    fn default() -> Self {
        Self {
            requests: HashMap::new(),
        }
    }
}

impl<C> LowEnergyConnectionRequests<C> {
    /// Empty request table
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a connection to `peer_id`. Returns true if this started a new request,
    /// false if the callback joined the one in flight (whose options are kept).
    pub fn connect(
        &mut self,
        peer_id: PeerId,
        address: DeviceAddress,
        options: LowEnergyConnectionOptions,
        peer_state: &PeerConnectionState,
        callback: LowEnergyOnComplete<C>,
    ) -> bool {
        if let Some(request) = self.requests.get_mut(&peer_id) {
            debug!("gap: queuing LE connection request for peer {}", peer_id);
            request.add_callback(callback);
            return false;
        }
        info!(
            "gap: LE connecting to peer {} ({}, auto_connect: {})",
            peer_id, address, options.auto_connect
        );
        let request = LowEnergyConnectionRequest::new(
            peer_id,
            address,
            options,
            peer_state.register_initializing_connection(),
            callback,
        );
        self.requests.insert(peer_id, request);
        true
    }

    /// The request in flight for `peer_id`
    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut LowEnergyConnectionRequest<C>> {
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

    /// Remove the request for `peer_id` and answer its callers. Returns false if there
    /// was no request.
    pub fn complete(
        &mut self,
        peer_id: PeerId,
        status: Result<(), HostError>,
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
                request.notify_failure(HostError::LinkDisconnected);
                true
            }
            None => false,
        }
    }
}

impl<C> fmt::Debug for LowEnergyConnectionRequests<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowEnergyConnectionRequests")
            .field("requests", &self.requests.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::types::{AddressType, ConnectionState};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const PEER: PeerId = PeerId(0x10);

    fn address() -> DeviceAddress {
        DeviceAddress::new(AddressType::Random, [0xC1, 0, 0, 0, 0, 0xC0])
    }

    type Results = Arc<Mutex<Vec<Result<&'static str, HostError>>>>;

    fn callback(results: &Results) -> LowEnergyOnComplete<&'static str> {
        let results = results.clone();
        Box::new(move |result| results.lock().push(result))
    }

    #[test]
    fn test_retry_only_while_attempts_remain() {
        let state = PeerConnectionState::new();
        let results = Results::default();
        let mut req = LowEnergyConnectionRequest::new(
            PEER,
            address(),
            LowEnergyConnectionOptions::default(),
            state.register_initializing_connection(),
            callback(&results),
        );
        let failed: HciError = StatusCode::ConnectionFailedToBeEstablished.into();

        req.add_connection_attempt();
        assert!(req.should_retry(failed));
        assert!(!req.should_retry(StatusCode::ConnectionTimeout.into()));
        req.add_connection_attempt();
        assert!(req.should_retry(failed));
        req.add_connection_attempt();
        assert!(!req.should_retry(failed));

        req.notify_failure(HostError::Failed);
        assert_eq!(*results.lock(), vec![Err(HostError::Failed)]);
    }

    #[test]
    fn test_queued_callbacks_share_result() {
        let state = PeerConnectionState::new();
        let results = Results::default();
        let mut requests = LowEnergyConnectionRequests::new();
        let options = LowEnergyConnectionOptions {
            bondable_mode: BondableMode::NonBondable,
            auto_connect: true,
            service_uuid: Some(Uuid::from(0x180Du16)),
        };

        assert!(requests.connect(PEER, address(), options, &state, callback(&results)));
        assert!(!requests.connect(
            PEER,
            address(),
            LowEnergyConnectionOptions::default(),
            &state,
            callback(&results)
        ));
        let kept = requests.get_mut(PEER).map(|req| req.options());
        assert_eq!(kept, Some(options));
        assert_eq!(state.state(), ConnectionState::Initializing);

        assert!(requests.complete(PEER, Ok(()), || "conn"));
        assert_eq!(*results.lock(), vec![Ok("conn"), Ok("conn")]);
        assert_eq!(state.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn test_link_closed_reports_disconnect() {
        let state = PeerConnectionState::new();
        let results = Results::default();
        let mut requests = LowEnergyConnectionRequests::new();
        requests.connect(
            PEER,
            address(),
            LowEnergyConnectionOptions::default(),
            &state,
            callback(&results),
        );
        if let Some(req) = requests.get_mut(PEER) {
            req.set_discovered();
            assert!(req.discovered());
        }

        assert!(requests.on_link_closed(PEER));
        assert!(requests.is_empty());
        assert_eq!(*results.lock(), vec![Err(HostError::LinkDisconnected)]);
    }

    #[test]
    #[should_panic]
    fn test_dropping_with_pending_callbacks_panics() {
        let state = PeerConnectionState::new();
        let results = Results::default();
        let mut requests = LowEnergyConnectionRequests::new();
        requests.connect(
            PEER,
            address(),
            LowEnergyConnectionOptions::default(),
            &state,
            callback(&results),
        );
        drop(requests);
    }
}
