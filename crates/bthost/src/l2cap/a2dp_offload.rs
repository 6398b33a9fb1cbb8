//! A2DP offload state tracking
//!
//! When the controller encodes and sends A2DP media itself, the host has to start and
//! stop that offload with vendor commands and must remember which channel is offloaded
//! so nothing else is sent on it. Only one channel can be offloaded at a time.

use super::types::{ChannelId, ConnectionHandle};
use crate::error::{HciResult, HostError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Completion of an offload start or stop
pub type OffloadCallback = Box<dyn FnOnce(HciResult<()>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A2dpCodec {
    Sbc,
    Aac,
    Ldac,
    AptX,
    AptXHd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A2dpSamplingFrequency {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A2dpBitsPerSample {
    Bits16,
    Bits24,
    Bits32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A2dpChannelMode {
    Mono,
    Stereo,
}

/// Stream parameters handed to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A2dpOffloadConfiguration {
    pub codec: A2dpCodec,
    pub max_latency: u16,
    pub scms_t_enable: bool,
    pub scms_t_header: u8,
    pub sampling_frequency: A2dpSamplingFrequency,
    pub bits_per_sample: A2dpBitsPerSample,
    pub channel_mode: A2dpChannelMode,
    pub encoded_audio_bit_rate: u32,
    /// Codec-specific information elements as negotiated over AVDTP
    pub codec_information: Vec<u8>,
}

/// Issues the vendor commands that start and stop offloading
pub trait OffloadCommandSink: Send + Sync {
    fn start_a2dp_offload(
        &self,
        config: &A2dpOffloadConfiguration,
        link_handle: ConnectionHandle,
        remote_id: ChannelId,
        max_tx_sdu_size: u16,
        callback: OffloadCallback,
    );

    fn stop_a2dp_offload(&self, callback: OffloadCallback);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A2dpOffloadStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for A2dpOffloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            A2dpOffloadStatus::Stopped => "stopped",
            A2dpOffloadStatus::Starting => "starting",
            A2dpOffloadStatus::Started => "started",
            A2dpOffloadStatus::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct OffloadState {
    status: A2dpOffloadStatus,
    /// `(local_id, link_handle)` of the channel being offloaded
    offloaded_channel: Option<(ChannelId, ConnectionHandle)>,
    /// Stops waiting for the in-flight command
    pending_stop_callbacks: Vec<OffloadCallback>,
}

pub struct A2dpOffloadManager {
    weak_self: Weak<A2dpOffloadManager>,
    sink: Arc<dyn OffloadCommandSink>,
    state: Mutex<OffloadState>,
}

impl A2dpOffloadManager {
    /// Create a manager that issues its vendor commands through `sink`
    pub fn new(sink: Arc<dyn OffloadCommandSink>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            sink,
            state: Mutex::new(OffloadState {
                status: A2dpOffloadStatus::Stopped,
                offloaded_channel: None,
                pending_stop_callbacks: Vec::new(),
            }),
        })
    }

    /// Current offload state
    pub fn status(&self) -> A2dpOffloadStatus {
        self.state.lock().status
    }

    /// Start offloading the channel `(local_id, link_handle)`. Fails with `InProgress` if
    /// any channel is already offloaded or a command is in flight.
    pub fn start_a2dp_offload(
        &self,
        config: &A2dpOffloadConfiguration,
        local_id: ChannelId,
        remote_id: ChannelId,
        link_handle: ConnectionHandle,
        max_tx_sdu_size: u16,
        callback: OffloadCallback,
    ) {
        {
            let mut state = self.state.lock();
            if state.status != A2dpOffloadStatus::Stopped {
                warn!(
                    "l2cap: A2DP offload already {} (channel {:#06x})",
                    state.status, local_id
                );
                drop(state);
                callback(Err(HostError::InProgress.into()));
                return;
            }
            state.status = A2dpOffloadStatus::Starting;
            state.offloaded_channel = Some((local_id, link_handle));
        }

        info!(
            "l2cap: starting A2DP offload ({:?}) on channel {:#06x} link {:#06x}",
            config.codec, local_id, link_handle
        );
        let weak = self.weak_self.clone();
        self.sink.start_a2dp_offload(
            config,
            link_handle,
            remote_id,
            max_tx_sdu_size,
            Box::new(move |result| match weak.upgrade() {
                Some(manager) => manager.on_start_complete(result, callback),
                None => callback(result),
            }),
        );
    }

    fn on_start_complete(&self, result: HciResult<()>, callback: OffloadCallback) {
        let parked_stops = {
            let mut state = self.state.lock();
            match result {
                Ok(()) if state.pending_stop_callbacks.is_empty() => {
                    state.status = A2dpOffloadStatus::Started;
                    None
                }
                Ok(()) => {
                    state.status = A2dpOffloadStatus::Stopping;
                    None
                }
                Err(err) => {
                    warn!("l2cap: A2DP offload start failed: {}", err);
                    state.status = A2dpOffloadStatus::Stopped;
                    state.offloaded_channel = None;
                    Some(std::mem::take(&mut state.pending_stop_callbacks))
                }
            }
        };

        callback(result);

        match parked_stops {
            // Nothing was offloaded, so the parked stops succeed trivially
            Some(stops) => {
                for stop in stops {
                    stop(Ok(()));
                }
            }
            None if self.status() == A2dpOffloadStatus::Stopping => self.send_stop_command(),
            None => {}
        }
    }

    /// Stop offloading the channel `(local_id, link_handle)`. Succeeds immediately if
    /// nothing (or another channel) is offloaded.
    pub fn stop_a2dp_offload(
        &self,
        local_id: ChannelId,
        link_handle: ConnectionHandle,
        callback: OffloadCallback,
    ) {
        {
            let mut state = self.state.lock();
            if state.status == A2dpOffloadStatus::Stopped {
                drop(state);
                callback(Ok(()));
                return;
            }
            if state.offloaded_channel != Some((local_id, link_handle)) {
                debug!(
                    "l2cap: channel {:#06x} is not the offloaded channel, nothing to stop",
                    local_id
                );
                drop(state);
                callback(Ok(()));
                return;
            }
            state.pending_stop_callbacks.push(callback);
            match state.status {
                A2dpOffloadStatus::Starting | A2dpOffloadStatus::Stopping => return,
                _ => state.status = A2dpOffloadStatus::Stopping,
            }
        }
        self.send_stop_command();
    }

    fn send_stop_command(&self) {
        info!("l2cap: stopping A2DP offload");
        let weak = self.weak_self.clone();
        self.sink.stop_a2dp_offload(Box::new(move |result| {
            if let Some(manager) = weak.upgrade() {
                manager.on_stop_complete(result);
            }
        }));
    }

    fn on_stop_complete(&self, result: HciResult<()>) {
        let callbacks = {
            let mut state = self.state.lock();
            match result {
                Ok(()) => {
                    state.status = A2dpOffloadStatus::Stopped;
                    state.offloaded_channel = None;
                }
                Err(err) => {
                    warn!("l2cap: A2DP offload stop failed: {}", err);
                    state.status = A2dpOffloadStatus::Started;
                }
            }
            std::mem::take(&mut state.pending_stop_callbacks)
        };
        for callback in callbacks {
            callback(result);
        }
    }

    /// Whether `(local_id, link_handle)` is being offloaded or about to be
    pub fn is_channel_offloaded(&self, local_id: ChannelId, link_handle: ConnectionHandle) -> bool {
        let state = self.state.lock();
        matches!(
            state.status,
            A2dpOffloadStatus::Starting | A2dpOffloadStatus::Started
        ) && state.offloaded_channel == Some((local_id, link_handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HciError, StatusCode};

    /// Holds commands until the test completes them
    #[derive(Default)]
    struct FakeSink {
        starts: Mutex<Vec<(ConnectionHandle, ChannelId, u16, OffloadCallback)>>,
        stops: Mutex<Vec<OffloadCallback>>,
    }

    impl FakeSink {
        fn complete_start(&self, result: HciResult<()>) {
            let (_, _, _, callback) = self.starts.lock().remove(0);
            callback(result);
        }

        fn complete_stop(&self, result: HciResult<()>) {
            let callback = self.stops.lock().remove(0);
            callback(result);
        }
    }

    impl OffloadCommandSink for FakeSink {
        fn start_a2dp_offload(
            &self,
            _config: &A2dpOffloadConfiguration,
            link_handle: ConnectionHandle,
            remote_id: ChannelId,
            max_tx_sdu_size: u16,
            callback: OffloadCallback,
        ) {
            self.starts
                .lock()
                .push((link_handle, remote_id, max_tx_sdu_size, callback));
        }

        fn stop_a2dp_offload(&self, callback: OffloadCallback) {
            self.stops.lock().push(callback);
        }
    }

    fn config() -> A2dpOffloadConfiguration {
        A2dpOffloadConfiguration {
            codec: A2dpCodec::Sbc,
            max_latency: 0xFFFF,
            scms_t_enable: false,
            scms_t_header: 0,
            sampling_frequency: A2dpSamplingFrequency::Hz44100,
            bits_per_sample: A2dpBitsPerSample::Bits16,
            channel_mode: A2dpChannelMode::Stereo,
            encoded_audio_bit_rate: 328_000,
            codec_information: vec![0x21, 0x15, 0x02, 0x35],
        }
    }

    type Results = Arc<Mutex<Vec<HciResult<()>>>>;

    fn recorder() -> (Results, impl Fn() -> OffloadCallback) {
        let results: Results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();
        (results, move || {
            let sink = sink.clone();
            Box::new(move |result| sink.lock().push(result)) as OffloadCallback
        })
    }

    fn manager() -> (Arc<A2dpOffloadManager>, Arc<FakeSink>) {
        let sink = Arc::new(FakeSink::default());
        (A2dpOffloadManager::new(sink.clone()), sink)
    }

    #[test]
    fn test_start_then_stop() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();

        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        assert_eq!(manager.status(), A2dpOffloadStatus::Starting);
        assert!(manager.is_channel_offloaded(0x0040, 0x0001));
        {
            let starts = sink.starts.lock();
            assert_eq!((starts[0].0, starts[0].1, starts[0].2), (0x0001, 0x0041, 672));
        }

        sink.complete_start(Ok(()));
        assert_eq!(manager.status(), A2dpOffloadStatus::Started);
        assert!(manager.is_channel_offloaded(0x0040, 0x0001));
        assert!(!manager.is_channel_offloaded(0x0040, 0x0002));

        manager.stop_a2dp_offload(0x0040, 0x0001, cb());
        assert_eq!(manager.status(), A2dpOffloadStatus::Stopping);
        assert!(!manager.is_channel_offloaded(0x0040, 0x0001));
        sink.complete_stop(Ok(()));
        assert_eq!(manager.status(), A2dpOffloadStatus::Stopped);
        assert_eq!(*results.lock(), vec![Ok(()), Ok(())]);
    }

    #[test]
    fn test_second_start_in_progress() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();
        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        manager.start_a2dp_offload(&config(), 0x0042, 0x0043, 0x0001, 672, cb());

        assert_eq!(
            *results.lock(),
            vec![Err(HciError::Host(HostError::InProgress))]
        );
        assert_eq!(sink.starts.lock().len(), 1);
    }

    #[test]
    fn test_start_failure_returns_to_stopped() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();
        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        sink.complete_start(Err(StatusCode::UnknownCommand.into()));

        assert_eq!(manager.status(), A2dpOffloadStatus::Stopped);
        assert!(!manager.is_channel_offloaded(0x0040, 0x0001));
        assert_eq!(
            *results.lock(),
            vec![Err(HciError::Controller(StatusCode::UnknownCommand))]
        );
    }

    #[test]
    fn test_stop_when_stopped_or_other_channel() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();
        manager.stop_a2dp_offload(0x0040, 0x0001, cb());
        assert_eq!(*results.lock(), vec![Ok(())]);

        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        sink.complete_start(Ok(()));
        manager.stop_a2dp_offload(0x0050, 0x0001, cb());
        assert_eq!(results.lock().len(), 3);
        assert!(sink.stops.lock().is_empty());
        assert_eq!(manager.status(), A2dpOffloadStatus::Started);
    }

    #[test]
    fn test_stop_parked_while_starting() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();
        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        manager.stop_a2dp_offload(0x0040, 0x0001, cb());
        assert!(sink.stops.lock().is_empty());

        sink.complete_start(Ok(()));
        assert_eq!(manager.status(), A2dpOffloadStatus::Stopping);
        assert_eq!(sink.stops.lock().len(), 1);
        assert_eq!(results.lock().len(), 1);

        sink.complete_stop(Ok(()));
        assert_eq!(*results.lock(), vec![Ok(()), Ok(())]);
        assert_eq!(manager.status(), A2dpOffloadStatus::Stopped);
    }

    #[test]
    fn test_parked_stop_succeeds_when_start_fails() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();
        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        manager.stop_a2dp_offload(0x0040, 0x0001, cb());
        sink.complete_start(Err(StatusCode::CommandDisallowed.into()));

        assert_eq!(
            *results.lock(),
            vec![Err(HciError::Controller(StatusCode::CommandDisallowed)), Ok(())]
        );
        assert!(sink.stops.lock().is_empty());
    }

    #[test]
    fn test_stops_while_stopping_share_result() {
        let (manager, sink) = manager();
        let (results, cb) = recorder();
        manager.start_a2dp_offload(&config(), 0x0040, 0x0041, 0x0001, 672, cb());
        sink.complete_start(Ok(()));
        manager.stop_a2dp_offload(0x0040, 0x0001, cb());
        manager.stop_a2dp_offload(0x0040, 0x0001, cb());
        assert_eq!(sink.stops.lock().len(), 1);

        sink.complete_stop(Err(StatusCode::UnspecifiedError.into()));
        let failure = Err(HciError::Controller(StatusCode::UnspecifiedError));
        assert_eq!(*results.lock(), vec![Ok(()), failure, failure]);
        assert_eq!(manager.status(), A2dpOffloadStatus::Started);
        assert!(manager.is_channel_offloaded(0x0040, 0x0001));
    }
}
