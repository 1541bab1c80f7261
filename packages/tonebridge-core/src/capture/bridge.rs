//! Push side of the capture bridge.
//!
//! The [`CaptureBridge`] registers itself as the backend's delivery sink and
//! forwards packets into the capture queue. The queue is an unbounded mpsc
//! channel paired with an atomic depth counter: the delivery callback never
//! blocks, it simply refuses packets (returning 0 consumed frames) while the
//! consumer is behind. The backend retries refused data on its own schedule.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::backend::{AudioPacket, DeliverySink, MusicBackend, TrackInfo};
use crate::state::CaptureConfig;

use super::{PcmStream, PlayError};

/// Lifecycle of one capture bridge.
///
/// `Stopped` is reachable from every non-`Idle` state and is terminal;
/// repeated stops are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Loading,
    Playing,
    Ended,
    Failed,
    Stopped,
}

/// Event carried through the capture queue.
///
/// At most one terminal (`End`/`Error`) is ever posted per stream, always
/// after the last audio packet.
#[derive(Debug)]
pub(crate) enum DeliveryEvent {
    Audio(AudioPacket),
    End,
    Error(String),
}

/// Bridges the backend's push callbacks onto the capture queue.
pub struct CaptureBridge {
    backend: Arc<dyn MusicBackend>,
    track: TrackInfo,
    tx: mpsc::UnboundedSender<DeliveryEvent>,
    /// Packets admitted but not yet dequeued by the consumer.
    depth: AtomicUsize,
    max_queue_depth: usize,
    state: Mutex<BridgeState>,
    terminal_posted: AtomicBool,
}

impl CaptureBridge {
    /// Creates a bridge for one track, returning it together with the pull
    /// side of the capture queue.
    pub fn new(
        backend: Arc<dyn MusicBackend>,
        track: TrackInfo,
        config: &CaptureConfig,
    ) -> (Arc<Self>, PcmStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            backend,
            track,
            tx,
            depth: AtomicUsize::new(0),
            max_queue_depth: config.max_queue_depth,
            state: Mutex::new(BridgeState::Idle),
            terminal_posted: AtomicBool::new(false),
        });
        let stream = PcmStream::new(Arc::clone(&bridge), rx, config);
        (bridge, stream)
    }

    /// Registers the delivery callbacks and starts playback.
    ///
    /// Transitions `Idle → Loading → Playing`. Availability is checked by
    /// the caller before constructing the bridge.
    pub fn start(self: &Arc<Self>) -> Result<(), PlayError> {
        {
            let mut state = self.state.lock();
            if *state != BridgeState::Idle {
                return Err(PlayError::Backend(format!(
                    "cannot start from {:?}",
                    *state
                )));
            }
            *state = BridgeState::Loading;
        }

        log::debug!("[Capture] Starting playback of {}", self.track.uri);
        self.backend.attach(Arc::clone(self) as Arc<dyn DeliverySink>);

        if let Err(e) = self.backend.load(&self.track) {
            *self.state.lock() = BridgeState::Failed;
            self.backend.detach();
            return Err(PlayError::Backend(e.to_string()));
        }

        *self.state.lock() = BridgeState::Playing;
        self.backend.play(true);
        Ok(())
    }

    /// Stops playback and deregisters the callbacks.
    ///
    /// Idempotent; safe to call from any state, including from the backend's
    /// delivery thread.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                BridgeState::Idle | BridgeState::Stopped => return,
                _ => *state = BridgeState::Stopped,
            }
        }
        log::debug!("[Capture] Stopping playback of {}", self.track.uri);
        self.backend.play(false);
        self.backend.unload();
        self.backend.detach();
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// Returns the track this bridge is capturing.
    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    /// Records a stream outcome without clobbering an already-stopped bridge.
    fn note_outcome(&self, outcome: BridgeState) {
        let mut state = self.state.lock();
        if matches!(*state, BridgeState::Loading | BridgeState::Playing) {
            *state = outcome;
        }
    }

    /// Posts the terminal event, at most once per stream.
    fn post_terminal(&self, event: DeliveryEvent) {
        if self
            .terminal_posted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // A send failure just means the consumer is already gone.
            let _ = self.tx.send(event);
        }
    }

    /// Consumer-side hook: one audio packet left the queue.
    pub(crate) fn packet_dequeued(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DeliverySink for CaptureBridge {
    fn on_music(&self, packet: AudioPacket) -> usize {
        // Refuse while the consumer is behind; the backend retries the same
        // data later. Nothing is enqueued on refusal.
        if self.depth.load(Ordering::Acquire) > self.max_queue_depth {
            return 0;
        }

        let frames = packet.frame_count;
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(DeliveryEvent::Audio(packet)).is_err() {
            // Consumer dropped the queue; report full consumption so the
            // backend finishes on its own while the bridge winds down.
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        frames
    }

    fn on_end_of_track(&self) {
        log::debug!("[Capture] End of track {}", self.track.uri);
        self.note_outcome(BridgeState::Ended);
        self.stop();
        self.post_terminal(DeliveryEvent::End);
    }

    fn on_error(&self, kind: &str) {
        log::warn!("[Capture] Backend error on {}: {}", self.track.uri, kind);
        self.note_outcome(BridgeState::Failed);
        self.stop();
        self.post_terminal(DeliveryEvent::Error(kind.to_string()));
    }

    fn on_play_token_lost(&self) {
        log::warn!("[Capture] Play token lost on {}", self.track.uri);
        self.note_outcome(BridgeState::Failed);
        self.stop();
        self.post_terminal(DeliveryEvent::Error("play token lost".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Availability, MockBackend, MockTrack};
    use crate::constants::SAMPLE_RATE;
    use bytes::Bytes;

    fn test_track(uri: &str) -> TrackInfo {
        TrackInfo {
            uri: uri.to_string(),
            name: "test".to_string(),
            duration_ms: 1_000,
            availability: Availability::Available,
        }
    }

    fn test_packet(frames: usize) -> AudioPacket {
        AudioPacket {
            sample_rate: SAMPLE_RATE,
            channels: 2,
            frame_count: frames,
            payload: Bytes::from(vec![1u8; frames * 4]),
        }
    }

    fn test_bridge(depth: usize) -> (Arc<CaptureBridge>, PcmStream) {
        let backend = Arc::new(MockBackend::new());
        let config = CaptureConfig {
            max_queue_depth: depth,
            ..CaptureConfig::default()
        };
        CaptureBridge::new(backend, test_track("catalog:track:t"), &config)
    }

    #[test]
    fn rejects_when_queue_exceeds_depth() {
        let (bridge, _stream) = test_bridge(2);

        // Depth check is strictly-greater, so depth+1 packets are admitted
        // before the first refusal.
        assert_eq!(bridge.on_music(test_packet(10)), 10);
        assert_eq!(bridge.on_music(test_packet(10)), 10);
        assert_eq!(bridge.on_music(test_packet(10)), 10);
        assert_eq!(bridge.on_music(test_packet(10)), 0);
        assert_eq!(bridge.on_music(test_packet(10)), 0);
    }

    #[test]
    fn admits_again_after_consumer_drains() {
        let backend = Arc::new(MockBackend::new());
        let config = CaptureConfig {
            max_queue_depth: 0,
            lookahead: 0,
            ..CaptureConfig::default()
        };
        let (bridge, mut stream) =
            CaptureBridge::new(backend, test_track("catalog:track:t"), &config);

        assert_eq!(bridge.on_music(test_packet(4)), 4);
        assert_eq!(bridge.on_music(test_packet(4)), 0);

        // Drain the queued packet on the pull side; depth drops back to the
        // limit and the next delivery is admitted.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let chunk = runtime
            .block_on(stream.next_chunk())
            .expect("chunk")
            .expect("ok");
        assert_eq!(chunk.len(), 16);

        assert_eq!(bridge.on_music(test_packet(4)), 4);
    }

    #[test]
    fn exactly_one_terminal_is_posted() {
        let (bridge, mut stream) = test_bridge(10);

        bridge.on_end_of_track();
        bridge.on_error("late error");
        bridge.on_play_token_lost();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        // First (and only) terminal is the End: the stream finishes cleanly
        // rather than surfacing the late errors.
        assert!(runtime.block_on(stream.next_chunk()).is_none());
    }

    #[test]
    fn stop_is_idempotent() {
        let (bridge, _stream) = test_bridge(10);
        *bridge.state.lock() = BridgeState::Playing;
        bridge.stop();
        assert_eq!(bridge.state(), BridgeState::Stopped);
        bridge.stop();
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[test]
    fn callbacks_transition_to_stopped() {
        let (bridge, _stream) = test_bridge(10);
        *bridge.state.lock() = BridgeState::Playing;
        bridge.on_end_of_track();
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[tokio::test]
    async fn start_fails_for_unknown_track() {
        // MockBackend::load errors when the track was never registered.
        let backend = Arc::new(MockBackend::new());
        let (bridge, _stream) = CaptureBridge::new(
            backend,
            test_track("catalog:track:missing"),
            &CaptureConfig::default(),
        );
        assert!(bridge.start().is_err());
        assert_eq!(bridge.state(), BridgeState::Failed);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let backend = Arc::new(MockBackend::new());
        backend.insert_track(MockTrack::silence("catalog:track:t", 500));
        let track = test_track("catalog:track:t");
        let (bridge, _stream) =
            CaptureBridge::new(backend, track, &CaptureConfig::default());
        bridge.start().expect("first start");
        assert!(bridge.start().is_err());
        bridge.stop();
    }
}
