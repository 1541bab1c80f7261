//! Pull side of the capture bridge.
//!
//! [`PcmStream`] is the single consumer of the capture queue. It runs a small
//! lookahead cache so the final packets of a track can be inspected before
//! they are emitted: when the terminal `End` arrives, the longest contiguous
//! suffix of cached packets that is byte-identical to the silence block is
//! dropped, and everything else is emitted unchanged in the original order.
//! Interior silent packets are never touched.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use crate::backend::AudioPacket;
use crate::state::CaptureConfig;

use super::bridge::{CaptureBridge, DeliveryEvent};
use super::{is_silence_block, PlayError};

/// Periodic progress callback, fired on exact period boundaries.
///
/// Accumulates emitted frames; every time the running total crosses the next
/// threshold the callback receives the threshold value itself (not the
/// overshooting total), so reported positions are always round multiples of
/// the period and strictly increasing. A single large packet can fire the
/// callback several times.
pub struct ProgressNotifier {
    period: u64,
    next_threshold: u64,
    total_frames: u64,
    callback: Box<dyn FnMut(u64) + Send>,
}

impl ProgressNotifier {
    /// Creates a notifier firing every `period` frames.
    pub fn new(period: u64, callback: Box<dyn FnMut(u64) + Send>) -> Self {
        debug_assert!(period > 0, "notification period must be positive");
        Self {
            period,
            next_threshold: period,
            total_frames: 0,
            callback,
        }
    }

    /// Accounts for one emitted packet.
    fn packet_emitted(&mut self, frame_count: u64) {
        self.total_frames += frame_count;
        while self.total_frames >= self.next_threshold {
            (self.callback)(self.next_threshold);
            self.next_threshold += self.period;
        }
    }
}

/// Where the pull sequence currently is in its lifecycle.
enum Phase {
    /// Waiting on delivery events.
    Receiving,
    /// Terminal seen (or failure surfaced); only `pending` remains.
    Finished,
}

/// Pull iterator over one track's PCM chunks.
///
/// Finite and non-restartable: after the terminal event is processed the
/// stream yields its remaining chunks and then `None` forever. Dropping the
/// stream stops the owning bridge, so abandonment (client disconnect, an
/// error in a later pipeline stage) always releases backend resources.
pub struct PcmStream {
    bridge: Arc<CaptureBridge>,
    rx: mpsc::UnboundedReceiver<DeliveryEvent>,
    cache: VecDeque<AudioPacket>,
    lookahead: usize,
    timeout: Duration,
    notifier: Option<ProgressNotifier>,
    /// Chunks emitted from the cache but not yet handed to the caller.
    pending: VecDeque<Bytes>,
    phase: Phase,
}

impl PcmStream {
    pub(crate) fn new(
        bridge: Arc<CaptureBridge>,
        rx: mpsc::UnboundedReceiver<DeliveryEvent>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            bridge,
            rx,
            cache: VecDeque::new(),
            lookahead: config.lookahead,
            timeout: Duration::from_secs(config.delivery_timeout_secs),
            notifier: None,
            pending: VecDeque::new(),
            phase: Phase::Receiving,
        }
    }

    /// Attaches a progress notifier firing every `period_frames` frames.
    pub fn with_notifier(
        mut self,
        period_frames: u64,
        callback: Box<dyn FnMut(u64) + Send>,
    ) -> Self {
        self.notifier = Some(ProgressNotifier::new(period_frames, callback));
        self
    }

    /// Returns the next PCM chunk.
    ///
    /// `Some(Ok(chunk))` delivers payload bytes in push order; `Some(Err(_))`
    /// terminates the stream with a playback failure; `None` is the normal
    /// end of the sequence.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, PlayError>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if matches!(self.phase, Phase::Finished) {
                return None;
            }

            let event = match tokio::time::timeout(self.timeout, self.rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    // Channel closed without a terminal: bridge dropped out
                    // from under us.
                    return Some(self.fail(PlayError::Backend(
                        "delivery channel closed without end of stream".to_string(),
                    )));
                }
                Err(_) => {
                    return Some(self.fail(PlayError::Timeout(self.timeout.as_secs())));
                }
            };

            match event {
                DeliveryEvent::Audio(packet) => {
                    self.bridge.packet_dequeued();
                    self.cache.push_back(packet);
                    while self.cache.len() > self.lookahead {
                        let packet = self.cache.pop_front().expect("cache non-empty");
                        self.emit(packet);
                    }
                }
                DeliveryEvent::End => {
                    self.trim_trailing_silence();
                    while let Some(packet) = self.cache.pop_front() {
                        self.emit(packet);
                    }
                    self.phase = Phase::Finished;
                    log::debug!("[Capture] All packets processed");
                }
                DeliveryEvent::Error(message) => {
                    // Cached packets are discarded on error.
                    self.cache.clear();
                    return Some(self.fail(PlayError::Backend(message)));
                }
            }
        }
    }

    /// Converts into a `futures::Stream` of chunks.
    pub fn into_chunk_stream(self) -> impl Stream<Item = Result<Bytes, PlayError>> + Send {
        stream! {
            let mut pcm = self;
            while let Some(item) = pcm.next_chunk().await {
                yield item;
            }
        }
    }

    /// Moves a packet from the cache to the caller-visible queue, firing
    /// progress notifications.
    fn emit(&mut self, packet: AudioPacket) {
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.packet_emitted(packet.frame_count as u64);
        }
        self.pending.push_back(packet.payload);
    }

    /// Drops the contiguous suffix of cached packets matching the silence
    /// block. Runs only once, after the terminal `End`.
    fn trim_trailing_silence(&mut self) {
        let mut trimmed = 0;
        while self
            .cache
            .back()
            .is_some_and(|p| is_silence_block(&p.payload))
        {
            self.cache.pop_back();
            trimmed += 1;
        }
        if trimmed > 0 {
            log::info!(
                "[Capture] Skipping {} trailing silence packet(s)",
                trimmed
            );
        }
    }

    /// Terminates the stream with an error, stopping the bridge.
    ///
    /// The queue is only read when `pending` is empty, so no emitted chunk
    /// is ever lost to a failure.
    fn fail(&mut self, error: PlayError) -> Result<Bytes, PlayError> {
        self.phase = Phase::Finished;
        self.bridge.stop();
        Err(error)
    }
}

impl Drop for PcmStream {
    fn drop(&mut self) {
        // Abandonment path: the consumer went away mid-stream.
        self.bridge.stop();
    }
}
