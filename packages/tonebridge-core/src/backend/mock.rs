//! Mock catalog backend for testing without the vendor SDK.
//!
//! Synthesizes 16-bit PCM tracks on a dedicated delivery thread, honoring the
//! same cooperative backpressure contract as the real SDK: a rejected packet
//! (`on_music` returning 0) is retried until the consumer drains the queue.
//! This allows exercising the full capture/transcode/session pipeline in CI
//! and in the server's `--backend mock` smoke mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{
    AlbumDetails, AlbumTrack, ArtistRef, AudioPacket, Availability, BackendError, Credentials,
    DeliverySink, MusicBackend, TrackInfo,
};
use crate::constants::{
    ALBUM_URI_PREFIX, CHANNELS, SAMPLE_RATE, SILENCE_BLOCK_BYTES, TRACK_URI_PREFIX,
};

/// Bytes per interleaved stereo 16-bit frame.
const BYTES_PER_FRAME: usize = CHANNELS as usize * 2;

/// Delay between delivery retries when the capture queue is full.
const RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// A synthetic track registered with the mock backend.
#[derive(Debug, Clone)]
pub struct MockTrack {
    pub info: TrackInfo,
    /// Sine tone frequency; `None` generates digital silence.
    pub tone_hz: Option<f64>,
    /// Append the half-second all-zero padding artifact after the content,
    /// like the real backend does.
    pub trailing_silence: bool,
}

impl MockTrack {
    /// Creates a silent track of the given duration.
    pub fn silence(uri: &str, duration_ms: u32) -> Self {
        Self {
            info: TrackInfo {
                uri: uri.to_string(),
                name: format!("mock {}", uri),
                duration_ms,
                availability: Availability::Available,
            },
            tone_hz: None,
            trailing_silence: false,
        }
    }

    /// Creates a sine-tone track of the given duration.
    pub fn tone(uri: &str, duration_ms: u32, tone_hz: f64) -> Self {
        Self {
            tone_hz: Some(tone_hz),
            ..Self::silence(uri, duration_ms)
        }
    }

    /// Marks the track unavailable for playback.
    pub fn unavailable(mut self) -> Self {
        self.info.availability = Availability::Unavailable;
        self
    }

    /// Enables the trailing half-second padding artifact.
    pub fn with_trailing_silence(mut self) -> Self {
        self.trailing_silence = true;
        self
    }
}

/// In-process backend that synthesizes audio instead of talking to a catalog.
pub struct MockBackend {
    tracks: RwLock<HashMap<String, MockTrack>>,
    albums: RwLock<HashMap<String, AlbumDetails>>,
    covers: RwLock<HashMap<String, Bytes>>,
    sink: Mutex<Option<Arc<dyn DeliverySink>>>,
    loaded: Mutex<Option<TrackInfo>>,
    /// Stop flag for the current delivery thread. A fresh flag per
    /// `play(true)` keeps a lingering thread from a previous track from
    /// delivering into a new session.
    playing: Mutex<Option<Arc<AtomicBool>>>,
    /// Frames per delivered packet. Defaults to half a second so the final
    /// packet of a padded track lines up with the silence block.
    packet_frames: usize,
}

impl MockBackend {
    /// Creates an empty mock backend.
    pub fn new() -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
            albums: RwLock::new(HashMap::new()),
            covers: RwLock::new(HashMap::new()),
            sink: Mutex::new(None),
            loaded: Mutex::new(None),
            playing: Mutex::new(None),
            packet_frames: SILENCE_BLOCK_BYTES / BYTES_PER_FRAME,
        }
    }

    /// Overrides the frames-per-packet granularity of delivery.
    pub fn with_packet_frames(mut self, packet_frames: usize) -> Self {
        self.packet_frames = packet_frames;
        self
    }

    /// Creates a mock backend preloaded with a small demo catalog.
    pub fn with_demo_catalog() -> Self {
        let backend = Self::new();
        let album_uri = format!("{}demo", ALBUM_URI_PREFIX);
        let mut album_tracks = Vec::new();
        for (n, (id, hz)) in [("tone440", 440.0), ("tone880", 880.0)].iter().enumerate() {
            let uri = format!("{}{}", TRACK_URI_PREFIX, id);
            let track = MockTrack::tone(&uri, 30_000, *hz).with_trailing_silence();
            album_tracks.push(AlbumTrack {
                uri: uri.clone(),
                name: track.info.name.clone(),
                duration_ms: track.info.duration_ms,
                disc: 1,
                number: n as u32 + 1,
                artists: vec![ArtistRef {
                    uri: "catalog:artist:demo".to_string(),
                    name: "Demo Artist".to_string(),
                }],
            });
            backend.insert_track(track);
        }
        backend.insert_album(AlbumDetails {
            uri: album_uri.clone(),
            name: "Demo Album".to_string(),
            artist: ArtistRef {
                uri: "catalog:artist:demo".to_string(),
                name: "Demo Artist".to_string(),
            },
            year: 2024,
            tracks: album_tracks,
        });
        backend.insert_cover(&album_uri, Bytes::from_static(FALLBACK_COVER));
        backend
    }

    /// Registers a track.
    pub fn insert_track(&self, track: MockTrack) {
        self.tracks.write().insert(track.info.uri.clone(), track);
    }

    /// Registers an album.
    pub fn insert_album(&self, album: AlbumDetails) {
        self.albums.write().insert(album.uri.clone(), album);
    }

    /// Registers album cover bytes.
    pub fn insert_cover(&self, album_uri: &str, jpeg: Bytes) {
        self.covers.write().insert(album_uri.to_string(), jpeg);
    }

    /// Synthesizes the delivery packets for a track.
    fn packets_for(&self, track: &MockTrack) -> Vec<AudioPacket> {
        let total_frames =
            (track.info.duration_ms as u64 * SAMPLE_RATE as u64 / 1000) as usize;
        let mut packets = Vec::new();
        let mut start = 0;
        while start < total_frames {
            let frames = self.packet_frames.min(total_frames - start);
            packets.push(AudioPacket {
                sample_rate: SAMPLE_RATE,
                channels: CHANNELS,
                frame_count: frames,
                payload: synth_payload(track.tone_hz, start, frames),
            });
            start += frames;
        }
        if track.trailing_silence {
            let frames = SILENCE_BLOCK_BYTES / BYTES_PER_FRAME;
            packets.push(AudioPacket {
                sample_rate: SAMPLE_RATE,
                channels: CHANNELS,
                frame_count: frames,
                payload: synth_payload(None, 0, frames),
            });
        }
        packets
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates one packet of interleaved stereo 16-bit PCM.
///
/// `None` produces digital silence; `Some(hz)` a sine at quarter amplitude,
/// phase-continuous across packets via `start_frame`.
fn synth_payload(tone_hz: Option<f64>, start_frame: usize, frames: usize) -> Bytes {
    let mut data = vec![0u8; frames * BYTES_PER_FRAME];
    if let Some(hz) = tone_hz {
        for i in 0..frames {
            let t = (start_frame + i) as f64 / SAMPLE_RATE as f64;
            let value = (2.0 * std::f64::consts::PI * hz * t).sin();
            let sample = (value * 0.25 * f64::from(i16::MAX)) as i16;
            let le = sample.to_le_bytes();
            let offset = i * BYTES_PER_FRAME;
            for ch in 0..CHANNELS as usize {
                data[offset + ch * 2] = le[0];
                data[offset + ch * 2 + 1] = le[1];
            }
        }
    }
    Bytes::from(data)
}

#[async_trait]
impl MusicBackend for MockBackend {
    async fn login(&self, credentials: &Credentials) -> Result<(), BackendError> {
        if credentials.username.is_empty() {
            return Err(BackendError::Login("empty username".to_string()));
        }
        Ok(())
    }

    async fn resolve_track(&self, uri: &str) -> Result<TrackInfo, BackendError> {
        self.tracks
            .read()
            .get(uri)
            .map(|t| t.info.clone())
            .ok_or_else(|| BackendError::TrackNotFound(uri.to_string()))
    }

    async fn album_details(&self, uri: &str) -> Result<AlbumDetails, BackendError> {
        self.albums
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| BackendError::AlbumNotFound(uri.to_string()))
    }

    async fn album_cover(&self, uri: &str) -> Result<Bytes, BackendError> {
        self.covers
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| BackendError::AlbumNotFound(uri.to_string()))
    }

    fn attach(&self, sink: Arc<dyn DeliverySink>) {
        *self.sink.lock() = Some(sink);
    }

    fn detach(&self) {
        *self.sink.lock() = None;
    }

    fn load(&self, track: &TrackInfo) -> Result<(), BackendError> {
        let known = self.tracks.read().contains_key(&track.uri);
        if !known {
            return Err(BackendError::TrackNotFound(track.uri.clone()));
        }
        *self.loaded.lock() = Some(track.clone());
        Ok(())
    }

    fn play(&self, on: bool) {
        if !on {
            if let Some(flag) = self.playing.lock().take() {
                flag.store(false, Ordering::Release);
            }
            return;
        }

        let Some(loaded) = self.loaded.lock().clone() else {
            log::warn!("[MockBackend] play(true) with no track loaded");
            return;
        };
        let Some(sink) = self.sink.lock().clone() else {
            log::warn!("[MockBackend] play(true) with no sink attached");
            return;
        };
        let Some(track) = self.tracks.read().get(&loaded.uri).cloned() else {
            return;
        };

        let packets = self.packets_for(&track);
        let playing = Arc::new(AtomicBool::new(true));
        *self.playing.lock() = Some(Arc::clone(&playing));

        // Dedicated delivery thread, like the SDK's. Retries rejected
        // packets instead of blocking on the consumer.
        std::thread::spawn(move || {
            for packet in packets {
                loop {
                    if !playing.load(Ordering::Acquire) {
                        return;
                    }
                    if sink.on_music(packet.clone()) > 0 {
                        break;
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
            }
            if playing.load(Ordering::Acquire) {
                sink.on_end_of_track();
            }
        });
    }

    fn unload(&self) {
        if let Some(flag) = self.playing.lock().take() {
            flag.store(false, Ordering::Release);
        }
        *self.loaded.lock() = None;
    }
}

/// Minimal valid JPEG used as the demo album cover.
static FALLBACK_COVER: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_payload_is_all_zeros() {
        let payload = synth_payload(None, 0, 100);
        assert_eq!(payload.len(), 400);
        assert!(payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_payload_is_not_silent() {
        let payload = synth_payload(Some(440.0), 0, 4096);
        assert!(payload.iter().any(|&b| b != 0));
    }

    #[test]
    fn packets_cover_exact_duration() {
        let backend = MockBackend::new();
        let track = MockTrack::silence("catalog:track:x", 2_000);
        let packets = backend.packets_for(&track);
        let total: usize = packets.iter().map(|p| p.frame_count).sum();
        assert_eq!(total, 2 * SAMPLE_RATE as usize);
        // Half-second packets: 2s should split into exactly 4
        assert_eq!(packets.len(), 4);
    }

    #[test]
    fn trailing_silence_adds_one_block_packet() {
        let backend = MockBackend::new();
        let track = MockTrack::tone("catalog:track:x", 1_000, 440.0).with_trailing_silence();
        let packets = backend.packets_for(&track);
        let last = packets.last().expect("packets");
        assert_eq!(last.payload.len(), SILENCE_BLOCK_BYTES);
        assert!(last.payload.iter().all(|&b| b == 0));
    }
}
