//! Fixed audio and protocol constants that should NOT be changed.
//!
//! These values are pinned by the backend's delivery format (16-bit stereo
//! PCM at 44.1 kHz) and by the FLAC raw-input invocation; changing them would
//! desynchronize the capture, trim, and transcode stages.

// ─────────────────────────────────────────────────────────────────────────────
// PCM Delivery Format
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate of all PCM delivered by the backend (Hz).
///
/// 44.1 kHz is CD quality and the only rate the backend decodes to.
pub const SAMPLE_RATE: u32 = 44100;

/// Number of audio channels (stereo).
pub const CHANNELS: u16 = 2;

/// Bit depth of delivered samples.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Bytes per second of PCM at the fixed delivery format.
///
/// 2 channels × 2 bytes × 44100 Hz = 176400.
pub const BYTES_PER_SECOND: usize =
    CHANNELS as usize * (BITS_PER_SAMPLE as usize / 8) * SAMPLE_RATE as usize;

/// Size of the trailing-silence artifact appended by the backend (bytes).
///
/// Exactly half a second of the fixed delivery format: 176400 / 2 = 88200.
/// Used only to recognize the padded suffix at end-of-track, never to
/// classify audio mid-stream.
pub const SILENCE_BLOCK_BYTES: usize = BYTES_PER_SECOND / 2;

// ─────────────────────────────────────────────────────────────────────────────
// Capture Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default capture queue depth (packets).
///
/// Delivery packets are ~4k frames, so 10 packets is roughly a second of
/// audio in flight between the backend thread and the consumer.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Default lookahead cache depth (packets).
///
/// One packet is enough to hold back the final packet for trailing-silence
/// inspection. Raise it if the backend ever pads more than one packet.
pub const DEFAULT_LOOKAHEAD: usize = 1;

/// Default wait for the next delivery packet before the stream is declared
/// dead (seconds). Deployments on slow links may prefer the lean profile's
/// 30 seconds via configuration.
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 120;

/// Default progress notification period (frames).
///
/// One minute of audio at the fixed sample rate.
pub const DEFAULT_NOTIFY_PERIOD_FRAMES: u64 = 60 * SAMPLE_RATE as u64;

// ─────────────────────────────────────────────────────────────────────────────
// Transcode
// ─────────────────────────────────────────────────────────────────────────────

/// Read block size for the encoder's stdout (bytes).
pub const ENCODER_BLOCK_SIZE: usize = 8192;

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// How long finished receipts are retained before eviction (seconds).
pub const RECEIPT_RETENTION_SECS: u64 = 12 * 3600;

/// Bounded wait for the backend login handshake (seconds).
pub const LOGIN_TIMEOUT_SECS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Catalog URIs
// ─────────────────────────────────────────────────────────────────────────────

/// URI prefix for catalog tracks; bare ids in requests are expanded with it.
pub const TRACK_URI_PREFIX: &str = "catalog:track:";

/// URI prefix for catalog albums.
pub const ALBUM_URI_PREFIX: &str = "catalog:album:";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in HTTP headers and log banners.
pub const APP_NAME: &str = "Tonebridge";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "tonebridge";
