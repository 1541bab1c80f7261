//! Music-catalog backend boundary.
//!
//! The backend SDK is an external collaborator: it owns login, decoding, and
//! its own delivery thread. This module defines the traits the core consumes
//! ([`MusicBackend`] for control, [`DeliverySink`] for the push callbacks)
//! together with the data types that cross the boundary. The in-tree
//! [`MockBackend`](mock::MockBackend) exercises the full contract for tests
//! and smoke runs; a vendor SDK adapter implements the same traits.

pub mod mock;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::{MockBackend, MockTrack};

/// Whether a track may be played at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable,
}

/// Resolved catalog track, read-only to the core.
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    pub uri: String,
    pub name: String,
    pub duration_ms: u32,
    pub availability: Availability,
}

/// One unit of push-delivered audio from the backend's delivery thread.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames (sample groups across all channels) in `payload`.
    pub frame_count: usize,
    /// Raw interleaved 16-bit little-endian PCM.
    pub payload: Bytes,
}

/// Artist reference embedded in album metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistRef {
    pub uri: String,
    pub name: String,
}

/// Track entry in an album listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumTrack {
    pub uri: String,
    pub name: String,
    pub duration_ms: u32,
    pub disc: u32,
    pub number: u32,
    pub artists: Vec<ArtistRef>,
}

/// Album metadata returned by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumDetails {
    pub uri: String,
    pub name: String,
    pub artist: ArtistRef,
    pub year: u32,
    pub tracks: Vec<AlbumTrack>,
}

/// Errors surfaced by backend implementations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No such track in the catalog.
    #[error("track not found: {0}")]
    TrackNotFound(String),

    /// No such album in the catalog.
    #[error("album not found: {0}")]
    AlbumNotFound(String),

    /// Login handshake rejected or never confirmed.
    #[error("login failed: {0}")]
    Login(String),

    /// Any other SDK-reported failure.
    #[error("backend error: {0}")]
    Other(String),
}

/// Receiver side of the backend's push-delivery callbacks.
///
/// Implemented by the capture bridge. All methods are invoked from the
/// backend's own delivery thread and must never block: `on_music` signals
/// backpressure purely through its return value.
pub trait DeliverySink: Send + Sync {
    /// Delivers one packet of decoded audio.
    ///
    /// Returns the number of frames consumed. Returning 0 means nothing was
    /// consumed and the backend must retry the same data later.
    fn on_music(&self, packet: AudioPacket) -> usize;

    /// The backend has finished delivering the current track.
    fn on_end_of_track(&self);

    /// A connection or streaming error occurred.
    fn on_error(&self, kind: &str);

    /// Another session took over the play token.
    fn on_play_token_lost(&self);
}

/// Control-plane interface to the music-catalog backend.
///
/// Playback control methods are synchronous: they map to quick SDK calls on
/// the backend handle. The resolution and metadata methods are async so an
/// adapter can wait on the SDK's own event loop.
#[async_trait]
pub trait MusicBackend: Send + Sync {
    /// Logs in with explicit credentials. Implementations bound their own
    /// wait; the bootstrap additionally enforces the global login timeout.
    async fn login(&self, credentials: &Credentials) -> Result<(), BackendError>;

    /// Resolves a track URI to its metadata.
    async fn resolve_track(&self, uri: &str) -> Result<TrackInfo, BackendError>;

    /// Returns full album metadata, including per-track artists.
    async fn album_details(&self, uri: &str) -> Result<AlbumDetails, BackendError>;

    /// Returns the album cover image (JPEG).
    async fn album_cover(&self, uri: &str) -> Result<Bytes, BackendError>;

    /// Registers the delivery callbacks. At most one sink is attached at a
    /// time; attaching replaces any previous sink.
    fn attach(&self, sink: Arc<dyn DeliverySink>);

    /// Deregisters the delivery callbacks.
    fn detach(&self);

    /// Loads a track into the player.
    fn load(&self, track: &TrackInfo) -> Result<(), BackendError>;

    /// Starts or pauses delivery.
    fn play(&self, on: bool);

    /// Unloads the current track, releasing playback resources.
    fn unload(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from loading or decoding the credentials file.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credentials file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse credentials file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("credentials contain neither appkey nor appkey64")]
    MissingKey,

    #[error("appkey64 is not valid base64: {0}")]
    BadKey(#[from] base64::DecodeError),
}

/// Backend login credentials, loaded from a JSON file.
///
/// The application key may be present raw (`appkey`) or base64-encoded
/// (`appkey64`); [`Credentials::application_key`] normalizes to raw bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    appkey: Option<String>,
    #[serde(default)]
    appkey64: Option<String>,
    /// Directory for the SDK's cache and settings.
    pub cache_dir: std::path::PathBuf,
}

impl Credentials {
    /// Builds credentials directly, with a raw application key.
    pub fn plain(
        username: &str,
        password: &str,
        appkey: &str,
        cache_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            appkey: Some(appkey.to_string()),
            appkey64: None,
            cache_dir,
        }
    }

    /// Loads credentials from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the application key as raw bytes, decoding `appkey64` when
    /// only the encoded form is present.
    pub fn application_key(&self) -> Result<Vec<u8>, CredentialsError> {
        if let Some(raw) = &self.appkey {
            return Ok(raw.clone().into_bytes());
        }
        if let Some(encoded) = &self.appkey64 {
            return Ok(BASE64_STANDARD.decode(encoded)?);
        }
        Err(CredentialsError::MissingKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn credentials_json(body: &str) -> Credentials {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(body.as_bytes()).expect("write");
        Credentials::load(file.path()).expect("load")
    }

    #[test]
    fn loads_raw_appkey() {
        let creds = credentials_json(
            r#"{"username":"u","password":"p","appkey":"secret","cache_dir":"/tmp/cache"}"#,
        );
        assert_eq!(creds.application_key().unwrap(), b"secret");
    }

    #[test]
    fn decodes_appkey64() {
        // "secret" base64-encoded
        let creds = credentials_json(
            r#"{"username":"u","password":"p","appkey64":"c2VjcmV0","cache_dir":"/tmp/cache"}"#,
        );
        assert_eq!(creds.application_key().unwrap(), b"secret");
    }

    #[test]
    fn raw_appkey_wins_over_encoded() {
        let creds = credentials_json(
            r#"{"username":"u","password":"p","appkey":"raw","appkey64":"c2VjcmV0","cache_dir":"/tmp/c"}"#,
        );
        assert_eq!(creds.application_key().unwrap(), b"raw");
    }

    #[test]
    fn missing_key_is_an_error() {
        let creds =
            credentials_json(r#"{"username":"u","password":"p","cache_dir":"/tmp/cache"}"#);
        assert!(matches!(
            creds.application_key(),
            Err(CredentialsError::MissingKey)
        ));
    }
}
