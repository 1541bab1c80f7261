//! Centralized error types for the Tonebridge core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::capture::PlayError;
use crate::transcode::TranscodeError;

/// Application-wide error type for the Tonebridge server.
#[derive(Debug, Error)]
pub enum TonebridgeError {
    /// Backend login/handshake failed or timed out; fatal at process start.
    #[error("Login failed: {0}")]
    Login(String),

    /// A stream is already active; only one may run at a time.
    #[error("A stream is already active")]
    Busy,

    /// The track exists but cannot be played.
    #[error("Track is not available for playback: {0}")]
    Unavailable(String),

    /// The requested stream format is not in the supported set.
    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    /// No such track in the catalog.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// No such album in the catalog.
    #[error("Album not found: {0}")]
    AlbumNotFound(String),

    /// No receipt stored for the track.
    #[error("No receipt for track: {0}")]
    ReceiptNotFound(String),

    /// Playback failed mid-stream (timeout, backend error, token loss).
    #[error("Playback failed: {0}")]
    Play(String),

    /// The encoder process or its pipes failed.
    #[error("Transcode failed: {0}")]
    Transcode(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TonebridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Login(_) => "login_failed",
            Self::Busy => "busy",
            Self::Unavailable(_) => "track_unavailable",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::TrackNotFound(_) => "track_not_found",
            Self::AlbumNotFound(_) => "album_not_found",
            Self::ReceiptNotFound(_) => "receipt_not_found",
            Self::Play(_) => "play_failed",
            Self::Transcode(_) => "transcode_failed",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Busy | Self::Unavailable(_) => StatusCode::FORBIDDEN,
            Self::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::TrackNotFound(_) | Self::AlbumNotFound(_) | Self::ReceiptNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type TonebridgeResult<T> = Result<T, TonebridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for TonebridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PlayError> for TonebridgeError {
    fn from(err: PlayError) -> Self {
        Self::Play(err.to_string())
    }
}

impl From<TranscodeError> for TonebridgeError {
    fn from(err: TranscodeError) -> Self {
        Self::Transcode(err.to_string())
    }
}

impl From<BackendError> for TonebridgeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::TrackNotFound(uri) => Self::TrackNotFound(uri),
            BackendError::AlbumNotFound(uri) => Self::AlbumNotFound(uri),
            BackendError::Login(msg) => Self::Login(msg),
            BackendError::Other(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_forbidden() {
        let err = TonebridgeError::Busy;
        assert_eq!(err.code(), "busy");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unsupported_format_maps_to_415() {
        let err = TonebridgeError::UnsupportedFormat("ogg".into());
        assert_eq!(err.code(), "unsupported_format");
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn receipt_not_found_maps_to_404() {
        let err = TonebridgeError::ReceiptNotFound("catalog:track:x".into());
        assert_eq!(err.code(), "receipt_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn backend_not_found_converts_to_track_not_found() {
        let err: TonebridgeError = BackendError::TrackNotFound("catalog:track:x".into()).into();
        assert!(matches!(err, TonebridgeError::TrackNotFound(_)));
    }
}
