//! HTTP route handlers.
//!
//! All handlers are thin; the stream handler wires the capture bridge,
//! optional transcode pipeline, and session guards into a response body.
//! Cleanup is RAII throughout: dropping the body stream (client disconnect,
//! pipeline failure) finalizes the receipt and stops the bridge.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::api::AppState;
use crate::backend::Availability;
use crate::capture::CaptureBridge;
use crate::constants::{ALBUM_URI_PREFIX, SAMPLE_RATE, SERVICE_ID, TRACK_URI_PREFIX};
use crate::error::{TonebridgeError, TonebridgeResult};
use crate::session::{ActiveStream, StreamFormat};
use crate::transcode::FlacEncoder;

/// Boxed stream type for response bodies.
type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

#[derive(Deserialize)]
struct StreamQuery {
    format: Option<String>,
}

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(send_status))
        .route("/play/{track_id}", get(play_track))
        .route("/receipt/{track_id}", get(send_receipt))
        .route("/album/{album_id}", get(album_details))
        .route("/cover/{album_id}", get(album_cover))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
    }))
}

/// Returns the current stream status and the receipt ledger.
async fn send_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": state.session.status(),
        "receipts": state.session.receipts(),
    }))
}

/// Returns the stored receipt for a track, 404 when absent.
async fn send_receipt(
    Path(track_id): Path<String>,
    State(state): State<AppState>,
) -> TonebridgeResult<impl IntoResponse> {
    let uri = expand_uri(TRACK_URI_PREFIX, &track_id);
    Ok(Json(state.session.receipt(&uri)?))
}

/// Returns album metadata from the catalog.
async fn album_details(
    Path(album_id): Path<String>,
    State(state): State<AppState>,
) -> TonebridgeResult<impl IntoResponse> {
    let uri = expand_uri(ALBUM_URI_PREFIX, &album_id);
    log::debug!("[Api] Getting {}", uri);
    Ok(Json(state.backend.album_details(&uri).await?))
}

/// Returns the album cover JPEG.
async fn album_cover(
    Path(album_id): Path<String>,
    State(state): State<AppState>,
) -> TonebridgeResult<Response> {
    let uri = expand_uri(ALBUM_URI_PREFIX, &album_id);
    log::debug!("[Api] Getting cover for {}", uri);
    let cover = state.backend.album_cover(&uri).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], cover).into_response())
}

/// Streams a track, transcoding to FLAC unless raw PCM is requested.
async fn play_track(
    Path(track_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> TonebridgeResult<Response> {
    let uri = expand_uri(TRACK_URI_PREFIX, &track_id);

    // Claim the single stream slot up front: the gate is one
    // compare-and-set, so concurrent requests can never both pass. The
    // claim releases itself if any later admission check fails.
    let claim = state.session.try_claim()?;

    let format = match query.format.as_deref() {
        None => StreamFormat::Flac,
        Some(s) => StreamFormat::parse(s)
            .ok_or_else(|| TonebridgeError::UnsupportedFormat(s.to_string()))?,
    };

    let track = state.backend.resolve_track(&uri).await?;
    if track.availability != Availability::Available {
        return Err(TonebridgeError::Unavailable(uri));
    }

    log::info!("[Api] Streaming {} as {}", uri, format.as_str());

    let config = state.config.read().clone();
    let guard = Arc::new(claim.activate(&uri, format, Some(track.duration_ms)));

    let (bridge, pcm) =
        CaptureBridge::new(Arc::clone(&state.backend), track, &config.capture);
    let pcm = if config.capture.notify_period_frames > 0 {
        pcm.with_notifier(
            config.capture.notify_period_frames,
            Box::new(|frames| {
                let secs = frames / u64::from(SAMPLE_RATE);
                log::info!("[Capture] Got {:02}:{:02} of music", secs / 60, secs % 60);
            }),
        )
    } else {
        pcm
    };

    if let Err(e) = bridge.start() {
        let message = e.to_string();
        guard.finish_failed(&message);
        return Err(e.into());
    }

    // Raw PCM chunks, with capture byte accounting as they pass.
    let raw = {
        let guard = Arc::clone(&guard);
        pcm.into_chunk_stream().inspect(move |item| {
            if let Ok(chunk) = item {
                guard.add_raw_bytes(chunk.len());
            }
        })
    };

    let body: AudioStream = match format {
        StreamFormat::Raw => Box::pin(deliver(raw, guard, false)),
        StreamFormat::Flac => {
            let encoder = FlacEncoder::new(config.encoder_block_size);
            Box::pin(deliver(encoder.encode(Box::pin(raw)), guard, true))
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| TonebridgeError::Internal(e.to_string()))
}

/// Pumps pipeline output into the response body, finalizing the session
/// guard on completion or failure. Bytes already yielded are never
/// retracted; a failure simply terminates the sequence after them.
fn deliver<S, E>(
    source: S,
    guard: Arc<ActiveStream>,
    count_encoded: bool,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    stream! {
        futures::pin_mut!(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    if count_encoded {
                        guard.add_encoded_bytes(chunk.len());
                    }
                    yield Ok(chunk);
                }
                Err(e) => {
                    let message = e.to_string();
                    log::error!("[Api] Stream failed: {}", message);
                    guard.finish_failed(&message);
                    yield Err(std::io::Error::other(message));
                    return;
                }
            }
        }
        guard.finish_streamed();
    }
}

/// Expands a bare catalog id to a full URI; full URIs pass through.
fn expand_uri(prefix: &str, id: &str) -> String {
    if id.starts_with(prefix) {
        id.to_string()
    } else {
        format!("{prefix}{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockTrack};
    use crate::constants::SILENCE_BLOCK_BYTES;
    use crate::session::{SessionManager, StreamOutcome};
    use crate::state::Config;
    use parking_lot::RwLock;

    fn test_state(backend: MockBackend) -> AppState {
        AppState::new(
            Arc::new(backend),
            Arc::new(SessionManager::new(3600)),
            Arc::new(RwLock::new(Config::default())),
        )
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body")
    }

    #[test]
    fn expand_uri_adds_prefix_to_bare_ids() {
        assert_eq!(
            expand_uri(TRACK_URI_PREFIX, "abc123"),
            "catalog:track:abc123"
        );
    }

    #[test]
    fn expand_uri_keeps_full_uris() {
        assert_eq!(
            expand_uri(TRACK_URI_PREFIX, "catalog:track:abc123"),
            "catalog:track:abc123"
        );
    }

    #[tokio::test]
    async fn play_rejects_unsupported_format() {
        let state = test_state(MockBackend::new());
        let result = play_track(
            Path("t".to_string()),
            Query(StreamQuery {
                format: Some("ogg".to_string()),
            }),
            State(state.clone()),
        )
        .await;
        assert!(matches!(
            result,
            Err(TonebridgeError::UnsupportedFormat(_))
        ));
        // No slot was consumed.
        assert!(!state.session.is_streaming());
    }

    #[tokio::test]
    async fn play_rejects_unknown_track_and_releases_gate() {
        let state = test_state(MockBackend::new());
        let result = play_track(
            Path("missing".to_string()),
            Query(StreamQuery {
                format: Some("raw".to_string()),
            }),
            State(state.clone()),
        )
        .await;
        assert!(matches!(result, Err(TonebridgeError::TrackNotFound(_))));
        assert!(!state.session.is_streaming());
    }

    #[tokio::test]
    async fn play_rejects_unavailable_track_and_releases_gate() {
        let backend = MockBackend::new();
        backend.insert_track(MockTrack::silence("catalog:track:t", 500).unavailable());
        let state = test_state(backend);

        let result = play_track(
            Path("t".to_string()),
            Query(StreamQuery {
                format: Some("raw".to_string()),
            }),
            State(state.clone()),
        )
        .await;
        assert!(matches!(result, Err(TonebridgeError::Unavailable(_))));
        assert!(!state.session.is_streaming());
    }

    #[tokio::test]
    async fn play_raw_streams_track_minus_trailing_silence() {
        // 1.5s of content delivered as three half-second packets plus the
        // padding artifact: the body is exactly the content.
        let backend = MockBackend::new();
        backend.insert_track(
            MockTrack::silence("catalog:track:t", 1_500).with_trailing_silence(),
        );
        let state = test_state(backend);

        let response = play_track(
            Path("t".to_string()),
            Query(StreamQuery {
                format: Some("raw".to_string()),
            }),
            State(state.clone()),
        )
        .await
        .expect("response");

        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("audio/x-pcm")
        );

        let body = body_bytes(response).await;
        assert_eq!(body.len(), 3 * SILENCE_BLOCK_BYTES); // 264600 bytes

        let receipt = state.session.receipt("catalog:track:t").expect("receipt");
        assert_eq!(receipt.outcome, StreamOutcome::Streamed);
        assert_eq!(receipt.raw_bytes, 3 * SILENCE_BLOCK_BYTES as u64);
        assert_eq!(receipt.encoded_bytes, None);
        assert!(!state.session.is_streaming());
    }

    #[tokio::test]
    async fn dropping_response_finalizes_receipt_as_failed() {
        let backend = MockBackend::new();
        backend.insert_track(MockTrack::tone("catalog:track:t", 10_000, 440.0));
        let state = test_state(backend);

        let response = play_track(
            Path("t".to_string()),
            Query(StreamQuery {
                format: Some("raw".to_string()),
            }),
            State(state.clone()),
        )
        .await
        .expect("response");

        // Client walks away without reading the body.
        drop(response);
        // Drop of the body stream runs synchronously; the guard finalizes
        // before drop returns.
        let receipt = state.session.receipt("catalog:track:t").expect("receipt");
        assert_eq!(receipt.outcome, StreamOutcome::Failed);
        assert!(!state.session.is_streaming());
    }
}
