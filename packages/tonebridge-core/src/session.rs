//! Stream session management.
//!
//! Enforces single-stream exclusivity through an atomic admission gate,
//! maintains the live [`StatusSnapshot`], and keeps the short-lived receipt
//! ledger. Claiming, activating, and finalizing are split into two RAII
//! guards so every exit path (normal end, failure, client disconnect)
//! releases the gate and closes the receipt exactly once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use crate::constants::BYTES_PER_SECOND;
use crate::error::TonebridgeError;

/// Delivery formats accepted by the stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Raw 16-bit stereo 44.1 kHz PCM, exactly as captured.
    Raw,
    /// FLAC, encoded on the fly.
    Flac,
}

impl StreamFormat {
    /// Parses a format selector; `None` for anything outside the supported
    /// set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Self::Raw),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }

    /// Content type served for this format.
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Raw => "audio/x-pcm",
            Self::Flac => "audio/flac",
        }
    }

    /// Short string identifier.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Flac => "flac",
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOutcome {
    /// Still in flight.
    Pending,
    /// Ran to the end of the track.
    Streamed,
    /// Terminated by an error or disconnect.
    Failed,
}

/// Per-stream ledger entry, keyed by track URI.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub uri: String,
    pub format: StreamFormat,
    /// Unix seconds when the stream started.
    pub start: f64,
    /// Unix seconds when the stream finished; absent while in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    /// PCM bytes captured from the backend.
    pub raw_bytes: u64,
    /// Encoded bytes delivered; present only when transcoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_bytes: Option<u64>,
    pub outcome: StreamOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of the stream status singleton.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    pub position_secs: u64,
    pub bytes_transferred: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mutable portion of the status record, behind one lock.
#[derive(Debug, Default)]
struct StatusInner {
    uri: Option<String>,
    duration_secs: Option<u64>,
    position_secs: u64,
    bytes_transferred: u64,
    error: Option<String>,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Process-wide session state: admission gate, status, receipts.
pub struct SessionManager {
    /// The admission gate. Compare-and-set only, so two competing requests
    /// can never both observe "not streaming".
    streaming: AtomicBool,
    status: Mutex<StatusInner>,
    /// Receipts in insertion order, oldest first.
    receipts: Mutex<VecDeque<Receipt>>,
    retention_secs: u64,
}

impl SessionManager {
    /// Creates a session manager retaining finished receipts for
    /// `retention_secs`.
    pub fn new(retention_secs: u64) -> Self {
        Self {
            streaming: AtomicBool::new(false),
            status: Mutex::new(StatusInner::default()),
            receipts: Mutex::new(VecDeque::new()),
            retention_secs,
        }
    }

    /// Attempts to claim the single stream slot.
    ///
    /// The returned claim releases the gate on drop unless it is activated,
    /// so admission checks that happen after claiming (track resolution,
    /// availability) can fail without leaking the slot.
    pub fn try_claim(self: &Arc<Self>) -> Result<StreamClaim, TonebridgeError> {
        if self
            .streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TonebridgeError::Busy);
        }
        Ok(StreamClaim {
            session: Arc::clone(self),
            activated: false,
        })
    }

    /// Whether a stream is currently active.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Returns the current status.
    pub fn status(&self) -> StatusSnapshot {
        let inner = self.status.lock();
        StatusSnapshot {
            streaming: self.is_streaming(),
            uri: inner.uri.clone(),
            duration_secs: inner.duration_secs,
            position_secs: inner.position_secs,
            bytes_transferred: inner.bytes_transferred,
            error: inner.error.clone(),
        }
    }

    /// Returns the stored receipt for a track.
    pub fn receipt(&self, uri: &str) -> Result<Receipt, TonebridgeError> {
        self.receipts
            .lock()
            .iter()
            .find(|r| r.uri == uri)
            .cloned()
            .ok_or_else(|| TonebridgeError::ReceiptNotFound(uri.to_string()))
    }

    /// Returns all retained receipts in insertion order.
    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().iter().cloned().collect()
    }

    /// Resets the status record and opens a fresh receipt for `uri`.
    fn activate(&self, uri: &str, format: StreamFormat, duration_ms: Option<u32>) {
        {
            let mut status = self.status.lock();
            *status = StatusInner {
                uri: Some(uri.to_string()),
                duration_secs: duration_ms.map(|ms| u64::from(ms) / 1000),
                ..StatusInner::default()
            };
        }

        let now = now_secs();
        let mut receipts = self.receipts.lock();

        // A new stream for the same URI replaces any prior receipt outright,
        // expired or not.
        receipts.retain(|r| r.uri != uri);

        self.sweep(&mut receipts, now);

        receipts.push_back(Receipt {
            uri: uri.to_string(),
            format,
            start: now,
            end: None,
            raw_bytes: 0,
            encoded_bytes: None,
            outcome: StreamOutcome::Pending,
            error: None,
        });
    }

    /// Evicts expired receipts from the oldest-insertion end.
    ///
    /// Walks strictly in insertion order and stops at the first entry that
    /// is unfinished or still within the retention window, even when later
    /// entries have long since expired. Eviction never reorders by end time.
    fn sweep(&self, receipts: &mut VecDeque<Receipt>, now: f64) {
        let cutoff = now - self.retention_secs as f64;
        while let Some(front) = receipts.front() {
            match front.end {
                Some(end) if end <= cutoff => {
                    log::debug!("[Session] Evicting expired receipt for {}", front.uri);
                    receipts.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Adds captured PCM bytes to the status record and receipt.
    fn add_raw_bytes(&self, uri: &str, n: usize) {
        {
            let mut status = self.status.lock();
            status.bytes_transferred += n as u64;
            status.position_secs = status.bytes_transferred / BYTES_PER_SECOND as u64;
        }
        let mut receipts = self.receipts.lock();
        if let Some(receipt) = receipts.iter_mut().find(|r| r.uri == uri) {
            receipt.raw_bytes += n as u64;
        }
    }

    /// Adds encoded bytes to the receipt.
    fn add_encoded_bytes(&self, uri: &str, n: usize) {
        let mut receipts = self.receipts.lock();
        if let Some(receipt) = receipts.iter_mut().find(|r| r.uri == uri) {
            *receipt.encoded_bytes.get_or_insert(0) += n as u64;
        }
    }

    /// Closes the receipt and releases the gate.
    fn finalize(&self, uri: &str, outcome: StreamOutcome, error: Option<&str>) {
        {
            let mut receipts = self.receipts.lock();
            if let Some(receipt) = receipts.iter_mut().find(|r| r.uri == uri) {
                receipt.end = Some(now_secs());
                receipt.outcome = outcome;
                receipt.error = error.map(str::to_string);
                log::debug!("[Session] Final receipt: {:?}", receipt);
            }
        }
        {
            let mut status = self.status.lock();
            status.error = error.map(str::to_string);
        }
        self.streaming.store(false, Ordering::Release);
    }
}

/// Claimed-but-not-yet-active stream slot.
///
/// Exists between the admission CAS and the post-claim checks. Dropping an
/// unactivated claim releases the gate.
pub struct StreamClaim {
    session: Arc<SessionManager>,
    activated: bool,
}

impl StreamClaim {
    /// Activates the claim: resets counters, opens the receipt, and returns
    /// the guard that tracks the live stream.
    pub fn activate(
        mut self,
        uri: &str,
        format: StreamFormat,
        duration_ms: Option<u32>,
    ) -> ActiveStream {
        self.activated = true;
        self.session.activate(uri, format, duration_ms);
        ActiveStream {
            session: Arc::clone(&self.session),
            uri: uri.to_string(),
            finished: AtomicBool::new(false),
        }
    }
}

impl Drop for StreamClaim {
    fn drop(&mut self) {
        if !self.activated {
            self.session.streaming.store(false, Ordering::Release);
        }
    }
}

/// Guard for one live stream.
///
/// Byte counters feed through it; exactly one finalization wins, with drop
/// acting as the disconnect fallback. Shared via `Arc` between pipeline
/// stages, so the receipt closes when the last stage lets go.
pub struct ActiveStream {
    session: Arc<SessionManager>,
    uri: String,
    finished: AtomicBool,
}

impl ActiveStream {
    /// Records captured PCM bytes.
    pub fn add_raw_bytes(&self, n: usize) {
        self.session.add_raw_bytes(&self.uri, n);
    }

    /// Records encoded output bytes.
    pub fn add_encoded_bytes(&self, n: usize) {
        self.session.add_encoded_bytes(&self.uri, n);
    }

    /// Marks the stream as having run to completion.
    pub fn finish_streamed(&self) {
        if self.mark_finished() {
            self.session
                .finalize(&self.uri, StreamOutcome::Streamed, None);
        }
    }

    /// Marks the stream as failed with the given error text. Bytes already
    /// delivered stay delivered; only the outcome is recorded.
    pub fn finish_failed(&self, error: &str) {
        if self.mark_finished() {
            self.session
                .finalize(&self.uri, StreamOutcome::Failed, Some(error));
        }
    }

    fn mark_finished(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if self.mark_finished() {
            self.session.finalize(
                &self.uri,
                StreamOutcome::Failed,
                Some("client disconnected before end of stream"),
            );
        }
    }
}
