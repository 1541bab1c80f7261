//! Playback capture bridge.
//!
//! Adapts the backend's asynchronous push-delivery callbacks into a pull
//! sequence of PCM chunks suitable for an HTTP response body. The bridge
//! applies cooperative backpressure through the delivery callback's return
//! value, trims the backend's trailing-silence artifact, and supports
//! periodic progress notification.

pub mod bridge;
pub mod pull;

use thiserror::Error;

pub use bridge::{BridgeState, CaptureBridge};
pub use pull::{PcmStream, ProgressNotifier};

use crate::constants::SILENCE_BLOCK_BYTES;

/// Errors that terminate one capture stream.
#[derive(Debug, Error)]
pub enum PlayError {
    /// No delivery packet arrived within the configured window.
    #[error("timed out after {0}s waiting for audio data")]
    Timeout(u64),

    /// The backend reported a connection/streaming error or lost the play
    /// token, or the delivery channel died without a terminal signal.
    #[error("playback failed: {0}")]
    Backend(String),
}

/// Returns true when `payload` is byte-identical to the silence block: the
/// fixed half-second all-zero buffer the backend pads onto track ends.
pub fn is_silence_block(payload: &[u8]) -> bool {
    payload.len() == SILENCE_BLOCK_BYTES && payload.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_block_matches_only_exact_size() {
        let exact = vec![0u8; SILENCE_BLOCK_BYTES];
        assert!(is_silence_block(&exact));

        let short = vec![0u8; SILENCE_BLOCK_BYTES - 1];
        assert!(!is_silence_block(&short));

        let long = vec![0u8; SILENCE_BLOCK_BYTES + 1];
        assert!(!is_silence_block(&long));
    }

    #[test]
    fn nonzero_byte_disqualifies() {
        let mut data = vec![0u8; SILENCE_BLOCK_BYTES];
        data[SILENCE_BLOCK_BYTES / 2] = 1;
        assert!(!is_silence_block(&data));
    }
}
