//! FLAC transcode pipeline.
//!
//! Pipes the capture bridge's PCM sequence through an external `flac`
//! process. A dedicated feeder task writes chunks to the encoder's stdin
//! while the caller-facing stream reads fixed-size blocks from its stdout;
//! overlapping both ends of the pipe keeps a full OS pipe buffer from
//! deadlocking either side. Stdin is closed unconditionally when the source
//! ends or the feeder fails, which drives the encoder to EOF and unblocks
//! the reader on every path.

use std::process::{ExitStatus, Stdio};

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::capture::PlayError;
use crate::constants::{BITS_PER_SAMPLE, CHANNELS, ENCODER_BLOCK_SIZE, SAMPLE_RATE};

/// Errors from the transcode pipeline.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The encoder binary could not be started.
    #[error("failed to spawn encoder: {0}")]
    Spawn(std::io::Error),

    /// Reading from or writing to the encoder failed.
    #[error("encoder pipe error: {0}")]
    Pipe(std::io::Error),

    /// The encoder exited unsuccessfully.
    #[error("encoder exited with {0}")]
    Encoder(ExitStatus),

    /// The feeder task panicked or was cancelled.
    #[error("feeder task failed: {0}")]
    Feeder(String),

    /// The PCM source itself failed; the failure passes through the
    /// pipeline to the caller.
    #[error(transparent)]
    Source(#[from] PlayError),
}

/// External lossless encoder configured for the fixed raw-PCM input format.
#[derive(Debug, Clone)]
pub struct FlacEncoder {
    block_size: usize,
}

impl FlacEncoder {
    /// Creates an encoder reading `block_size`-byte output blocks.
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Builds the `flac` invocation for raw 16-bit stereo 44.1 kHz input on
    /// stdin and FLAC output on stdout.
    fn command() -> Command {
        let mut cmd = Command::new("flac");
        cmd.arg("--silent")
            .arg("--force")
            .arg("--stdout")
            .arg("--force-raw-format")
            .arg("--endian=little")
            .arg(format!("--channels={}", CHANNELS))
            .arg(format!("--bps={}", BITS_PER_SAMPLE))
            .arg(format!("--sample-rate={}", SAMPLE_RATE))
            .arg("--sign=signed")
            .arg("-");
        cmd
    }

    /// Encodes the PCM chunk sequence, yielding FLAC blocks.
    pub fn encode<S>(&self, source: S) -> impl Stream<Item = Result<Bytes, TranscodeError>> + Send
    where
        S: Stream<Item = Result<Bytes, PlayError>> + Send + Unpin + 'static,
    {
        encode_with(Self::command(), source, self.block_size)
    }
}

impl Default for FlacEncoder {
    fn default() -> Self {
        Self::new(ENCODER_BLOCK_SIZE)
    }
}

/// Runs the feeder/reader pair against an arbitrary command.
///
/// Split out from [`FlacEncoder::encode`] so the concurrency logic is
/// testable with a stand-in command instead of a real `flac` binary.
fn encode_with<S>(
    mut cmd: Command,
    source: S,
    block_size: usize,
) -> impl Stream<Item = Result<Bytes, TranscodeError>> + Send
where
    S: Stream<Item = Result<Bytes, PlayError>> + Send + Unpin + 'static,
{
    stream! {
        // kill_on_drop: if the caller abandons this stream mid-encode, the
        // child is reaped instead of orphaned, and the feeder's next write
        // fails, releasing the PCM source.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                yield Err(TranscodeError::Spawn(e));
                return;
            }
        };
        let mut stdin = child.stdin.take().expect("stdin was piped");
        let mut stdout = child.stdout.take().expect("stdout was piped");

        log::debug!("[Transcode] Encoder started");

        let feeder = tokio::spawn(async move {
            let mut source = source;
            let result: Result<u64, TranscodeError> = async {
                let mut fed: u64 = 0;
                while let Some(chunk) = source.next().await {
                    let chunk = chunk?;
                    stdin
                        .write_all(&chunk)
                        .await
                        .map_err(TranscodeError::Pipe)?;
                    fed += chunk.len() as u64;
                }
                Ok(fed)
            }
            .await;
            // Closing stdin is the EOF signal that lets the encoder flush
            // and the reader finish; it must happen on success and failure
            // alike.
            drop(stdin);
            log::debug!("[Transcode] Finished feeding encoder");
            result
        });

        let mut buf = vec![0u8; block_size];
        let mut read_error = None;
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    read_error = Some(TranscodeError::Pipe(e));
                    break;
                }
            }
        }

        // If the read side failed, kill the encoder so the feeder's writes
        // error out instead of blocking on a full pipe.
        if read_error.is_some() {
            let _ = child.start_kill();
        }

        // Join the feeder and reap the child before reporting completion;
        // nothing may outlive the stream.
        let feed_result = match feeder.await {
            Ok(result) => result,
            Err(e) => Err(TranscodeError::Feeder(e.to_string())),
        };
        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                yield Err(TranscodeError::Pipe(e));
                return;
            }
        };

        if let Some(e) = read_error {
            yield Err(e);
            return;
        }
        match feed_result {
            Ok(fed) => {
                log::debug!("[Transcode] Encoder done, {} PCM bytes in", fed);
            }
            Err(e) => {
                yield Err(e);
                return;
            }
        }
        if !status.success() {
            yield Err(TranscodeError::Encoder(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn pcm_source(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes, PlayError>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn collect<S>(s: S) -> Result<Vec<u8>, TranscodeError>
    where
        S: Stream<Item = Result<Bytes, TranscodeError>>,
    {
        futures::pin_mut!(s);
        let mut out = Vec::new();
        while let Some(item) = s.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn passthrough_command_round_trips_bytes() {
        // `cat` stands in for the encoder: output must equal input, which
        // exercises the feeder/reader overlap and the join-at-end logic.
        let chunks: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4096]).collect();
        let expected: Vec<u8> = chunks.iter().flatten().copied().collect();

        let out = collect(encode_with(
            Command::new("cat"),
            pcm_source(chunks),
            1024,
        ))
        .await
        .expect("encode");
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn large_input_does_not_deadlock_on_pipe_buffer() {
        // Well past any OS pipe buffer: only the overlapped feeder keeps
        // this from wedging.
        let chunks: Vec<Vec<u8>> = (0..64u8).map(|i| vec![i; 16 * 1024]).collect();
        let total: usize = chunks.iter().map(|c| c.len()).sum();

        let out = collect(encode_with(
            Command::new("cat"),
            pcm_source(chunks),
            8192,
        ))
        .await
        .expect("encode");
        assert_eq!(out.len(), total);
    }

    #[tokio::test]
    async fn source_error_propagates_after_close() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"data")),
            Err(PlayError::Backend("connection error".to_string())),
        ]);

        let result = collect(encode_with(Command::new("cat"), source, 1024)).await;
        assert!(matches!(result, Err(TranscodeError::Source(_))));
    }

    #[tokio::test]
    async fn encoder_that_ignores_input_does_not_deadlock_feeder() {
        // `false` exits immediately without reading stdin. The feeder's
        // writes fail, stdin still gets closed, and the reader sees EOF
        // rather than hanging; the failure surfaces to the caller.
        let chunks: Vec<Vec<u8>> = (0..32u8).map(|i| vec![i; 64 * 1024]).collect();

        let result = collect(encode_with(
            Command::new("false"),
            pcm_source(chunks),
            1024,
        ))
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let result = collect(encode_with(
            Command::new("definitely-not-an-encoder-on-path"),
            pcm_source(vec![vec![0u8; 16]]),
            1024,
        ))
        .await;
        assert!(matches!(result, Err(TranscodeError::Spawn(_))));
    }

    #[test]
    fn flac_invocation_matches_fixed_input_format() {
        let cmd = FlacEncoder::command();
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"--force-raw-format".to_string()));
        assert!(args.contains(&"--sample-rate=44100".to_string()));
        assert!(args.contains(&"--channels=2".to_string()));
        assert!(args.contains(&"--bps=16".to_string()));
        assert!(args.contains(&"--sign=signed".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }
}
