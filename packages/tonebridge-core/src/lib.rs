//! Tonebridge Core - shared library for Tonebridge.
//!
//! This crate streams audio tracks from a remote music-catalog backend to
//! HTTP clients, optionally transcoding to FLAC on the fly, while tracking
//! per-stream session state and exposing diagnostic receipts.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backend`]: Boundary traits for the catalog SDK, plus the in-tree mock
//! - [`capture`]: Push→pull capture bridge with backpressure and
//!   trailing-silence trimming
//! - [`transcode`]: External FLAC encoder pipeline (feeder/reader pair)
//! - [`session`]: Single-stream admission gate, status, and receipts
//! - [`api`]: Axum router and streaming handlers
//! - [`bootstrap`]: Composition root and bounded backend login
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! Core logic is decoupled from the vendor SDK through two traits:
//! [`MusicBackend`](backend::MusicBackend) for the control plane and
//! [`DeliverySink`](backend::DeliverySink) for the push-delivery callbacks.
//! The in-tree [`MockBackend`](backend::MockBackend) implements both sides
//! of the contract for tests and smoke deployments.

#![warn(clippy::all)]

pub mod api;
pub mod backend;
pub mod bootstrap;
pub mod capture;
pub mod constants;
pub mod error;
pub mod session;
pub mod state;
pub mod transcode;

// Re-export commonly used types at the crate root
pub use api::{create_router, start_server, AppState, ServerError};
pub use backend::{
    AlbumDetails, AudioPacket, Availability, BackendError, Credentials, CredentialsError,
    DeliverySink, MockBackend, MockTrack, MusicBackend, TrackInfo,
};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use capture::{BridgeState, CaptureBridge, PcmStream, PlayError};
pub use error::{TonebridgeError, TonebridgeResult};
pub use session::{Receipt, SessionManager, StatusSnapshot, StreamFormat, StreamOutcome};
pub use state::{CaptureConfig, Config};
pub use transcode::{FlacEncoder, TranscodeError};
