//! # PTT Streamer
//!
//! Push-to-talk audio chunk streaming with ordered per-peer playback.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── SEND PATH ─────────────────────────────┐
//! │                                                                    │
//! │  ┌────────────┐    raw PCM chunks     ┌─────────────┐              │
//! │  │ Microphone │ ──(every ~200 ms)───► │ Chunk Codec │              │
//! │  │ (capture)  │                       │  (encode)   │              │
//! │  └────────────┘                       └──────┬──────┘              │
//! │                                              │ binary envelope     │
//! │                                              ▼                     │
//! │                                   ┌─────────────────────┐          │
//! │                                   │  Transport Channel  │          │
//! │                                   │ (external boundary) │          │
//! │                                   └──────────┬──────────┘          │
//! └──────────────────────────────────────────────┼─────────────────────┘
//!                                                │
//! ┌──────────────────────────── RECEIVE PATH ────┼─────────────────────┐
//! │                                              ▼                     │
//! │                                       ┌─────────────┐              │
//! │                                       │ Chunk Codec │              │
//! │                                       │  (decode)   │              │
//! │                                       └──────┬──────┘              │
//! │                 route by sender              │                     │
//! │        ┌─────────────────┬───────────────────┘                     │
//! │        ▼                 ▼                                         │
//! │  ┌───────────┐     ┌───────────┐     one worker task per peer,     │
//! │  │ Playback  │     │ Playback  │     strictly one chunk playing    │
//! │  │ Queue (A) │     │ Queue (B) │     at a time, in arrival order   │
//! │  └─────┬─────┘     └─────┬─────┘                                   │
//! │        ▼                 ▼                                         │
//! │  ┌───────────┐     ┌───────────┐                                   │
//! │  │Audio Sink │     │Audio Sink │                                   │
//! │  └───────────┘     └───────────┘                                   │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`session::Session`] controller orchestrates both paths and owns the
//! lifecycle: connect, push-to-talk transmit start/stop, reconnection with
//! backoff, and idempotent shutdown.

pub mod audio;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

pub use chunk::{AudioChunk, PeerId, RawChunk, Recipient};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{Session, SessionParts, SessionStatus};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (mono voice)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default capture chunk interval in milliseconds
    pub const DEFAULT_CHUNK_INTERVAL_MS: u32 = 200;

    /// Default first reconnect delay in milliseconds
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

    /// Ceiling for the exponential reconnect backoff in milliseconds
    pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

    /// Maximum length of a peer identifier on the wire, in bytes
    pub const MAX_ID_BYTES: usize = 255;

    /// Maximum accepted envelope payload size in bytes
    pub const MAX_PAYLOAD_BYTES: usize = 1 << 22;

    /// Upper bound on pending chunks per peer queue; overflow drops the
    /// oldest chunk so playback latency stays bounded
    pub const MAX_PENDING_CHUNKS: usize = 32;

    /// Capacity of the capture-to-send channel; the capture callback drops
    /// chunks rather than block when the send loop falls behind
    pub const SEND_QUEUE_CHUNKS: usize = 64;
}
