//! Error types for the streaming pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture source errors
///
/// `PermissionDenied` and `DeviceNotFound` are fatal to transmit start and
/// are never retried automatically; stream errors after a successful open
/// are reported out-of-band and end the emission.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported capture format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to open capture stream: {0}")]
    Stream(String),
}

/// Envelope and payload decode errors
///
/// Decode failures are non-fatal: the affected chunk is dropped and the
/// stream continues.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Envelope truncated: needed {needed} more bytes for {field}")]
    Truncated { field: &'static str, needed: usize },

    #[error("Bad envelope magic: {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown recipient tag: {0}")]
    BadRecipientTag(u8),

    #[error("Invalid peer identifier: {0}")]
    InvalidId(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Envelope has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("Empty audio payload")]
    EmptyPayload,

    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),
}

/// Transport channel errors
///
/// A failed send or a disconnect triggers the session's reconnecting state;
/// it never aborts the stream outright.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),
}

/// Playback sink errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Output device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open playback stream: {0}")]
    Stream(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
