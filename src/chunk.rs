//! Core data model: peer identities and audio chunks
//!
//! An [`AudioChunk`] is immutable once created and is moved, never shared,
//! as it travels capture → codec → transport → codec → playback queue.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Destination of an outbound chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// The shared channel every participant subscribes to
    Broadcast,
    /// A single participant's private channel
    Peer(PeerId),
}

/// A raw chunk as emitted by the capture source, before it is assigned a
/// sender and sequence number
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// PCM payload bytes (s16le interleaved)
    pub payload: Bytes,
    /// Capture timestamp, unix milliseconds
    pub captured_at: u64,
}

impl RawChunk {
    /// Wrap a payload with the current wall-clock timestamp
    pub fn now(payload: Bytes) -> Self {
        Self {
            payload,
            captured_at: chrono::Utc::now().timestamp_millis() as u64,
        }
    }
}

/// One transport-ready unit of audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub sender: PeerId,
    pub recipient: Recipient,
    /// Monotonically increasing per sender within a session
    pub sequence: u64,
    /// Opaque audio bytes; the playback side's decoder interprets them
    pub payload: Bytes,
    /// Capture timestamp, unix milliseconds
    pub captured_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display() {
        let id = PeerId::new("alice");
        assert_eq!(id.to_string(), "alice");
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn test_raw_chunk_timestamp() {
        let before = chrono::Utc::now().timestamp_millis() as u64;
        let raw = RawChunk::now(Bytes::from_static(&[0, 1]));
        assert!(raw.captured_at >= before);
    }
}
