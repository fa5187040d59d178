//! Session configuration
//!
//! All settings have sensible defaults; a TOML file can override them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chunk::{PeerId, Recipient};
use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration for a [`crate::Session`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Local participant identifier; random UUID when unset
    pub local_id: PeerId,

    /// Where outbound chunks are addressed
    pub recipient: Recipient,

    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_id: PeerId::random(),
            recipient: Recipient::Broadcast,
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capture.samples_per_chunk() == 0 {
            return Err(Error::Config(
                "capture sample_rate, channels, and chunk_interval_ms must all be nonzero"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Capture source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; system default when unset
    pub device: Option<String>,

    pub sample_rate: u32,
    pub channels: u16,

    /// Emission interval for raw chunks
    pub chunk_interval_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
        }
    }
}

impl CaptureConfig {
    /// Number of interleaved samples that make up one chunk
    pub fn samples_per_chunk(&self) -> usize {
        (self.sample_rate as usize * self.channels as usize * self.chunk_interval_ms as usize)
            / 1000
    }
}

/// Playback sink settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name; system default when unset
    pub device: Option<String>,
}

/// Reconnect backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,

    /// Ceiling for the growing delay
    pub max_delay_ms: u64,

    /// Growth factor applied after each failed attempt
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_delay_ms: MAX_RECONNECT_DELAY_MS,
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.recipient, Recipient::Broadcast);
        assert_eq!(config.capture.sample_rate, 48000);
        assert_eq!(config.capture.chunk_interval_ms, 200);
        assert_eq!(config.reconnect.initial_delay_ms, 5000);
    }

    #[test]
    fn test_samples_per_chunk() {
        let capture = CaptureConfig::default();
        // 200ms of mono 48kHz audio
        assert_eq!(capture.samples_per_chunk(), 9600);
    }

    #[test]
    fn test_parse_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            local_id = "alice"
            recipient = "broadcast"

            [capture]
            channels = 2
            chunk_interval_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.local_id, PeerId::new("alice"));
        assert_eq!(config.capture.channels, 2);
        assert_eq!(config.capture.samples_per_chunk(), 9600);
        // Unset sections fall back to defaults
        assert_eq!(config.reconnect.multiplier, 2.0);
    }

    #[test]
    fn test_zero_chunk_interval_rejected() {
        let config: SessionConfig = toml::from_str(
            r#"
            [capture]
            chunk_interval_ms = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let config: SessionConfig = toml::from_str(
            r#"
            [capture]
            sample_rate = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_peer_recipient() {
        let config: SessionConfig = toml::from_str(
            r#"
            recipient = { peer = "bob" }
            "#,
        )
        .unwrap();
        assert_eq!(config.recipient, Recipient::Peer(PeerId::new("bob")));
    }
}
