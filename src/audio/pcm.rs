//! PCM payload encoding and the payload decoder seam
//!
//! Chunk payloads travel as interleaved s16le PCM. The [`PayloadDecoder`]
//! trait is the seam where a real codec could be slotted in later; the
//! playback queue only depends on the trait.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::error::CodecError;

/// Decoded audio ready for a sink
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    /// Interleaved f32 samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmAudio {
    /// Wall-clock duration of this audio when played back
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// Serialize f32 samples to s16le payload bytes
pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        buf.put_i16_le((clamped * i16::MAX as f32) as i16);
    }
    buf.freeze()
}

/// Turns a chunk payload into playable audio
///
/// A decode failure is local to one chunk: the caller drops the chunk and
/// continues with the next one.
pub trait PayloadDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<PcmAudio, CodecError>;
}

/// Decoder for the s16le PCM payload format
pub struct Pcm16Decoder {
    sample_rate: u32,
    channels: u16,
}

impl Pcm16Decoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl PayloadDecoder for Pcm16Decoder {
    fn decode(&mut self, payload: &[u8]) -> Result<PcmAudio, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        if payload.len() % 2 != 0 {
            return Err(CodecError::InvalidPayload(format!(
                "odd byte count: {}",
                payload.len()
            )));
        }
        let frame_bytes = 2 * self.channels as usize;
        if payload.len() % frame_bytes != 0 {
            return Err(CodecError::InvalidPayload(format!(
                "{} bytes is not a whole number of {}-channel frames",
                payload.len(),
                self.channels
            )));
        }

        let samples = payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();

        Ok(PcmAudio {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_round_trip() {
        let samples = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
        let payload = encode_pcm16(&samples);

        let mut decoder = Pcm16Decoder::new(48000, 1);
        let decoded = decoder.decode(&payload).unwrap();

        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded.samples) {
            // i16 quantization noise
            assert!((a - b).abs() < 1.0 / i16::MAX as f32 * 2.0);
        }
    }

    #[test]
    fn test_empty_payload_rejected() {
        let mut decoder = Pcm16Decoder::new(48000, 1);
        assert!(matches!(decoder.decode(&[]), Err(CodecError::EmptyPayload)));
    }

    #[test]
    fn test_odd_length_rejected() {
        let mut decoder = Pcm16Decoder::new(48000, 1);
        assert!(matches!(
            decoder.decode(&[1, 2, 3]),
            Err(CodecError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_partial_stereo_frame_rejected() {
        let mut decoder = Pcm16Decoder::new(48000, 2);
        // Three samples cannot fill whole stereo frames
        assert!(matches!(
            decoder.decode(&[0, 0, 0, 0, 0, 0]),
            Err(CodecError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_duration() {
        let audio = PcmAudio {
            samples: vec![0.0; 9600],
            sample_rate: 48000,
            channels: 1,
        };
        assert_eq!(audio.duration(), Duration::from_millis(200));

        let stereo = PcmAudio {
            samples: vec![0.0; 9600],
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(stereo.duration(), Duration::from_millis(100));
    }
}
