//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod pcm;

pub use capture::{CaptureHandle, CaptureSource, MicSource};
pub use pcm::{PayloadDecoder, Pcm16Decoder, PcmAudio};
