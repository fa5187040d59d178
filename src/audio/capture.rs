//! Microphone capture source
//!
//! The capture stream runs on a dedicated thread (cpal streams are not
//! `Send`); accumulated samples are cut into fixed-interval chunks and
//! pushed to the registered consumer channel. Closing the handle stops
//! emission and releases the device deterministically, on every exit path.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::audio::device::input_device;
use crate::audio::pcm::encode_pcm16;
use crate::chunk::RawChunk;
use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// A source of raw audio chunks
///
/// Production code uses [`MicSource`]; tests register scripted sources.
pub trait CaptureSource: Send + Sync {
    /// Acquire the device and begin emitting chunks to `consumer`
    ///
    /// Fails with `PermissionDenied` when microphone access is refused and
    /// `DeviceNotFound` when no input device exists. Re-opening after a
    /// close is permitted and re-acquires the device.
    fn open(
        &self,
        config: &CaptureConfig,
        consumer: mpsc::Sender<RawChunk>,
    ) -> Result<CaptureHandle, CaptureError>;
}

/// Handle to an open capture; dropping it closes the capture
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn new(running: Arc<AtomicBool>, thread: Option<JoinHandle<()>>) -> Self {
        Self { running, thread }
    }

    /// Stop emission and release the device; safe to call more than once
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture source backed by a cpal input device
pub struct MicSource;

impl CaptureSource for MicSource {
    fn open(
        &self,
        config: &CaptureConfig,
        consumer: mpsc::Sender<RawChunk>,
    ) -> Result<CaptureHandle, CaptureError> {
        // A zero-sample chunk would spin the cpal callback forever
        let samples_per_chunk = config.samples_per_chunk();
        if samples_per_chunk == 0 {
            return Err(CaptureError::UnsupportedFormat(
                "sample_rate, channels, and chunk_interval_ms must all be nonzero".to_string(),
            ));
        }

        // Resolve synchronously so missing-device errors surface here
        let device = input_device(config.device.as_deref())?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = running.clone();

        // The stream must be built on the thread that owns it; report the
        // build outcome back so open() fails synchronously.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);

        let handle = thread::Builder::new()
            .name("ptt-capture".to_string())
            .spawn(move || {
                let mut pending: Vec<f32> = Vec::with_capacity(samples_per_chunk * 2);
                let running_for_callback = running_for_thread.clone();

                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running_for_callback.load(Ordering::Relaxed) {
                            return;
                        }
                        pending.extend_from_slice(data);
                        while pending.len() >= samples_per_chunk {
                            let samples: Vec<f32> =
                                pending.drain(..samples_per_chunk).collect();
                            let raw = RawChunk::now(encode_pcm16(&samples));
                            match consumer.try_send(raw) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    tracing::warn!("send queue full, dropping captured chunk");
                                }
                                // Receiver gone means the session is shutting down
                                Err(mpsc::error::TrySendError::Closed(_)) => {}
                            }
                        }
                    },
                    |err| {
                        tracing::error!("capture stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_build_error(e)));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_thread.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
                // Stream is dropped here, releasing the device
            })
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(chunk_samples = samples_per_chunk, "capture opened");
                Ok(CaptureHandle::new(running, Some(handle)))
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Stream(
                    "capture thread exited before the stream was ready".to_string(),
                ))
            }
        }
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceNotFound("device no longer available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => {
            CaptureError::UnsupportedFormat(err.to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            let message = err.to_string();
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") || lower.contains("access")
            {
                CaptureError::PermissionDenied(message)
            } else {
                CaptureError::Stream(message)
            }
        }
        other => CaptureError::Stream(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_chunk_interval_rejected() {
        // Fails before any device is touched
        let (tx, _rx) = mpsc::channel(4);
        let config = CaptureConfig {
            chunk_interval_ms: 0,
            ..CaptureConfig::default()
        };
        assert!(matches!(
            MicSource.open(&config, tx),
            Err(CaptureError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_mic_open_close() {
        // Only meaningful on machines with an input device
        let (tx, mut rx) = mpsc::channel(8);
        match MicSource.open(&CaptureConfig::default(), tx) {
            Ok(mut handle) => {
                assert!(handle.is_open());
                handle.close();
                assert!(!handle.is_open());
                // Closing twice is a no-op
                handle.close();
                rx.close();
            }
            // Headless machines have no usable input device
            Err(_) => {}
        }
    }

    #[test]
    fn test_unknown_device_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let config = CaptureConfig {
            device: Some("no-such-device-9b1f".to_string()),
            ..CaptureConfig::default()
        };
        assert!(matches!(
            MicSource.open(&config, tx),
            Err(CaptureError::DeviceNotFound(_))
        ));
    }
}
