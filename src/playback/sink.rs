//! Audio output sinks
//!
//! A sink accepts one decoded chunk at a time and signals completion via
//! [`PlaybackDone`]; the worker awaits that signal before starting the next
//! chunk, which is what serializes playback.
//!
//! The physical device is owned by a single [`OutputDevice`] per session,
//! acquired at session start and released at stop; each peer's worker gets
//! its own [`DeviceSink`] facade over the shared sample queue.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;

use crate::audio::device::output_device;
use crate::audio::pcm::PcmAudio;
use crate::chunk::PeerId;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

/// Completion signal for one chunk's playback
pub struct PlaybackDone {
    rx: Option<oneshot::Receiver<()>>,
}

impl PlaybackDone {
    /// A signal that will fire when `rx` resolves
    pub fn from_receiver(rx: oneshot::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }

    /// An already-completed signal
    pub fn ready() -> Self {
        Self { rx: None }
    }

    /// Wait for playback to finish; a dropped sender counts as finished
    pub async fn wait(self) {
        if let Some(rx) = self.rx {
            let _ = rx.await;
        }
    }
}

/// Plays decoded audio; one chunk in flight at a time
///
/// `begin` must be called from within a tokio runtime.
pub trait AudioSink: Send {
    fn begin(&mut self, audio: PcmAudio) -> Result<PlaybackDone, PlaybackError>;
}

/// Hands out per-peer sinks over one shared output acquisition
///
/// The session acquires the device once at start and releases it at stop;
/// workers never touch the device directly.
pub trait SinkSource: Send + Sync {
    /// Acquire the output device; called once per session start
    fn acquire(&self) -> Result<(), PlaybackError>;

    /// Release the device; idempotent
    fn release(&self);

    /// Sink for one peer's stream
    fn sink(&self, peer: &PeerId) -> Box<dyn AudioSink>;
}

/// Sink that discards audio but keeps real-time pacing
///
/// Used when no output device is available so a peer's stream still drains
/// at the rate it would have played.
pub struct NullSink;

impl AudioSink for NullSink {
    fn begin(&mut self, audio: PcmAudio) -> Result<PlaybackDone, PlaybackError> {
        let (tx, rx) = oneshot::channel();
        let duration = audio.duration();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(());
        });
        Ok(PlaybackDone::from_receiver(rx))
    }
}

/// Exclusive handle on the cpal output device
///
/// The output stream runs on a dedicated thread and pulls samples from a
/// shared queue; all peers' sinks append to that one queue, so the device
/// is opened exactly once no matter how many peers are talking.
pub struct OutputDevice {
    samples: Arc<Mutex<VecDeque<f32>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputDevice {
    pub fn open(
        config: &PlaybackConfig,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, PlaybackError> {
        let device = output_device(config.device.as_deref())?;

        let stream_config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let samples: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let running = Arc::new(AtomicBool::new(true));

        let samples_for_thread = samples.clone();
        let running_for_thread = running.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), PlaybackError>>(1);

        let thread = thread::Builder::new()
            .name("ptt-playback".to_string())
            .spawn(move || {
                let samples_for_callback = samples_for_thread.clone();
                let stream = device.build_output_stream(
                    &stream_config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = samples_for_callback.lock();
                        for slot in out {
                            // Underrun plays silence
                            *slot = queue.pop_front().unwrap_or(0.0);
                        }
                    },
                    |err| {
                        tracing::error!("playback stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::Stream(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PlaybackError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_thread.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
            })
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                samples,
                running,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlaybackError::Stream(
                    "playback thread exited before the stream was ready".to_string(),
                ))
            }
        }
    }

    /// A per-peer facade over this device's sample queue
    pub fn sink(&self) -> DeviceSink {
        DeviceSink {
            samples: self.samples.clone(),
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.samples.lock().clear();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// One peer's sink over the shared [`OutputDevice`] queue
///
/// `begin` appends the chunk's samples and completes after the chunk's
/// duration has elapsed.
pub struct DeviceSink {
    samples: Arc<Mutex<VecDeque<f32>>>,
}

impl AudioSink for DeviceSink {
    fn begin(&mut self, audio: PcmAudio) -> Result<PlaybackDone, PlaybackError> {
        let duration = audio.duration();
        self.samples.lock().extend(audio.samples);

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(());
        });
        Ok(PlaybackDone::from_receiver(rx))
    }
}

/// Device-backed [`SinkSource`]
///
/// Acquiring twice is a no-op; a missing device degrades to [`NullSink`]
/// so peers' streams keep draining at real-time rate.
pub struct DeviceSinkSource {
    config: PlaybackConfig,
    sample_rate: u32,
    channels: u16,
    device: Mutex<Option<OutputDevice>>,
}

impl DeviceSinkSource {
    pub fn new(config: PlaybackConfig, sample_rate: u32, channels: u16) -> Self {
        Self {
            config,
            sample_rate,
            channels,
            device: Mutex::new(None),
        }
    }
}

impl SinkSource for DeviceSinkSource {
    fn acquire(&self) -> Result<(), PlaybackError> {
        let mut guard = self.device.lock();
        if guard.is_none() {
            *guard = Some(OutputDevice::open(
                &self.config,
                self.sample_rate,
                self.channels,
            )?);
        }
        Ok(())
    }

    fn release(&self) {
        self.device.lock().take();
    }

    fn sink(&self, peer: &PeerId) -> Box<dyn AudioSink> {
        match self.device.lock().as_ref() {
            Some(device) => Box::new(device.sink()),
            None => {
                tracing::warn!(%peer, "no output device, discarding audio at real-time rate");
                Box::new(NullSink)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_sink_paces_by_duration() {
        let audio = PcmAudio {
            samples: vec![0.0; 480], // 10ms at 48kHz mono
            sample_rate: 48000,
            channels: 1,
        };
        let start = std::time::Instant::now();
        NullSink.begin(audio).unwrap().wait().await;
        assert!(start.elapsed() >= std::time::Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_ready_signal_completes_immediately() {
        PlaybackDone::ready().wait().await;
    }

    #[tokio::test]
    async fn test_device_opens_once_and_shares_sinks() {
        // Only meaningful on machines with an output device
        match OutputDevice::open(&PlaybackConfig::default(), 48000, 1) {
            Ok(device) => {
                let audio = PcmAudio {
                    samples: vec![0.0; 48],
                    sample_rate: 48000,
                    channels: 1,
                };
                // Two peers' sinks over the same device
                let mut a = device.sink();
                let mut b = device.sink();
                a.begin(audio.clone()).unwrap().wait().await;
                b.begin(audio).unwrap().wait().await;
            }
            Err(PlaybackError::DeviceNotFound(_)) | Err(PlaybackError::Stream(_)) => {}
        }
    }

    #[tokio::test]
    async fn test_unacquired_source_degrades_to_null() {
        let source = DeviceSinkSource::new(PlaybackConfig::default(), 48000, 1);
        // No acquire() yet: sinks still drain audio
        let mut sink = source.sink(&PeerId::new("alice"));
        let audio = PcmAudio {
            samples: vec![0.0; 48],
            sample_rate: 48000,
            channels: 1,
        };
        sink.begin(audio).unwrap().wait().await;
        // Releasing without acquiring is a no-op
        source.release();
        source.release();
    }
}
