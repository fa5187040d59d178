//! Ordered per-peer playback
//!
//! [`queue::PlaybackQueue`] is the pure state machine; [`worker`] drives one
//! queue per peer on its own task; [`sink`] is the audio output seam.

pub mod queue;
pub mod sink;
pub mod worker;

pub use queue::{Playable, PlaybackQueue, PushOutcome, QueueState, QueueStats};
pub use sink::{
    AudioSink, DeviceSink, DeviceSinkSource, NullSink, OutputDevice, PlaybackDone, SinkSource,
};
pub use worker::{spawn_worker, WorkerHandle};
