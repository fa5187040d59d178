//! Per-peer playback worker
//!
//! One task per peer drives that peer's [`PlaybackQueue`]: it accepts
//! arriving chunks at any time, but decode+play of one chunk always
//! completes (or fails) strictly before the next begins. The only
//! suspension points are "await playback complete" and "await next
//! command". Workers for different peers are fully independent.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::pcm::PayloadDecoder;
use crate::chunk::{AudioChunk, PeerId};
use crate::playback::queue::{PlaybackQueue, QueueStats};
use crate::playback::sink::AudioSink;

enum WorkerCommand {
    Chunk(AudioChunk),
    Stop,
}

/// Handle to a running playback worker
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    join: JoinHandle<QueueStats>,
}

impl WorkerHandle {
    /// Hand a chunk to the worker; returns false if the worker has exited
    pub fn deliver(&self, chunk: AudioChunk) -> bool {
        self.tx.send(WorkerCommand::Chunk(chunk)).is_ok()
    }

    /// Request the worker to stop; safe to call more than once
    pub fn stop(&self) {
        let _ = self.tx.send(WorkerCommand::Stop);
    }

    /// Stop the worker and wait for it to finish, returning final stats
    pub async fn shutdown(self) -> QueueStats {
        self.stop();
        self.join.await.unwrap_or_default()
    }
}

/// Spawn the playback worker for one peer
pub fn spawn_worker(
    peer: PeerId,
    decoder: Box<dyn PayloadDecoder>,
    sink: Box<dyn AudioSink>,
) -> WorkerHandle {
    // Intake is drained into the bounded queue as it arrives, and Stop must
    // always be deliverable, so the command channel itself is not bounded
    let (tx, rx) = mpsc::unbounded_channel();
    let join = tokio::spawn(run(PlaybackQueue::new(peer), decoder, sink, rx));
    WorkerHandle { tx, join }
}

async fn run(
    mut queue: PlaybackQueue,
    mut decoder: Box<dyn PayloadDecoder>,
    mut sink: Box<dyn AudioSink>,
    mut rx: mpsc::UnboundedReceiver<WorkerCommand>,
) -> QueueStats {
    tracing::debug!(peer = %queue.peer(), "playback worker started");

    'outer: loop {
        // Fold in everything that arrived while the previous chunk played
        loop {
            match rx.try_recv() {
                Ok(WorkerCommand::Chunk(chunk)) => {
                    queue.push(chunk);
                }
                Ok(WorkerCommand::Stop) => break 'outer,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => break 'outer,
            }
        }

        match queue.next_playable(&mut *decoder) {
            Some(playable) => {
                let done = match sink.begin(playable.audio) {
                    Ok(done) => done,
                    Err(e) => {
                        tracing::warn!(
                            peer = %queue.peer(),
                            sequence = playable.sequence,
                            error = %e,
                            "sink rejected chunk"
                        );
                        continue;
                    }
                };
                tracing::trace!(
                    peer = %queue.peer(),
                    sequence = playable.sequence,
                    "playing chunk"
                );

                let wait = done.wait();
                tokio::pin!(wait);
                loop {
                    tokio::select! {
                        _ = &mut wait => {
                            queue.mark_played();
                            break;
                        }
                        cmd = rx.recv() => match cmd {
                            Some(WorkerCommand::Chunk(chunk)) => {
                                queue.push(chunk);
                            }
                            Some(WorkerCommand::Stop) | None => break 'outer,
                        }
                    }
                }
            }
            None => {
                // Idle until the next chunk (or stop) arrives
                match rx.recv().await {
                    Some(WorkerCommand::Chunk(chunk)) => {
                        queue.push(chunk);
                    }
                    Some(WorkerCommand::Stop) | None => break,
                }
            }
        }
    }

    // Cancel anything pending; the queue ends Idle either way
    queue.reset();
    let stats = queue.stats();
    tracing::debug!(
        peer = %queue.peer(),
        played = stats.played,
        duplicates = stats.duplicates,
        decode_failures = stats.decode_failures,
        "playback worker stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::PcmAudio;
    use crate::error::{CodecError, PlaybackError};
    use crate::playback::sink::PlaybackDone;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct MarkerDecoder;

    impl PayloadDecoder for MarkerDecoder {
        fn decode(&mut self, payload: &[u8]) -> Result<PcmAudio, CodecError> {
            if payload.first() == Some(&0xBB) {
                return Err(CodecError::InvalidPayload("marked bad".to_string()));
            }
            Ok(PcmAudio {
                samples: vec![0.0; 16],
                sample_rate: 48000,
                channels: 1,
            })
        }
    }

    /// Records the (sequence-payload, start, end) of every playback
    #[derive(Clone, Default)]
    struct PlayLog {
        spans: Arc<Mutex<Vec<(u8, Instant, Instant)>>>,
    }

    struct RecordingSink {
        log: PlayLog,
        hold: Duration,
    }

    impl RecordingSink {
        fn new(log: PlayLog, hold: Duration) -> Self {
            Self { log, hold }
        }
    }

    impl AudioSink for RecordingSink {
        fn begin(&mut self, audio: PcmAudio) -> Result<PlaybackDone, PlaybackError> {
            // LabelDecoder encodes the chunk label as the sample count
            let label = audio.samples.len() as u8;
            let log = self.log.clone();
            let hold = self.hold;
            let start = Instant::now();
            let (tx, rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                log.spans.lock().push((label, start, Instant::now()));
                let _ = tx.send(());
            });
            Ok(PlaybackDone::from_receiver(rx))
        }
    }

    /// Decoder whose output sample count mirrors the payload's first byte,
    /// so the sink can tell chunks apart
    struct LabelDecoder;

    impl PayloadDecoder for LabelDecoder {
        fn decode(&mut self, payload: &[u8]) -> Result<PcmAudio, CodecError> {
            match payload.first() {
                Some(&0xBB) => Err(CodecError::InvalidPayload("marked bad".to_string())),
                Some(&label) => Ok(PcmAudio {
                    samples: vec![0.0; label as usize],
                    sample_rate: 48000,
                    channels: 1,
                }),
                None => Err(CodecError::EmptyPayload),
            }
        }
    }

    fn chunk(sequence: u64, payload: &[u8]) -> AudioChunk {
        AudioChunk {
            sender: PeerId::new("alice"),
            recipient: crate::chunk::Recipient::Broadcast,
            sequence,
            captured_at: 0,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[tokio::test]
    async fn test_playback_is_strictly_serialized() {
        let log = PlayLog::default();
        let sink = RecordingSink::new(log.clone(), Duration::from_millis(20));
        let handle = spawn_worker(
            PeerId::new("alice"),
            Box::new(LabelDecoder),
            Box::new(sink),
        );

        for (seq, label) in [(1u64, 10u8), (2, 20), (3, 30)] {
            assert!(handle.deliver(chunk(seq, &[label])));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = handle.shutdown().await;

        let spans = log.spans.lock().clone();
        assert_eq!(
            spans.iter().map(|s| s.0).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        // Each playback ends before the next one begins
        for pair in spans.windows(2) {
            assert!(pair[0].2 <= pair[1].1);
        }
        assert_eq!(stats.played, 3);
    }

    #[tokio::test]
    async fn test_bad_chunk_then_good_chunk() {
        let log = PlayLog::default();
        let sink = RecordingSink::new(log.clone(), Duration::from_millis(5));
        let handle = spawn_worker(
            PeerId::new("alice"),
            Box::new(LabelDecoder),
            Box::new(sink),
        );

        handle.deliver(chunk(1, &[0xBB]));
        handle.deliver(chunk(2, &[42]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.shutdown().await;

        let spans = log.spans.lock().clone();
        assert_eq!(spans.iter().map(|s| s.0).collect::<Vec<_>>(), vec![42]);
        assert_eq!(stats.played, 1);
        assert_eq!(stats.decode_failures, 1);
    }

    #[tokio::test]
    async fn test_duplicates_dropped_across_playback() {
        let log = PlayLog::default();
        let sink = RecordingSink::new(log.clone(), Duration::from_millis(5));
        let handle = spawn_worker(
            PeerId::new("alice"),
            Box::new(LabelDecoder),
            Box::new(sink),
        );

        handle.deliver(chunk(1, &[10]));
        handle.deliver(chunk(1, &[10]));
        handle.deliver(chunk(2, &[20]));
        handle.deliver(chunk(1, &[10]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.shutdown().await;

        assert_eq!(
            log.spans.lock().iter().map(|s| s.0).collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert_eq!(stats.duplicates, 2);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let handle = spawn_worker(
            PeerId::new("alice"),
            Box::new(MarkerDecoder),
            Box::new(RecordingSink::new(PlayLog::default(), Duration::ZERO)),
        );
        handle.stop();
        handle.stop();
        let stats = handle.shutdown().await;
        assert_eq!(stats, QueueStats::default());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_playback() {
        let log = PlayLog::default();
        let sink = RecordingSink::new(log.clone(), Duration::from_secs(10));
        let handle = spawn_worker(
            PeerId::new("alice"),
            Box::new(LabelDecoder),
            Box::new(sink),
        );

        handle.deliver(chunk(1, &[10]));
        handle.deliver(chunk(2, &[20]));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // First chunk is mid-playback; stop must not wait the full 10s
        let start = Instant::now();
        let stats = handle.shutdown().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.played, 0);
    }
}
