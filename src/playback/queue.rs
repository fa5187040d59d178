//! Per-peer playback queue state machine
//!
//! Invariants:
//! - at most one chunk is being decoded/played at any instant per queue,
//! - chunks play in the order they were appended (arrival order), never
//!   reordered by send sequence: reordering on late arrival would unbound
//!   playback latency,
//! - a (sender, sequence) pair already seen this session is dropped
//!   silently (idempotent intake),
//! - a decode failure drops that chunk and immediately tries the next one,
//! - the pending set is bounded: past [`MAX_PENDING_CHUNKS`] the oldest
//!   chunk is dropped, keeping memory and playback latency bounded when
//!   chunks arrive faster than real time.

use std::collections::{HashSet, VecDeque};

use crate::audio::pcm::{PayloadDecoder, PcmAudio};
use crate::chunk::{AudioChunk, PeerId};
use crate::constants::MAX_PENDING_CHUNKS;

/// Queue state: Playing while exactly one chunk is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Playing,
}

/// Outcome of appending a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// The (sender, sequence) pair was already seen this session
    Duplicate,
}

/// Counters for observability and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub played: u64,
    pub duplicates: u64,
    pub decode_failures: u64,
    /// Chunks evicted because the pending set was full
    pub dropped: u64,
}

/// A chunk that decoded successfully and is about to play
pub struct Playable {
    pub sequence: u64,
    pub audio: PcmAudio,
}

/// FIFO queue of pending chunks for a single peer
pub struct PlaybackQueue {
    peer: PeerId,
    state: QueueState,
    pending: VecDeque<AudioChunk>,
    seen: HashSet<u64>,
    stats: QueueStats,
}

impl PlaybackQueue {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: QueueState::Idle,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            stats: QueueStats::default(),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Append a chunk at the tail; duplicates are dropped without any
    /// state change
    ///
    /// When the pending set is full the oldest chunk is evicted first:
    /// live voice favors recency over completeness, and the evicted
    /// sequence stays in the dedup set.
    pub fn push(&mut self, chunk: AudioChunk) -> PushOutcome {
        if !self.seen.insert(chunk.sequence) {
            self.stats.duplicates += 1;
            tracing::debug!(
                peer = %self.peer,
                sequence = chunk.sequence,
                "dropping duplicate chunk"
            );
            return PushOutcome::Duplicate;
        }
        if self.pending.len() >= MAX_PENDING_CHUNKS {
            if let Some(evicted) = self.pending.pop_front() {
                self.stats.dropped += 1;
                tracing::warn!(
                    peer = %self.peer,
                    sequence = evicted.sequence,
                    "queue full, dropping oldest chunk"
                );
            }
        }
        self.stats.enqueued += 1;
        self.pending.push_back(chunk);
        PushOutcome::Enqueued
    }

    /// Advance the state machine: pop chunks until one decodes, entering
    /// `Playing`, or the queue drains, entering `Idle`
    ///
    /// Called both when a chunk arrives while idle and when playback of the
    /// previous chunk completes. Decode failures never stall the queue.
    pub fn next_playable(&mut self, decoder: &mut dyn PayloadDecoder) -> Option<Playable> {
        loop {
            let Some(chunk) = self.pending.pop_front() else {
                self.state = QueueState::Idle;
                return None;
            };
            match decoder.decode(&chunk.payload) {
                Ok(audio) => {
                    self.state = QueueState::Playing;
                    return Some(Playable {
                        sequence: chunk.sequence,
                        audio,
                    });
                }
                Err(e) => {
                    self.stats.decode_failures += 1;
                    tracing::warn!(
                        peer = %self.peer,
                        sequence = chunk.sequence,
                        error = %e,
                        "dropping undecodable chunk"
                    );
                }
            }
        }
    }

    /// Record that the in-flight chunk finished playing
    pub fn mark_played(&mut self) {
        self.stats.played += 1;
    }

    /// Cancel playback and discard pending chunks, keeping the dedup set
    /// so a reconnect cannot reintroduce already-played chunks; idempotent
    pub fn reset(&mut self) {
        self.pending.clear();
        self.state = QueueState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use bytes::Bytes;

    /// Decoder that fails whenever the first payload byte is 0xBB
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

    fn chunk(sequence: u64, payload: &[u8]) -> AudioChunk {
        AudioChunk {
            sender: PeerId::new("alice"),
            recipient: crate::chunk::Recipient::Broadcast,
            sequence,
            captured_at: 0,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn queue() -> PlaybackQueue {
        PlaybackQueue::new(PeerId::new("alice"))
    }

    #[test]
    fn test_fifo_arrival_order_not_sequence_order() {
        let mut q = queue();
        // Network jitter: sequence 2 arrives before sequence 1
        assert_eq!(q.push(chunk(2, &[2])), PushOutcome::Enqueued);
        assert_eq!(q.push(chunk(1, &[1])), PushOutcome::Enqueued);

        let first = q.next_playable(&mut MarkerDecoder).unwrap();
        assert_eq!(first.sequence, 2);
        assert_eq!(q.state(), QueueState::Playing);

        let second = q.next_playable(&mut MarkerDecoder).unwrap();
        assert_eq!(second.sequence, 1);

        assert!(q.next_playable(&mut MarkerDecoder).is_none());
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(q.stats().duplicates, 0);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut q = queue();
        q.push(chunk(7, &[0]));
        assert_eq!(q.len(), 1);
        assert_eq!(q.push(chunk(7, &[0])), PushOutcome::Duplicate);
        assert_eq!(q.len(), 1);
        assert_eq!(q.stats().duplicates, 1);
    }

    #[test]
    fn test_duplicate_of_played_chunk_is_noop() {
        let mut q = queue();
        q.push(chunk(3, &[0]));
        q.next_playable(&mut MarkerDecoder).unwrap();
        q.mark_played();
        assert!(q.next_playable(&mut MarkerDecoder).is_none());

        // Redelivery after playback must still be dropped
        assert_eq!(q.push(chunk(3, &[0])), PushOutcome::Duplicate);
        assert!(q.is_empty());
    }

    #[test]
    fn test_decode_failure_does_not_stall() {
        let mut q = queue();
        q.push(chunk(1, &[0xBB]));
        q.push(chunk(2, &[0x01]));

        // The bad chunk is skipped and the good one plays
        let playable = q.next_playable(&mut MarkerDecoder).unwrap();
        assert_eq!(playable.sequence, 2);
        q.mark_played();

        assert!(q.next_playable(&mut MarkerDecoder).is_none());
        assert_eq!(q.state(), QueueState::Idle);

        let stats = q.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.played, 1);
    }

    #[test]
    fn test_all_bad_drains_to_idle() {
        let mut q = queue();
        q.push(chunk(1, &[0xBB]));
        q.push(chunk(2, &[0xBB]));
        assert!(q.next_playable(&mut MarkerDecoder).is_none());
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(q.stats().decode_failures, 2);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut q = queue();
        for seq in 0..(MAX_PENDING_CHUNKS as u64 + 2) {
            assert_eq!(q.push(chunk(seq, &[0])), PushOutcome::Enqueued);
        }
        assert_eq!(q.len(), MAX_PENDING_CHUNKS);
        assert_eq!(q.stats().dropped, 2);

        // The two oldest chunks were evicted; playback starts at sequence 2
        assert_eq!(q.next_playable(&mut MarkerDecoder).unwrap().sequence, 2);
        // An evicted sequence is still deduped on redelivery
        assert_eq!(q.push(chunk(0, &[0])), PushOutcome::Duplicate);
    }

    #[test]
    fn test_reset_keeps_dedup_state() {
        let mut q = queue();
        q.push(chunk(1, &[0]));
        q.push(chunk(2, &[0]));
        q.reset();
        assert!(q.is_empty());
        assert_eq!(q.state(), QueueState::Idle);
        // Resetting an idle queue is a no-op
        q.reset();

        assert_eq!(q.push(chunk(1, &[0])), PushOutcome::Duplicate);
        assert_eq!(q.push(chunk(3, &[0])), PushOutcome::Enqueued);
    }
}
