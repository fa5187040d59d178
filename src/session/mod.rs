//! Session controller
//!
//! A [`Session`] owns one side of a conversation: the capture source handle,
//! the transport handle, and one playback worker per remote peer. It wires
//! the send path (capture → encode → transport) and the receive path
//! (transport → decode → per-peer playback queue), and drives reconnection
//! with exponential backoff when the transport reports a dropped link.
//!
//! Push-to-talk: the microphone is only open between `start_transmit` and
//! `stop_transmit`. The outbound sequence counter and the per-peer dedup
//! state both survive reconnection; they are only discarded with the
//! session itself.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::capture::{CaptureHandle, CaptureSource, MicSource};
use crate::audio::pcm::{PayloadDecoder, Pcm16Decoder};
use crate::chunk::{AudioChunk, PeerId, RawChunk};
use crate::codec;
use crate::config::{ReconnectConfig, SessionConfig};
use crate::constants::SEND_QUEUE_CHUNKS;
use crate::error::{Error, Result};
use crate::playback::sink::{DeviceSinkSource, SinkSource};
use crate::playback::worker::{spawn_worker, WorkerHandle};
use crate::transport::{LinkStatus, Transport, TransportEvent};

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Exponential reconnect backoff with a ceiling
pub struct Backoff {
    next_delay: Duration,
    max: Duration,
    multiplier: f64,
    initial: Duration,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial = Duration::from_millis(config.initial_delay_ms);
        Self {
            next_delay: initial,
            max: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            initial,
        }
    }

    /// The delay to wait before the next attempt; grows after each call
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_delay;
        self.next_delay = self.next_delay.mul_f64(self.multiplier).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next_delay = self.initial;
    }
}

/// Pluggable pieces of a session
///
/// Production sessions use the device-backed parts; tests substitute
/// scripted capture sources, decoders, and sinks.
pub struct SessionParts {
    pub capture: Arc<dyn CaptureSource>,
    pub decoder_factory: Box<dyn Fn(&PeerId) -> Box<dyn PayloadDecoder> + Send + Sync>,
    /// One output acquisition per session; peers get facades over it
    pub sinks: Box<dyn SinkSource>,
}

impl SessionParts {
    /// Microphone capture, PCM decode, and device playback
    pub fn device_backed(config: &SessionConfig) -> Self {
        let sample_rate = config.capture.sample_rate;
        let channels = config.capture.channels;
        Self {
            capture: Arc::new(MicSource),
            decoder_factory: Box::new(move |_| Box::new(Pcm16Decoder::new(sample_rate, channels))),
            sinks: Box::new(DeviceSinkSource::new(
                config.playback.clone(),
                sample_rate,
                channels,
            )),
        }
    }
}

struct Inner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    parts: SessionParts,
    status_tx: watch::Sender<SessionStatus>,
    shutdown_tx: watch::Sender<bool>,
    outbound_sequence: AtomicU64,
    workers: DashMap<PeerId, WorkerHandle>,
    capture_handle: Mutex<Option<CaptureHandle>>,
    raw_tx: mpsc::Sender<RawChunk>,
    raw_rx: Mutex<Option<mpsc::Receiver<RawChunk>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Inner {
    fn set_status(&self, status: SessionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                tracing::info!(?status, local = %self.config.local_id, "session status");
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

/// One participant's streaming session
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Session with microphone capture and device playback
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let parts = SessionParts::device_backed(&config);
        Self::with_parts(config, transport, parts)
    }

    /// Session with caller-supplied capture/decode/playback parts
    pub fn with_parts(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        parts: SessionParts,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (raw_tx, raw_rx) = mpsc::channel(SEND_QUEUE_CHUNKS);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                parts,
                status_tx,
                shutdown_tx,
                outbound_sequence: AtomicU64::new(0),
                workers: DashMap::new(),
                capture_handle: Mutex::new(None),
                raw_tx,
                raw_rx: Mutex::new(Some(raw_rx)),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.inner.config.local_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch status transitions
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx().subscribe()
    }

    fn status_tx(&self) -> &watch::Sender<SessionStatus> {
        &self.inner.status_tx
    }

    /// Connect the transport and start the send and receive paths
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.set_status(SessionStatus::Connecting);

        // Subscribe before connecting so no status transition is missed
        let events = self.inner.transport.subscribe();
        if let Err(e) = self.inner.transport.connect() {
            self.inner.set_status(SessionStatus::Disconnected);
            return Err(Error::Transport(e));
        }
        self.inner.set_status(SessionStatus::Connected);

        // One output acquisition per session; playback degrades to a
        // discarding sink when the device is unavailable
        if let Err(e) = self.inner.parts.sinks.acquire() {
            tracing::warn!(error = %e, "output device unavailable, playback disabled");
        }

        let Some(raw_rx) = self.inner.raw_rx.lock().take() else {
            return Ok(());
        };

        // Subscribe here, not inside the tasks, so a stop() racing right
        // behind start() cannot slip past an unsubscribed loop
        let mut tasks = self.inner.tasks.lock();
        tasks.push(tokio::spawn(receive_loop(
            self.inner.clone(),
            events,
            self.inner.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(send_loop(
            self.inner.clone(),
            raw_rx,
            self.inner.shutdown_tx.subscribe(),
        )));
        Ok(())
    }

    /// Open the microphone and start streaming chunks (push-to-talk down)
    ///
    /// A no-op when already transmitting. Fails with a capture error when
    /// the device is missing or access is denied; those are surfaced to the
    /// caller and never retried automatically.
    pub fn start_transmit(&self) -> Result<()> {
        let mut guard = self.inner.capture_handle.lock();
        if guard.is_some() {
            return Ok(());
        }
        let handle = self
            .inner
            .parts
            .capture
            .open(&self.inner.config.capture, self.inner.raw_tx.clone())?;
        tracing::info!(local = %self.inner.config.local_id, "transmit started");
        *guard = Some(handle);
        Ok(())
    }

    /// Release the microphone (push-to-talk up); a no-op when idle
    pub fn stop_transmit(&self) {
        if let Some(mut handle) = self.inner.capture_handle.lock().take() {
            handle.close();
            tracing::info!(local = %self.inner.config.local_id, "transmit stopped");
        }
    }

    pub fn is_transmitting(&self) -> bool {
        self.inner.capture_handle.lock().is_some()
    }

    /// Stop the session: capture first (no further outbound chunks), then
    /// the transport loops, then the playback workers; idempotent
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_transmit();
        let _ = self.inner.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        // The receive loop has exited, so no new workers can appear
        let peers: Vec<PeerId> = self
            .inner
            .workers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for peer in peers {
            if let Some((_, worker)) = self.inner.workers.remove(&peer) {
                let stats = worker.shutdown().await;
                tracing::debug!(
                    %peer,
                    played = stats.played,
                    decode_failures = stats.decode_failures,
                    "worker drained"
                );
            }
        }
        self.inner.parts.sinks.release();
        self.inner.set_status(SessionStatus::Disconnected);
    }
}

async fn receive_loop(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                None => {
                    tracing::warn!("transport event stream closed");
                    inner.set_status(SessionStatus::Disconnected);
                    break;
                }
                Some(TransportEvent::Envelope(bytes)) => handle_envelope(&inner, &bytes),
                Some(TransportEvent::Status(LinkStatus::Connected)) => {
                    inner.set_status(SessionStatus::Connected);
                }
                Some(TransportEvent::Status(LinkStatus::Reconnecting)) => {
                    inner.set_status(SessionStatus::Reconnecting);
                }
                Some(TransportEvent::Status(LinkStatus::Disconnected)) => {
                    if reconnect(&inner, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
    }
}

fn handle_envelope(inner: &Arc<Inner>, envelope: &[u8]) {
    let chunk = match codec::decode(envelope) {
        Ok(chunk) => chunk,
        Err(e) => {
            // Local to this envelope; the stream continues
            tracing::warn!(error = %e, "discarding malformed envelope");
            return;
        }
    };

    // Our own chunks come back via the broadcast topic
    if chunk.sender == inner.config.local_id {
        return;
    }

    let sender = chunk.sender.clone();
    let worker = inner.workers.entry(sender.clone()).or_insert_with(|| {
        tracing::info!(peer = %sender, "new peer stream");
        let decoder = (inner.parts.decoder_factory)(&sender);
        let sink = inner.parts.sinks.sink(&sender);
        spawn_worker(sender.clone(), decoder, sink)
    });

    if !worker.deliver(chunk) {
        tracing::warn!(peer = %sender, "playback worker is gone, dropping chunk");
    }
}

/// Retry the transport until it connects or the session shuts down;
/// returns true when shutting down
async fn reconnect(inner: &Arc<Inner>, shutdown: &mut watch::Receiver<bool>) -> bool {
    inner.set_status(SessionStatus::Reconnecting);
    let mut backoff = Backoff::new(&inner.config.reconnect);
    loop {
        let delay = backoff.next_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "link down, retrying");
        tokio::select! {
            _ = shutdown.changed() => return true,
            _ = tokio::time::sleep(delay) => {}
        }
        match inner.transport.connect() {
            Ok(()) => {
                inner.set_status(SessionStatus::Connected);
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reconnect attempt failed");
            }
        }
    }
}

async fn send_loop(
    inner: Arc<Inner>,
    mut raw_rx: mpsc::Receiver<RawChunk>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { break };
                if *inner.status_tx.borrow() != SessionStatus::Connected {
                    tracing::trace!("link down, dropping captured chunk");
                    continue;
                }

                let sequence = inner.outbound_sequence.fetch_add(1, Ordering::Relaxed);
                let chunk = AudioChunk {
                    sender: inner.config.local_id.clone(),
                    recipient: inner.config.recipient.clone(),
                    sequence,
                    captured_at: raw.captured_at,
                    payload: raw.payload,
                };

                let envelope = match codec::encode(&chunk) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode chunk");
                        continue;
                    }
                };
                if let Err(e) = inner.transport.send(envelope, &chunk.recipient) {
                    // The transport reports the disconnect through the
                    // event stream; the receive loop drives recovery
                    tracing::warn!(sequence, error = %e, "send failed");
                }
            }
        }
    }
}
