//! In-memory loopback transport
//!
//! A hub of endpoints that delivers envelopes directly between them:
//! broadcast reaches every connected endpoint (including the sender, which
//! mirrors a shared pub/sub topic), direct sends reach one endpoint. Links
//! can be broken and refused to exercise the session's reconnect path.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chunk::{PeerId, Recipient};
use crate::error::TransportError;
use crate::transport::{LinkStatus, Transport, TransportEvent};

#[derive(Default)]
struct EndpointState {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
}

impl EndpointState {
    fn emit(&self, make_event: impl Fn() -> TransportEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(make_event()).is_ok());
    }
}

#[derive(Default)]
struct HubInner {
    endpoints: DashMap<PeerId, Arc<EndpointState>>,
}

/// A set of loopback endpoints that can reach each other
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or fetch) the endpoint for `id`
    pub fn endpoint(&self, id: PeerId) -> Arc<LoopbackTransport> {
        let state = self
            .inner
            .endpoints
            .entry(id.clone())
            .or_default()
            .clone();
        Arc::new(LoopbackTransport {
            id,
            hub: self.inner.clone(),
            state,
        })
    }
}

/// One endpoint's view of the hub
pub struct LoopbackTransport {
    id: PeerId,
    hub: Arc<HubInner>,
    state: Arc<EndpointState>,
}

impl LoopbackTransport {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Simulate a link drop: sends start failing and subscribers observe a
    /// `Disconnected` status transition
    pub fn break_link(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.emit(|| TransportEvent::Status(LinkStatus::Disconnected));
    }

    /// Make subsequent `connect` calls fail until re-allowed
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::SeqCst);
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) -> Result<(), TransportError> {
        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(
                "endpoint refusing connections".to_string(),
            ));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        self.state.emit(|| TransportEvent::Status(LinkStatus::Connected));
        Ok(())
    }

    fn send(&self, envelope: Bytes, destination: &Recipient) -> Result<(), TransportError> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        match destination {
            Recipient::Broadcast => {
                for entry in self.hub.endpoints.iter() {
                    if entry.value().connected.load(Ordering::SeqCst) {
                        entry
                            .value()
                            .emit(|| TransportEvent::Envelope(envelope.clone()));
                    }
                }
                Ok(())
            }
            Recipient::Peer(peer) => match self.hub.endpoints.get(peer) {
                Some(target) => {
                    if target.connected.load(Ordering::SeqCst) {
                        target.emit(|| TransportEvent::Envelope(envelope.clone()));
                    }
                    Ok(())
                }
                None => Err(TransportError::UnknownRecipient(peer.to_string())),
            },
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subscribers.lock().push(tx);
        rx
    }

    fn status(&self) -> LinkStatus {
        if self.state.connected.load(Ordering::SeqCst) {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }
}
