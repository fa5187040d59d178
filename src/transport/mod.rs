//! Transport channel boundary
//!
//! The core never implements a network transport; it depends on this trait
//! and observes link status transitions. Connection establishment and the
//! wire handshake belong to the implementation behind the trait. The
//! in-memory [`loopback`] hub exists for tests and the demo binary.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::chunk::Recipient;
use crate::error::TransportError;

pub mod loopback;

pub use loopback::{LoopbackHub, LoopbackTransport};

/// Link state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// One event delivered to a subscriber
#[derive(Debug)]
pub enum TransportEvent {
    /// An envelope arrived; at-most-once per network receipt, but duplicates
    /// under retry are possible and the playback queue dedups them
    Envelope(Bytes),
    /// The link status changed
    Status(LinkStatus),
}

/// Abstract send/receive of binary envelopes
pub trait Transport: Send + Sync {
    /// Establish (or re-establish) the link
    fn connect(&self) -> Result<(), TransportError>;

    /// Send one envelope to `destination`
    fn send(&self, envelope: Bytes, destination: &Recipient) -> Result<(), TransportError>;

    /// Subscribe to inbound envelopes and status transitions
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Current link status
    fn status(&self) -> LinkStatus;
}
