//! Wire frames and the actor-facing network envelope.
//!
//! On the wire a connection carries [Frame]s: first a [Hello] identifying the
//! dialer, then [SwapMessage]s until the dialer hangs up. Inside the process
//! the network boundary speaks [Inbound] / [Outbound] / [PeerEvent]; the
//! engine and session manager never touch sockets.

use crate::message::SwapMessage;
use crate::peer_id::{PeerId, PeerMetadata};

/// The first frame on every dialed connection: who is talking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub peer: PeerMetadata,
}

impl Hello {
    pub fn new(peer: PeerMetadata) -> Self {
        Hello { peer }
    }
}

/// Everything that can cross a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Hello(Hello),
    Message(SwapMessage),
}

/// A protocol message handed to the network adapter for delivery to one peer.
/// Fire-and-forget: once accepted, delivery is not awaited.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Outbound {
    pub peer: PeerId,
    pub message: SwapMessage,
}

impl Outbound {
    pub fn new(peer: PeerId, message: SwapMessage) -> Self {
        Outbound { peer, message }
    }
}

/// A protocol message received from a peer, delivered into the engine and the
/// session manager.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Inbound {
    pub peer: PeerId,
    pub message: SwapMessage,
}

impl Inbound {
    pub fn new(peer: PeerId, message: SwapMessage) -> Self {
        Inbound { peer, message }
    }
}

/// Connectivity changes reported by the network adapter.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub enum PeerEvent {
    Connected(PeerMetadata),
    Disconnected(PeerMetadata),
}
