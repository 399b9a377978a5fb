//! Dial-out side of the protocol. Connections are short-lived: introduce
//! ourselves with a `Hello`, optionally carry one message, hang up.

use crate::channel::Channel;
use crate::message::SwapMessage;
use crate::peer_id::PeerMetadata;
use crate::protocol::{Frame, Hello};
use crate::Result;

use std::net::SocketAddr;

/// Announces this node to a peer. Used at startup towards bootstrap peers so
/// that they learn our listener address.
pub async fn hello(ip: &SocketAddr, identity: PeerMetadata) -> Result<()> {
    let channel: Channel<Frame> = Channel::connect(ip).await?;
    let (mut sender, _receiver) = channel.split();
    let () = sender.send(Frame::Hello(Hello::new(identity))).await?;
    Ok(())
}

/// Sends one protocol message to a peer over a fresh connection.
pub async fn deliver(ip: &SocketAddr, identity: PeerMetadata, message: SwapMessage) -> Result<()> {
    let channel: Channel<Frame> = Channel::connect(ip).await?;
    let (mut sender, _receiver) = channel.split();
    let () = sender.send(Frame::Hello(Hello::new(identity))).await?;
    let () = sender.send(Frame::Message(message)).await?;
    Ok(())
}
