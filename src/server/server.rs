use super::router::{RegisterPeer, Router};
use crate::channel::Channel;
use crate::peer_id::PeerMetadata;
use crate::protocol::{Frame, Inbound};
use crate::{Error, Result};

use tracing::{debug, info};

use actix::Addr;

use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Accepts connections from peers and feeds their frames to the router.
pub struct Server {
    /// The ip address which this server binds to.
    ip: SocketAddr,
    /// The address of the router.
    router: Addr<Router>,
}

impl Server {
    pub fn new(ip: SocketAddr, router: Addr<Router>) -> Server {
        Server { ip, router }
    }

    pub async fn listen(self) -> Result<()> {
        let listener = TcpListener::bind(self.ip).await?;
        info!("listening on {:?}", self.ip);
        loop {
            let router = self.router.clone();
            let (channel, remote): (Channel<Frame>, SocketAddr) =
                Channel::accept(&listener).await?;
            let _ = tokio::spawn(async move {
                if let Err(err) = read_frames(channel, router).await {
                    debug!("connection from {:?} dropped: {:?}", remote, err);
                }
            });
        }
    }
}

/// Reads one connection to exhaustion. The first frame must introduce the
/// dialer; every further frame is protocol traffic attributed to it.
async fn read_frames(channel: Channel<Frame>, router: Addr<Router>) -> Result<()> {
    let (_sender, mut receiver) = channel.split();
    let peer: PeerMetadata = match receiver.recv().await? {
        Some(Frame::Hello(hello)) => {
            router.do_send(RegisterPeer { metadata: hello.peer.clone() });
            hello.peer
        }
        _ => return Err(Error::InvalidHandshake),
    };
    while let Some(frame) = receiver.recv().await? {
        match frame {
            Frame::Message(message) => {
                router.do_send(Inbound { peer: peer.id.clone(), message });
            }
            Frame::Hello(_) => return Err(Error::InvalidHandshake),
        }
    }
    Ok(())
}
