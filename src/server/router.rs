use std::collections::HashMap;
use std::net::SocketAddr;

use actix::{Actor, AsyncContext, Context, Handler, Recipient};
use tracing::{debug, info, warn};

use crate::client;
use crate::peer_id::{PeerId, PeerMetadata};
use crate::protocol::{Inbound, Outbound, PeerEvent};

/// The network adapter actor.
///
/// Keeps the transport addresses of known peers, fans inbound protocol
/// traffic out to the engine and the session manager, and dials peers on
/// their behalf for outgoing messages. Delivery is fire-and-forget: a failed
/// dial demotes the peer to disconnected rather than propagating an error
/// into the schedulers.
pub struct Router {
    /// Our own identity, sent in the hello of every dialed connection.
    identity: PeerMetadata,
    /// Where inbound protocol messages are delivered.
    inboxes: Vec<Recipient<Inbound>>,
    /// Who hears about peers coming and going.
    watchers: Vec<Recipient<PeerEvent>>,
    /// Transport addresses of known peers.
    registry: HashMap<PeerId, SocketAddr>,
}

impl Router {
    pub fn new(identity: PeerMetadata) -> Self {
        Router { identity, inboxes: vec![], watchers: vec![], registry: HashMap::new() }
    }
}

impl Actor for Router {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("router> started");
    }
}

/// Wires a component into the router's fan-out.
#[derive(Clone, Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub inbox: Recipient<Inbound>,
    pub watcher: Recipient<PeerEvent>,
}

impl Handler<Subscribe> for Router {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _ctx: &mut Context<Self>) -> Self::Result {
        self.inboxes.push(msg.inbox);
        self.watchers.push(msg.watcher);
    }
}

/// A peer became reachable: remember its address and tell the subscribers.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct RegisterPeer {
    pub metadata: PeerMetadata,
}

impl Handler<RegisterPeer> for Router {
    type Result = ();

    fn handle(&mut self, msg: RegisterPeer, _ctx: &mut Context<Self>) -> Self::Result {
        let known = self.registry.get(&msg.metadata.id) == Some(&msg.metadata.ip);
        let _ = self.registry.insert(msg.metadata.id.clone(), msg.metadata.ip);
        if known {
            return;
        }
        info!("router> peer {} at {:?}", msg.metadata.id, msg.metadata.ip);
        for watcher in self.watchers.iter() {
            let _ = watcher.do_send(PeerEvent::Connected(msg.metadata.clone()));
        }
    }
}

/// A peer became unreachable: forget it and tell the subscribers.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct UnregisterPeer {
    pub peer: PeerId,
}

impl Handler<UnregisterPeer> for Router {
    type Result = ();

    fn handle(&mut self, msg: UnregisterPeer, _ctx: &mut Context<Self>) -> Self::Result {
        let ip = match self.registry.remove(&msg.peer) {
            Some(ip) => ip,
            None => return,
        };
        info!("router> lost peer {}", msg.peer);
        let metadata = PeerMetadata { id: msg.peer, ip };
        for watcher in self.watchers.iter() {
            let _ = watcher.do_send(PeerEvent::Disconnected(metadata.clone()));
        }
    }
}

impl Handler<Inbound> for Router {
    type Result = ();

    fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self>) -> Self::Result {
        for inbox in self.inboxes.iter() {
            let _ = inbox.do_send(msg.clone());
        }
    }
}

impl Handler<Outbound> for Router {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Context<Self>) -> Self::Result {
        let ip = match self.registry.get(&msg.peer) {
            Some(ip) => *ip,
            None => {
                debug!("router> no address for {}", msg.peer);
                return;
            }
        };
        let identity = self.identity.clone();
        let peer = msg.peer.clone();
        let myself = ctx.address();
        let _ = tokio::spawn(async move {
            if let Err(err) = client::deliver(&ip, identity, msg.message).await {
                warn!("router> could not reach {} at {:?}: {:?}", peer, ip, err);
                myself.do_send(UnregisterPeer { peer });
            }
        });
    }
}

/// The currently known peers, for diagnostics and tests.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Peers")]
pub struct GetPeers;

#[derive(Debug, Clone, MessageResponse)]
pub struct Peers {
    pub peers: Vec<PeerMetadata>,
}

impl Handler<GetPeers> for Router {
    type Result = Peers;

    fn handle(&mut self, _msg: GetPeers, _ctx: &mut Context<Self>) -> Self::Result {
        let peers = self
            .registry
            .iter()
            .map(|(id, ip)| PeerMetadata { id: id.clone(), ip: *ip })
            .collect();
        Peers { peers }
    }
}
