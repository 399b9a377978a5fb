//! An in-process network for exercising whole nodes without sockets.
//!
//! Each virtual node gets the same actor assembly as a real one (engine,
//! session manager, store). The [Hub] stands in for the routers: it carries
//! outbound messages straight into the recipient node's inboxes and keeps a
//! transcript, so tests can assert on exactly what crossed the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use actix::{Actor, Addr, Context, Handler, Recipient};

use crate::cid::ContentId;
use crate::engine::Engine;
use crate::message::SwapMessage;
use crate::peer_id::{PeerId, PeerMetadata};
use crate::protocol::{Inbound, Outbound, PeerEvent};
use crate::server::SwapConfig;
use crate::session::SessionManager;
use crate::store::MemStore;

/// One message in flight between two virtual nodes.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Transfer {
    pub from: PeerId,
    pub to: PeerId,
    pub message: SwapMessage,
}

/// Delivers traffic between virtual nodes and records all of it.
pub struct Hub {
    inboxes: HashMap<PeerId, Vec<Recipient<Inbound>>>,
    transcript: Vec<Transfer>,
}

impl Hub {
    pub fn new() -> Hub {
        Hub { inboxes: HashMap::new(), transcript: vec![] }
    }
}

impl Actor for Hub {
    type Context = Context<Self>;
}

/// Registers where a node's inbound traffic should be delivered.
#[derive(Clone, Message)]
#[rtype(result = "()")]
pub struct Attach {
    pub peer: PeerId,
    pub inboxes: Vec<Recipient<Inbound>>,
}

impl Handler<Attach> for Hub {
    type Result = ();

    fn handle(&mut self, msg: Attach, _ctx: &mut Context<Self>) -> Self::Result {
        let _ = self.inboxes.insert(msg.peer, msg.inboxes);
    }
}

impl Handler<Transfer> for Hub {
    type Result = ();

    fn handle(&mut self, msg: Transfer, _ctx: &mut Context<Self>) -> Self::Result {
        self.transcript.push(msg.clone());
        if let Some(inboxes) = self.inboxes.get(&msg.to) {
            for inbox in inboxes.iter() {
                let _ = inbox
                    .do_send(Inbound { peer: msg.from.clone(), message: msg.message.clone() });
            }
        }
    }
}

/// The transcript so far.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Traffic")]
pub struct GetTraffic;

#[derive(Debug, Clone, MessageResponse)]
pub struct Traffic {
    pub transfers: Vec<Transfer>,
}

impl Traffic {
    /// The messages which crossed the wire from one peer to another.
    pub fn between(&self, from: &PeerId, to: &PeerId) -> Vec<SwapMessage> {
        self.transfers
            .iter()
            .filter(|transfer| &transfer.from == from && &transfer.to == to)
            .map(|transfer| transfer.message.clone())
            .collect()
    }

    /// Every cancel in the transcript as `(from, to, cid)`.
    pub fn cancels(&self) -> Vec<(PeerId, PeerId, ContentId)> {
        let mut cancels = vec![];
        for transfer in self.transfers.iter() {
            for wire_entry in transfer.message.wantlist() {
                if wire_entry.cancel {
                    cancels.push((
                        transfer.from.clone(),
                        transfer.to.clone(),
                        wire_entry.entry.cid.clone(),
                    ));
                }
            }
        }
        cancels
    }
}

impl Handler<GetTraffic> for Hub {
    type Result = Traffic;

    fn handle(&mut self, _msg: GetTraffic, _ctx: &mut Context<Self>) -> Self::Result {
        Traffic { transfers: self.transcript.clone() }
    }
}

/// Forwards one node's outbound messages into the hub under its identity.
pub struct Relay {
    from: PeerId,
    hub: Addr<Hub>,
}

impl Relay {
    pub fn new(from: PeerId, hub: Addr<Hub>) -> Relay {
        Relay { from, hub }
    }
}

impl Actor for Relay {
    type Context = Context<Self>;
}

impl Handler<Outbound> for Relay {
    type Result = ();

    fn handle(&mut self, msg: Outbound, _ctx: &mut Context<Self>) -> Self::Result {
        self.hub.do_send(Transfer { from: self.from.clone(), to: msg.peer, message: msg.message });
    }
}

/// One assembled virtual node.
pub struct Node {
    pub metadata: PeerMetadata,
    pub store: Arc<MemStore>,
    pub engine: Addr<Engine>,
    pub manager: Addr<SessionManager>,
}

impl Node {
    pub fn id(&self) -> PeerId {
        self.metadata.id.clone()
    }
}

/// Builds virtual nodes around a shared hub.
pub struct Testnet {
    pub hub: Addr<Hub>,
    pub nodes: Vec<Node>,
    config: SwapConfig,
}

impl Testnet {
    pub fn new(config: SwapConfig) -> Testnet {
        Testnet { hub: Hub::new().start(), nodes: vec![], config }
    }

    /// Spawns a node. The port only serves to give it a distinct identity.
    pub fn spawn_node(&mut self, port: u16) {
        let ip: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let id = PeerId::from_ip(&ip);
        let store = Arc::new(MemStore::new());
        let relay = Relay::new(id.clone(), self.hub.clone()).start();
        let engine =
            Engine::new(relay.clone().recipient(), store.clone(), self.config.engine()).start();
        let manager = SessionManager::new(
            relay.clone().recipient(),
            engine.clone().recipient(),
            store.clone(),
            self.config.clone(),
        )
        .start();
        self.hub.do_send(Attach {
            peer: id.clone(),
            inboxes: vec![engine.clone().recipient(), manager.clone().recipient()],
        });
        self.nodes.push(Node { metadata: PeerMetadata::new(id, ip), store, engine, manager });
    }

    /// Connects every node to every other, as the routers of a live
    /// deployment would once the hellos have gone round.
    pub fn connect_all(&self) {
        for node in self.nodes.iter() {
            for other in self.nodes.iter() {
                if node.metadata.id == other.metadata.id {
                    continue;
                }
                node.engine.do_send(PeerEvent::Connected(other.metadata.clone()));
                node.manager.do_send(PeerEvent::Connected(other.metadata.clone()));
            }
        }
    }

    /// Severs the link between two nodes in both directions.
    pub fn disconnect(&self, left: usize, right: usize) {
        let a = &self.nodes[left];
        let b = &self.nodes[right];
        a.engine.do_send(PeerEvent::Disconnected(b.metadata.clone()));
        a.manager.do_send(PeerEvent::Disconnected(b.metadata.clone()));
        b.engine.do_send(PeerEvent::Disconnected(a.metadata.clone()));
        b.manager.do_send(PeerEvent::Disconnected(a.metadata.clone()));
    }
}
