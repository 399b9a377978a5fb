use std::net::SocketAddr;
use std::sync::Arc;

use crate::client;
use crate::engine::Engine;
use crate::peer_id::{PeerId, PeerMetadata};
use crate::server::{RegisterPeer, Router, Server, Settings, Subscribe};
use crate::session::SessionManager;
use crate::store::{BlockStore, MemStore, SledStore};
use crate::Result;

use actix::{Actor, Arbiter};
use tracing::{error, info, warn};

/// Assembles the actors of a node and starts listening.
///
/// The router is the only actor that touches sockets. The engine answers
/// other peers' wants; the session manager drives our own. Both subscribe to
/// the router for inbound traffic and connectivity changes.
pub fn run(settings: Settings) -> Result<()> {
    let listener_ip: SocketAddr =
        settings.listener_ip.parse().map_err(|_| crate::Error::PeerParseError)?;
    let node_id = PeerId::from_ip(&listener_ip);
    let identity = PeerMetadata::new(node_id.clone(), listener_ip);

    let mut bootstrap_peers = vec![];
    for description in settings.bootstrap_peers.iter() {
        bootstrap_peers.push(PeerMetadata::from_id_and_ip(description)?);
    }

    let store: Arc<dyn BlockStore> = match settings.db_path {
        Some(ref path) => Arc::new(SledStore::open(path)?),
        None => Arc::new(MemStore::new()),
    };

    info!("node {} is starting", node_id);

    let swap = settings.swap.clone();
    let execution = async move {
        let router = Router::new(identity.clone()).start();

        let engine = Engine::new(router.clone().recipient(), store.clone(), swap.engine()).start();
        let manager = SessionManager::new(
            router.clone().recipient(),
            engine.clone().recipient(),
            store.clone(),
            swap,
        )
        .start();

        router.do_send(Subscribe {
            inbox: engine.clone().recipient(),
            watcher: engine.clone().recipient(),
        });
        router.do_send(Subscribe {
            inbox: manager.clone().recipient(),
            watcher: manager.clone().recipient(),
        });

        // Introduce ourselves to the bootstrap peers so they dial us back.
        for peer in bootstrap_peers.iter().cloned() {
            router.do_send(RegisterPeer { metadata: peer.clone() });
            let identity = identity.clone();
            let _ = tokio::spawn(async move {
                if let Err(err) = client::hello(&peer.ip, identity).await {
                    warn!("could not announce to {:?}: {:?}", peer.ip, err);
                }
            });
        }

        let listener_execution = async move {
            let server = Server::new(listener_ip, router);
            if let Err(err) = server.listen().await {
                error!("listener stopped: {:?}", err);
            }
        };

        let arbiter = Arbiter::new();
        arbiter.spawn(listener_execution);
    };

    let arbiter = Arbiter::new();
    arbiter.spawn(execution);

    Ok(())
}
