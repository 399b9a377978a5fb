use crate::colored::Colorize;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use actix::{Actor, Addr, AsyncContext, Context, Handler, Recipient};
use tracing::{debug, info, warn};

use crate::cid::ContentId;
use crate::engine::RecordViolation;
use crate::message::SwapMessage;
use crate::peer_id::PeerId;
use crate::protocol::{Inbound, Outbound, PeerEvent};
use crate::server::SwapConfig;
use crate::store::BlockStore;
use crate::wantlist::WantType;

use super::session::{
    AbandonWant, AddWants, GotBlock, GotPresence, PeerJoined, PeerLeft, Session, SessionBlock,
    Shutdown,
};
use super::want_index::WantIndex;
use super::SessionId;

/// Client-side coordinator of all sessions.
///
/// The manager spawns one [Session] actor per open session and owns the
/// shared want index, so all want traffic is deduplicated in one place:
/// overlapping sessions put at most one `WantBlock` per (peer, cid) on the
/// wire, and a cancel goes out only when the last interested session lets go.
/// Arriving blocks are validated once here, kept in the local store, and
/// fanned out to every interested session; a block failing validation is
/// reported as a protocol violation instead.
pub struct SessionManager {
    /// Outgoing wire messages.
    sender: Recipient<Outbound>,
    /// Where protocol violations are reported.
    trust: Recipient<RecordViolation>,
    /// Fetched blocks are kept here so the engine can serve them onwards.
    store: Arc<dyn BlockStore>,
    config: SwapConfig,
    index: WantIndex,
    sessions: HashMap<SessionId, Addr<Session>>,
    next_session: SessionId,
    peers: HashSet<PeerId>,
}

impl SessionManager {
    pub fn new(
        sender: Recipient<Outbound>,
        trust: Recipient<RecordViolation>,
        store: Arc<dyn BlockStore>,
        config: SwapConfig,
    ) -> SessionManager {
        SessionManager {
            sender,
            trust,
            store,
            config,
            index: WantIndex::new(),
            sessions: HashMap::new(),
            next_session: 0,
            peers: HashSet::new(),
        }
    }

    fn send_want(&mut self, peer: PeerId, cid: ContentId, want_type: WantType, priority: i32) {
        if !self.index.begin_send(&peer, &cid, want_type) {
            debug!("[{}] duplicate want for {} suppressed", "manager".yellow(), cid);
            return;
        }
        let mut message = SwapMessage::new(false);
        message.add_want(cid, priority, want_type, true);
        let _ = self.sender.do_send(Outbound { peer, message });
    }

    fn send_cancels(&mut self, cid: &ContentId, peers: Vec<PeerId>) {
        for peer in peers {
            debug!("[{}] cancelling {} at {}", "manager".yellow(), cid, peer);
            let mut message = SwapMessage::new(false);
            message.add_cancel(cid.clone());
            let _ = self.sender.do_send(Outbound { peer, message });
        }
    }
}

impl Actor for SessionManager {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("started session manager");
    }
}

/// Opens a session. Completed blocks will be delivered to `sink`.
#[derive(Clone, Message)]
#[rtype(result = "StartedSession")]
pub struct NewSession {
    pub sink: Recipient<SessionBlock>,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct StartedSession {
    pub session: SessionId,
}

impl Handler<NewSession> for SessionManager {
    type Result = StartedSession;

    fn handle(&mut self, msg: NewSession, ctx: &mut Context<Self>) -> Self::Result {
        let session = self.next_session;
        self.next_session += 1;
        let actor = Session::new(
            session,
            ctx.address().recipient(),
            msg.sink,
            self.config.clone(),
            self.peers.clone(),
        )
        .start();
        let _ = self.sessions.insert(session, actor);
        info!("[{}] opened session {}", "manager".yellow(), session);
        StartedSession { session }
    }
}

/// Adds wants to an open session.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Want {
    pub session: SessionId,
    pub cids: Vec<ContentId>,
}

impl Handler<Want> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: Want, _ctx: &mut Context<Self>) -> Self::Result {
        let actor = match self.sessions.get(&msg.session) {
            Some(actor) => actor.clone(),
            None => {
                warn!("[{}] want for unknown session {}", "manager".yellow(), msg.session);
                return;
            }
        };
        for cid in msg.cids.iter() {
            let _ = self.index.register(msg.session, cid);
        }
        actor.do_send(AddWants { cids: msg.cids });
    }
}

/// Withdraws one want. The session abandons it immediately; the wire cancel
/// waits until no other session is interested.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct CancelWant {
    pub session: SessionId,
    pub cid: ContentId,
}

impl Handler<CancelWant> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: CancelWant, _ctx: &mut Context<Self>) -> Self::Result {
        if let Some(actor) = self.sessions.get(&msg.session) {
            actor.do_send(AbandonWant { cid: msg.cid.clone() });
        }
        if let Some(cancels) = self.index.release(msg.session, &msg.cid) {
            debug!("[{}] {} dropped by its last session", "manager".yellow(), msg.cid);
            self.send_cancels(&msg.cid, cancels);
        }
    }
}

/// Tears a session down, withdrawing everything it still wanted.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct CloseSession {
    pub session: SessionId,
}

impl Handler<CloseSession> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: CloseSession, _ctx: &mut Context<Self>) -> Self::Result {
        let actor = match self.sessions.remove(&msg.session) {
            Some(actor) => actor,
            None => return,
        };
        actor.do_send(Shutdown);
        for (cid, cancels) in self.index.release_session(msg.session) {
            self.send_cancels(&cid, cancels);
        }
        info!("[{}] closed session {}", "manager".yellow(), msg.session);
    }
}

/// A session asking for a want to go on the wire, subject to deduplication.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct WantRequest {
    pub session: SessionId,
    pub peer: PeerId,
    pub cid: ContentId,
    pub want_type: WantType,
    pub priority: i32,
}

impl Handler<WantRequest> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: WantRequest, _ctx: &mut Context<Self>) -> Self::Result {
        if !self.peers.contains(&msg.peer) {
            return;
        }
        self.send_want(msg.peer, msg.cid, msg.want_type, msg.priority);
    }
}

impl Handler<Inbound> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self>) -> Self::Result {
        let Inbound { peer, message } = msg;
        for block in message.blocks().iter().cloned() {
            if !block.verifies() {
                warn!(
                    "[{}] block from {} fails validation, recording violation",
                    "manager".yellow(),
                    peer
                );
                let _ = self.trust.do_send(RecordViolation { peer: peer.clone() });
                continue;
            }
            let cid = block.cid.clone();
            if !self.index.is_wanted(&cid) {
                debug!("[{}] unsolicited block {} from {}", "manager".yellow(), cid, peer);
                continue;
            }
            if let Err(err) = self.store.put(&block) {
                warn!("[{}] failed to store {}: {:?}", "manager".yellow(), cid, err);
            }
            let (sessions, cancels) = self.index.resolve(&cid, &peer);
            for session in sessions {
                if let Some(actor) = self.sessions.get(&session) {
                    actor.do_send(GotBlock { from: peer.clone(), block: block.clone() });
                }
            }
            self.send_cancels(&cid, cancels);
        }
        for presence in message.block_presences().iter() {
            self.index.note_presence(&peer, &presence.cid, presence.presence);
            for session in self.index.sessions_for(&presence.cid) {
                if let Some(actor) = self.sessions.get(&session) {
                    actor.do_send(GotPresence {
                        from: peer.clone(),
                        cid: presence.cid.clone(),
                        presence: presence.presence,
                    });
                }
            }
        }
    }
}

impl Handler<PeerEvent> for SessionManager {
    type Result = ();

    fn handle(&mut self, msg: PeerEvent, _ctx: &mut Context<Self>) -> Self::Result {
        match msg {
            PeerEvent::Connected(metadata) => {
                let _ = self.peers.insert(metadata.id.clone());
                info!("[{}] peer {} connected", "manager".yellow(), metadata.id);
                for actor in self.sessions.values() {
                    actor.do_send(PeerJoined { peer: metadata.id.clone() });
                }
            }
            PeerEvent::Disconnected(metadata) => {
                let _ = self.peers.remove(&metadata.id);
                self.index.peer_gone(&metadata.id);
                info!("[{}] peer {} disconnected", "manager".yellow(), metadata.id);
                for actor in self.sessions.values() {
                    actor.do_send(PeerLeft { peer: metadata.id.clone() });
                }
            }
        }
    }
}

/// Whether any session still wants the cid.
#[derive(Debug, Clone, Message)]
#[rtype(result = "WantedInfo")]
pub struct IsWanted {
    pub cid: ContentId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct WantedInfo {
    pub wanted: bool,
}

impl Handler<IsWanted> for SessionManager {
    type Result = WantedInfo;

    fn handle(&mut self, msg: IsWanted, _ctx: &mut Context<Self>) -> Self::Result {
        WantedInfo { wanted: self.index.is_wanted(&msg.cid) }
    }
}

/// The strongest unanswered want currently on the wire to a peer.
#[derive(Debug, Clone, Message)]
#[rtype(result = "OutstandingInfo")]
pub struct OutstandingWant {
    pub peer: PeerId,
    pub cid: ContentId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct OutstandingInfo {
    pub want_type: Option<WantType>,
}

impl Handler<OutstandingWant> for SessionManager {
    type Result = OutstandingInfo;

    fn handle(&mut self, msg: OutstandingWant, _ctx: &mut Context<Self>) -> Self::Result {
        OutstandingInfo { want_type: self.index.outstanding(&msg.peer, &msg.cid) }
    }
}
