use crate::colored::Colorize;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Context, Handler, Recipient};
use tracing::debug;

use crate::block::Block;
use crate::cid::ContentId;
use crate::message::PresenceType;
use crate::peer_id::PeerId;
use crate::server::SwapConfig;
use crate::wantlist::WantType;

use super::manager::WantRequest;
use super::rtt::RttEstimate;
use super::SessionId;

/// Peers remembered as recent sources for probe ordering.
const AFFINITY_KEEP: usize = 16;

/// Floor on retry timers so a sub-millisecond latency estimate cannot spin
/// the session.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Exponential backoff over a base delay, saturating at `cap`.
fn backoff_delay(seed: Duration, multiplier: u32, attempt: u32, cap: Duration) -> Duration {
    let factor = multiplier.saturating_pow(attempt);
    let delay = seed.checked_mul(factor).unwrap_or(cap);
    delay.max(MIN_RETRY_DELAY).min(cap)
}

/// Where one wanted cid stands within its session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WantPhase {
    Unsent,
    /// `WantHave` probes are out, waiting for a first responder.
    Broadcast,
    /// A `WantBlock` is out against the best-ranked responder.
    Targeted { target: PeerId },
    Fulfilled,
    Abandoned,
}

#[derive(Debug)]
struct SessionWant {
    phase: WantPhase,
    priority: i32,
    /// Bumped on every transition; a timer firing with a stale epoch is void.
    epoch: u64,
    /// Retry round, drives the backoff exponent.
    attempt: u32,
    /// Peers asked during this round, with the send instant for latency.
    asked: HashMap<PeerId, Instant>,
    /// Peers that claimed to have the block, fallbacks for re-targeting.
    sources: VecDeque<PeerId>,
}

impl SessionWant {
    fn new(priority: i32) -> SessionWant {
        SessionWant {
            phase: WantPhase::Unsent,
            priority,
            epoch: 0,
            attempt: 0,
            asked: HashMap::new(),
            sources: VecDeque::new(),
        }
    }

    fn live(&self) -> bool {
        match self.phase {
            WantPhase::Fulfilled | WantPhase::Abandoned => false,
            _ => true,
        }
    }
}

/// Client-side retrieval driver for one batch of related wants.
///
/// A session turns "fetch these cids" into probe, target and retry traffic
/// against whichever peers answer fastest, and delivers completed blocks to
/// its sink. Every want goes through the manager's dedup index, so
/// overlapping sessions never duplicate wire wants.
pub struct Session {
    id: SessionId,
    /// Wants routed through the manager for deduplication.
    manager: Recipient<WantRequest>,
    /// Where completed blocks are delivered.
    sink: Recipient<SessionBlock>,
    config: SwapConfig,
    /// Connected peers, as pushed by the manager.
    peers: HashSet<PeerId>,
    /// Peers that recently supplied blocks, most recent first.
    affinity: VecDeque<PeerId>,
    rtt: HashMap<PeerId, RttEstimate>,
    /// Consecutive dont-have answers per peer.
    dont_haves: HashMap<PeerId, u32>,
    /// Peers this session stopped asking after too many dont-haves.
    pruned: HashSet<PeerId>,
    wants: HashMap<ContentId, SessionWant>,
    next_priority: i32,
    fulfilled: u64,
}

impl Session {
    pub fn new(
        id: SessionId,
        manager: Recipient<WantRequest>,
        sink: Recipient<SessionBlock>,
        config: SwapConfig,
        peers: HashSet<PeerId>,
    ) -> Session {
        Session {
            id,
            manager,
            sink,
            config,
            peers,
            affinity: VecDeque::new(),
            rtt: HashMap::new(),
            dont_haves: HashMap::new(),
            pruned: HashSet::new(),
            wants: HashMap::new(),
            next_priority: i32::MAX,
            fulfilled: 0,
        }
    }

    /// Affinity peers first, then the rest of the connected set, bounded by
    /// the configured fan-out and skipping peers already asked this round.
    fn broadcast_targets(&self, want: &SessionWant) -> Vec<PeerId> {
        let mut targets: Vec<PeerId> = vec![];
        let eligible = |peer: &PeerId| {
            self.peers.contains(peer)
                && !self.pruned.contains(peer)
                && !want.asked.contains_key(peer)
        };
        for peer in self.affinity.iter() {
            if targets.len() == self.config.broadcast_width {
                break;
            }
            if eligible(peer) && !targets.contains(peer) {
                targets.push(peer.clone());
            }
        }
        for peer in self.peers.iter() {
            if targets.len() == self.config.broadcast_width {
                break;
            }
            if eligible(peer) && !targets.contains(peer) {
                targets.push(peer.clone());
            }
        }
        targets
    }

    /// Sends `WantHave` probes for the next round. When every eligible peer
    /// has been asked already the round is forgotten, so the following
    /// timeout starts afresh against the full peer set.
    fn broadcast(&mut self, cid: &ContentId, ctx: &mut Context<Self>) {
        let (targets, epoch, attempt, priority) = {
            let want = match self.wants.get(cid) {
                Some(want) if want.live() => want,
                _ => return,
            };
            (self.broadcast_targets(want), want.epoch + 1, want.attempt, want.priority)
        };
        let now = Instant::now();
        match self.wants.get_mut(cid) {
            Some(want) => {
                want.phase = WantPhase::Broadcast;
                want.epoch = epoch;
                if targets.is_empty() {
                    want.asked.clear();
                    want.sources.clear();
                } else {
                    for peer in targets.iter() {
                        let _ = want.asked.insert(peer.clone(), now);
                    }
                }
            }
            None => return,
        }
        if !targets.is_empty() {
            debug!("[{}] probing {} peer(s) for {}", "session".magenta(), targets.len(), cid);
        }
        for peer in targets {
            let _ = self.manager.do_send(WantRequest {
                session: self.id,
                peer,
                cid: cid.clone(),
                want_type: WantType::WantHave,
                priority,
            });
        }
        let delay = self.retry_delay(None, attempt);
        let _ = ctx.notify_later(WantTimeout { cid: cid.clone(), epoch }, delay);
    }

    /// Sends a `WantBlock` to the chosen responder and arms its timer.
    fn target(&mut self, cid: &ContentId, target: PeerId, ctx: &mut Context<Self>) {
        let (epoch, attempt, priority) = match self.wants.get_mut(cid) {
            Some(want) if want.live() => {
                want.phase = WantPhase::Targeted { target: target.clone() };
                want.epoch += 1;
                want.sources.retain(|source| source != &target);
                let _ = want.asked.insert(target.clone(), Instant::now());
                (want.epoch, want.attempt, want.priority)
            }
            _ => return,
        };
        debug!("[{}] asking {} for {}", "session".magenta(), target, cid);
        let _ = self.manager.do_send(WantRequest {
            session: self.id,
            peer: target.clone(),
            cid: cid.clone(),
            want_type: WantType::WantBlock,
            priority,
        });
        let delay = self.retry_delay(Some(&target), attempt);
        let _ = ctx.notify_later(WantTimeout { cid: cid.clone(), epoch }, delay);
    }

    /// Moves a want to its next source: the lowest-latency remaining
    /// responder, or back to a wider broadcast when none remain.
    fn advance_target(&mut self, cid: &ContentId, failed: Option<&PeerId>, ctx: &mut Context<Self>) {
        if let Some(peer) = failed {
            if let Some(want) = self.wants.get_mut(cid) {
                want.attempt = want.attempt.saturating_add(1);
                want.sources.retain(|source| source != peer);
            }
        }
        let next = {
            let want = match self.wants.get(cid) {
                Some(want) if want.live() => want,
                _ => return,
            };
            self.best_source(want)
        };
        match next {
            Some(target) => self.target(cid, target, ctx),
            None => self.broadcast(cid, ctx),
        }
    }

    fn best_source(&self, want: &SessionWant) -> Option<PeerId> {
        want.sources
            .iter()
            .filter(|peer| self.peers.contains(*peer) && !self.pruned.contains(*peer))
            .min_by_key(|peer| {
                self.rtt.get(*peer).map(|estimate| estimate.current()).unwrap_or(Duration::MAX)
            })
            .cloned()
    }

    fn retry_delay(&self, peer: Option<&PeerId>, attempt: u32) -> Duration {
        let seed = peer
            .and_then(|peer| self.rtt.get(peer))
            .map(|estimate| estimate.current() * 2)
            .unwrap_or_else(|| self.config.backoff_base());
        backoff_delay(seed, self.config.backoff_multiplier, attempt, self.config.max_backoff())
    }

    /// Folds the elapsed time since we asked `peer` into its latency gauge.
    fn record_latency(&mut self, peer: &PeerId, cid: &ContentId) {
        let sample = self
            .wants
            .get(cid)
            .and_then(|want| want.asked.get(peer))
            .map(|sent_at| sent_at.elapsed());
        if let Some(sample) = sample {
            match self.rtt.get_mut(peer) {
                Some(estimate) => estimate.add_sample(sample),
                None => {
                    let _ = self.rtt.insert(peer.clone(), RttEstimate::new(sample));
                }
            }
        }
    }

    fn note_dont_have(&mut self, peer: &PeerId) {
        let streak = self.dont_haves.entry(peer.clone()).or_insert(0);
        *streak += 1;
        if *streak >= self.config.dont_have_limit && self.pruned.insert(peer.clone()) {
            debug!(
                "[{}] dropping {} after {} consecutive dont-haves",
                "session".magenta(),
                peer,
                streak
            );
        }
    }

    fn remember_source(&mut self, peer: &PeerId) {
        self.affinity.retain(|known| known != peer);
        self.affinity.push_front(peer.clone());
        self.affinity.truncate(AFFINITY_KEEP);
    }
}

impl Actor for Session {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("started session {}", self.id);
    }
}

/// New wants for this session; each becomes its own state machine.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct AddWants {
    pub cids: Vec<ContentId>,
}

impl Handler<AddWants> for Session {
    type Result = ();

    fn handle(&mut self, msg: AddWants, ctx: &mut Context<Self>) -> Self::Result {
        for cid in msg.cids {
            if self.wants.contains_key(&cid) {
                continue;
            }
            let priority = self.next_priority;
            self.next_priority -= 1;
            let _ = self.wants.insert(cid.clone(), SessionWant::new(priority));
            self.broadcast(&cid, ctx);
        }
    }
}

/// The caller no longer wants the cid. Local state moves to `Abandoned` at
/// once; any wire cancel is the manager's side of the transaction.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct AbandonWant {
    pub cid: ContentId,
}

impl Handler<AbandonWant> for Session {
    type Result = ();

    fn handle(&mut self, msg: AbandonWant, _ctx: &mut Context<Self>) -> Self::Result {
        if let Some(want) = self.wants.get_mut(&msg.cid) {
            if want.live() {
                want.phase = WantPhase::Abandoned;
                want.epoch += 1;
                want.asked.clear();
                want.sources.clear();
                debug!("[{}] abandoned {}", "session".magenta(), msg.cid);
            }
        }
    }
}

/// A validated block routed in by the manager.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct GotBlock {
    pub from: PeerId,
    pub block: Block,
}

impl Handler<GotBlock> for Session {
    type Result = ();

    fn handle(&mut self, msg: GotBlock, _ctx: &mut Context<Self>) -> Self::Result {
        let cid = msg.block.cid.clone();
        let live = self.wants.get(&cid).map(|want| want.live()).unwrap_or(false);
        if !live {
            debug!("[{}] late block for {}", "session".magenta(), cid);
            return;
        }
        self.record_latency(&msg.from, &cid);
        let _ = self.dont_haves.insert(msg.from.clone(), 0);
        self.remember_source(&msg.from);
        if let Some(want) = self.wants.get_mut(&cid) {
            want.phase = WantPhase::Fulfilled;
            want.epoch += 1;
            want.asked.clear();
            want.sources.clear();
        }
        self.fulfilled += 1;
        debug!("[{}] fulfilled {} from {}", "session".magenta(), cid, msg.from);
        let _ = self.sink.do_send(SessionBlock { session: self.id, block: msg.block });
    }
}

/// A presence answer routed in by the manager.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct GotPresence {
    pub from: PeerId,
    pub cid: ContentId,
    pub presence: PresenceType,
}

impl Handler<GotPresence> for Session {
    type Result = ();

    fn handle(&mut self, msg: GotPresence, ctx: &mut Context<Self>) -> Self::Result {
        let live = self.wants.get(&msg.cid).map(|want| want.live()).unwrap_or(false);
        if !live {
            return;
        }
        match msg.presence {
            PresenceType::Have => {
                self.record_latency(&msg.from, &msg.cid);
                let _ = self.dont_haves.insert(msg.from.clone(), 0);
                let needs_target = match self.wants.get_mut(&msg.cid) {
                    Some(want) => {
                        if !want.sources.contains(&msg.from) {
                            want.sources.push_back(msg.from.clone());
                        }
                        want.phase == WantPhase::Broadcast
                    }
                    None => false,
                };
                if needs_target {
                    self.advance_target(&msg.cid, None, ctx);
                }
            }
            PresenceType::DontHave => {
                self.record_latency(&msg.from, &msg.cid);
                self.note_dont_have(&msg.from);
                let retarget = match self.wants.get_mut(&msg.cid) {
                    Some(want) => {
                        want.sources.retain(|source| source != &msg.from);
                        match &want.phase {
                            WantPhase::Targeted { target } => target == &msg.from,
                            _ => false,
                        }
                    }
                    None => false,
                };
                if retarget {
                    self.advance_target(&msg.cid, Some(&msg.from), ctx);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct PeerJoined {
    pub peer: PeerId,
}

impl Handler<PeerJoined> for Session {
    type Result = ();

    fn handle(&mut self, msg: PeerJoined, ctx: &mut Context<Self>) -> Self::Result {
        let _ = self.peers.insert(msg.peer);
        let starved: Vec<ContentId> = self
            .wants
            .iter()
            .filter(|(_, want)| want.live() && want.asked.is_empty())
            .map(|(cid, _)| cid.clone())
            .collect();
        for cid in starved {
            self.broadcast(&cid, ctx);
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct PeerLeft {
    pub peer: PeerId,
}

impl Handler<PeerLeft> for Session {
    type Result = ();

    fn handle(&mut self, msg: PeerLeft, ctx: &mut Context<Self>) -> Self::Result {
        let _ = self.peers.remove(&msg.peer);
        self.affinity.retain(|peer| peer != &msg.peer);
        let mut orphaned = vec![];
        for (cid, want) in self.wants.iter_mut() {
            if !want.live() {
                continue;
            }
            want.sources.retain(|source| source != &msg.peer);
            if let WantPhase::Targeted { target } = &want.phase {
                if target == &msg.peer {
                    orphaned.push(cid.clone());
                }
            }
        }
        for cid in orphaned {
            self.advance_target(&cid, Some(&msg.peer), ctx);
        }
    }
}

/// Retry alarm for one want; `epoch` makes superseded alarms harmless.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct WantTimeout {
    cid: ContentId,
    epoch: u64,
}

impl Handler<WantTimeout> for Session {
    type Result = ();

    fn handle(&mut self, msg: WantTimeout, ctx: &mut Context<Self>) -> Self::Result {
        let phase = match self.wants.get(&msg.cid) {
            Some(want) if want.live() && want.epoch == msg.epoch => want.phase.clone(),
            _ => return,
        };
        match phase {
            WantPhase::Targeted { target } => {
                debug!(
                    "[{}] {} did not deliver {} in time",
                    "session".magenta(),
                    target,
                    msg.cid
                );
                self.advance_target(&msg.cid, Some(&target), ctx);
            }
            _ => {
                if let Some(want) = self.wants.get_mut(&msg.cid) {
                    want.attempt = want.attempt.saturating_add(1);
                }
                self.broadcast(&msg.cid, ctx);
            }
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for Session {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Context<Self>) -> Self::Result {
        ctx.stop();
    }
}

/// A completed retrieval, delivered to the session's sink.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct SessionBlock {
    pub session: SessionId,
    pub block: Block,
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "WantStatus")]
pub struct GetWantStatus {
    pub cid: ContentId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct WantStatus {
    pub phase: Option<WantPhase>,
    pub attempt: u32,
    pub sources: usize,
}

impl Handler<GetWantStatus> for Session {
    type Result = WantStatus;

    fn handle(&mut self, msg: GetWantStatus, _ctx: &mut Context<Self>) -> Self::Result {
        match self.wants.get(&msg.cid) {
            Some(want) => WantStatus {
                phase: Some(want.phase.clone()),
                attempt: want.attempt,
                sources: want.sources.len(),
            },
            None => WantStatus { phase: None, attempt: 0, sources: 0 },
        }
    }
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "SessionStats")]
pub struct GetSessionStats;

#[derive(Debug, Clone, MessageResponse)]
pub struct SessionStats {
    pub pending: usize,
    pub fulfilled: u64,
}

impl Handler<GetSessionStats> for Session {
    type Result = SessionStats;

    fn handle(&mut self, _msg: GetSessionStats, _ctx: &mut Context<Self>) -> Self::Result {
        let pending = self.wants.values().filter(|want| want.live()).count();
        SessionStats { pending, fulfilled: self.fulfilled }
    }
}
