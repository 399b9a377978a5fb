use crate::colored::Colorize;

use std::sync::Arc;

use actix::{Actor, AsyncContext, Context, Handler, Recipient};
use actix::{ActorFutureExt, ResponseActFuture};
use tracing::{debug, info, warn};

use crate::cid::ContentId;
use crate::ledger::{LedgerEntry, PeerLedger, Receipt};
use crate::message::{SwapMessage, WireEntry};
use crate::peer_id::PeerId;
use crate::protocol::{Inbound, Outbound, PeerEvent};
use crate::store::BlockStore;
use crate::wantlist::{Entry, WantType};

use super::task_queue::{
    default_comparator, PeerBlockRequestFilter, PeerTaskQueue, Task, TaskComparator,
};
use super::{Error, Result};

/// Serialized footprint of a presence response, for budgeting purposes.
pub const PRESENCE_RESPONSE_SIZE: usize = 37;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes of response work batched into one outgoing message.
    pub target_message_size: usize,
    pub ledger: crate::ledger::LedgerConfig,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            target_message_size: 16 * 1024,
            ledger: crate::ledger::LedgerConfig::default(),
        }
    }
}

/// The decision engine answers other peers' wants: it merges their wantlists
/// into the ledger, schedules response tasks fairly across peers, and streams
/// the batches out through the network adapter.
pub struct Engine {
    /// Outgoing messages to the network adapter.
    sender: Recipient<Outbound>,
    /// Local content the engine can answer with.
    store: Arc<dyn BlockStore>,
    ledger: PeerLedger,
    queue: PeerTaskQueue,
    filter: Option<PeerBlockRequestFilter>,
    config: EngineConfig,
    /// Whether a dispatch loop is currently draining the queue.
    dispatching: bool,
}

impl Engine {
    pub fn new(
        sender: Recipient<Outbound>,
        store: Arc<dyn BlockStore>,
        config: EngineConfig,
    ) -> Self {
        let ledger = PeerLedger::new(config.ledger.clone());
        Engine {
            sender,
            store,
            ledger,
            queue: PeerTaskQueue::new(default_comparator()),
            filter: None,
            config,
            dispatching: false,
        }
    }

    /// Replaces the peer rotation policy. Discards any queued tasks, so this
    /// belongs with construction.
    pub fn with_comparator(mut self, comparator: TaskComparator) -> Self {
        self.queue = PeerTaskQueue::new(comparator);
        self
    }

    /// Installs a veto on serving specific (peer, content) pairs. A vetoed
    /// want is answered as if the content were absent.
    pub fn with_filter(mut self, filter: PeerBlockRequestFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Merges a peer's want entries. Entries whose content storage holds
    /// become tasks; absent entries are answered with a dont-have only when
    /// the peer asked for one. A `full` message first forgets everything the
    /// peer previously wanted.
    pub fn receive_wants(&mut self, peer: &PeerId, entries: Vec<WireEntry>, full: bool) {
        if full {
            self.ledger.clear_wantlist(peer);
            self.queue.clear_peer(peer);
        }
        for wire_entry in entries {
            if wire_entry.cancel {
                self.cancel(peer, &wire_entry.entry.cid);
                continue;
            }
            let entry = wire_entry.entry;
            let _ = self.ledger.wants(peer, entry.clone());
            let denied = match &self.filter {
                Some(filter) => !filter(peer, &entry.cid),
                None => false,
            };
            let held = if denied {
                None
            } else {
                match self.store.get_size(&entry.cid) {
                    Ok(size) => size,
                    Err(error) => {
                        warn!(
                            "[{}] storage lookup for {} failed: {}",
                            "engine".cyan(),
                            entry.cid,
                            error
                        );
                        None
                    }
                }
            };
            match held {
                Some(block_size) => {
                    let size = match entry.want_type {
                        WantType::WantBlock => block_size,
                        WantType::WantHave => PRESENCE_RESPONSE_SIZE,
                    };
                    self.queue.push(Task {
                        peer: peer.clone(),
                        cid: entry.cid,
                        priority: entry.priority,
                        want_type: entry.want_type,
                        have_block: true,
                        send_dont_have: wire_entry.send_dont_have,
                        size,
                    });
                }
                None if wire_entry.send_dont_have => {
                    self.queue.push(Task {
                        peer: peer.clone(),
                        cid: entry.cid,
                        priority: entry.priority,
                        want_type: entry.want_type,
                        have_block: false,
                        send_dont_have: true,
                        size: PRESENCE_RESPONSE_SIZE,
                    });
                }
                None => (),
            }
        }
    }

    /// Drops matching wants and any unsent tasks. A task already popped for
    /// sending completes, so a cancel racing a send costs at most one
    /// redundant block.
    pub fn receive_cancels(&mut self, peer: &PeerId, cids: &[ContentId]) {
        for cid in cids {
            self.cancel(peer, cid);
        }
    }

    fn cancel(&mut self, peer: &PeerId, cid: &ContentId) {
        let _ = self.ledger.cancel_want(peer, cid);
        let _ = self.queue.remove(peer, cid);
    }

    /// Pops the next batch of response work: the peer picked by the rotation
    /// policy and its tasks up to `budget` cumulative bytes.
    pub fn next_tasks(&mut self, budget: usize) -> Option<(PeerId, Vec<Task>)> {
        self.queue.pop_tasks(budget, &self.ledger)
    }

    /// Assembles the outgoing message for a popped batch, returning it with
    /// the block and byte counts it carries. A block task whose payload has
    /// vanished from storage is dropped and logged; the requester re-wants if
    /// still interested.
    fn build_message(&self, tasks: &[Task]) -> (SwapMessage, u64, u64) {
        let mut message = SwapMessage::new(false);
        let mut blocks_sent = 0u64;
        let mut bytes_sent = 0u64;
        for task in tasks {
            if task.sends_block() {
                match self.store.get(&task.cid) {
                    Ok(block) => {
                        blocks_sent += 1;
                        bytes_sent += block.size() as u64;
                        message.add_block(block);
                    }
                    Err(error) => {
                        warn!(
                            "[{}] dropping task for {}: {}",
                            "engine".cyan(),
                            task.cid,
                            error
                        );
                    }
                }
            } else if task.have_block {
                message.add_have(task.cid.clone());
            } else if task.send_dont_have {
                message.add_dont_have(task.cid.clone());
            }
        }
        (message, blocks_sent, bytes_sent)
    }

    /// Starts the dispatch loop unless one is already draining the queue.
    fn kick(&mut self, ctx: &mut Context<Self>) {
        if !self.dispatching && !self.queue.is_empty() {
            self.dispatching = true;
            ctx.notify(Dispatch);
        }
    }
}

impl Actor for Engine {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("started engine");
    }
}

impl Handler<Inbound> for Engine {
    type Result = ();

    fn handle(&mut self, msg: Inbound, ctx: &mut Context<Self>) -> Self::Result {
        let Inbound { peer, message } = msg;

        // Payloads the peer sent us count towards its credit.
        let blocks = message.blocks();
        if !blocks.is_empty() {
            let bytes: u64 = blocks.iter().map(|block| block.size() as u64).sum();
            self.ledger
                .record_receipt(&Receipt::received(peer.clone(), blocks.len() as u64, bytes));
        }

        let wantlist = message.wantlist();
        if message.full() || !wantlist.is_empty() {
            self.receive_wants(&peer, wantlist, message.full());
        }
        self.kick(ctx);
    }
}

impl Handler<PeerEvent> for Engine {
    type Result = ();

    fn handle(&mut self, msg: PeerEvent, _ctx: &mut Context<Self>) -> Self::Result {
        match msg {
            PeerEvent::Connected(metadata) => {
                info!("[{}] peer {} connected", "engine".cyan(), metadata.id);
                self.ledger.peer_connected(&metadata.id);
            }
            PeerEvent::Disconnected(metadata) => {
                let dropped = self.queue.remove_peer(&metadata.id);
                self.ledger.peer_disconnected(&metadata.id);
                info!(
                    "[{}] peer {} disconnected, dropped {} unsent tasks",
                    "engine".cyan(),
                    metadata.id,
                    dropped
                );
            }
        }
    }
}

/// Internal pump: pops one batch, hands it to the adapter, then re-notifies
/// itself until the queue drains. Send is fire-and-forget beyond the mailbox
/// handoff; a committed batch is never un-sent.
#[derive(Debug, Clone, Message)]
#[rtype(result = "Result<()>")]
struct Dispatch;

impl Handler<Dispatch> for Engine {
    type Result = ResponseActFuture<Self, Result<()>>;

    fn handle(&mut self, _msg: Dispatch, ctx: &mut Context<Self>) -> Self::Result {
        let batch = self.queue.pop_tasks(self.config.target_message_size, &self.ledger);
        let (peer, tasks) = match batch {
            Some(batch) => batch,
            None => {
                self.dispatching = false;
                return Box::pin(actix::fut::ready(Ok(())));
            }
        };

        let (message, blocks_sent, bytes_sent) = self.build_message(&tasks);
        if message.is_empty() {
            ctx.notify(Dispatch);
            return Box::pin(actix::fut::ready(Ok(())));
        }
        let receipt = Receipt::sent(peer.clone(), blocks_sent, bytes_sent);

        let send_to_adapter = self.sender.send(Outbound::new(peer.clone(), message));
        let send_to_adapter = actix::fut::wrap_future::<_, Self>(send_to_adapter);

        let update_self = send_to_adapter.map(move |result, actor, ctx| {
            ctx.notify(Dispatch);
            match result {
                Ok(()) => {
                    actor.ledger.record_receipt(&receipt);
                    Ok(())
                }
                Err(error) => {
                    warn!(
                        "[{}] failed to hand off batch for {}: {}",
                        "engine".cyan(),
                        peer,
                        error
                    );
                    Err(Error::Actix(error))
                }
            }
        });

        Box::pin(update_self)
    }
}

/// Pops a batch on demand instead of waiting for the dispatch loop. Used by
/// callers driving the engine manually.
#[derive(Debug, Clone, Message)]
#[rtype(result = "TaskBatch")]
pub struct NextTasks {
    pub budget: usize,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct TaskBatch {
    pub batch: Option<(PeerId, Vec<Task>)>,
}

impl Handler<NextTasks> for Engine {
    type Result = TaskBatch;

    fn handle(&mut self, msg: NextTasks, _ctx: &mut Context<Self>) -> Self::Result {
        TaskBatch { batch: self.next_tasks(msg.budget) }
    }
}

/// A peer broke protocol (for instance by shipping bytes that fail
/// validation). Counted against it in the ledger.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct RecordViolation {
    pub peer: PeerId,
}

impl Handler<RecordViolation> for Engine {
    type Result = ();

    fn handle(&mut self, msg: RecordViolation, _ctx: &mut Context<Self>) -> Self::Result {
        let count = self.ledger.record_violation(&msg.peer);
        warn!("[{}] protocol violation by {} ({} total)", "engine".cyan(), msg.peer, count);
    }
}

/// Fetches a peer's ledger entry, for introspection.
#[derive(Debug, Clone, Message)]
#[rtype(result = "LedgerInfo")]
pub struct GetLedger {
    pub peer: PeerId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct LedgerInfo {
    pub entry: Option<LedgerEntry>,
}

impl Handler<GetLedger> for Engine {
    type Result = LedgerInfo;

    fn handle(&mut self, msg: GetLedger, _ctx: &mut Context<Self>) -> Self::Result {
        LedgerInfo { entry: self.ledger.entry(&msg.peer).cloned() }
    }
}

/// Fetches what a peer currently wants from us, highest priority first.
#[derive(Debug, Clone, Message)]
#[rtype(result = "PeerWantlist")]
pub struct WantlistForPeer {
    pub peer: PeerId,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct PeerWantlist {
    pub entries: Vec<Entry>,
}

impl Handler<WantlistForPeer> for Engine {
    type Result = PeerWantlist;

    fn handle(&mut self, msg: WantlistForPeer, _ctx: &mut Context<Self>) -> Self::Result {
        PeerWantlist { entries: self.ledger.wantlist_for(&msg.peer).unwrap_or_default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::block::Block;
    use crate::peer_id::PeerMetadata;
    use crate::store::{BlockStore, MemStore};

    fn want(cid: ContentId, priority: i32, want_type: WantType, send_dont_have: bool) -> WireEntry {
        WireEntry { entry: Entry::new(cid, priority, want_type), cancel: false, send_dont_have }
    }

    fn cancel(cid: ContentId) -> WireEntry {
        WireEntry {
            entry: Entry::new(cid, 0, WantType::WantBlock),
            cancel: true,
            send_dont_have: false,
        }
    }

    fn metadata(id: PeerId) -> PeerMetadata {
        PeerMetadata::new(id, "127.0.0.1:0".parse().unwrap())
    }

    // Collects everything the engine hands to the network adapter.
    struct Adapter {
        sent: Vec<Outbound>,
    }

    impl Adapter {
        fn new() -> Adapter {
            Adapter { sent: vec![] }
        }
    }

    impl Actor for Adapter {
        type Context = Context<Self>;

        fn started(&mut self, _ctx: &mut Context<Self>) {}
    }

    impl Handler<Outbound> for Adapter {
        type Result = ();

        fn handle(&mut self, msg: Outbound, _ctx: &mut Context<Self>) -> Self::Result {
            self.sent.push(msg);
        }
    }

    #[derive(Debug, Clone, Message)]
    #[rtype(result = "Sent")]
    struct GetSent;

    #[derive(Debug, Clone, MessageResponse)]
    struct Sent(Vec<Outbound>);

    impl Handler<GetSent> for Adapter {
        type Result = Sent;

        fn handle(&mut self, _msg: GetSent, _ctx: &mut Context<Self>) -> Self::Result {
            Sent(self.sent.clone())
        }
    }

    fn test_engine(store: Arc<dyn BlockStore>) -> (Engine, actix::Addr<Adapter>) {
        let adapter = Adapter::new().start();
        let engine =
            Engine::new(adapter.clone().recipient(), store, EngineConfig::default());
        (engine, adapter)
    }

    #[actix_rt::test]
    async fn test_want_block_served_from_storage() {
        let store = Arc::new(MemStore::new());
        let block = Block::new(b"foo".to_vec());
        store.put(&block).unwrap();
        let (mut engine, _adapter) = test_engine(store);

        engine.receive_wants(
            &PeerId::one(),
            vec![want(block.cid.clone(), 1, WantType::WantBlock, false)],
            true,
        );

        let (peer, tasks) = engine.next_tasks(1024).unwrap();
        assert_eq!(peer, PeerId::one());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].cid, block.cid);

        let (message, blocks_sent, bytes_sent) = engine.build_message(&tasks);
        assert_eq!(message.blocks().len(), 1);
        assert_eq!(message.blocks()[0].data, b"foo".to_vec());

        engine.ledger.record_receipt(&Receipt::sent(peer.clone(), blocks_sent, bytes_sent));
        let entry = engine.ledger.entry(&peer).unwrap();
        assert_eq!(entry.bytes_sent, 3);
        assert_eq!(entry.blocks_sent, 1);
    }

    #[actix_rt::test]
    async fn test_dont_have_only_when_requested() {
        let (mut engine, _adapter) = test_engine(Arc::new(MemStore::new()));

        engine.receive_wants(
            &PeerId::one(),
            vec![
                want(ContentId::zero(), 1, WantType::WantBlock, true),
                want(ContentId::one(), 1, WantType::WantBlock, false),
            ],
            false,
        );

        let (_, tasks) = engine.next_tasks(usize::MAX).unwrap();
        assert_eq!(tasks.len(), 1);
        let (message, _, _) = engine.build_message(&tasks);
        assert_eq!(message.dont_haves(), vec![ContentId::zero()]);
        assert!(message.blocks().is_empty());
    }

    #[actix_rt::test]
    async fn test_want_have_answered_with_presence() {
        let store = Arc::new(MemStore::new());
        let block = Block::new(b"present".to_vec());
        store.put(&block).unwrap();
        let (mut engine, _adapter) = test_engine(store);

        engine.receive_wants(
            &PeerId::one(),
            vec![want(block.cid.clone(), 1, WantType::WantHave, false)],
            false,
        );

        let (_, tasks) = engine.next_tasks(usize::MAX).unwrap();
        let (message, blocks_sent, bytes_sent) = engine.build_message(&tasks);
        assert_eq!(message.haves(), vec![block.cid.clone()]);
        assert!(message.blocks().is_empty());
        assert_eq!((blocks_sent, bytes_sent), (0, 0));
    }

    #[actix_rt::test]
    async fn test_cancel_cancels() {
        let store = Arc::new(MemStore::new());
        let foo = Block::new(b"foo".to_vec());
        let bar = Block::new(b"bar".to_vec());
        store.put(&foo).unwrap();
        store.put(&bar).unwrap();
        let (mut engine, _adapter) = test_engine(store);

        engine.receive_wants(
            &PeerId::one(),
            vec![
                want(foo.cid.clone(), 1, WantType::WantBlock, false),
                want(bar.cid.clone(), 1, WantType::WantBlock, false),
            ],
            false,
        );
        engine.receive_cancels(&PeerId::one(), &[foo.cid.clone()]);

        assert!(!engine.ledger.wants_content(&PeerId::one(), &foo.cid));
        let (_, tasks) = engine.next_tasks(usize::MAX).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].cid, bar.cid);
        assert!(engine.next_tasks(usize::MAX).is_none());
    }

    #[actix_rt::test]
    async fn test_cancel_entry_in_message_cancels() {
        let store = Arc::new(MemStore::new());
        let foo = Block::new(b"foo".to_vec());
        store.put(&foo).unwrap();
        let (mut engine, _adapter) = test_engine(store);

        engine.receive_wants(
            &PeerId::one(),
            vec![want(foo.cid.clone(), 1, WantType::WantBlock, false)],
            false,
        );
        engine.receive_wants(&PeerId::one(), vec![cancel(foo.cid.clone())], false);

        assert!(engine.next_tasks(usize::MAX).is_none());
        assert_eq!(engine.ledger.wantlist_for(&PeerId::one()).unwrap().len(), 0);
    }

    #[actix_rt::test]
    async fn test_full_message_replaces_wantlist() {
        let store = Arc::new(MemStore::new());
        let foo = Block::new(b"foo".to_vec());
        let bar = Block::new(b"bar".to_vec());
        store.put(&foo).unwrap();
        store.put(&bar).unwrap();
        let (mut engine, _adapter) = test_engine(store);

        engine.receive_wants(
            &PeerId::one(),
            vec![want(foo.cid.clone(), 1, WantType::WantBlock, false)],
            true,
        );
        engine.receive_wants(
            &PeerId::one(),
            vec![want(bar.cid.clone(), 1, WantType::WantBlock, false)],
            true,
        );

        let entries = engine.ledger.wantlist_for(&PeerId::one()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cid, bar.cid);

        let (_, tasks) = engine.next_tasks(usize::MAX).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].cid, bar.cid);
    }

    #[actix_rt::test]
    async fn test_filter_veto_answers_as_absent() {
        let store = Arc::new(MemStore::new());
        let secret = Block::new(b"secret".to_vec());
        store.put(&secret).unwrap();
        let banned = secret.cid.clone();
        let (engine, _adapter) = test_engine(store);
        let mut engine = engine
            .with_filter(Arc::new(move |_peer: &PeerId, cid: &ContentId| *cid != banned));

        engine.receive_wants(
            &PeerId::one(),
            vec![want(secret.cid.clone(), 1, WantType::WantBlock, true)],
            false,
        );

        let (_, tasks) = engine.next_tasks(usize::MAX).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].have_block);
        let (message, _, _) = engine.build_message(&tasks);
        assert_eq!(message.dont_haves(), vec![secret.cid.clone()]);
        assert!(message.blocks().is_empty());
    }

    #[actix_rt::test]
    async fn test_engine_actor_serves_want_end_to_end() {
        let adapter = Adapter::new().start();
        let store = Arc::new(MemStore::new());
        let block = Block::new(b"foo".to_vec());
        store.put(&block).unwrap();
        let engine =
            Engine::new(adapter.clone().recipient(), store, EngineConfig::default()).start();

        let mut message = SwapMessage::new(true);
        message.add_want(block.cid.clone(), 1, WantType::WantBlock, false);
        engine.send(Inbound::new(PeerId::one(), message)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let Sent(sent) = adapter.send(GetSent).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].peer, PeerId::one());
        assert_eq!(sent[0].message.blocks()[0].data, b"foo".to_vec());

        let info = engine.send(GetLedger { peer: PeerId::one() }).await.unwrap();
        let entry = info.entry.unwrap();
        assert_eq!(entry.bytes_sent, 3);
        assert_eq!(entry.blocks_sent, 1);
    }

    #[actix_rt::test]
    async fn test_received_blocks_are_credited() {
        let adapter = Adapter::new().start();
        let engine =
            Engine::new(adapter.clone().recipient(), Arc::new(MemStore::new()), EngineConfig::default())
                .start();

        let mut message = SwapMessage::new(false);
        message.add_block(Block::new(b"payload from peer".to_vec()));
        engine.send(Inbound::new(PeerId::two(), message)).await.unwrap();

        let info = engine.send(GetLedger { peer: PeerId::two() }).await.unwrap();
        let entry = info.entry.unwrap();
        assert_eq!(entry.blocks_received, 1);
        assert_eq!(entry.bytes_received, 17);
    }

    #[actix_rt::test]
    async fn test_disconnect_drops_wantlist() {
        let adapter = Adapter::new().start();
        let engine =
            Engine::new(adapter.clone().recipient(), Arc::new(MemStore::new()), EngineConfig::default())
                .start();

        // A want for absent content without send_dont_have leaves no task,
        // only ledger state.
        let mut message = SwapMessage::new(false);
        message.add_want(ContentId::zero(), 1, WantType::WantBlock, false);
        engine.send(Inbound::new(PeerId::one(), message)).await.unwrap();

        let wantlist = engine.send(WantlistForPeer { peer: PeerId::one() }).await.unwrap();
        assert_eq!(wantlist.entries.len(), 1);

        engine.send(PeerEvent::Disconnected(metadata(PeerId::one()))).await.unwrap();

        let wantlist = engine.send(WantlistForPeer { peer: PeerId::one() }).await.unwrap();
        assert!(wantlist.entries.is_empty());
    }

    #[actix_rt::test]
    async fn test_violations_recorded() {
        let adapter = Adapter::new().start();
        let engine =
            Engine::new(adapter.clone().recipient(), Arc::new(MemStore::new()), EngineConfig::default())
                .start();

        for _ in 0..3 {
            engine.send(RecordViolation { peer: PeerId::one() }).await.unwrap();
        }
        let info = engine.send(GetLedger { peer: PeerId::one() }).await.unwrap();
        let entry = info.entry.unwrap();
        assert_eq!(entry.violations, 3);
        assert!(!entry.accepting);
    }
}
