//! Fairness-aware queueing of outgoing responses.
//!
//! The queue holds one lane per peer. Within a lane, cheap presence responses
//! go out ahead of block payloads, then by want priority, then in arrival
//! order. Across lanes the next peer to serve is picked by a pluggable
//! [TaskComparator]; the default rotates through peers weighted by how much
//! they already owe us.

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::sync::Arc;

use priority_queue::PriorityQueue;

use crate::cid::ContentId;
use crate::ledger::PeerLedger;
use crate::peer_id::PeerId;
use crate::wantlist::WantType;

/// Byte credit a peer starts with in the fairness rotation, so debt weighting
/// bites before a fresh peer has been served anything.
const FAIRNESS_BASE_BYTES: f64 = 4096.0;

/// One scheduled unit of work: something to tell one peer about one piece of
/// content. Destroyed when popped for sending or superseded by a cancel.
#[derive(Debug, Clone)]
pub struct Task {
    pub peer: PeerId,
    pub cid: ContentId,
    pub priority: i32,
    pub want_type: WantType,
    /// Whether local storage holds the content. A task without the block
    /// answers with a dont-have.
    pub have_block: bool,
    pub send_dont_have: bool,
    /// Payload size for block sends, presence footprint otherwise.
    pub size: usize,
}

impl Task {
    /// True when this task puts block bytes on the wire rather than a
    /// presence.
    pub fn sends_block(&self) -> bool {
        self.have_block && self.want_type == WantType::WantBlock
    }
}

/// Ordering of tasks within one peer's lane. Larger precedence pops first.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
struct TaskPrecedence {
    /// Presence responses are cheap and unblock the requester's own
    /// scheduling, so they go ahead of payloads under budget pressure.
    cheap: bool,
    priority: i32,
    arrival: Reverse<u64>,
}

/// The head task a peer is waiting on, together with that peer's service
/// history and ledger standing. Handed to the [TaskComparator].
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub peer: PeerId,
    pub cid: ContentId,
    pub is_want_block: bool,
    pub have_block: bool,
    pub size: usize,
    pub priority: i32,
    pub served_tasks: u64,
    pub served_bytes: u64,
    pub last_served: u64,
    pub debt_ratio: f64,
    pub accepting: bool,
}

/// Policy ordering competing peers. `Ordering::Greater` means `a` is served
/// first.
pub type TaskComparator = Arc<dyn Fn(&TaskInfo, &TaskInfo) -> Ordering + Send + Sync>;

/// Veto on serving a specific (peer, content) pair. Returning `false` makes
/// the engine treat the content as absent for that peer.
pub type PeerBlockRequestFilter = Arc<dyn Fn(&PeerId, &ContentId) -> bool + Send + Sync>;

/// The default peer rotation: accepting peers first, then fewest debt-weighted
/// bytes served, then least recently served, then head priority.
pub fn default_comparator() -> TaskComparator {
    Arc::new(|a, b| {
        match a.accepting.cmp(&b.accepting) {
            Ordering::Equal => (),
            ord => return ord,
        }
        let wa = (a.served_bytes as f64 + FAIRNESS_BASE_BYTES) * (1.0 + a.debt_ratio);
        let wb = (b.served_bytes as f64 + FAIRNESS_BASE_BYTES) * (1.0 + b.debt_ratio);
        match wb.partial_cmp(&wa).unwrap_or(Ordering::Equal) {
            Ordering::Equal => (),
            ord => return ord,
        }
        match b.last_served.cmp(&a.last_served) {
            Ordering::Equal => (),
            ord => return ord,
        }
        match a.priority.cmp(&b.priority) {
            Ordering::Equal => b.peer.cmp(&a.peer),
            ord => ord,
        }
    })
}

struct PeerTasks {
    tasks: HashMap<ContentId, Task>,
    order: PriorityQueue<ContentId, TaskPrecedence>,
    served_tasks: u64,
    served_bytes: u64,
    last_served: u64,
}

impl PeerTasks {
    fn new() -> PeerTasks {
        PeerTasks {
            tasks: HashMap::new(),
            order: PriorityQueue::new(),
            served_tasks: 0,
            served_bytes: 0,
            last_served: 0,
        }
    }

    /// Inserts or merges a task for one content identifier. A lane never holds
    /// two tasks for the same content: the strongest want form wins, the
    /// payload size survives a presence re-add, flags only turn on, and the
    /// original arrival stamp keeps the task's place in line.
    fn upsert(&mut self, task: Task, arrival: u64) {
        let arrival = match self.order.get_priority(&task.cid) {
            Some(precedence) => precedence.arrival.0,
            None => arrival,
        };
        let merged = match self.tasks.remove(&task.cid) {
            Some(mut existing) => {
                let new_sends = task.sends_block();
                let old_sends = existing.sends_block();
                if task.want_type == WantType::WantBlock {
                    existing.want_type = WantType::WantBlock;
                }
                if task.have_block {
                    existing.have_block = true;
                }
                if task.send_dont_have {
                    existing.send_dont_have = true;
                }
                existing.priority = task.priority;
                if new_sends || !old_sends {
                    existing.size = task.size;
                }
                existing
            }
            None => task,
        };
        let precedence = TaskPrecedence {
            cheap: !merged.sends_block(),
            priority: merged.priority,
            arrival: Reverse(arrival),
        };
        let cid = merged.cid.clone();
        let _ = self.tasks.insert(cid.clone(), merged);
        let _ = self.order.push(cid, precedence);
    }

    fn head_info(&self, peer: &PeerId, ledger: &PeerLedger) -> Option<TaskInfo> {
        let (cid, _) = self.order.peek()?;
        let task = self.tasks.get(cid)?;
        Some(TaskInfo {
            peer: peer.clone(),
            cid: cid.clone(),
            is_want_block: task.want_type == WantType::WantBlock,
            have_block: task.have_block,
            size: task.size,
            priority: task.priority,
            served_tasks: self.served_tasks,
            served_bytes: self.served_bytes,
            last_served: self.last_served,
            debt_ratio: ledger.debt_ratio(peer),
            accepting: ledger.accepting(peer),
        })
    }
}

/// All peers' pending response work, with the fairness state for rotating
/// between them.
pub struct PeerTaskQueue {
    peers: HashMap<PeerId, PeerTasks>,
    comparator: TaskComparator,
    arrivals: u64,
    pops: u64,
}

impl PeerTaskQueue {
    pub fn new(comparator: TaskComparator) -> PeerTaskQueue {
        PeerTaskQueue { peers: HashMap::new(), comparator, arrivals: 0, pops: 0 }
    }

    /// Enqueues or merges a task into its peer's lane.
    pub fn push(&mut self, task: Task) {
        self.arrivals += 1;
        let arrival = self.arrivals;
        let lane = self.peers.entry(task.peer.clone()).or_insert_with(PeerTasks::new);
        lane.upsert(task, arrival);
    }

    /// Removes a pending task in response to a cancel. A task already popped
    /// for sending is past cancellation and completes. Returns `true` iff a
    /// pending task was dropped.
    pub fn remove(&mut self, peer: &PeerId, cid: &ContentId) -> bool {
        match self.peers.get_mut(peer) {
            Some(lane) => {
                let _ = lane.order.remove(cid);
                lane.tasks.remove(cid).is_some()
            }
            None => false,
        }
    }

    /// Drops a disconnected peer's lane. Returns how many unsent tasks went
    /// with it.
    pub fn remove_peer(&mut self, peer: &PeerId) -> usize {
        self.peers.remove(peer).map(|lane| lane.tasks.len()).unwrap_or(0)
    }

    /// Clears a peer's pending tasks without touching its fairness history,
    /// for a `full` wantlist replacement.
    pub fn clear_peer(&mut self, peer: &PeerId) {
        if let Some(lane) = self.peers.get_mut(peer) {
            lane.tasks.clear();
            lane.order.clear();
        }
    }

    /// The scheduling core: picks the next peer by the comparator and pops its
    /// tasks up to `budget` cumulative bytes.
    ///
    /// At least one task is popped for the chosen peer even when it alone
    /// exceeds the budget, so an oversized block still ships. Selection
    /// otherwise stops before the budget would be crossed.
    pub fn pop_tasks(
        &mut self,
        budget: usize,
        ledger: &PeerLedger,
    ) -> Option<(PeerId, Vec<Task>)> {
        let comparator = self.comparator.clone();
        let chosen = self
            .peers
            .iter()
            .filter_map(|(peer, lane)| lane.head_info(peer, ledger))
            .max_by(|a, b| comparator(a, b))
            .map(|info| info.peer.clone())?;

        self.pops += 1;
        let pops = self.pops;
        let lane = self.peers.get_mut(&chosen)?;

        let mut picked = vec![];
        let mut total = 0usize;
        loop {
            let (next_cid, next_size) = match lane.order.peek() {
                Some((cid, _)) => {
                    let size = lane.tasks.get(cid).map(|task| task.size).unwrap_or(0);
                    (cid.clone(), size)
                }
                None => break,
            };
            if !picked.is_empty() && total + next_size > budget {
                break;
            }
            let _ = lane.order.pop();
            if let Some(task) = lane.tasks.remove(&next_cid) {
                total += task.size;
                picked.push(task);
            }
            if total >= budget {
                break;
            }
        }

        if picked.is_empty() {
            return None;
        }
        lane.served_tasks += picked.len() as u64;
        lane.served_bytes += total as u64;
        lane.last_served = pops;
        Some((chosen, picked))
    }

    /// Pending task count for one peer.
    pub fn pending(&self, peer: &PeerId) -> usize {
        self.peers.get(peer).map(|lane| lane.tasks.len()).unwrap_or(0)
    }

    /// Whether a specific task is still queued.
    pub fn contains(&self, peer: &PeerId, cid: &ContentId) -> bool {
        self.peers.get(peer).map(|lane| lane.tasks.contains_key(cid)).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.values().all(|lane| lane.tasks.is_empty())
    }
}
