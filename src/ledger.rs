//! Per-peer accounting of wants and exchanged bytes.
//!
//! The [PeerLedger] is the engine's record of every peer it serves: what that
//! peer currently wants from us, how many bytes have flowed in each direction,
//! and whether the relationship is balanced enough to keep serving them with
//! priority. Scheduling reads the ledger through [PeerLedger::debt_ratio] and
//! [PeerLedger::accepting]; it is never consulted as hard admission control.

use std::collections::HashMap;
use std::time::Instant;

use crate::cid::ContentId;
use crate::peer_id::PeerId;
use crate::wantlist::{Entry, WantType, Wantlist};

/// Bytes of credit granted before the debt ratio starts to bite. Keeps a few
/// small unreciprocated sends from flipping a fresh peer to non-accepting.
pub const DEBT_GRACE_BYTES: f64 = 65536.0;

/// Summary of one completed send batch, emitted by the engine and folded into
/// the ledger. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub peer: PeerId,
    pub blocks_sent: u64,
    pub bytes_sent: u64,
    pub blocks_received: u64,
    pub bytes_received: u64,
    pub timestamp: Instant,
}

impl Receipt {
    /// A receipt covering only the send side of an exchange.
    pub fn sent(peer: PeerId, blocks_sent: u64, bytes_sent: u64) -> Receipt {
        Receipt {
            peer,
            blocks_sent,
            bytes_sent,
            blocks_received: 0,
            bytes_received: 0,
            timestamp: Instant::now(),
        }
    }

    /// A receipt covering only the receive side of an exchange.
    pub fn received(peer: PeerId, blocks_received: u64, bytes_received: u64) -> Receipt {
        Receipt {
            peer,
            blocks_sent: 0,
            bytes_sent: 0,
            blocks_received,
            bytes_received,
            timestamp: Instant::now(),
        }
    }
}

/// The ledger's view of a single peer.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub peer: PeerId,
    /// What this peer currently wants from us.
    pub wantlist: Wantlist,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub blocks_sent: u64,
    pub blocks_received: u64,
    /// Count of protocol violations attributed to this peer.
    pub violations: u64,
    pub first_seen: Instant,
    pub last_active: Instant,
    pub accepting: bool,
    pub connected: bool,
}

impl LedgerEntry {
    fn new(peer: PeerId) -> LedgerEntry {
        let now = Instant::now();
        LedgerEntry {
            peer,
            wantlist: Wantlist::new(),
            bytes_sent: 0,
            bytes_received: 0,
            blocks_sent: 0,
            blocks_received: 0,
            violations: 0,
            first_seen: now,
            last_active: now,
            accepting: true,
            connected: false,
        }
    }

    /// BytesSent over BytesReceived with a grace allowance. Higher means we
    /// have given this peer more than they have returned.
    pub fn debt_ratio(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_received as f64 + DEBT_GRACE_BYTES)
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Debt ratio above which a peer stops `accepting`.
    pub debt_ceiling: f64,
    /// Violations after which a peer stops `accepting` for good.
    pub max_violations: u64,
    /// Peers retained before want-less entries are evicted.
    pub capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> LedgerConfig {
        LedgerConfig { debt_ceiling: 10.0, max_violations: 3, capacity: 1024 }
    }
}

#[derive(Debug, Clone)]
pub struct PeerLedger {
    config: LedgerConfig,
    entries: HashMap<PeerId, LedgerEntry>,
}

impl PeerLedger {
    pub fn new(config: LedgerConfig) -> PeerLedger {
        PeerLedger { config, entries: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry_mut(&mut self, peer: &PeerId) -> &mut LedgerEntry {
        if !self.entries.contains_key(peer) {
            let _ = self.entries.insert(peer.clone(), LedgerEntry::new(peer.clone()));
            self.evict();
        }
        let entry =
            self.entries.entry(peer.clone()).or_insert_with(|| LedgerEntry::new(peer.clone()));
        entry.last_active = Instant::now();
        entry
    }

    /// Merges a want into the peer's wantlist. Returns `true` iff it changed
    /// the list (idempotent upsert, `WantHave` never downgrades `WantBlock`).
    pub fn wants(&mut self, peer: &PeerId, entry: Entry) -> bool {
        self.entry_mut(peer).wantlist.add(entry.cid, entry.priority, entry.want_type)
    }

    /// Removes a want in response to a cancel. Returns `true` iff present.
    pub fn cancel_want(&mut self, peer: &PeerId, cid: &ContentId) -> bool {
        match self.entries.get_mut(peer) {
            Some(entry) => {
                entry.last_active = Instant::now();
                entry.wantlist.remove(cid)
            }
            None => false,
        }
    }

    /// Drops the peer's entire wantlist, for a `full` message replacing it.
    pub fn clear_wantlist(&mut self, peer: &PeerId) {
        if let Some(entry) = self.entries.get_mut(peer) {
            entry.wantlist = Wantlist::new();
        }
    }

    pub fn wantlist_for(&self, peer: &PeerId) -> Option<Vec<Entry>> {
        self.entries.get(peer).map(|entry| entry.wantlist.sorted_entries())
    }

    pub fn wants_content(&self, peer: &PeerId, cid: &ContentId) -> bool {
        self.entries.get(peer).map(|entry| entry.wantlist.contains(cid)).unwrap_or(false)
    }

    /// The want type a peer currently holds for a piece of content.
    pub fn want_type(&self, peer: &PeerId, cid: &ContentId) -> Option<WantType> {
        self.entries
            .get(peer)
            .and_then(|entry| entry.wantlist.get(cid))
            .map(|want| want.want_type)
    }

    /// Folds a send/receive summary into the peer's counters and refreshes the
    /// `accepting` signal. Never errors; unknown peers get a fresh entry.
    pub fn record_receipt(&mut self, receipt: &Receipt) {
        let max_violations = self.config.max_violations;
        let debt_ceiling = self.config.debt_ceiling;
        let entry = self.entry_mut(&receipt.peer);
        entry.bytes_sent += receipt.bytes_sent;
        entry.bytes_received += receipt.bytes_received;
        entry.blocks_sent += receipt.blocks_sent;
        entry.blocks_received += receipt.blocks_received;
        entry.accepting =
            entry.violations < max_violations && entry.debt_ratio() < debt_ceiling;
    }

    /// Records a protocol violation. Past the configured limit the peer stops
    /// `accepting` permanently. Returns the updated count.
    pub fn record_violation(&mut self, peer: &PeerId) -> u64 {
        let max_violations = self.config.max_violations;
        let entry = self.entry_mut(peer);
        entry.violations += 1;
        if entry.violations >= max_violations {
            entry.accepting = false;
        }
        entry.violations
    }

    /// BytesSent/(BytesReceived+grace) for the peer, `0.0` when unknown.
    pub fn debt_ratio(&self, peer: &PeerId) -> f64 {
        self.entries.get(peer).map(|entry| entry.debt_ratio()).unwrap_or(0.0)
    }

    /// Soft signal that the peer deserves priority service. Unknown peers are
    /// accepting.
    pub fn accepting(&self, peer: &PeerId) -> bool {
        self.entries.get(peer).map(|entry| entry.accepting).unwrap_or(true)
    }

    pub fn peer_connected(&mut self, peer: &PeerId) {
        self.entry_mut(peer).connected = true;
    }

    /// Marks the peer gone and forgets what it wanted from us. Accounting is
    /// retained so a reconnecting peer keeps its history.
    pub fn peer_disconnected(&mut self, peer: &PeerId) {
        if let Some(entry) = self.entries.get_mut(peer) {
            entry.connected = false;
            entry.wantlist = Wantlist::new();
        }
    }

    pub fn entry(&self, peer: &PeerId) -> Option<&LedgerEntry> {
        self.entries.get(peer)
    }

    /// Evicts least recently active peers while over capacity. Connected peers
    /// and peers with a live wantlist are never evicted.
    fn evict(&mut self) {
        while self.entries.len() > self.config.capacity {
            let victim = self
                .entries
                .values()
                .filter(|entry| !entry.connected && entry.wantlist.is_empty())
                .min_by_key(|entry| entry.last_active)
                .map(|entry| entry.peer.clone());
            match victim {
                Some(peer) => {
                    let _ = self.entries.remove(&peer);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ledger(capacity: usize) -> PeerLedger {
        PeerLedger::new(LedgerConfig { capacity, ..LedgerConfig::default() })
    }

    #[actix_rt::test]
    async fn test_wants_is_idempotent() {
        let mut ledger = small_ledger(16);
        let entry = Entry::new(ContentId::zero(), 4, WantType::WantBlock);
        assert!(ledger.wants(&PeerId::one(), entry.clone()));
        assert!(!ledger.wants(&PeerId::one(), entry));
        assert_eq!(ledger.wantlist_for(&PeerId::one()).unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn test_debt_ratio_flips_accepting() {
        let mut ledger = small_ledger(16);
        let peer = PeerId::one();
        assert!(ledger.accepting(&peer));
        assert_eq!(ledger.debt_ratio(&peer), 0.0);

        // Far beyond ceiling * grace without anything received back.
        ledger.record_receipt(&Receipt::sent(peer.clone(), 1, 100_000_000));
        assert!(ledger.debt_ratio(&peer) > 10.0);
        assert!(!ledger.accepting(&peer));

        // Receiving in return restores balance.
        ledger.record_receipt(&Receipt::received(peer.clone(), 1, 100_000_000));
        assert!(ledger.debt_ratio(&peer) < 10.0);
        assert!(ledger.accepting(&peer));
    }

    #[actix_rt::test]
    async fn test_small_sends_stay_accepting() {
        let mut ledger = small_ledger(16);
        let peer = PeerId::one();
        for _ in 0..100 {
            ledger.record_receipt(&Receipt::sent(peer.clone(), 1, 64));
        }
        assert!(ledger.accepting(&peer));
    }

    #[actix_rt::test]
    async fn test_violations_exclude_peer() {
        let mut ledger = small_ledger(16);
        let peer = PeerId::two();
        assert_eq!(ledger.record_violation(&peer), 1);
        assert!(ledger.accepting(&peer));
        let _ = ledger.record_violation(&peer);
        assert_eq!(ledger.record_violation(&peer), 3);
        assert!(!ledger.accepting(&peer));

        // Balanced accounting does not rehabilitate a violator.
        ledger.record_receipt(&Receipt::received(peer.clone(), 10, 1_000_000));
        assert!(!ledger.accepting(&peer));
    }

    #[actix_rt::test]
    async fn test_disconnect_drops_wantlist_keeps_history() {
        let mut ledger = small_ledger(16);
        let peer = PeerId::one();
        ledger.peer_connected(&peer);
        ledger.wants(&peer, Entry::new(ContentId::zero(), 1, WantType::WantBlock));
        ledger.record_receipt(&Receipt::sent(peer.clone(), 1, 512));

        ledger.peer_disconnected(&peer);
        assert_eq!(ledger.wantlist_for(&peer).unwrap().len(), 0);
        assert_eq!(ledger.entry(&peer).unwrap().bytes_sent, 512);
    }

    #[actix_rt::test]
    async fn test_eviction_skips_peers_with_wants() {
        let mut ledger = small_ledger(2);
        let wanted = PeerId::one();
        ledger.wants(&wanted, Entry::new(ContentId::zero(), 1, WantType::WantBlock));

        for i in 0..10u8 {
            let mut bytes = [0u8; 32];
            bytes[0] = i;
            ledger.record_receipt(&Receipt::sent(PeerId::new(&bytes), 0, 1));
        }

        assert!(ledger.len() <= 3);
        assert!(ledger.entry(&wanted).is_some());
    }

    #[actix_rt::test]
    async fn test_full_replace_clears_wantlist() {
        let mut ledger = small_ledger(16);
        let peer = PeerId::one();
        ledger.wants(&peer, Entry::new(ContentId::zero(), 1, WantType::WantBlock));
        ledger.wants(&peer, Entry::new(ContentId::one(), 2, WantType::WantHave));
        ledger.clear_wantlist(&peer);
        assert_eq!(ledger.wantlist_for(&peer).unwrap().len(), 0);
    }
}
