//! The block swap message definition.
//!
//! A [SwapMessage] is the single message type exchanged between peers, in both
//! directions. One message can carry wantlist changes, block payloads and
//! availability claims at the same time.

use std::collections::HashMap;

use crate::block::Block;
use crate::cid::ContentId;
use crate::wantlist::{Entry, WantType};

/// Approximate serialized footprint of one content identifier.
const CID_OVERHEAD: usize = 36;

/// Whether a peer claims to hold a piece of content.
#[derive(Debug, Hash, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum PresenceType {
    Have,
    DontHave,
}

/// An availability claim for one content identifier, answering a `WantHave`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockPresence {
    pub cid: ContentId,
    pub presence: PresenceType,
}

/// One wantlist line of a [SwapMessage]: either a want or its cancellation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct WireEntry {
    pub entry: Entry,
    pub cancel: bool,
    /// Whether the sender asks to be told explicitly when the receiver does
    /// not hold the content.
    pub send_dont_have: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapMessage {
    full: bool,
    wantlist: HashMap<ContentId, WireEntry>,
    blocks: Vec<Block>,
    block_presences: Vec<BlockPresence>,
}

impl SwapMessage {
    /// An empty message. When `full` is set the receiver replaces its whole
    /// record of the sender's wantlist with the entries carried here, which
    /// resynchronizes state after a reconnect without per-entry cancels.
    pub fn new(full: bool) -> SwapMessage {
        SwapMessage {
            full,
            wantlist: HashMap::new(),
            blocks: vec![],
            block_presences: vec![],
        }
    }

    pub fn full(&self) -> bool {
        self.full
    }

    /// Merges a want into the message, deduplicating per content identifier.
    ///
    /// Within one message the strongest claim wins: a `WantBlock` overrides a
    /// `WantHave` for the same content, priorities refresh for same-typed
    /// wants, and the `cancel` / `send_dont_have` flags only ever turn on.
    pub fn add_want(
        &mut self,
        cid: ContentId,
        priority: i32,
        want_type: WantType,
        send_dont_have: bool,
    ) {
        self.add_entry(cid, priority, want_type, false, send_dont_have);
    }

    /// Asks the receiver to drop the content from its record of our wantlist.
    pub fn add_cancel(&mut self, cid: ContentId) {
        self.add_entry(cid, 0, WantType::WantBlock, true, false);
    }

    fn add_entry(
        &mut self,
        cid: ContentId,
        priority: i32,
        want_type: WantType,
        cancel: bool,
        send_dont_have: bool,
    ) {
        if let Some(existing) = self.wantlist.get_mut(&cid) {
            if existing.entry.want_type == want_type {
                existing.entry.priority = priority;
            }
            if cancel {
                existing.cancel = true;
            }
            if send_dont_have {
                existing.send_dont_have = true;
            }
            if want_type == WantType::WantBlock
                && existing.entry.want_type == WantType::WantHave
            {
                existing.entry.want_type = WantType::WantBlock;
                existing.entry.priority = priority;
            }
            return;
        }
        let _ = self.wantlist.insert(
            cid.clone(),
            WireEntry { entry: Entry::new(cid, priority, want_type), cancel, send_dont_have },
        );
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn add_have(&mut self, cid: ContentId) {
        self.block_presences.push(BlockPresence { cid, presence: PresenceType::Have });
    }

    pub fn add_dont_have(&mut self, cid: ContentId) {
        self.block_presences.push(BlockPresence { cid, presence: PresenceType::DontHave });
    }

    pub fn wantlist(&self) -> Vec<WireEntry> {
        self.wantlist.values().cloned().collect()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_presences(&self) -> &[BlockPresence] {
        &self.block_presences
    }

    pub fn haves(&self) -> Vec<ContentId> {
        self.presences_of(PresenceType::Have)
    }

    pub fn dont_haves(&self) -> Vec<ContentId> {
        self.presences_of(PresenceType::DontHave)
    }

    fn presences_of(&self, presence: PresenceType) -> Vec<ContentId> {
        self.block_presences
            .iter()
            .filter(|bp| bp.presence == presence)
            .map(|bp| bp.cid.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.wantlist.is_empty() && self.blocks.is_empty() && self.block_presences.is_empty()
    }

    /// Rough serialized size, used to batch tasks up to a target message size.
    /// Not the exact wire length.
    pub fn size_estimate(&self) -> usize {
        let mut size = 1;
        for _ in self.wantlist.iter() {
            size += CID_OVERHEAD + 6;
        }
        for block in self.blocks.iter() {
            size += CID_OVERHEAD + block.size();
        }
        for _ in self.block_presences.iter() {
            size += CID_OVERHEAD + 1;
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_wants_deduplicate() {
        let mut msg = SwapMessage::new(false);
        msg.add_want(ContentId::zero(), 1, WantType::WantHave, false);
        msg.add_want(ContentId::zero(), 7, WantType::WantHave, true);
        let wl = msg.wantlist();
        assert_eq!(wl.len(), 1);
        assert_eq!(wl[0].entry.priority, 7);
        assert!(wl[0].send_dont_have);
    }

    #[actix_rt::test]
    async fn test_want_block_overrides_want_have() {
        let mut msg = SwapMessage::new(false);
        msg.add_want(ContentId::zero(), 1, WantType::WantHave, true);
        msg.add_want(ContentId::zero(), 5, WantType::WantBlock, false);
        let wl = msg.wantlist();
        assert_eq!(wl.len(), 1);
        assert_eq!(wl[0].entry.want_type, WantType::WantBlock);
        assert_eq!(wl[0].entry.priority, 5);
        assert!(wl[0].send_dont_have);
    }

    #[actix_rt::test]
    async fn test_cancel_is_sticky() {
        let mut msg = SwapMessage::new(false);
        msg.add_cancel(ContentId::one());
        msg.add_want(ContentId::one(), 3, WantType::WantBlock, false);
        let wl = msg.wantlist();
        assert_eq!(wl.len(), 1);
        assert!(wl[0].cancel);
    }

    #[actix_rt::test]
    async fn test_presence_partition() {
        let mut msg = SwapMessage::new(false);
        msg.add_have(ContentId::zero());
        msg.add_dont_have(ContentId::one());
        msg.add_have(ContentId::two());
        assert_eq!(msg.haves().len(), 2);
        assert_eq!(msg.dont_haves(), vec![ContentId::one()]);
    }

    #[actix_rt::test]
    async fn test_size_estimate_grows_with_payload() {
        let mut msg = SwapMessage::new(false);
        let empty = msg.size_estimate();
        msg.add_block(Block::new(vec![0u8; 1024]));
        assert!(msg.size_estimate() >= empty + 1024);
    }
}
