//! Prioritised sets of wanted content.
//!
//! A [Wantlist] tracks which content a party is currently asking for, at which
//! priority, and in which form. It is used both for what a local session wants
//! from the network and for what the engine believes a remote peer wants from
//! us.

use std::collections::HashMap;

use crate::cid::ContentId;

/// The two forms a want can take. A `WantBlock` asks for the block payload
/// itself, a `WantHave` only for confirmation that the peer holds it.
///
/// `WantBlock` is the stronger of the two and compares greater.
#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Serialize, Deserialize)]
pub enum WantType {
    WantHave,
    WantBlock,
}

/// A single want: the content asked for, how urgently, and in which form.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub cid: ContentId,
    pub priority: i32,
    pub want_type: WantType,
}

impl Entry {
    pub fn new(cid: ContentId, priority: i32, want_type: WantType) -> Entry {
        Entry { cid, priority, want_type }
    }
}

/// A set of wants keyed by content identifier.
#[derive(Debug, Clone, Default)]
pub struct Wantlist {
    set: HashMap<ContentId, Entry>,
}

impl Wantlist {
    pub fn new() -> Wantlist {
        Wantlist { set: HashMap::new() }
    }

    /// Merges a want into the list. Returns `true` iff the list changed.
    ///
    /// Re-adding a want that is already present in the same or a stronger form
    /// is a no-op, so a `WantHave` never downgrades an existing `WantBlock`.
    /// A `WantBlock` replaces an existing `WantHave` for the same content.
    pub fn add(&mut self, cid: ContentId, priority: i32, want_type: WantType) -> bool {
        if let Some(existing) = self.set.get(&cid) {
            if existing.want_type == WantType::WantBlock || want_type == WantType::WantHave {
                return false;
            }
        }
        self.set.insert(cid.clone(), Entry::new(cid, priority, want_type));
        true
    }

    /// Removes a want regardless of its form. Returns `true` iff it was present.
    pub fn remove(&mut self, cid: &ContentId) -> bool {
        self.set.remove(cid).is_some()
    }

    /// Removes a want of the given form. Removing a `WantHave` leaves an
    /// existing `WantBlock` in place. Returns `true` iff the list changed.
    pub fn remove_type(&mut self, cid: &ContentId, want_type: WantType) -> bool {
        match self.set.get(cid) {
            None => false,
            Some(existing)
                if existing.want_type == WantType::WantBlock
                    && want_type == WantType::WantHave =>
            {
                false
            }
            Some(_) => self.set.remove(cid).is_some(),
        }
    }

    pub fn get(&self, cid: &ContentId) -> Option<&Entry> {
        self.set.get(cid)
    }

    pub fn contains(&self, cid: &ContentId) -> bool {
        self.set.contains_key(cid)
    }

    /// Unordered snapshot of the current wants.
    pub fn entries(&self) -> Vec<Entry> {
        self.set.values().cloned().collect()
    }

    /// Snapshot sorted by descending priority, for rebroadcasts.
    pub fn sorted_entries(&self) -> Vec<Entry> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_add_is_idempotent() {
        let mut wl = Wantlist::new();
        assert!(wl.add(ContentId::zero(), 10, WantType::WantBlock));
        assert!(!wl.add(ContentId::zero(), 10, WantType::WantBlock));
        assert_eq!(wl.len(), 1);
    }

    #[actix_rt::test]
    async fn test_want_have_does_not_downgrade() {
        let mut wl = Wantlist::new();
        assert!(wl.add(ContentId::zero(), 10, WantType::WantBlock));
        assert!(!wl.add(ContentId::zero(), 99, WantType::WantHave));
        assert_eq!(wl.get(&ContentId::zero()).unwrap().want_type, WantType::WantBlock);
        assert_eq!(wl.get(&ContentId::zero()).unwrap().priority, 10);
    }

    #[actix_rt::test]
    async fn test_want_block_upgrades() {
        let mut wl = Wantlist::new();
        assert!(wl.add(ContentId::zero(), 10, WantType::WantHave));
        assert!(wl.add(ContentId::zero(), 20, WantType::WantBlock));
        let entry = wl.get(&ContentId::zero()).unwrap();
        assert_eq!(entry.want_type, WantType::WantBlock);
        assert_eq!(entry.priority, 20);
        assert_eq!(wl.len(), 1);
    }

    #[actix_rt::test]
    async fn test_remove_type_respects_strength() {
        let mut wl = Wantlist::new();
        wl.add(ContentId::zero(), 10, WantType::WantBlock);
        assert!(!wl.remove_type(&ContentId::zero(), WantType::WantHave));
        assert!(wl.contains(&ContentId::zero()));
        assert!(wl.remove_type(&ContentId::zero(), WantType::WantBlock));
        assert!(wl.is_empty());

        wl.add(ContentId::one(), 5, WantType::WantHave);
        assert!(wl.remove_type(&ContentId::one(), WantType::WantBlock));
        assert!(wl.is_empty());
    }

    #[actix_rt::test]
    async fn test_sorted_entries_by_priority() {
        let mut wl = Wantlist::new();
        wl.add(ContentId::zero(), 1, WantType::WantBlock);
        wl.add(ContentId::one(), 3, WantType::WantBlock);
        wl.add(ContentId::two(), 2, WantType::WantHave);
        let sorted = wl.sorted_entries();
        let priorities: Vec<i32> = sorted.iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![3, 2, 1]);
    }

    #[actix_rt::test]
    async fn test_want_type_ordering() {
        assert!(WantType::WantBlock > WantType::WantHave);
    }
}
