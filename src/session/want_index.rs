use std::collections::{HashMap, HashSet};

use crate::cid::ContentId;
use crate::message::PresenceType;
use crate::peer_id::PeerId;
use crate::wantlist::WantType;

use super::SessionId;

/// One content identifier's standing across every session that wants it.
#[derive(Debug, Default)]
struct WantRecord {
    /// Sessions still interested; the record dies with the last one.
    sessions: HashSet<SessionId>,
    /// Unanswered wants on the wire, strongest form per peer.
    sent: HashMap<PeerId, WantType>,
}

/// Reference-counted registry of wants shared across sessions.
///
/// The manager consults it before putting a want on the wire, so overlapping
/// sessions produce at most one outstanding `WantBlock` per (peer, content)
/// pair, and a wire cancel goes out only when the last interested session
/// lets go of a cid.
#[derive(Debug, Default)]
pub struct WantIndex {
    records: HashMap<ContentId, WantRecord>,
    by_session: HashMap<SessionId, HashSet<ContentId>>,
}

impl WantIndex {
    pub fn new() -> WantIndex {
        WantIndex::default()
    }

    /// Registers a session's interest in a cid. Returns `true` when nobody
    /// was interested before.
    pub fn register(&mut self, session: SessionId, cid: &ContentId) -> bool {
        let fresh = !self.records.contains_key(cid);
        let record = self.records.entry(cid.clone()).or_default();
        let _ = record.sessions.insert(session);
        let _ = self.by_session.entry(session).or_default().insert(cid.clone());
        fresh
    }

    /// Decides whether a want of the given form should go on the wire to
    /// `peer`, recording it as outstanding if so. An outstanding `WantBlock`
    /// swallows everything; an outstanding `WantHave` swallows further probes
    /// but lets a `WantBlock` upgrade through.
    pub fn begin_send(&mut self, peer: &PeerId, cid: &ContentId, want_type: WantType) -> bool {
        let record = match self.records.get_mut(cid) {
            Some(record) => record,
            None => return false,
        };
        match record.sent.get(peer) {
            Some(WantType::WantBlock) => false,
            Some(WantType::WantHave) if want_type == WantType::WantHave => false,
            _ => {
                let _ = record.sent.insert(peer.clone(), want_type);
                true
            }
        }
    }

    /// Records a presence answer. An answered probe leaves the outstanding
    /// set (the peer may be probed again later); a dont-have also clears an
    /// outstanding `WantBlock`, since the server will never serve it.
    pub fn note_presence(&mut self, peer: &PeerId, cid: &ContentId, presence: PresenceType) {
        if let Some(record) = self.records.get_mut(cid) {
            let answered = match (record.sent.get(peer), presence) {
                (Some(WantType::WantHave), _) => true,
                (Some(WantType::WantBlock), PresenceType::DontHave) => true,
                _ => false,
            };
            if answered {
                let _ = record.sent.remove(peer);
            }
        }
    }

    /// Retires a cid on block arrival. Returns the sessions to notify and
    /// the peers owed a wire cancel: everyone still holding an unanswered
    /// `WantBlock`, except the peer that delivered.
    pub fn resolve(
        &mut self,
        cid: &ContentId,
        deliverer: &PeerId,
    ) -> (Vec<SessionId>, Vec<PeerId>) {
        let record = match self.records.remove(cid) {
            Some(record) => record,
            None => return (vec![], vec![]),
        };
        for session in record.sessions.iter() {
            if let Some(cids) = self.by_session.get_mut(session) {
                let _ = cids.remove(cid);
            }
        }
        let cancels = record
            .sent
            .iter()
            .filter(|(peer, want_type)| **want_type == WantType::WantBlock && *peer != deliverer)
            .map(|(peer, _)| peer.clone())
            .collect();
        (record.sessions.into_iter().collect(), cancels)
    }

    /// Drops one session's interest in a cid. When the last session lets go
    /// the record is retired and the peers owed a wire cancel are returned.
    pub fn release(&mut self, session: SessionId, cid: &ContentId) -> Option<Vec<PeerId>> {
        if let Some(cids) = self.by_session.get_mut(&session) {
            let _ = cids.remove(cid);
        }
        let record = self.records.get_mut(cid)?;
        let _ = record.sessions.remove(&session);
        if !record.sessions.is_empty() {
            return None;
        }
        let record = self.records.remove(cid)?;
        Some(
            record
                .sent
                .iter()
                .filter(|(_, want_type)| **want_type == WantType::WantBlock)
                .map(|(peer, _)| peer.clone())
                .collect(),
        )
    }

    /// Drops everything a closing session was interested in, returning the
    /// wire cancels owed per retired cid.
    pub fn release_session(&mut self, session: SessionId) -> Vec<(ContentId, Vec<PeerId>)> {
        let cids = match self.by_session.remove(&session) {
            Some(cids) => cids,
            None => return vec![],
        };
        let mut retired = vec![];
        for cid in cids {
            if let Some(cancels) = self.release_record(session, &cid) {
                retired.push((cid, cancels));
            }
        }
        retired
    }

    fn release_record(&mut self, session: SessionId, cid: &ContentId) -> Option<Vec<PeerId>> {
        let record = self.records.get_mut(cid)?;
        let _ = record.sessions.remove(&session);
        if !record.sessions.is_empty() {
            return None;
        }
        let record = self.records.remove(cid)?;
        Some(
            record
                .sent
                .iter()
                .filter(|(_, want_type)| **want_type == WantType::WantBlock)
                .map(|(peer, _)| peer.clone())
                .collect(),
        )
    }

    /// Forgets all outstanding wants against a departed peer; its server
    /// dropped our wantlist with the connection.
    pub fn peer_gone(&mut self, peer: &PeerId) {
        for record in self.records.values_mut() {
            let _ = record.sent.remove(peer);
        }
    }

    pub fn sessions_for(&self, cid: &ContentId) -> Vec<SessionId> {
        self.records.get(cid).map(|r| r.sessions.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn is_wanted(&self, cid: &ContentId) -> bool {
        self.records.contains_key(cid)
    }

    /// The strongest unanswered want currently on the wire to `peer`.
    pub fn outstanding(&self, peer: &PeerId, cid: &ContentId) -> Option<WantType> {
        self.records.get(cid).and_then(|r| r.sent.get(peer)).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(tag: u8) -> ContentId {
        ContentId::from_data(&[tag])
    }

    #[actix_rt::test]
    async fn test_second_want_block_stays_off_the_wire() {
        let mut index = WantIndex::new();
        let peer = PeerId::one();
        let x = cid(1);

        assert!(index.register(1, &x));
        assert!(!index.register(2, &x));

        assert!(index.begin_send(&peer, &x, WantType::WantBlock));
        assert!(!index.begin_send(&peer, &x, WantType::WantBlock));
        assert_eq!(index.outstanding(&peer, &x), Some(WantType::WantBlock));
    }

    #[actix_rt::test]
    async fn test_probe_upgrades_to_block_once() {
        let mut index = WantIndex::new();
        let peer = PeerId::one();
        let x = cid(2);
        let _ = index.register(1, &x);

        assert!(index.begin_send(&peer, &x, WantType::WantHave));
        assert!(!index.begin_send(&peer, &x, WantType::WantHave));
        assert!(index.begin_send(&peer, &x, WantType::WantBlock));
        assert!(!index.begin_send(&peer, &x, WantType::WantBlock));
    }

    #[actix_rt::test]
    async fn test_answered_probe_can_be_probed_again() {
        let mut index = WantIndex::new();
        let peer = PeerId::one();
        let x = cid(3);
        let _ = index.register(1, &x);

        assert!(index.begin_send(&peer, &x, WantType::WantHave));
        index.note_presence(&peer, &x, PresenceType::DontHave);
        assert_eq!(index.outstanding(&peer, &x), None);
        assert!(index.begin_send(&peer, &x, WantType::WantHave));
    }

    #[actix_rt::test]
    async fn test_resolve_cancels_other_block_holders_only() {
        let mut index = WantIndex::new();
        let (p1, p2, p3) = (PeerId::one(), PeerId::two(), PeerId::zero());
        let x = cid(4);
        let _ = index.register(1, &x);
        let _ = index.register(2, &x);

        assert!(index.begin_send(&p1, &x, WantType::WantBlock));
        assert!(index.begin_send(&p2, &x, WantType::WantBlock));
        assert!(index.begin_send(&p3, &x, WantType::WantHave));

        let (mut sessions, cancels) = index.resolve(&x, &p1);
        sessions.sort();
        assert_eq!(sessions, vec![1, 2]);
        assert_eq!(cancels, vec![p2]);
        assert!(!index.is_wanted(&x));
    }

    #[actix_rt::test]
    async fn test_cancel_reaches_the_wire_only_for_the_last_session() {
        let mut index = WantIndex::new();
        let peer = PeerId::one();
        let x = cid(5);
        let _ = index.register(1, &x);
        let _ = index.register(2, &x);
        assert!(index.begin_send(&peer, &x, WantType::WantBlock));

        assert_eq!(index.release(1, &x), None);
        assert!(index.is_wanted(&x));
        assert_eq!(index.release(2, &x), Some(vec![peer]));
        assert!(!index.is_wanted(&x));
    }

    #[actix_rt::test]
    async fn test_departed_peer_is_forgotten() {
        let mut index = WantIndex::new();
        let peer = PeerId::one();
        let x = cid(6);
        let _ = index.register(1, &x);
        assert!(index.begin_send(&peer, &x, WantType::WantBlock));

        index.peer_gone(&peer);
        assert_eq!(index.outstanding(&peer, &x), None);
        assert!(index.begin_send(&peer, &x, WantType::WantBlock));
    }
}
