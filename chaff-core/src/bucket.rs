//! XOR-distance neighbor table with fixed capacity and LRU eviction.

use std::collections::VecDeque;

use crate::id::Id;
use crate::peer::Peer;

/// Neighbor table owned by one local identity. Entries are kept in
/// recency order (front = least recently seen); `closest` sorts on
/// demand by XOR distance to the query identifier.
#[derive(Debug, Clone)]
pub struct RoutingBucket {
    owner: Id,
    capacity: usize,
    peers: VecDeque<Peer>,
}

impl RoutingBucket {
    pub fn new(owner: Id, capacity: usize) -> Self {
        RoutingBucket {
            owner,
            capacity: capacity.max(1),
            peers: VecDeque::new(),
        }
    }

    pub fn owner(&self) -> &Id {
        &self.owner
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Add or refresh a peer. Returns true when a new entry was
    /// inserted. The owner itself is never stored; a known peer is
    /// moved to the most-recently-seen position; on overflow the
    /// least-recently-seen entry is evicted.
    pub fn add(&mut self, peer: Peer) -> bool {
        if *peer.id() == self.owner {
            return false;
        }
        if let Some(pos) = self.peers.iter().position(|p| p.id() == peer.id()) {
            self.peers.remove(pos);
            self.peers.push_back(peer);
            return false;
        }
        if self.peers.len() >= self.capacity {
            self.peers.pop_front();
        }
        self.peers.push_back(peer);
        true
    }

    /// Remove a peer by id. Returns true when an entry was removed.
    pub fn remove(&mut self, id: &Id) -> bool {
        if let Some(pos) = self.peers.iter().position(|p| p.id() == id) {
            self.peers.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &Id) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id() == id)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.get(id).is_some()
    }

    /// Up to `n` peers in non-decreasing XOR distance to `target`.
    pub fn closest(&self, target: &Id, n: usize) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().cloned().collect();
        peers.sort_by(|a, b| a.id().distance(target).cmp(&b.id().distance(target)));
        peers.truncate(n);
        peers
    }

    /// All peers in recency order (least recently seen first).
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: Id) -> Peer {
        Peer::new(id, "127.0.0.1".parse().unwrap(), 4100)
    }

    fn id_with_prefix(b: u8) -> Id {
        let mut bytes = [0u8; 32];
        bytes[0] = b;
        Id::from_bytes(bytes)
    }

    #[test]
    fn add_and_get() {
        let mut bucket = RoutingBucket::new(Id::random(), 4);
        let p = peer(Id::random());
        assert!(bucket.add(p.clone()));
        assert_eq!(bucket.count(), 1);
        assert_eq!(bucket.get(p.id()), Some(&p));
    }

    #[test]
    fn never_stores_owner() {
        let owner = Id::random();
        let mut bucket = RoutingBucket::new(owner, 4);
        assert!(!bucket.add(peer(owner)));
        assert!(bucket.is_empty());
    }

    #[test]
    fn refresh_does_not_grow() {
        let mut bucket = RoutingBucket::new(Id::random(), 4);
        let p = peer(Id::random());
        assert!(bucket.add(p.clone()));
        assert!(!bucket.add(p));
        assert_eq!(bucket.count(), 1);
    }

    #[test]
    fn overflow_evicts_least_recently_seen() {
        let mut bucket = RoutingBucket::new(id_with_prefix(0xff), 2);
        let a = peer(id_with_prefix(1));
        let b = peer(id_with_prefix(2));
        let c = peer(id_with_prefix(3));
        bucket.add(a.clone());
        bucket.add(b.clone());
        bucket.add(c.clone());
        assert_eq!(bucket.count(), 2);
        assert!(!bucket.contains(a.id()));
        assert!(bucket.contains(b.id()));
        assert!(bucket.contains(c.id()));
    }

    #[test]
    fn refresh_protects_from_eviction() {
        let mut bucket = RoutingBucket::new(id_with_prefix(0xff), 2);
        let a = peer(id_with_prefix(1));
        let b = peer(id_with_prefix(2));
        bucket.add(a.clone());
        bucket.add(b.clone());
        bucket.add(a.clone()); // refresh: a becomes most recent
        bucket.add(peer(id_with_prefix(3)));
        assert!(bucket.contains(a.id()));
        assert!(!bucket.contains(b.id()));
    }

    #[test]
    fn closest_orders_by_distance_and_caps_count() {
        let target = id_with_prefix(0);
        let mut bucket = RoutingBucket::new(id_with_prefix(0xff), 8);
        for b in [8u8, 1, 4, 2, 16] {
            bucket.add(peer(id_with_prefix(b)));
        }
        let closest = bucket.closest(&target, 3);
        assert_eq!(closest.len(), 3);
        for pair in closest.windows(2) {
            assert!(
                pair[0].id().distance(&target) <= pair[1].id().distance(&target),
                "closest must be in non-decreasing distance order"
            );
        }
        assert_eq!(closest[0].id(), &id_with_prefix(1));
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut bucket = RoutingBucket::new(Id::random(), 4);
        assert!(!bucket.remove(&Id::random()));
    }
}
