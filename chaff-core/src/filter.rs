//! Approximate-membership cuckoo filter.
//!
//! Used to mark queried peers during iterative lookups, to track keys
//! already in flight, and in serialized form inside Random requests so
//! the remote side can skip content the requester already holds. False
//! positives are possible; false negatives are not (until an insert
//! fails under load).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SLOTS: usize = 4;
const MAX_KICKS: usize = 256;

/// Cuckoo filter: power-of-two bucket count, 4 slots per bucket,
/// 16-bit fingerprints (0 = empty). Two candidate buckets per item;
/// the second index is derived from the first by XOR with the
/// fingerprint hash, so relocation works from either side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuckooFilter {
    buckets: Vec<[u16; SLOTS]>,
    len: usize,
}

impl CuckooFilter {
    /// Filter sized for roughly `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        let buckets = (capacity.max(1) + SLOTS - 1) / SLOTS;
        CuckooFilter {
            buckets: vec![[0u16; SLOTS]; buckets.next_power_of_two()],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn fingerprint_and_index(&self, item: &[u8]) -> (u16, usize) {
        let mut hasher = Sha256::new();
        hasher.update(item);
        let digest = hasher.finalize();
        let fp = u16::from_be_bytes([digest[0], digest[1]]).max(1);
        let raw = u64::from_be_bytes([
            digest[2], digest[3], digest[4], digest[5], digest[6], digest[7], digest[8], digest[9],
        ]);
        (fp, raw as usize & (self.buckets.len() - 1))
    }

    fn alt_index(&self, index: usize, fp: u16) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(fp.to_be_bytes());
        let digest = hasher.finalize();
        let raw = u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        index ^ (raw as usize & (self.buckets.len() - 1))
    }

    fn put(&mut self, index: usize, fp: u16) -> bool {
        for slot in self.buckets[index].iter_mut() {
            if *slot == 0 {
                *slot = fp;
                return true;
            }
        }
        false
    }

    /// Insert an item. Returns false when the filter is too loaded to
    /// place the fingerprint (the item is then unrecorded).
    pub fn insert(&mut self, item: &[u8]) -> bool {
        let (mut fp, i1) = self.fingerprint_and_index(item);
        let i2 = self.alt_index(i1, fp);
        if self.put(i1, fp) || self.put(i2, fp) {
            self.len += 1;
            return true;
        }
        // Kick a resident fingerprint to its alternate bucket.
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut index = if rng.gen::<bool>() { i1 } else { i2 };
        for _ in 0..MAX_KICKS {
            let slot = rng.gen_range(0..SLOTS);
            std::mem::swap(&mut fp, &mut self.buckets[index][slot]);
            index = self.alt_index(index, fp);
            if self.put(index, fp) {
                self.len += 1;
                return true;
            }
        }
        false
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        let (fp, i1) = self.fingerprint_and_index(item);
        let i2 = self.alt_index(i1, fp);
        self.buckets[i1].contains(&fp) || self.buckets[i2].contains(&fp)
    }

    /// Remove one copy of an item's fingerprint. Returns false when the
    /// item was not present.
    pub fn remove(&mut self, item: &[u8]) -> bool {
        let (fp, i1) = self.fingerprint_and_index(item);
        let i2 = self.alt_index(i1, fp);
        for index in [i1, i2] {
            for slot in self.buckets[index].iter_mut() {
                if *slot == fp {
                    *slot = 0;
                    self.len -= 1;
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let mut f = CuckooFilter::with_capacity(64);
        assert!(f.insert(b"alpha"));
        assert!(f.contains(b"alpha"));
        assert!(!f.contains(b"beta"));
    }

    #[test]
    fn no_false_negatives_at_capacity() {
        let mut f = CuckooFilter::with_capacity(256);
        let items: Vec<String> = (0..200).map(|i| format!("item-{i}")).collect();
        for item in &items {
            assert!(f.insert(item.as_bytes()));
        }
        for item in &items {
            assert!(f.contains(item.as_bytes()));
        }
    }

    #[test]
    fn remove_clears_membership() {
        let mut f = CuckooFilter::with_capacity(64);
        f.insert(b"alpha");
        assert!(f.remove(b"alpha"));
        assert!(!f.contains(b"alpha"));
        assert!(!f.remove(b"alpha"));
    }

    #[test]
    fn len_tracks_inserts_and_removes() {
        let mut f = CuckooFilter::with_capacity(64);
        f.insert(b"a");
        f.insert(b"b");
        assert_eq!(f.len(), 2);
        f.remove(b"a");
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn serializes_for_the_wire() {
        let mut f = CuckooFilter::with_capacity(32);
        f.insert(b"key-1");
        f.insert(b"key-2");
        let bytes = bincode::serialize(&f).unwrap();
        let back: CuckooFilter = bincode::deserialize(&bytes).unwrap();
        assert!(back.contains(b"key-1"));
        assert!(back.contains(b"key-2"));
        assert!(!back.contains(b"key-3"));
    }
}
