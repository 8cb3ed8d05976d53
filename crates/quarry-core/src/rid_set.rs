//! Compact set of record identities.
//!
//! Persistent identities are tracked in per-cluster bitmaps split into
//! fixed-size chunks that are allocated on first use, so memory follows the
//! highest position seen in each cluster rather than the number of members.
//! Clusters are keyed by id, so a large cluster id costs nothing extra.
//! Temporary identities (negative cluster or position) go to a plain hash set.

use std::collections::{HashMap, HashSet};

use quarry_sql::Rid;

const CHUNK_WORDS: usize = 64;
const CHUNK_BITS: i64 = (CHUNK_WORDS * 64) as i64;

type Chunk = Box<[u64; CHUNK_WORDS]>;

/// Set of record identities with O(1) insert and lookup.
#[derive(Debug, Default, Clone)]
pub struct RidSet {
    clusters: HashMap<i32, Vec<Option<Chunk>>>,
    others: HashSet<Rid>,
    len: usize,
}

impl RidSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(rid: Rid) -> (i32, usize, usize, u64) {
        let chunk = (rid.position / CHUNK_BITS) as usize;
        let bit = (rid.position % CHUNK_BITS) as usize;
        (rid.cluster, chunk, bit / 64, 1u64 << (bit % 64))
    }

    /// Insert an identity. Returns `true` if it was not present.
    pub fn insert(&mut self, rid: Rid) -> bool {
        if !rid.is_persistent() {
            let inserted = self.others.insert(rid);
            if inserted {
                self.len += 1;
            }
            return inserted;
        }
        let (cluster, chunk, word, mask) = Self::slot(rid);
        let chunks = self.clusters.entry(cluster).or_default();
        if chunks.len() <= chunk {
            chunks.resize_with(chunk + 1, || None);
        }
        let bits = chunks[chunk].get_or_insert_with(|| Box::new([0; CHUNK_WORDS]));
        if bits[word] & mask != 0 {
            return false;
        }
        bits[word] |= mask;
        self.len += 1;
        true
    }

    /// Whether the identity is a member.
    pub fn contains(&self, rid: Rid) -> bool {
        if !rid.is_persistent() {
            return self.others.contains(&rid);
        }
        let (cluster, chunk, word, mask) = Self::slot(rid);
        self.clusters
            .get(&cluster)
            .and_then(|chunks| chunks.get(chunk))
            .and_then(Option::as_ref)
            .is_some_and(|bits| bits[word] & mask != 0)
    }

    /// Remove an identity. Returns `true` if it was present.
    pub fn remove(&mut self, rid: Rid) -> bool {
        let removed = if !rid.is_persistent() {
            self.others.remove(&rid)
        } else {
            let (cluster, chunk, word, mask) = Self::slot(rid);
            match self
                .clusters
                .get_mut(&cluster)
                .and_then(|chunks| chunks.get_mut(chunk))
                .and_then(Option::as_mut)
            {
                Some(bits) if bits[word] & mask != 0 => {
                    bits[word] &= !mask;
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every member and release the bitmaps.
    pub fn clear(&mut self) {
        self.clusters.clear();
        self.others.clear();
        self.len = 0;
    }

    /// Number of allocated bitmap chunks.
    pub fn allocated_chunks(&self) -> usize {
        self.clusters
            .values()
            .map(|chunks| chunks.iter().filter(|c| c.is_some()).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = RidSet::new();
        assert!(set.insert(Rid::new(3, 10)));
        assert!(!set.insert(Rid::new(3, 10)));
        assert!(set.insert(Rid::new(3, 11)));
        assert_eq!(set.len(), 2);
        assert!(set.contains(Rid::new(3, 10)));
        assert!(!set.contains(Rid::new(4, 10)));
    }

    #[test]
    fn test_temporary_identities_use_fallback() {
        let mut set = RidSet::new();
        assert!(set.insert(Rid::new(-1, -5)));
        assert!(!set.insert(Rid::new(-1, -5)));
        assert!(set.contains(Rid::new(-1, -5)));
        assert_eq!(set.allocated_chunks(), 0);
    }

    #[test]
    fn test_chunks_allocated_lazily() {
        let mut set = RidSet::new();
        set.insert(Rid::new(0, 1_000_000));
        assert_eq!(set.allocated_chunks(), 1);
        set.insert(Rid::new(0, 1_000_001));
        assert_eq!(set.allocated_chunks(), 1);
        set.insert(Rid::new(0, 0));
        assert_eq!(set.allocated_chunks(), 2);
    }

    #[test]
    fn test_large_cluster_id_allocates_one_chunk() {
        let mut set = RidSet::new();
        assert!(set.insert(Rid::new(2_000_000_000, 0)));
        assert!(set.contains(Rid::new(2_000_000_000, 0)));
        assert!(!set.contains(Rid::new(1_999_999_999, 0)));
        assert_eq!(set.allocated_chunks(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut set = RidSet::new();
        set.insert(Rid::new(1, 1));
        set.insert(Rid::new(-1, -1));
        assert!(set.remove(Rid::new(1, 1)));
        assert!(!set.remove(Rid::new(1, 1)));
        assert_eq!(set.len(), 1);
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains(Rid::new(-1, -1)));
    }
}
