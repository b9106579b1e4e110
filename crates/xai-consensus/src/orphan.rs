use std::collections::{HashMap, VecDeque};

use tracing::debug;

use xai_core::block::Block;
use xai_core::types::{Hash32, Timestamp};

struct OrphanEntry {
    block: Block,
    inserted_at: Timestamp,
}

/// Parentless blocks waiting for their ancestry: a capacity-bounded LRU keyed
/// by block hash, with a secondary index by `previous_hash` so children are
/// found the moment their parent lands.
pub struct OrphanPool {
    capacity: usize,
    ttl_secs: i64,
    entries: HashMap<Hash32, OrphanEntry>,
    by_parent: HashMap<Hash32, Vec<Hash32>>,
    /// Insertion order; front is the eviction candidate.
    arrivals: VecDeque<Hash32>,
}

impl OrphanPool {
    pub fn new(capacity: usize, ttl_secs: i64) -> Self {
        Self {
            capacity,
            ttl_secs,
            entries: HashMap::new(),
            by_parent: HashMap::new(),
            arrivals: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.entries.contains_key(hash)
    }

    /// Store an orphan, evicting the oldest entry when full. Re-inserting a
    /// known orphan is a no-op.
    pub fn insert(&mut self, block: Block, hash: Hash32, now: Timestamp) {
        if self.entries.contains_key(&hash) {
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.arrivals.pop_front() else {
                break;
            };
            self.remove(&oldest);
            debug!(evicted = %oldest, "orphan pool full, evicted oldest");
        }
        self.by_parent
            .entry(block.header.previous_hash)
            .or_default()
            .push(hash);
        self.arrivals.push_back(hash);
        self.entries.insert(
            hash,
            OrphanEntry {
                block,
                inserted_at: now,
            },
        );
    }

    /// Remove and return every orphan whose parent is `parent_hash`.
    pub fn take_children(&mut self, parent_hash: &Hash32) -> Vec<(Hash32, Block)> {
        let Some(children) = self.by_parent.remove(parent_hash) else {
            return Vec::new();
        };
        children
            .into_iter()
            .filter_map(|hash| {
                self.entries.remove(&hash).map(|entry| {
                    self.arrivals.retain(|h| h != &hash);
                    (hash, entry.block)
                })
            })
            .collect()
    }

    /// Drop entries older than the TTL. Returns how many were pruned.
    pub fn prune_expired(&mut self, now: Timestamp) -> usize {
        let expired: Vec<Hash32> = self
            .entries
            .iter()
            .filter(|(_, e)| now - e.inserted_at > self.ttl_secs)
            .map(|(h, _)| *h)
            .collect();
        for hash in &expired {
            self.remove(hash);
        }
        expired.len()
    }

    fn remove(&mut self, hash: &Hash32) {
        if let Some(entry) = self.entries.remove(hash) {
            let parent = entry.block.header.previous_hash;
            if let Some(list) = self.by_parent.get_mut(&parent) {
                list.retain(|h| h != hash);
                if list.is_empty() {
                    self.by_parent.remove(&parent);
                }
            }
            self.arrivals.retain(|h| h != hash);
        }
    }
}
