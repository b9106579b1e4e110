use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Engine-wide counters, updated lock-free and read through [`Metrics::snapshot`].
/// Pull-style: no exporter is mandated; anything that can read a struct can
/// scrape these.
#[derive(Debug, Default)]
pub struct Metrics {
    pub blocks_applied_total: AtomicU64,
    pub blocks_rejected_total: AtomicU64,
    pub reorgs_total: AtomicU64,
    pub txs_admitted_total: AtomicU64,
    pub txs_rejected_total: AtomicU64,
    pub mempool_evicted_total: AtomicU64,
    pub mempool_size: AtomicU64,
    pub nonce_replay_total: AtomicU64,
    pub rate_limited_total: AtomicU64,
    pub invalid_signature_total: AtomicU64,
    pub peers_dropped_total: AtomicU64,
    pub votes_accepted_total: AtomicU64,
    pub finality_certificates_total: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blocks_applied_total: u64,
    pub blocks_rejected_total: u64,
    pub reorgs_total: u64,
    pub txs_admitted_total: u64,
    pub txs_rejected_total: u64,
    pub mempool_evicted_total: u64,
    pub mempool_size: u64,
    pub nonce_replay_total: u64,
    pub rate_limited_total: u64,
    pub invalid_signature_total: u64,
    pub peers_dropped_total: u64,
    pub votes_accepted_total: u64,
    pub finality_certificates_total: u64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(counter: &AtomicU64, n: u64) {
        counter.store(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            blocks_applied_total: load(&self.blocks_applied_total),
            blocks_rejected_total: load(&self.blocks_rejected_total),
            reorgs_total: load(&self.reorgs_total),
            txs_admitted_total: load(&self.txs_admitted_total),
            txs_rejected_total: load(&self.txs_rejected_total),
            mempool_evicted_total: load(&self.mempool_evicted_total),
            mempool_size: load(&self.mempool_size),
            nonce_replay_total: load(&self.nonce_replay_total),
            rate_limited_total: load(&self.rate_limited_total),
            invalid_signature_total: load(&self.invalid_signature_total),
            peers_dropped_total: load(&self.peers_dropped_total),
            votes_accepted_total: load(&self.votes_accepted_total),
            finality_certificates_total: load(&self.finality_certificates_total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        Metrics::incr(&m.nonce_replay_total);
        Metrics::incr(&m.nonce_replay_total);
        Metrics::add(&m.mempool_evicted_total, 5);
        Metrics::set(&m.mempool_size, 42);
        let snap = m.snapshot();
        assert_eq!(snap.nonce_replay_total, 2);
        assert_eq!(snap.mempool_evicted_total, 5);
        assert_eq!(snap.mempool_size, 42);
        assert_eq!(snap.blocks_applied_total, 0);
    }
}
