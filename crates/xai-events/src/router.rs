use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use xai_core::types::Hash32;
use xai_core::RejectReason;

/// What a peer did wrong. Carried by misbehavior events; scoring and
/// slashing consequences happen outside this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MisbehaviorKind {
    ReplayNonce,
    InvalidSignature,
    RateLimited,
    BadBlock,
    BadTransaction,
    DoubleVote,
}

/// Every event the core publishes.
#[derive(Clone, Debug)]
pub enum CoreEvent {
    BlockApplied {
        hash: Hash32,
        height: u64,
    },
    BlockRejected {
        hash: Hash32,
        reason: RejectReason,
    },
    ReorgCompleted {
        from: Hash32,
        to: Hash32,
        depth: u64,
    },
    MempoolEvicted {
        reason: &'static str,
        count: usize,
    },
    PeerMisbehavior {
        peer: String,
        kind: MisbehaviorKind,
    },
    BlockFinalized {
        hash: Hash32,
        height: u64,
    },
    /// A validator provably misbehaved (e.g. voted twice at one height).
    /// Slashing effects are applied by the governance layer, not here.
    Misbehavior {
        validator: String,
        kind: MisbehaviorKind,
    },
}

/// Coarse event classes for filtered subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Block,
    Reorg,
    Mempool,
    Peer,
    Finality,
}

impl CoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CoreEvent::BlockApplied { .. } | CoreEvent::BlockRejected { .. } => EventKind::Block,
            CoreEvent::ReorgCompleted { .. } => EventKind::Reorg,
            CoreEvent::MempoolEvicted { .. } => EventKind::Mempool,
            CoreEvent::PeerMisbehavior { .. } => EventKind::Peer,
            CoreEvent::BlockFinalized { .. } | CoreEvent::Misbehavior { .. } => EventKind::Finality,
        }
    }
}

/// Fan-out router over a tokio broadcast channel. Publishing never blocks;
/// a subscriber that falls behind loses oldest events (broadcast semantics),
/// which is acceptable for observability consumers.
#[derive(Clone)]
pub struct EventRouter {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventRouter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: CoreEvent) {
        debug!(?event, "core event");
        // Err means no live subscribers; publishing is still fine.
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to one event kind; other kinds are filtered out on receive.
    pub fn subscribe_kind(&self, kind: EventKind) -> FilteredReceiver {
        FilteredReceiver {
            inner: self.tx.subscribe(),
            kind,
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A kind-filtered subscription.
pub struct FilteredReceiver {
    inner: broadcast::Receiver<CoreEvent>,
    kind: EventKind,
}

impl FilteredReceiver {
    /// Next event of the subscribed kind, or None once the router is gone.
    pub async fn recv(&mut self) -> Option<CoreEvent> {
        loop {
            match self.inner.recv().await {
                Ok(ev) if ev.kind() == self.kind => return Some(ev),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_subscribers_see_events() {
        let router = EventRouter::new(16);
        let mut a = router.subscribe();
        let mut b = router.subscribe();
        router.publish(CoreEvent::BlockApplied {
            hash: Hash32::ZERO,
            height: 1,
        });
        assert!(matches!(a.recv().await.unwrap(), CoreEvent::BlockApplied { height: 1, .. }));
        assert!(matches!(b.recv().await.unwrap(), CoreEvent::BlockApplied { height: 1, .. }));
    }

    #[tokio::test]
    async fn kind_filter_skips_other_events() {
        let router = EventRouter::new(16);
        let mut reorgs = router.subscribe_kind(EventKind::Reorg);
        router.publish(CoreEvent::BlockApplied {
            hash: Hash32::ZERO,
            height: 1,
        });
        router.publish(CoreEvent::ReorgCompleted {
            from: Hash32::ZERO,
            to: Hash32::from_bytes([1; 32]),
            depth: 2,
        });
        let ev = reorgs.recv().await.unwrap();
        assert!(matches!(ev, CoreEvent::ReorgCompleted { depth: 2, .. }));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let router = EventRouter::new(4);
        router.publish(CoreEvent::MempoolEvicted {
            reason: "ttl",
            count: 3,
        });
    }
}
