use thiserror::Error;

/// Every refusal the core can hand back, one variant per reason.
///
/// Validation failures are local rejects (peer scored down, never fatal);
/// storage failures inside an in-progress apply are rolled back via the WAL;
/// only `WalCorrupt` and a failed rollback terminate the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RejectReason {
    // ── Transaction / block validation ───────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid proof-of-work: {got} leading zero bits, need {need}")]
    InvalidPoW { got: u32, need: u32 },

    #[error("bad timestamp: {0}")]
    BadTimestamp(String),

    #[error("size {size} exceeds limit {max}")]
    BadSize { size: usize, max: usize },

    #[error("duplicate transaction: {0}")]
    DuplicateTx(String),

    #[error("nonce gap: expected {expected}, got {got}")]
    NonceGap { expected: u64, got: u64 },

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error("unknown block version {0}")]
    UnknownVersion(u32),

    #[error("bad address: {0}")]
    BadAddress(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("merkle root mismatch")]
    MerkleMismatch,

    #[error("invalid coinbase: {0}")]
    InvalidCoinbase(String),

    #[error("supply would exceed the protocol cap")]
    SupplyOverflow,

    // ── Chain / reorg ────────────────────────────────────────────────────────
    #[error("unknown parent block: {0}")]
    UnknownParent(String),

    #[error("reorg depth {depth} exceeds maximum {max}")]
    ForkTooDeep { depth: u64, max: u64 },

    #[error("reorg would cross finalized height {finalized}")]
    FinalityViolation { finalized: u64 },

    // ── Mempool ──────────────────────────────────────────────────────────────
    #[error("mempool full")]
    MempoolFull,

    #[error("replacement fee too low: {0}")]
    FeeTooLow(String),

    // ── P2P ──────────────────────────────────────────────────────────────────
    #[error("replayed message nonce: {0}")]
    ReplayNonce(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("peer misbehavior: {0}")]
    PeerMisbehavior(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    // ── Storage / infrastructure ─────────────────────────────────────────────
    #[error("storage error: {0}")]
    StorageError(String),

    #[error("write-ahead log corrupt: {0}")]
    WalCorrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),
}

impl RejectReason {
    /// Whether this reject should count against the originating peer's score.
    /// Infrastructure faults are ours, not theirs.
    pub fn is_peer_fault(&self) -> bool {
        !matches!(
            self,
            RejectReason::StorageError(_)
                | RejectReason::WalCorrupt(_)
                | RejectReason::Serialization(_)
                | RejectReason::Cancelled
                | RejectReason::NotFound(_)
                | RejectReason::MempoolFull
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_fault_classification() {
        assert!(RejectReason::InvalidSignature.is_peer_fault());
        assert!(RejectReason::NonceGap { expected: 1, got: 3 }.is_peer_fault());
        assert!(!RejectReason::StorageError("io".into()).is_peer_fault());
        assert!(!RejectReason::MempoolFull.is_peer_fault());
        assert!(!RejectReason::Cancelled.is_peer_fault());
    }
}
