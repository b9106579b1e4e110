//! ─── XAI Protocol Constants ─────────────────────────────────────────────────
//!
//! All amounts are integer base units. Consensus-critical values live here;
//! operator-tunable knobs live in [`crate::config::CoreConfig`].

// ── Supply & emission ────────────────────────────────────────────────────────

/// Hard cap on circulating supply (base units). Never exceeded; a block whose
/// coinbase would cross it is invalid.
pub const MAX_SUPPLY: u128 = 1_000_000_000_000_000;

/// Coinbase emission per block (base units). Flat schedule.
pub const BLOCK_REWARD: u128 = 50;

// ── Block & transaction limits ───────────────────────────────────────────────

/// Block versions this node understands.
pub const KNOWN_BLOCK_VERSIONS: &[u32] = &[1];

/// Number of trailing block timestamps the median-time check covers.
pub const MEDIAN_TIME_WINDOW: usize = 11;

/// Maximum seconds a block timestamp may run ahead of the local clock.
pub const MAX_FUTURE_DRIFT_SECS: i64 = 7_200;

// ── Genesis ──────────────────────────────────────────────────────────────────

pub const GENESIS_INDEX: u64 = 0;
pub const GENESIS_TIMESTAMP: i64 = 0;
pub const GENESIS_DIFFICULTY: u32 = 1;
pub const GENESIS_NONCE: u64 = 0;
pub const GENESIS_VERSION: u32 = 1;

// ── Addresses ────────────────────────────────────────────────────────────────

/// Hex chars in the address body (20 bytes of SHA256(pubkey)).
pub const ADDRESS_BODY_LEN: usize = 40;

/// Hex chars in the optional checksum suffix (4 bytes).
pub const ADDRESS_CHECKSUM_LEN: usize = 8;

// ── Mempool ──────────────────────────────────────────────────────────────────

/// Replace-by-fee multiplier: a replacement must carry at least
/// `RBF_FEE_RATE_NUM / RBF_FEE_RATE_DEN` (1.25×) the incumbent's fee rate.
pub const RBF_FEE_RATE_NUM: u64 = 5;
pub const RBF_FEE_RATE_DEN: u64 = 4;

// ── Consensus engine ─────────────────────────────────────────────────────────

/// Orphan promotion walks at most this many descendants per applied block.
pub const MAX_PROMOTION_DEPTH: usize = 64;

/// Difficulty retarget clamp: at most ×4 / ÷4 per window.
pub const RETARGET_CLAMP_FACTOR: u32 = 4;

/// Lowest difficulty the retarget may reach.
pub const MIN_DIFFICULTY: u32 = 1;

/// Highest difficulty expressible as leading zero bits of a 256-bit hash.
pub const MAX_DIFFICULTY: u32 = 255;

// ── Storage ──────────────────────────────────────────────────────────────────

/// Transient IO failures are retried this many times before the node treats
/// the store as lost and shuts down.
pub const STORAGE_RETRY_MAX: u32 = 3;

/// Base backoff between storage retries (doubles per attempt).
pub const STORAGE_RETRY_BASE_MS: u64 = 50;

// ── Finality ─────────────────────────────────────────────────────────────────

/// Quorum fraction for finality certificates (numerator / denominator of
/// total validator stake; strictly greater-than).
pub const FINALITY_QUORUM_NUM: u128 = 2;
pub const FINALITY_QUORUM_DEN: u128 = 3;
