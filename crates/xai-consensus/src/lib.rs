//! Block and chain validation: the header/transaction rule set, the reorg
//! engine with write-ahead journaling, the orphan pool, and difficulty
//! retargeting.

pub mod block_validator;
pub mod chain;
pub mod difficulty;
pub mod orphan;

pub use block_validator::{median_timestamp, timestamp_window, BlockValidator};
pub use chain::{BlockOutcome, ChainPhase, ChainValidator};
pub use difficulty::{mine_header_nonce, next_difficulty};
pub use orphan::OrphanPool;
