//! Pending-transaction pool: admission pipeline, fee/nonce ordering for
//! block templates, replace-by-fee, and eviction under capacity or age
//! pressure.

pub mod entry;
pub mod pool;

pub use entry::MempoolEntry;
pub use pool::{Mempool, MempoolConfig};
