//! Core data model for the XAI chain: blocks, transactions, addresses,
//! the reject-reason taxonomy, protocol constants, and configuration.

pub mod block;
pub mod config;
pub mod constants;
pub mod error;
pub mod transaction;
pub mod types;

pub use block::{Block, BlockHeader};
pub use config::CoreConfig;
pub use error::RejectReason;
pub use transaction::{Sponsor, Transaction};
pub use types::{Address, Amount, Hash32, Network, Nonce, Timestamp};
