use serde::{Deserialize, Serialize};

use xai_core::types::{Address, Hash32};

use crate::account::AccountRecord;

/// Everything a block changed, recorded as *prior* values: the account
/// records as they stood before the block (None = account did not exist) and
/// the prior circulating supply. Restoring a diff undoes its block; the store
/// persists one per block so `rewind_to` never replays from genesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockDiff {
    pub height: u64,
    pub block_hash: Hash32,
    pub prior_accounts: Vec<(Address, Option<AccountRecord>)>,
    #[serde(with = "xai_core::types::amount_string")]
    pub prior_supply: u128,
}

impl BlockDiff {
    pub fn new(height: u64, block_hash: Hash32, prior_supply: u128) -> Self {
        Self {
            height,
            block_hash,
            prior_accounts: Vec::new(),
            prior_supply,
        }
    }

    /// Record an address's pre-block state, first touch only — later writes
    /// to the same address within the block must not overwrite it.
    pub fn record_prior(&mut self, addr: &Address, prior: Option<AccountRecord>) {
        if !self.prior_accounts.iter().any(|(a, _)| a == addr) {
            self.prior_accounts.push((addr.clone(), prior));
        }
    }
}
