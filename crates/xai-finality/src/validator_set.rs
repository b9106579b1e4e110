use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use xai_core::constants::{FINALITY_QUORUM_DEN, FINALITY_QUORUM_NUM};
use xai_core::types::{Address, Amount};

/// One active validator: its payout address, stake weight, and signing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: Address,
    /// Stake weight. Quorum is measured in stake, not head count.
    pub stake: Amount,
    /// secp256k1 public key the validator signs votes with, hex.
    pub public_key: String,
}

/// The active validator set, loaded at boot and replaced wholesale by the
/// governance hook when membership changes.
#[derive(Clone, Debug, Default)]
pub struct ValidatorSet {
    validators: HashMap<Address, ValidatorInfo>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(members: impl IntoIterator<Item = ValidatorInfo>) -> Self {
        let validators = members
            .into_iter()
            .map(|v| (v.address.clone(), v))
            .collect();
        Self { validators }
    }

    pub fn add(&mut self, info: ValidatorInfo) {
        self.validators.insert(info.address.clone(), info);
    }

    pub fn remove(&mut self, addr: &Address) {
        self.validators.remove(addr);
    }

    pub fn get(&self, addr: &Address) -> Option<&ValidatorInfo> {
        self.validators.get(addr)
    }

    pub fn is_validator(&self, addr: &Address) -> bool {
        self.validators.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_stake(&self) -> Amount {
        self.validators.values().map(|v| v.stake).sum()
    }

    /// True once `weight` strictly exceeds 2/3 of total stake.
    pub fn quorum_reached(&self, weight: Amount) -> bool {
        weight * FINALITY_QUORUM_DEN > self.total_stake() * FINALITY_QUORUM_NUM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(byte: u8, stake: Amount) -> ValidatorInfo {
        ValidatorInfo {
            address: Address::from_raw(format!("XAI{}", hex::encode([byte; 20]))),
            stake,
            public_key: String::new(),
        }
    }

    #[test]
    fn quorum_is_strictly_greater_than_two_thirds() {
        let set = ValidatorSet::from_members([
            validator(1, 100),
            validator(2, 100),
            validator(3, 100),
        ]);
        // Exactly 2/3 (200 of 300) is NOT quorum.
        assert!(!set.quorum_reached(200));
        assert!(set.quorum_reached(201));
    }

    #[test]
    fn quorum_weighs_stake_not_heads() {
        let set = ValidatorSet::from_members([
            validator(1, 700),
            validator(2, 100),
            validator(3, 100),
            validator(4, 100),
        ]);
        // The single whale is already past 2/3 of 1000.
        assert!(set.quorum_reached(700));
        // Three small validators together are not.
        assert!(!set.quorum_reached(300));
    }
}
