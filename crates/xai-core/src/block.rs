use serde::{Deserialize, Serialize};

use crate::constants::{
    GENESIS_DIFFICULTY, GENESIS_INDEX, GENESIS_NONCE, GENESIS_TIMESTAMP, GENESIS_VERSION,
};
use crate::transaction::Transaction;
use crate::types::{Address, Hash32, Network, Timestamp};

// ── BlockHeader ──────────────────────────────────────────────────────────────

/// The hashed portion of a block. The block hash is SHA-256 of the canonical
/// JSON of exactly these seven fields; PoW requires `difficulty` leading zero
/// bits in that hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub index: u64,
    pub previous_hash: Hash32,
    pub merkle_root: Hash32,
    pub timestamp: Timestamp,
    /// Required leading zero bits of the block hash.
    pub difficulty: u32,
    pub nonce: u64,
    pub version: u32,
}

impl BlockHeader {
    /// Per-block work estimate: `2^difficulty`, saturating at u128 range.
    /// Cumulative work over a branch drives fork choice.
    pub fn work(&self) -> u128 {
        if self.difficulty >= 127 {
            u128::MAX
        } else {
            1u128 << self.difficulty
        }
    }
}

// ── Block ────────────────────────────────────────────────────────────────────

/// A full block: header, miner payout address, transaction list, and an
/// optional validator signature over the header hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub miner_address: Address,
    pub transactions: Vec<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Block {
    /// The genesis block for `network`. Fixed header, no transactions; its
    /// hash anchors every chain on that network.
    pub fn genesis(network: Network) -> Self {
        Self {
            header: BlockHeader {
                index: GENESIS_INDEX,
                previous_hash: Hash32::ZERO,
                merkle_root: Hash32::ZERO,
                timestamp: GENESIS_TIMESTAMP,
                difficulty: GENESIS_DIFFICULTY,
                nonce: GENESIS_NONCE,
                version: GENESIS_VERSION,
            },
            miner_address: Address::coinbase(network),
            transactions: Vec::new(),
            signature: None,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.header.index == GENESIS_INDEX && self.header.previous_hash.is_zero()
    }

    /// The block's coinbase transaction, when it carries one. By convention
    /// the coinbase is the first transaction.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Sum of fees across non-coinbase transactions.
    pub fn total_fees(&self) -> u128 {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .map(|tx| tx.fee)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_shape() {
        let g = Block::genesis(Network::Mainnet);
        assert!(g.is_genesis());
        assert_eq!(g.header.index, 0);
        assert!(g.header.previous_hash.is_zero());
        assert!(g.header.merkle_root.is_zero());
        assert_eq!(g.header.difficulty, 1);
        assert!(g.transactions.is_empty());
    }

    #[test]
    fn work_grows_with_difficulty() {
        let mut h = Block::genesis(Network::Mainnet).header;
        h.difficulty = 4;
        assert_eq!(h.work(), 16);
        h.difficulty = 5;
        assert_eq!(h.work(), 32);
        h.difficulty = 200;
        assert_eq!(h.work(), u128::MAX);
    }

    #[test]
    fn absent_signature_is_omitted_from_wire() {
        let g = Block::genesis(Network::Testnet);
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["header"]["index"], 0);
        assert!(json.get("signature").is_none(), "absent signature omitted");
    }
}
