use std::cmp::Ordering;

use xai_core::transaction::Transaction;
use xai_core::types::{Hash32, Timestamp};

/// One admitted transaction with the bookkeeping admission computed for it.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash32,
    pub arrival_time: Timestamp,
    pub size_bytes: usize,
    /// fee / canonical size. Drives template ordering and eviction.
    pub fee_rate: f64,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, txid: Hash32, arrival_time: Timestamp, size_bytes: usize) -> Self {
        let fee_rate = tx.fee as f64 / size_bytes.max(1) as f64;
        Self {
            tx,
            txid,
            arrival_time,
            size_bytes,
            fee_rate,
        }
    }

    /// Template order: fee_rate descending, then earlier arrival, then
    /// lexicographic txid. Total and deterministic.
    pub fn template_cmp(&self, other: &Self) -> Ordering {
        other
            .fee_rate
            .partial_cmp(&self.fee_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.arrival_time.cmp(&other.arrival_time))
            .then_with(|| self.txid.cmp(&other.txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::types::{Address, Network};

    fn entry(fee: u128, arrival: Timestamp, txid_byte: u8) -> MempoolEntry {
        let tx = Transaction {
            sender: Address::coinbase(Network::Mainnet),
            recipient: Address::coinbase(Network::Mainnet),
            amount: 1,
            fee,
            nonce: 1,
            timestamp: arrival,
            public_key: String::new(),
            signature: String::new(),
            metadata: None,
            sponsor: None,
        };
        MempoolEntry::new(tx, Hash32::from_bytes([txid_byte; 32]), arrival, 100)
    }

    #[test]
    fn higher_fee_rate_sorts_first() {
        let a = entry(10, 0, 1);
        let b = entry(20, 0, 2);
        assert_eq!(b.template_cmp(&a), Ordering::Less);
    }

    #[test]
    fn ties_break_on_arrival_then_txid() {
        let early = entry(10, 5, 2);
        let late = entry(10, 9, 1);
        assert_eq!(early.template_cmp(&late), Ordering::Less);

        let low_id = entry(10, 5, 1);
        let high_id = entry(10, 5, 2);
        assert_eq!(low_id.template_cmp(&high_id), Ordering::Less);
    }
}
