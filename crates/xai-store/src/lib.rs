//! Persistent chain storage: append-only block log with reverse diffs for
//! cheap rewind, plus the reorg write-ahead log.

pub mod db;
pub mod wal;

pub use db::{AppendBatch, BlockLocator, ChainStore, TipInfo};
pub use wal::{Wal, WalPhase, WalRecord};

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::block::Block;
    use xai_core::transaction::Transaction;
    use xai_core::types::{Address, Hash32, Network};
    use xai_state::UtxoState;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("xai_store_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn addr(byte: u8) -> Address {
        Address::from_raw(format!("XAI{}", hex::encode([byte; 20])))
    }

    fn coinbase(recipient: &Address, amount: u128) -> Transaction {
        Transaction {
            sender: Address::coinbase(Network::Mainnet),
            recipient: recipient.clone(),
            amount,
            fee: 0,
            nonce: 0,
            timestamp: 0,
            public_key: String::new(),
            signature: String::new(),
            metadata: None,
            sponsor: None,
        }
    }

    /// Build block `index` on `parent_hash` and append it through a live
    /// state, the way the chain validator drives the store.
    fn append_block(
        store: &ChainStore,
        state: &mut UtxoState,
        index: u64,
        parent_hash: Hash32,
        txs: Vec<Transaction>,
    ) -> Hash32 {
        let mut block = Block::genesis(Network::Mainnet);
        block.header.index = index;
        block.header.previous_hash = parent_hash;
        block.header.timestamp = index as i64 * 120;
        block.transactions = txs;
        let txids: Vec<Hash32> = block
            .transactions
            .iter()
            .map(|tx| xai_codec::txid(tx).unwrap())
            .collect();
        block.header.merkle_root = xai_codec::merkle_root(&txids);
        let hash = xai_codec::block_hash(&block.header).unwrap();

        let diff = state.apply_block(&block, hash).unwrap();
        let updated = diff
            .prior_accounts
            .iter()
            .map(|(a, _)| (a.clone(), state.account(a).cloned().unwrap_or_default()))
            .collect();
        store
            .append(AppendBatch {
                block: &block,
                block_hash: hash,
                txids: &txids,
                diff: &diff,
                updated_accounts: updated,
                supply_after: state.supply(),
            })
            .unwrap();
        hash
    }

    #[test]
    fn append_read_tip_round_trip() {
        let dir = temp_dir("round");
        let store = ChainStore::open(&dir).unwrap();
        let mut state = UtxoState::new();
        let miner = addr(1);

        let g = append_block(&store, &mut state, 0, Hash32::ZERO, vec![]);
        let b1 = append_block(&store, &mut state, 1, g, vec![coinbase(&miner, 50)]);

        let tip = store.tip().unwrap().unwrap();
        assert_eq!(tip.index, 1);
        assert_eq!(tip.hash, b1);

        let by_hash = store.read_block(BlockLocator::ByHash(b1)).unwrap().unwrap();
        let by_index = store.read_block(BlockLocator::ByIndex(1)).unwrap().unwrap();
        assert_eq!(by_hash, by_index);
        assert_eq!(store.account(&miner).unwrap().unwrap().balance, 50);
        assert_eq!(store.supply().unwrap(), 50);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn out_of_order_append_refused() {
        let dir = temp_dir("order");
        let store = ChainStore::open(&dir).unwrap();
        let mut state = UtxoState::new();
        append_block(&store, &mut state, 0, Hash32::ZERO, vec![]);

        let mut block = Block::genesis(Network::Mainnet);
        block.header.index = 5;
        let hash = xai_codec::block_hash(&block.header).unwrap();
        let diff = xai_state::BlockDiff::new(5, hash, 0);
        let err = store
            .append(AppendBatch {
                block: &block,
                block_hash: hash,
                txids: &[],
                diff: &diff,
                updated_accounts: vec![],
                supply_after: 0,
            })
            .unwrap_err();
        assert!(matches!(err, xai_core::RejectReason::StorageError(_)));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rewind_restores_accounts_txids_and_supply() {
        let dir = temp_dir("rewind");
        let store = ChainStore::open(&dir).unwrap();
        let mut state = UtxoState::new();
        let miner = addr(1);

        let g = append_block(&store, &mut state, 0, Hash32::ZERO, vec![]);
        let cb = coinbase(&miner, 50);
        let cb_txid = xai_codec::txid(&cb).unwrap();
        let b1 = append_block(&store, &mut state, 1, g, vec![cb]);
        append_block(&store, &mut state, 2, b1, vec![coinbase(&miner, 60)]);

        assert_eq!(store.supply().unwrap(), 110);
        store.rewind_to(0).unwrap();

        let tip = store.tip().unwrap().unwrap();
        assert_eq!(tip.index, 0);
        assert_eq!(tip.hash, g);
        assert!(store.account(&miner).unwrap().is_none());
        assert_eq!(store.supply().unwrap(), 0);
        assert!(!store.contains_txid(&cb_txid).unwrap());
        assert!(store.read_block(BlockLocator::ByIndex(1)).unwrap().is_none());
        assert!(store.index_of_hash(&b1).unwrap().is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn snapshot_hash_matches_live_state() {
        let dir = temp_dir("snap");
        let store = ChainStore::open(&dir).unwrap();
        let mut state = UtxoState::new();
        let g = append_block(&store, &mut state, 0, Hash32::ZERO, vec![]);
        append_block(&store, &mut state, 1, g, vec![coinbase(&addr(1), 50)]);

        let tip = store.tip().unwrap().unwrap();
        assert_eq!(
            store.snapshot_hash().unwrap(),
            state.snapshot_hash(tip.index, tip.hash).unwrap()
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn reopen_preserves_tip() {
        let dir = temp_dir("reopen");
        {
            let store = ChainStore::open(&dir).unwrap();
            let mut state = UtxoState::new();
            let g = append_block(&store, &mut state, 0, Hash32::ZERO, vec![]);
            append_block(&store, &mut state, 1, g, vec![coinbase(&addr(1), 50)]);
        }
        let store = ChainStore::open(&dir).unwrap();
        assert_eq!(store.tip().unwrap().unwrap().index, 1);
        assert_eq!(store.supply().unwrap(), 50);
        let _ = std::fs::remove_dir_all(dir);
    }
}
