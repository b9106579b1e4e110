use std::collections::HashMap;

use tracing::debug;

use xai_core::block::Block;
use xai_core::constants::MAX_SUPPLY;
use xai_core::transaction::Transaction;
use xai_core::types::{Address, Amount, Hash32, Nonce};
use xai_core::RejectReason;

use crate::account::{AccountRecord, AccountView};
use crate::diff::BlockDiff;

/// The live account map. Equals the replay of all applied blocks from
/// genesis; the store's persisted copy and this one are reconciled at boot.
///
/// Supply accounting: a coinbase mints its amount, a fee burns its amount
/// (the miner recovers fees through the coinbase allowance). `supply` is
/// therefore always the sum of all balances.
#[derive(Clone, Debug, Default)]
pub struct UtxoState {
    accounts: HashMap<Address, AccountRecord>,
    supply: Amount,
}

impl UtxoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records (store boot path).
    pub fn from_accounts<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (Address, AccountRecord)>,
    {
        let accounts: HashMap<_, _> = records.into_iter().collect();
        let supply = accounts.values().map(|r| r.balance).sum();
        Self { accounts, supply }
    }

    pub fn supply(&self) -> Amount {
        self.supply
    }

    pub fn account(&self, addr: &Address) -> Option<&AccountRecord> {
        self.accounts.get(addr)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// All records, sorted by address. The canonical ordering used by the
    /// snapshot hash.
    pub fn sorted_accounts(&self) -> Vec<(&Address, &AccountRecord)> {
        let mut list: Vec<_> = self.accounts.iter().collect();
        list.sort_by(|a, b| a.0.cmp(b.0));
        list
    }

    // ── Transaction application ──────────────────────────────────────────────

    /// Apply one transaction. `diff`, when given, records prior values of
    /// every touched account for later restore.
    pub fn apply_tx(
        &mut self,
        tx: &Transaction,
        diff: Option<&mut BlockDiff>,
    ) -> Result<(), RejectReason> {
        if tx.is_coinbase() {
            self.apply_coinbase(tx, diff)
        } else {
            self.apply_transfer(tx, diff)
        }
    }

    fn apply_coinbase(
        &mut self,
        tx: &Transaction,
        mut diff: Option<&mut BlockDiff>,
    ) -> Result<(), RejectReason> {
        let minted = self
            .supply
            .checked_add(tx.amount)
            .ok_or(RejectReason::SupplyOverflow)?;
        if minted > MAX_SUPPLY {
            return Err(RejectReason::SupplyOverflow);
        }
        if let Some(d) = diff.as_deref_mut() {
            d.record_prior(&tx.recipient, self.accounts.get(&tx.recipient).cloned());
        }
        self.credit(&tx.recipient, tx.amount);
        self.supply = minted;
        Ok(())
    }

    fn apply_transfer(
        &mut self,
        tx: &Transaction,
        mut diff: Option<&mut BlockDiff>,
    ) -> Result<(), RejectReason> {
        let sender = self.accounts.get(&tx.sender).cloned().unwrap_or_default();
        let expected = sender.nonce + 1;
        if tx.nonce != expected {
            return Err(RejectReason::NonceGap {
                expected,
                got: tx.nonce,
            });
        }

        let payer = tx.fee_payer().clone();
        let sender_owes = if payer == tx.sender {
            tx.amount
                .checked_add(tx.fee)
                .ok_or(RejectReason::SupplyOverflow)?
        } else {
            tx.amount
        };
        if sender.balance < sender_owes {
            return Err(RejectReason::InsufficientBalance {
                need: sender_owes,
                have: sender.balance,
            });
        }
        if payer != tx.sender {
            let payer_balance = self.balance(&payer);
            if payer_balance < tx.fee {
                return Err(RejectReason::InsufficientBalance {
                    need: tx.fee,
                    have: payer_balance,
                });
            }
        }

        if let Some(d) = diff.as_deref_mut() {
            d.record_prior(&tx.sender, self.accounts.get(&tx.sender).cloned());
            d.record_prior(&tx.recipient, self.accounts.get(&tx.recipient).cloned());
            d.record_prior(&payer, self.accounts.get(&payer).cloned());
        }

        self.debit(&tx.sender, tx.amount);
        self.debit(&payer, tx.fee);
        self.credit(&tx.recipient, tx.amount);
        self.accounts
            .entry(tx.sender.clone())
            .or_default()
            .nonce = tx.nonce;
        // Fees leave circulation here; the coinbase allowance re-mints them.
        self.supply -= tx.fee;
        Ok(())
    }

    /// Undo one transaction. Must be the most recently applied mutation for
    /// the addresses involved — reorgs call this walking blocks tip-down,
    /// transactions in reverse order.
    pub fn revert_tx(&mut self, tx: &Transaction) -> Result<(), RejectReason> {
        if tx.is_coinbase() {
            let have = self.balance(&tx.recipient);
            if have < tx.amount {
                return Err(RejectReason::StorageError(format!(
                    "cannot revert coinbase: recipient holds {have} < {}",
                    tx.amount
                )));
            }
            self.debit(&tx.recipient, tx.amount);
            self.supply -= tx.amount;
            return Ok(());
        }

        let payer = tx.fee_payer().clone();
        let recipient_has = self.balance(&tx.recipient);
        if recipient_has < tx.amount {
            return Err(RejectReason::StorageError(format!(
                "cannot revert transfer: recipient holds {recipient_has} < {}",
                tx.amount
            )));
        }
        self.debit(&tx.recipient, tx.amount);
        self.credit(&tx.sender, tx.amount);
        self.credit(&payer, tx.fee);
        let sender = self.accounts.entry(tx.sender.clone()).or_default();
        sender.nonce = tx.nonce.saturating_sub(1);
        self.supply += tx.fee;
        Ok(())
    }

    // ── Block application ────────────────────────────────────────────────────

    /// Apply a whole block atomically. On any mid-block failure the already
    /// applied transactions are rolled back via the partial diff and the
    /// error is returned untouched.
    pub fn apply_block(
        &mut self,
        block: &Block,
        block_hash: Hash32,
    ) -> Result<BlockDiff, RejectReason> {
        let mut diff = BlockDiff::new(block.header.index, block_hash, self.supply);
        for tx in &block.transactions {
            if let Err(e) = self.apply_tx(tx, Some(&mut diff)) {
                debug!(block = %block_hash, error = %e, "mid-block apply failure, rolling back");
                self.restore_diff(&diff);
                return Err(e);
            }
        }
        Ok(diff)
    }

    /// Undo a whole block via `revert_tx`, transactions in reverse order.
    pub fn revert_block(&mut self, block: &Block) -> Result<(), RejectReason> {
        for tx in block.transactions.iter().rev() {
            self.revert_tx(tx)?;
        }
        Ok(())
    }

    /// Restore the exact pre-block state recorded in `diff`.
    pub fn restore_diff(&mut self, diff: &BlockDiff) {
        for (addr, prior) in &diff.prior_accounts {
            match prior {
                Some(rec) => {
                    self.accounts.insert(addr.clone(), rec.clone());
                }
                None => {
                    self.accounts.remove(addr);
                }
            }
        }
        self.supply = diff.prior_supply;
    }

    // ── Snapshot ─────────────────────────────────────────────────────────────

    /// Deterministic digest over `(height, tip_hash, sorted accounts)`.
    /// Two peers at the same tip must produce the same value.
    pub fn snapshot_hash(&self, height: u64, tip_hash: Hash32) -> Result<Hash32, RejectReason> {
        #[derive(serde::Serialize)]
        struct Snapshot<'a> {
            accounts: Vec<(&'a str, String, Nonce)>,
            height: u64,
            tip_hash: Hash32,
        }
        let accounts = self
            .sorted_accounts()
            .into_iter()
            .map(|(addr, rec)| (addr.as_str(), rec.balance.to_string(), rec.nonce))
            .collect();
        xai_codec::sha256_canonical(&Snapshot {
            accounts,
            height,
            tip_hash,
        })
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn credit(&mut self, addr: &Address, amount: Amount) {
        let rec = self.accounts.entry(addr.clone()).or_default();
        rec.balance += amount;
    }

    fn debit(&mut self, addr: &Address, amount: Amount) {
        let rec = self.accounts.entry(addr.clone()).or_default();
        rec.balance -= amount;
    }
}

impl AccountView for UtxoState {
    fn balance(&self, addr: &Address) -> Amount {
        self.accounts.get(addr).map_or(0, |r| r.balance)
    }

    fn nonce(&self, addr: &Address) -> Nonce {
        self.accounts.get(addr).map_or(0, |r| r.nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::types::Network;

    fn addr(byte: u8) -> Address {
        Address::from_raw(format!("XAI{}", hex::encode([byte; 20])))
    }

    fn coinbase(recipient: &Address, amount: Amount) -> Transaction {
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

    fn transfer(from: &Address, to: &Address, amount: Amount, fee: Amount, nonce: Nonce) -> Transaction {
        Transaction {
            sender: from.clone(),
            recipient: to.clone(),
            amount,
            fee,
            nonce,
            timestamp: 0,
            public_key: String::new(),
            signature: String::new(),
            metadata: None,
            sponsor: None,
        }
    }

    #[test]
    fn coinbase_mints_supply() {
        let mut state = UtxoState::new();
        let miner = addr(1);
        state.apply_tx(&coinbase(&miner, 50), None).unwrap();
        assert_eq!(state.balance(&miner), 50);
        assert_eq!(state.supply(), 50);
    }

    #[test]
    fn transfer_moves_funds_and_burns_fee() {
        let mut state = UtxoState::new();
        let (a, b) = (addr(1), addr(2));
        state.apply_tx(&coinbase(&a, 100), None).unwrap();
        state.apply_tx(&transfer(&a, &b, 30, 2, 1), None).unwrap();
        assert_eq!(state.balance(&a), 68);
        assert_eq!(state.balance(&b), 30);
        assert_eq!(state.nonce(&a), 1);
        assert_eq!(state.supply(), 98);
    }

    #[test]
    fn nonce_gap_rejected() {
        let mut state = UtxoState::new();
        let (a, b) = (addr(1), addr(2));
        state.apply_tx(&coinbase(&a, 100), None).unwrap();
        let err = state.apply_tx(&transfer(&a, &b, 1, 0, 2), None).unwrap_err();
        assert_eq!(err, RejectReason::NonceGap { expected: 1, got: 2 });
    }

    #[test]
    fn overdraft_rejected() {
        let mut state = UtxoState::new();
        let (a, b) = (addr(1), addr(2));
        state.apply_tx(&coinbase(&a, 10), None).unwrap();
        let err = state.apply_tx(&transfer(&a, &b, 10, 1, 1), None).unwrap_err();
        assert!(matches!(err, RejectReason::InsufficientBalance { .. }));
    }

    #[test]
    fn supply_cap_enforced() {
        let mut state = UtxoState::new();
        let err = state
            .apply_tx(&coinbase(&addr(1), MAX_SUPPLY + 1), None)
            .unwrap_err();
        assert_eq!(err, RejectReason::SupplyOverflow);
    }

    #[test]
    fn sponsored_fee_charged_to_payer() {
        let mut state = UtxoState::new();
        let (a, b, p) = (addr(1), addr(2), addr(3));
        state.apply_tx(&coinbase(&a, 50), None).unwrap();
        state.apply_tx(&coinbase(&p, 10), None).unwrap();
        let mut tx = transfer(&a, &b, 50, 4, 1);
        tx.sponsor = Some(xai_core::Sponsor {
            payer: p.clone(),
            public_key: String::new(),
            signature: String::new(),
        });
        state.apply_tx(&tx, None).unwrap();
        assert_eq!(state.balance(&a), 0, "sender spends the full amount");
        assert_eq!(state.balance(&p), 6, "payer covers the fee");
        assert_eq!(state.balance(&b), 50);
    }

    #[test]
    fn revert_tx_is_exact_inverse() {
        let mut state = UtxoState::new();
        let (a, b) = (addr(1), addr(2));
        state.apply_tx(&coinbase(&a, 100), None).unwrap();
        let before = (state.balance(&a), state.balance(&b), state.nonce(&a), state.supply());

        let tx = transfer(&a, &b, 40, 3, 1);
        state.apply_tx(&tx, None).unwrap();
        state.revert_tx(&tx).unwrap();

        assert_eq!(
            before,
            (state.balance(&a), state.balance(&b), state.nonce(&a), state.supply())
        );
    }

    #[test]
    fn failed_block_apply_rolls_back() {
        let mut state = UtxoState::new();
        let (a, b) = (addr(1), addr(2));
        state.apply_tx(&coinbase(&a, 100), None).unwrap();

        let mut block = Block::genesis(Network::Mainnet);
        block.transactions = vec![
            transfer(&a, &b, 10, 1, 1),
            transfer(&a, &b, 10, 1, 5), // nonce gap — block must fail
        ];
        let err = state.apply_block(&block, Hash32::ZERO).unwrap_err();
        assert!(matches!(err, RejectReason::NonceGap { .. }));
        assert_eq!(state.balance(&a), 100, "partial application undone");
        assert_eq!(state.nonce(&a), 0);
    }

    #[test]
    fn snapshot_hash_tracks_state() {
        let mut state = UtxoState::new();
        let a = addr(1);
        let h0 = state.snapshot_hash(0, Hash32::ZERO).unwrap();
        state.apply_tx(&coinbase(&a, 5), None).unwrap();
        let h1 = state.snapshot_hash(0, Hash32::ZERO).unwrap();
        assert_ne!(h0, h1);

        let rebuilt = UtxoState::from_accounts(
            state
                .sorted_accounts()
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        assert_eq!(rebuilt.snapshot_hash(0, Hash32::ZERO).unwrap(), h1);
    }
}
