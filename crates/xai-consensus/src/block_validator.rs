use std::collections::HashSet;

use xai_core::block::{Block, BlockHeader};
use xai_core::config::CoreConfig;
use xai_core::constants::{
    BLOCK_REWARD, KNOWN_BLOCK_VERSIONS, MAX_FUTURE_DRIFT_SECS, MEDIAN_TIME_WINDOW,
};
use xai_core::transaction::Transaction;
use xai_core::types::{Hash32, Network, Timestamp};
use xai_core::RejectReason;
use xai_crypto::{derive_address, leading_zero_bits, verify_signature};
use xai_finality::ValidatorSet;

/// Stateless-ish block checker: everything provable from the block, its
/// parent's header, the recent timestamp window, and the expected difficulty.
/// Balance/nonce feasibility is enforced when the block is applied to state —
/// application of an infeasible block fails with the same reject kinds and is
/// rolled back.
pub struct BlockValidator {
    config: CoreConfig,
}

impl BlockValidator {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    /// Validate a candidate block against its parent. `recent_timestamps` is
    /// the ascending window of up to `MEDIAN_TIME_WINDOW` timestamps ending
    /// at the parent. `txid_known` answers chain-wide txid membership at the
    /// parent. Returns the block hash on success.
    pub fn validate<F>(
        &self,
        block: &Block,
        parent: &BlockHeader,
        recent_timestamps: &[Timestamp],
        expected_difficulty: u32,
        now: Timestamp,
        txid_known: F,
        validator_set: Option<&ValidatorSet>,
    ) -> Result<Hash32, RejectReason>
    where
        F: Fn(&Hash32) -> Result<bool, RejectReason>,
    {
        let header = &block.header;

        // ── 1. Version ───────────────────────────────────────────────────────
        if !KNOWN_BLOCK_VERSIONS.contains(&header.version) {
            return Err(RejectReason::UnknownVersion(header.version));
        }

        // ── 2. Linkage ───────────────────────────────────────────────────────
        if header.index != parent.index + 1 {
            return Err(RejectReason::UnknownParent(format!(
                "index {} does not extend parent {}",
                header.index, parent.index
            )));
        }
        let parent_hash = xai_codec::block_hash(parent)?;
        if header.previous_hash != parent_hash {
            return Err(RejectReason::UnknownParent(format!(
                "previous_hash {} does not match parent {parent_hash}",
                header.previous_hash
            )));
        }

        // ── 3. Timestamp: strictly above the median, bounded future drift ────
        let median = median_timestamp(recent_timestamps);
        if header.timestamp <= median {
            return Err(RejectReason::BadTimestamp(format!(
                "timestamp {} not above median {median}",
                header.timestamp
            )));
        }
        if header.timestamp > now + MAX_FUTURE_DRIFT_SECS {
            return Err(RejectReason::BadTimestamp(format!(
                "timestamp {} is more than {MAX_FUTURE_DRIFT_SECS}s ahead",
                header.timestamp
            )));
        }

        // ── 4. Declared difficulty must be the scheduled one ─────────────────
        if header.difficulty != expected_difficulty {
            return Err(RejectReason::InvalidPoW {
                got: header.difficulty,
                need: expected_difficulty,
            });
        }

        // ── 5. Size ──────────────────────────────────────────────────────────
        let size = xai_codec::canonical_size(block)?;
        if size > self.config.max_block_bytes as usize {
            return Err(RejectReason::BadSize {
                size,
                max: self.config.max_block_bytes as usize,
            });
        }

        // ── 6. Proof of work ─────────────────────────────────────────────────
        let hash = xai_codec::block_hash(header)?;
        let zeros = leading_zero_bits(&hash);
        if zeros < header.difficulty {
            return Err(RejectReason::InvalidPoW {
                got: zeros,
                need: header.difficulty,
            });
        }

        // ── 7. Merkle commitment ─────────────────────────────────────────────
        if xai_codec::block_merkle_root(block)? != header.merkle_root {
            return Err(RejectReason::MerkleMismatch);
        }

        // ── 8. Transaction set ───────────────────────────────────────────────
        self.validate_transactions(block, &txid_known)?;

        // ── 9. Optional validator signature over the header ──────────────────
        if let Some(sig) = &block.signature {
            let set = validator_set.ok_or_else(|| {
                RejectReason::InvalidSignature
            })?;
            let info = set
                .get(&block.miner_address)
                .ok_or(RejectReason::InvalidSignature)?;
            let header_bytes = xai_codec::to_canonical_json(header)?;
            verify_signature(&info.public_key, &header_bytes, sig)?;
        }

        Ok(hash)
    }

    fn validate_transactions<F>(&self, block: &Block, txid_known: &F) -> Result<(), RejectReason>
    where
        F: Fn(&Hash32) -> Result<bool, RejectReason>,
    {
        let mut seen: HashSet<Hash32> = HashSet::new();
        let mut fees: u128 = 0;
        let mut coinbase: Option<&Transaction> = None;

        for (i, tx) in block.transactions.iter().enumerate() {
            if tx.is_coinbase() {
                if i != 0 {
                    return Err(RejectReason::InvalidCoinbase(
                        "coinbase must be the first transaction".into(),
                    ));
                }
                coinbase = Some(tx);
            } else {
                fees += tx.fee;
            }

            let txid = xai_codec::txid(tx)?;
            if !seen.insert(txid) {
                return Err(RejectReason::DuplicateTx(txid.to_hex()));
            }
            if txid_known(&txid)? {
                return Err(RejectReason::DuplicateTx(txid.to_hex()));
            }

            self.validate_tx(tx)?;
        }

        if let Some(cb) = coinbase {
            let allowance = BLOCK_REWARD + fees;
            if cb.amount > allowance {
                return Err(RejectReason::InvalidCoinbase(format!(
                    "coinbase {} exceeds allowance {allowance}",
                    cb.amount
                )));
            }
            if cb.recipient.network() != Some(self.config.network) {
                return Err(RejectReason::BadAddress(format!(
                    "coinbase recipient {} is not a {:?} address",
                    cb.recipient, self.config.network
                )));
            }
        }
        Ok(())
    }

    /// Individual transaction checks that need no state: size, addresses,
    /// signatures, key-to-address binding.
    pub fn validate_tx(&self, tx: &Transaction) -> Result<(), RejectReason> {
        if tx.is_coinbase() {
            // Emission carries no signature; its amount is bounded above.
            return Ok(());
        }

        let size = xai_codec::canonical_size(tx)?;
        if size > self.config.max_tx_bytes as usize {
            return Err(RejectReason::BadSize {
                size,
                max: self.config.max_tx_bytes as usize,
            });
        }

        for addr in [&tx.sender, &tx.recipient] {
            if addr.network() != Some(self.config.network) {
                return Err(RejectReason::BadAddress(format!(
                    "{addr} is not a {:?} address",
                    self.config.network
                )));
            }
        }

        let key_bytes = hex::decode(&tx.public_key).map_err(|_| RejectReason::InvalidSignature)?;
        let derived = derive_address(&key_bytes, self.config.network);
        let bound = match (derived.body(), tx.sender.body()) {
            (Some(d), Some(s)) => s.starts_with(d),
            _ => false,
        };
        if !bound {
            return Err(RejectReason::BadAddress(
                "public key does not derive the sender address".into(),
            ));
        }

        let signing_bytes = xai_codec::tx_signing_bytes(tx)?;
        verify_signature(&tx.public_key, &signing_bytes, &tx.signature)?;
        if let Some(sponsor) = &tx.sponsor {
            verify_signature(&sponsor.public_key, &signing_bytes, &sponsor.signature)?;
            let payer_key =
                hex::decode(&sponsor.public_key).map_err(|_| RejectReason::InvalidSignature)?;
            if derive_address(&payer_key, self.config.network) != sponsor.payer {
                return Err(RejectReason::BadAddress(
                    "sponsor key does not derive the payer address".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Median of the timestamp window. With an even count the lower-middle value
/// is used, so "strictly greater than the median" stays conservative.
pub fn median_timestamp(recent: &[Timestamp]) -> Timestamp {
    if recent.is_empty() {
        return i64::MIN;
    }
    let mut sorted: Vec<Timestamp> = recent.to_vec();
    sorted.sort_unstable();
    sorted[(sorted.len() - 1) / 2]
}

/// The window of timestamps the next block's median check uses: the last
/// `MEDIAN_TIME_WINDOW` headers ending at the parent.
pub fn timestamp_window(headers: &[BlockHeader]) -> Vec<Timestamp> {
    let start = headers.len().saturating_sub(MEDIAN_TIME_WINDOW);
    headers[start..].iter().map(|h| h.timestamp).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::transaction::Transaction;
    use xai_core::types::Address;
    use xai_crypto::KeyPair;

    #[test]
    fn median_of_odd_window() {
        assert_eq!(median_timestamp(&[5, 1, 9]), 5);
    }

    #[test]
    fn median_of_even_window_takes_lower_middle() {
        assert_eq!(median_timestamp(&[1, 2, 3, 4]), 2);
    }

    #[test]
    fn median_of_empty_window_never_blocks() {
        assert_eq!(median_timestamp(&[]), i64::MIN);
    }

    #[test]
    fn oversized_tx_rejected_at_the_boundary() {
        let kp = KeyPair::generate(Network::Mainnet);
        let to = Address::from_raw(format!("XAI{}", hex::encode([2u8; 20])));
        let mut tx = Transaction {
            sender: kp.address.clone(),
            recipient: to,
            amount: 1,
            fee: 1,
            nonce: 1,
            timestamp: 100,
            public_key: kp.public_key_hex.clone(),
            signature: String::new(),
            metadata: None,
            sponsor: None,
        };
        tx.signature = kp.sign(&xai_codec::tx_signing_bytes(&tx).unwrap());

        let exact = xai_codec::canonical_size(&tx).unwrap();

        // Limit exactly at the canonical size: accepted.
        let cfg = CoreConfig {
            max_tx_bytes: exact as u32,
            ..CoreConfig::default()
        };
        BlockValidator::new(cfg).validate_tx(&tx).unwrap();

        // One byte under: refused with the measured size.
        let cfg = CoreConfig {
            max_tx_bytes: exact as u32 - 1,
            ..CoreConfig::default()
        };
        let err = BlockValidator::new(cfg).validate_tx(&tx).unwrap_err();
        assert_eq!(
            err,
            RejectReason::BadSize {
                size: exact,
                max: exact - 1
            }
        );
    }

    #[test]
    fn window_caps_at_eleven() {
        let headers: Vec<BlockHeader> = (0..20)
            .map(|i| {
                let mut h = xai_core::Block::genesis(Network::Mainnet).header;
                h.index = i;
                h.timestamp = i as i64;
                h
            })
            .collect();
        let window = timestamp_window(&headers);
        assert_eq!(window.len(), MEDIAN_TIME_WINDOW);
        assert_eq!(window[0], 9);
        assert_eq!(*window.last().unwrap(), 19);
    }
}
