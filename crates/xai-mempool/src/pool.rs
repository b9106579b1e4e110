use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use xai_core::block::Block;
use xai_core::config::CoreConfig;
use xai_core::constants::{RBF_FEE_RATE_DEN, RBF_FEE_RATE_NUM};
use xai_core::transaction::Transaction;
use xai_core::types::{Address, Hash32, Network, Nonce, Timestamp};
use xai_core::RejectReason;
use xai_crypto::{derive_address, verify_signature};
use xai_events::{CoreEvent, EventRouter, Metrics};
use xai_state::AccountView;

use crate::entry::MempoolEntry;

/// Mempool tuning, lifted from the node's [`CoreConfig`].
#[derive(Clone, Debug)]
pub struct MempoolConfig {
    pub network: Network,
    pub capacity: usize,
    pub ttl_secs: i64,
    pub max_tx_bytes: usize,
}

impl MempoolConfig {
    pub fn from_core(cfg: &CoreConfig) -> Self {
        Self {
            network: cfg.network,
            capacity: cfg.mempool_capacity as usize,
            ttl_secs: cfg.mempool_ttl_sec as i64,
            max_tx_bytes: cfg.max_tx_bytes as usize,
        }
    }
}

/// The pending-transaction pool. Keyed by txid with a (sender → nonce → txid)
/// secondary index; admission observes the latest applied state passed in by
/// the caller, never a cached one.
pub struct Mempool {
    config: MempoolConfig,
    entries: HashMap<Hash32, MempoolEntry>,
    by_sender: HashMap<Address, BTreeMap<Nonce, Hash32>>,
    events: EventRouter,
    metrics: Arc<Metrics>,
}

impl Mempool {
    pub fn new(config: MempoolConfig, events: EventRouter, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            by_sender: HashMap::new(),
            events,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash32) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash32) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    // ── Admission ────────────────────────────────────────────────────────────

    /// Run the full admission pipeline. Returns the txid on success; every
    /// refusal carries exactly one reason.
    pub fn admit(
        &mut self,
        tx: Transaction,
        state: &impl AccountView,
        now: Timestamp,
    ) -> Result<Hash32, RejectReason> {
        // (a) Size.
        let size = xai_codec::canonical_size(&tx)?;
        if size > self.config.max_tx_bytes {
            return Err(RejectReason::BadSize {
                size,
                max: self.config.max_tx_bytes,
            });
        }

        // (b) Signatures and address binding. Coinbase never enters the pool.
        if tx.is_coinbase() {
            return Err(RejectReason::BadAddress(
                "coinbase transactions are block-only".into(),
            ));
        }
        self.verify_authorship(&tx)?;

        let txid = xai_codec::txid(&tx)?;
        let sender = tx.sender.clone();
        let confirmed = state.nonce(&sender);
        let pending = self.by_sender.get(&sender);

        // (c) Nonce continuity. An occupied pending nonce routes to
        // replace-by-fee instead of being a gap.
        let next_admissible = pending
            .and_then(|m| m.keys().next_back().copied())
            .map(|highest| highest + 1)
            .unwrap_or(confirmed + 1);
        let replace_target = pending.and_then(|m| m.get(&tx.nonce).copied());
        if replace_target.is_none() && tx.nonce != next_admissible {
            return Err(RejectReason::NonceGap {
                expected: next_admissible,
                got: tx.nonce,
            });
        }

        // (d) Balance projection across the sender's other pending spend.
        self.project_balances(&tx, state, replace_target)?;

        // (e) Dedup.
        if self.entries.contains_key(&txid) {
            return Err(RejectReason::DuplicateTx(txid.to_hex()));
        }

        // (f) Replace-by-fee: ≥ 1.25× the incumbent's fee rate.
        let entry = MempoolEntry::new(tx, txid, now, size);
        if let Some(old_id) = replace_target {
            let old = &self.entries[&old_id];
            let required = old.fee_rate * RBF_FEE_RATE_NUM as f64 / RBF_FEE_RATE_DEN as f64;
            if entry.fee_rate < required {
                return Err(RejectReason::FeeTooLow(format!(
                    "replacement needs fee rate ≥ {required:.3}, got {:.3}",
                    entry.fee_rate
                )));
            }
            self.remove(&old_id);
            debug!(old = %old_id, new = %txid, "replaced by fee");
        }

        // Capacity pressure: the lowest fee rate goes first, and a newcomer
        // that would itself be the lowest is refused outright.
        if self.entries.len() >= self.config.capacity {
            let lowest = self
                .entries
                .values()
                .min_by(|a, b| a.fee_rate.partial_cmp(&b.fee_rate).unwrap_or(std::cmp::Ordering::Equal))
                .map(|e| (e.txid, e.fee_rate));
            match lowest {
                Some((_, rate)) if entry.fee_rate <= rate => {
                    return Err(RejectReason::MempoolFull);
                }
                Some((victim, _)) => {
                    self.remove(&victim);
                    Metrics::incr(&self.metrics.mempool_evicted_total);
                    self.events.publish(CoreEvent::MempoolEvicted {
                        reason: "capacity",
                        count: 1,
                    });
                }
                None => {}
            }
        }

        self.insert(entry);
        Metrics::incr(&self.metrics.txs_admitted_total);
        Metrics::set(&self.metrics.mempool_size, self.entries.len() as u64);
        Ok(txid)
    }

    /// Sender signature, sender/sponsor key-to-address binding, and network
    /// prefix checks.
    fn verify_authorship(&self, tx: &Transaction) -> Result<(), RejectReason> {
        for addr in [&tx.sender, &tx.recipient] {
            if addr.network() != Some(self.config.network) {
                return Err(RejectReason::BadAddress(format!(
                    "{addr} is not a {:?} address",
                    self.config.network
                )));
            }
        }
        if !key_matches_address(&tx.public_key, &tx.sender, self.config.network) {
            return Err(RejectReason::BadAddress(
                "public key does not derive the sender address".into(),
            ));
        }
        let signing_bytes = xai_codec::tx_signing_bytes(tx)?;
        verify_signature(&tx.public_key, &signing_bytes, &tx.signature).map_err(|e| {
            Metrics::incr(&self.metrics.invalid_signature_total);
            e
        })?;
        if let Some(sponsor) = &tx.sponsor {
            if !key_matches_address(&sponsor.public_key, &sponsor.payer, self.config.network) {
                return Err(RejectReason::BadAddress(
                    "sponsor key does not derive the payer address".into(),
                ));
            }
            verify_signature(&sponsor.public_key, &signing_bytes, &sponsor.signature).map_err(
                |e| {
                    Metrics::incr(&self.metrics.invalid_signature_total);
                    e
                },
            )?;
        }
        Ok(())
    }

    /// Would the sender (and fee payer) still be solvent with every already
    /// pending spend plus this transaction applied?
    fn project_balances(
        &self,
        tx: &Transaction,
        state: &impl AccountView,
        exclude: Option<Hash32>,
    ) -> Result<(), RejectReason> {
        let pending_spend_of = |addr: &Address| -> u128 {
            self.entries
                .values()
                .filter(|e| Some(e.txid) != exclude)
                .map(|e| {
                    let mut spend = 0u128;
                    if &e.tx.sender == addr {
                        spend += e.tx.amount;
                    }
                    if e.tx.fee_payer() == addr {
                        spend += e.tx.fee;
                    }
                    spend
                })
                .sum()
        };

        let sender_need = pending_spend_of(&tx.sender)
            + tx.amount
            + if tx.fee_payer() == &tx.sender { tx.fee } else { 0 };
        let sender_have = state.balance(&tx.sender);
        if sender_have < sender_need {
            return Err(RejectReason::InsufficientBalance {
                need: sender_need,
                have: sender_have,
            });
        }

        let payer = tx.fee_payer();
        if payer != &tx.sender {
            let payer_need = pending_spend_of(payer) + tx.fee;
            let payer_have = state.balance(payer);
            if payer_have < payer_need {
                return Err(RejectReason::InsufficientBalance {
                    need: payer_need,
                    have: payer_have,
                });
            }
        }
        Ok(())
    }

    // ── Template building ────────────────────────────────────────────────────

    /// Select transactions for a block template: fee rate descending with
    /// arrival/txid tie-breaks, never violating per-sender nonce continuity
    /// or the byte budget. Skipped-over entries get another chance once their
    /// predecessor is included, so a high-fee successor cannot strand.
    pub fn build_template(
        &self,
        state: &impl AccountView,
        max_bytes: usize,
        limit: usize,
    ) -> Vec<Transaction> {
        let mut ordered: Vec<&MempoolEntry> = self.entries.values().collect();
        ordered.sort_by(|a, b| a.template_cmp(b));

        let mut selected: Vec<Transaction> = Vec::new();
        let mut used_bytes = 0usize;
        let mut next_nonce: HashMap<&Address, Nonce> = HashMap::new();
        let mut included = vec![false; ordered.len()];

        loop {
            let mut progressed = false;
            for (i, entry) in ordered.iter().enumerate() {
                if included[i] || selected.len() >= limit {
                    continue;
                }
                if used_bytes + entry.size_bytes > max_bytes {
                    continue;
                }
                let expected = *next_nonce
                    .entry(&entry.tx.sender)
                    .or_insert_with(|| state.nonce(&entry.tx.sender) + 1);
                if entry.tx.nonce != expected {
                    continue;
                }
                included[i] = true;
                used_bytes += entry.size_bytes;
                next_nonce.insert(&entry.tx.sender, expected + 1);
                selected.push(entry.tx.clone());
                progressed = true;
            }
            if !progressed || selected.len() >= limit {
                break;
            }
        }
        selected
    }

    /// The first `limit` transactions in template order (collaborator-facing
    /// `mempool_snapshot`).
    pub fn snapshot(&self, limit: usize) -> Vec<Transaction> {
        let mut ordered: Vec<&MempoolEntry> = self.entries.values().collect();
        ordered.sort_by(|a, b| a.template_cmp(b));
        ordered.into_iter().take(limit).map(|e| e.tx.clone()).collect()
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// A block was applied: drop its transactions, then drop any pending
    /// entry whose nonce chain no longer connects to the confirmed nonce.
    pub fn on_block_applied(&mut self, block: &Block, state: &impl AccountView) {
        let mut dropped = 0usize;
        for tx in &block.transactions {
            if let Ok(txid) = xai_codec::txid(tx) {
                if self.remove(&txid) {
                    dropped += 1;
                }
            }
        }

        let senders: Vec<Address> = self.by_sender.keys().cloned().collect();
        let mut broken = 0usize;
        for sender in senders {
            let confirmed = state.nonce(&sender);
            let Some(nonces) = self.by_sender.get(&sender) else {
                continue;
            };
            let mut expected = confirmed + 1;
            let mut stale: Vec<Hash32> = Vec::new();
            for (&nonce, &txid) in nonces.iter() {
                if nonce == expected {
                    expected += 1;
                } else {
                    stale.push(txid);
                }
            }
            for txid in stale {
                self.remove(&txid);
                broken += 1;
            }
        }

        if dropped + broken > 0 {
            info!(included = dropped, broken, "mempool pruned after block");
            Metrics::add(&self.metrics.mempool_evicted_total, broken as u64);
            if broken > 0 {
                self.events.publish(CoreEvent::MempoolEvicted {
                    reason: "stale-nonce",
                    count: broken,
                });
            }
        }
        Metrics::set(&self.metrics.mempool_size, self.entries.len() as u64);
    }

    /// Drop entries older than the configured TTL.
    pub fn purge_expired(&mut self, now: Timestamp) {
        let expired: Vec<Hash32> = self
            .entries
            .values()
            .filter(|e| now - e.arrival_time > self.config.ttl_secs)
            .map(|e| e.txid)
            .collect();
        if expired.is_empty() {
            return;
        }
        for txid in &expired {
            self.remove(txid);
        }
        Metrics::add(&self.metrics.mempool_evicted_total, expired.len() as u64);
        Metrics::set(&self.metrics.mempool_size, self.entries.len() as u64);
        self.events.publish(CoreEvent::MempoolEvicted {
            reason: "expired",
            count: expired.len(),
        });
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn insert(&mut self, entry: MempoolEntry) {
        self.by_sender
            .entry(entry.tx.sender.clone())
            .or_default()
            .insert(entry.tx.nonce, entry.txid);
        self.entries.insert(entry.txid, entry);
    }

    fn remove(&mut self, txid: &Hash32) -> bool {
        let Some(entry) = self.entries.remove(txid) else {
            return false;
        };
        if let Some(nonces) = self.by_sender.get_mut(&entry.tx.sender) {
            nonces.remove(&entry.tx.nonce);
            if nonces.is_empty() {
                self.by_sender.remove(&entry.tx.sender);
            }
        }
        true
    }
}

/// Does `pubkey_hex` derive `addr` (ignoring any checksum suffix)?
fn key_matches_address(pubkey_hex: &str, addr: &Address, network: Network) -> bool {
    let Ok(bytes) = hex::decode(pubkey_hex) else {
        return false;
    };
    let derived = derive_address(&bytes, network);
    match (derived.body(), addr.body()) {
        (Some(d), Some(a)) => a.starts_with(d),
        _ => false,
    }
}
