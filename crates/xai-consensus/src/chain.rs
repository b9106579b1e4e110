use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use xai_core::block::{Block, BlockHeader};
use xai_core::config::CoreConfig;
use xai_core::constants::MAX_PROMOTION_DEPTH;
use xai_core::transaction::Transaction;
use xai_core::types::{Hash32, Timestamp};
use xai_core::RejectReason;
use xai_events::{CoreEvent, EventRouter, Metrics};
use xai_finality::{FinalityCertificate, FinalityVoter, Vote};
use xai_mempool::{Mempool, MempoolConfig};
use xai_state::{AccountView, BlockDiff, UtxoState};
use xai_store::{AppendBatch, BlockLocator, ChainStore, TipInfo, Wal};

use crate::block_validator::{timestamp_window, BlockValidator};
use crate::difficulty::next_difficulty;
use crate::orphan::OrphanPool;

/// Where the tip state machine currently is. Mutations only happen on the
/// single writer, so this is observability, not synchronization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainPhase {
    Idle,
    Applying,
    Reorganizing,
    Recovering,
}

/// What `add_block` did with a candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Extended the tip.
    Applied { hash: Hash32, height: u64 },
    /// Block (or its hash) was already known; nothing to do.
    AlreadyKnown,
    /// Stored on a side branch that does not (yet) out-work the main chain.
    SideChain { hash: Hash32 },
    /// Triggered a completed reorganization onto the block's branch.
    Reorganized {
        from: Hash32,
        to: Hash32,
        depth: u64,
    },
    /// Parent unknown; parked in the orphan pool. Callers should request
    /// the missing ancestry from peers.
    Orphaned { missing_parent: Hash32 },
}

/// The reorg engine: owns the live state, the mempool, the fork set, the
/// orphan pool, and the finality voter, and drives the store through the
/// write-ahead log. Exactly one of these exists per node, behind the
/// scheduler's writer loop.
pub struct ChainValidator {
    config: CoreConfig,
    store: Arc<ChainStore>,
    wal: Wal,
    state: UtxoState,
    mempool: Mempool,
    orphans: OrphanPool,
    /// Side-branch blocks by hash. Pruned once they fall behind finality.
    forks: HashMap<Hash32, Block>,
    validator: BlockValidator,
    finality: FinalityVoter,
    events: EventRouter,
    metrics: Arc<Metrics>,
    phase: ChainPhase,
}

impl ChainValidator {
    /// Build the engine over an already-recovered store (run
    /// [`ChainValidator::recover_wal`] first) and hydrate state from it.
    pub fn new(
        config: CoreConfig,
        store: Arc<ChainStore>,
        wal: Wal,
        finality: FinalityVoter,
        events: EventRouter,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RejectReason> {
        let state = UtxoState::from_accounts(store.accounts()?);
        let mempool = Mempool::new(
            MempoolConfig::from_core(&config),
            events.clone(),
            Arc::clone(&metrics),
        );
        let orphans = OrphanPool::new(
            config.orphan_capacity as usize,
            config.orphan_ttl_sec as i64,
        );
        let validator = BlockValidator::new(config.clone());
        Ok(Self {
            config,
            store,
            wal,
            state,
            mempool,
            orphans,
            forks: HashMap::new(),
            validator,
            finality,
            events,
            metrics,
            phase: ChainPhase::Idle,
        })
    }

    /// Boot-time WAL recovery, run before anything serves P2P: a pending
    /// `begin` means the node died mid-reorg, so the store is rewound to the
    /// journaled fork point and the record closed. Idempotent — running it
    /// again finds nothing to do.
    pub fn recover_wal(store: &ChainStore, wal: &Wal, now: Timestamp) -> Result<(), RejectReason> {
        let Some(pending) = wal.recover()? else {
            return Ok(());
        };
        let tip = store
            .tip()?
            .ok_or_else(|| RejectReason::WalCorrupt("pending reorg over empty store".into()))?;
        if pending.fork_height > tip.index {
            return Err(RejectReason::WalCorrupt(format!(
                "fork height {} beyond tip {}",
                pending.fork_height, tip.index
            )));
        }
        info!(
            fork_height = pending.fork_height,
            tip = tip.index,
            "recovering interrupted reorg"
        );
        store.rewind_to(pending.fork_height)?;
        wal.rollback(now)?;
        wal.clear()?;
        Ok(())
    }

    /// Write the fixed genesis block into an empty store.
    pub fn init_genesis(&mut self) -> Result<Hash32, RejectReason> {
        if let Some(tip) = self.store.tip()? {
            return Err(RejectReason::StorageError(format!(
                "genesis on non-empty store (tip {})",
                tip.index
            )));
        }
        let genesis = Block::genesis(self.config.network);
        let hash = xai_codec::block_hash(&genesis.header)?;
        let diff = self.state.apply_block(&genesis, hash)?;
        self.store.append(AppendBatch {
            block: &genesis,
            block_hash: hash,
            txids: &[],
            diff: &diff,
            updated_accounts: Vec::new(),
            supply_after: self.state.supply(),
        })?;
        info!(hash = %hash, "genesis block written");
        Ok(hash)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn phase(&self) -> ChainPhase {
        self.phase
    }

    pub fn tip(&self) -> Result<Option<TipInfo>, RejectReason> {
        self.store.tip()
    }

    pub fn get_block(&self, locator: BlockLocator) -> Result<Option<Block>, RejectReason> {
        self.store.read_block(locator)
    }

    pub fn headers_range(&self, from: u64, to: u64) -> Result<Vec<BlockHeader>, RejectReason> {
        self.store.iterate_headers(from, to)
    }

    pub fn balance(&self, addr: &xai_core::types::Address) -> u128 {
        self.state.balance(addr)
    }

    /// Copy-on-read snapshot for readers that must not block the writer.
    pub fn state_snapshot(&self) -> UtxoState {
        self.state.clone()
    }

    pub fn snapshot_hash(&self) -> Result<Hash32, RejectReason> {
        let tip = self
            .store
            .tip()?
            .ok_or_else(|| RejectReason::StorageError("snapshot of empty chain".into()))?;
        self.state.snapshot_hash(tip.index, tip.hash)
    }

    pub fn mempool_snapshot(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.snapshot(limit)
    }

    /// Fee-ordered block template within the configured block size budget.
    pub fn build_template(&self, limit: usize) -> Vec<Transaction> {
        self.mempool
            .build_template(&self.state, self.config.max_block_bytes as usize, limit)
    }

    pub fn finality(&self) -> &FinalityVoter {
        &self.finality
    }

    /// Header range worth requesting when `orphan_index` arrived without
    /// lineage: everything between our tip (bounded by the reorg horizon)
    /// and the orphan.
    pub fn lineage_request(&self, orphan_index: u64) -> Result<(u64, u64), RejectReason> {
        let tip = self.store.tip()?.map(|t| t.index).unwrap_or(0);
        let from = tip.saturating_sub(self.config.finality_depth as u64);
        Ok((from, orphan_index))
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Mempool admission against the latest applied state.
    pub fn submit_tx(
        &mut self,
        tx: Transaction,
        now: Timestamp,
    ) -> Result<Hash32, RejectReason> {
        self.mempool.admit(tx, &self.state, now).map_err(|e| {
            Metrics::incr(&self.metrics.txs_rejected_total);
            e
        })
    }

    /// Route an incoming finality vote; certificates pin history (P7).
    pub fn submit_vote(
        &mut self,
        vote: Vote,
        now: Timestamp,
    ) -> Result<Option<FinalityCertificate>, RejectReason> {
        self.finality.submit_vote(vote, now)
    }

    /// Periodic maintenance: expire mempool entries and orphans, drop fork
    /// blocks that can no longer win.
    pub fn run_maintenance(&mut self, now: Timestamp) -> Result<(), RejectReason> {
        self.mempool.purge_expired(now);
        let pruned = self.orphans.prune_expired(now);
        if pruned > 0 {
            debug!(pruned, "orphans expired");
        }
        if let Some(tip) = self.store.tip()? {
            let horizon = tip.index.saturating_sub(self.config.finality_depth as u64);
            self.forks.retain(|_, b| b.header.index > horizon);
        }
        self.finality.prune_tallies();
        Ok(())
    }

    /// The single entry point for candidate blocks, local or from peers.
    pub fn add_block(&mut self, block: Block, now: Timestamp) -> Result<BlockOutcome, RejectReason> {
        let outcome = self.add_block_inner(block, now)?;
        if let BlockOutcome::Applied { hash, .. } | BlockOutcome::Reorganized { to: hash, .. } =
            outcome
        {
            self.promote_orphans(hash, now);
        }
        Ok(outcome)
    }

    fn add_block_inner(
        &mut self,
        block: Block,
        now: Timestamp,
    ) -> Result<BlockOutcome, RejectReason> {
        let hash = xai_codec::block_hash(&block.header)?;
        if self.store.index_of_hash(&hash)?.is_some() || self.forks.contains_key(&hash) {
            return Ok(BlockOutcome::AlreadyKnown);
        }
        let tip = self
            .store
            .tip()?
            .ok_or_else(|| RejectReason::StorageError("add_block before genesis".into()))?;

        if block.header.previous_hash == tip.hash {
            self.phase = ChainPhase::Applying;
            let result = self.extend_tip(&block, hash, &tip, now);
            self.phase = ChainPhase::Idle;
            return match result {
                Ok(()) => Ok(BlockOutcome::Applied {
                    hash,
                    height: block.header.index,
                }),
                Err(reason) => {
                    Metrics::incr(&self.metrics.blocks_rejected_total);
                    self.events.publish(CoreEvent::BlockRejected {
                        hash,
                        reason: reason.clone(),
                    });
                    Err(reason)
                }
            };
        }

        let parent = block.header.previous_hash;
        let parent_known =
            self.store.index_of_hash(&parent)?.is_some() || self.forks.contains_key(&parent);
        if parent_known {
            self.forks.insert(hash, block);
            return self.maybe_reorg(hash, &tip, now);
        }

        debug!(block = %hash, parent = %parent, "parent unknown, parked as orphan");
        self.orphans.insert(block, hash, now);
        Ok(BlockOutcome::Orphaned {
            missing_parent: parent,
        })
    }

    /// Fast path: the block extends the current tip.
    fn extend_tip(
        &mut self,
        block: &Block,
        hash: Hash32,
        tip: &TipInfo,
        now: Timestamp,
    ) -> Result<(), RejectReason> {
        let parent = self.store.header(tip.index)?.ok_or_else(|| {
            RejectReason::StorageError(format!("tip header {} missing", tip.index))
        })?;
        let recent = timestamp_window(&self.store.last_headers(
            xai_core::constants::MEDIAN_TIME_WINDOW,
        )?);
        let expected = next_difficulty(&self.config, parent.index + 1, &parent, |h| {
            self.store.header(h)
        })?;

        self.validator.validate(
            block,
            &parent,
            &recent,
            expected,
            now,
            |id| self.store.contains_txid(id),
            Some(self.finality.validator_set()),
        )?;

        let diff = self.state.apply_block(block, hash)?;
        let txids: Vec<Hash32> = block
            .transactions
            .iter()
            .map(xai_codec::txid)
            .collect::<Result<_, _>>()?;

        if let Err(e) = self.store.append(AppendBatch {
            block,
            block_hash: hash,
            txids: &txids,
            diff: &diff,
            updated_accounts: self.updated_records(&diff),
            supply_after: self.state.supply(),
        }) {
            // Storage refused after the in-memory apply: put memory back and
            // surface the IO fault (fatal at the node layer).
            self.state.restore_diff(&diff);
            return Err(e);
        }

        self.mempool.on_block_applied(block, &self.state);
        Metrics::incr(&self.metrics.blocks_applied_total);
        self.events.publish(CoreEvent::BlockApplied {
            hash,
            height: block.header.index,
        });
        info!(height = block.header.index, hash = %hash, txs = block.transactions.len(), "block applied");
        Ok(())
    }

    /// Post-block records for every account a diff touched.
    fn updated_records(&self, diff: &BlockDiff) -> Vec<(xai_core::types::Address, xai_state::AccountRecord)> {
        diff.prior_accounts
            .iter()
            .map(|(addr, _)| {
                (
                    addr.clone(),
                    self.state.account(addr).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Apply children that were waiting in the orphan pool, depth-first with
    /// an explicit stack and a promotion cap so a hostile orphan chain can
    /// neither blow the call stack nor monopolize the writer.
    fn promote_orphans(&mut self, applied: Hash32, now: Timestamp) {
        let mut stack = vec![applied];
        let mut promoted = 0usize;
        while let Some(parent) = stack.pop() {
            if promoted >= MAX_PROMOTION_DEPTH {
                warn!(promoted, "orphan promotion limit reached");
                break;
            }
            for (child_hash, child) in self.orphans.take_children(&parent) {
                promoted += 1;
                match self.add_block_inner(child, now) {
                    Ok(BlockOutcome::Applied { hash, .. })
                    | Ok(BlockOutcome::Reorganized { to: hash, .. }) => stack.push(hash),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(block = %child_hash, error = %e, "orphan promotion rejected");
                    }
                }
            }
        }
    }

    // ── Reorg ────────────────────────────────────────────────────────────────

    /// A fork-set block arrived; reorganize if its branch now carries
    /// strictly more cumulative work (ties keep the first-seen tip).
    fn maybe_reorg(
        &mut self,
        candidate: Hash32,
        tip: &TipInfo,
        now: Timestamp,
    ) -> Result<BlockOutcome, RejectReason> {
        // Walk the branch back to the main chain.
        let mut branch: Vec<Block> = Vec::new();
        let mut cursor = candidate;
        let fork_height = loop {
            if let Some(index) = self.store.index_of_hash(&cursor)? {
                break index;
            }
            let Some(block) = self.forks.get(&cursor) else {
                // Lineage dead-ends inside the fork set; wait for ancestors.
                return Ok(BlockOutcome::SideChain { hash: candidate });
            };
            branch.push(block.clone());
            cursor = block.header.previous_hash;
            if branch.len() > self.config.finality_depth as usize {
                return Err(RejectReason::ForkTooDeep {
                    depth: branch.len() as u64,
                    max: self.config.finality_depth as u64,
                });
            }
        };
        branch.reverse();

        let old_work: u128 = self
            .store
            .iterate_headers(fork_height + 1, tip.index)?
            .iter()
            .map(BlockHeader::work)
            .fold(0u128, u128::saturating_add);
        let new_work: u128 = branch
            .iter()
            .map(|b| b.header.work())
            .fold(0u128, u128::saturating_add);
        if new_work <= old_work {
            debug!(candidate = %candidate, %new_work, %old_work, "side chain does not out-work tip");
            return Ok(BlockOutcome::SideChain { hash: candidate });
        }

        let depth = tip.index - fork_height;
        if depth > self.config.finality_depth as u64 {
            return Err(RejectReason::ForkTooDeep {
                depth,
                max: self.config.finality_depth as u64,
            });
        }
        if let Some(finalized) = self.finality.finalized_height() {
            if fork_height < finalized {
                warn!(fork_height, finalized, "reorg would cross finality");
                return Err(RejectReason::FinalityViolation { finalized });
            }
        }

        self.phase = ChainPhase::Reorganizing;
        let result = self.reorg(branch, fork_height, tip, candidate, now);
        self.phase = ChainPhase::Idle;
        result
    }

    /// The crash-safe reorg protocol: journal, rebuild on a scratch state,
    /// then rewind + append under the journal's protection.
    fn reorg(
        &mut self,
        branch: Vec<Block>,
        fork_height: u64,
        old_tip: &TipInfo,
        new_tip: Hash32,
        now: Timestamp,
    ) -> Result<BlockOutcome, RejectReason> {
        self.wal.begin(old_tip.hash, new_tip, fork_height, now)?;

        // Phase 1 — in memory only. Revert the old side tip-down, then apply
        // and fully validate the new side. Any failure rolls the journal back
        // with the live state untouched.
        let staged = match self.stage_branch(&branch, fork_height, old_tip, now) {
            Ok(staged) => staged,
            Err(reason) => {
                self.wal.rollback(now)?;
                Metrics::incr(&self.metrics.blocks_rejected_total);
                self.events.publish(CoreEvent::BlockRejected {
                    hash: new_tip,
                    reason: reason.clone(),
                });
                return Err(reason);
            }
        };

        // Phase 2 — storage. From here failures leave the journal open so
        // boot recovery rewinds to the fork point.
        self.store.rewind_to(fork_height)?;
        for (block, hash, txids, diff, updated, supply) in &staged.batches {
            self.store.append(AppendBatch {
                block,
                block_hash: *hash,
                txids,
                diff,
                updated_accounts: updated.clone(),
                supply_after: *supply,
            })?;
        }
        self.wal.commit(now)?;

        self.state = staged.state;
        for (_, hash, ..) in &staged.batches {
            self.forks.remove(hash);
        }
        // The abandoned side becomes a known fork: should it grow past us
        // again, the walk back to the fork point still finds every block.
        for block in &staged.old_blocks {
            let hash = xai_codec::block_hash(&block.header)?;
            self.forks.insert(hash, block.clone());
        }
        for block in &branch {
            self.mempool.on_block_applied(block, &self.state);
        }
        // Transactions from the abandoned side compete for admission again.
        let mut returned = 0usize;
        for block in &staged.old_blocks {
            for tx in &block.transactions {
                if !tx.is_coinbase() && self.mempool.admit(tx.clone(), &self.state, now).is_ok() {
                    returned += 1;
                }
            }
        }

        let depth = old_tip.index - fork_height;
        Metrics::incr(&self.metrics.reorgs_total);
        self.events.publish(CoreEvent::ReorgCompleted {
            from: old_tip.hash,
            to: new_tip,
            depth,
        });
        info!(
            from = %old_tip.hash,
            to = %new_tip,
            depth,
            returned_txs = returned,
            "reorganization complete"
        );
        Ok(BlockOutcome::Reorganized {
            from: old_tip.hash,
            to: new_tip,
            depth,
        })
    }

    /// Build the post-reorg state and per-block append batches on a scratch
    /// copy, validating every branch block as it lands.
    fn stage_branch(
        &self,
        branch: &[Block],
        fork_height: u64,
        old_tip: &TipInfo,
        now: Timestamp,
    ) -> Result<StagedReorg, RejectReason> {
        let mut scratch = self.state.clone();

        // Revert the abandoned side, tip down to fork point + 1.
        let mut old_blocks = Vec::new();
        for index in ((fork_height + 1)..=old_tip.index).rev() {
            let block = self
                .store
                .read_block(BlockLocator::ByIndex(index))?
                .ok_or_else(|| {
                    RejectReason::StorageError(format!("missing block {index} during reorg"))
                })?;
            scratch.revert_block(&block)?;
            old_blocks.push(block);
        }
        old_blocks.reverse();

        let mut old_txids: HashSet<Hash32> = HashSet::new();
        for block in &old_blocks {
            for tx in &block.transactions {
                old_txids.insert(xai_codec::txid(tx)?);
            }
        }

        // Apply the new side with full validation.
        let mut parent = self.store.header(fork_height)?.ok_or_else(|| {
            RejectReason::StorageError(format!("missing fork-point header {fork_height}"))
        })?;
        let mut window = self.store.iterate_headers(
            fork_height.saturating_sub(xai_core::constants::MEDIAN_TIME_WINDOW as u64),
            fork_height,
        )?;
        let mut new_txids: HashSet<Hash32> = HashSet::new();
        let mut batches = Vec::with_capacity(branch.len());

        for block in branch {
            let recent = timestamp_window(&window);
            let branch_base = fork_height + 1;
            let expected = next_difficulty(&self.config, parent.index + 1, &parent, |h| {
                if h <= fork_height {
                    self.store.header(h)
                } else {
                    Ok(branch
                        .get((h - branch_base) as usize)
                        .map(|b| b.header.clone()))
                }
            })?;

            let hash = self.validator.validate(
                block,
                &parent,
                &recent,
                expected,
                now,
                |id| {
                    if new_txids.contains(id) {
                        return Ok(true);
                    }
                    Ok(self.store.contains_txid(id)? && !old_txids.contains(id))
                },
                Some(self.finality.validator_set()),
            )?;

            let diff = scratch.apply_block(block, hash)?;
            let txids: Vec<Hash32> = block
                .transactions
                .iter()
                .map(xai_codec::txid)
                .collect::<Result<_, _>>()?;
            new_txids.extend(txids.iter().copied());
            let updated: Vec<_> = diff
                .prior_accounts
                .iter()
                .map(|(addr, _)| {
                    (
                        addr.clone(),
                        scratch.account(addr).cloned().unwrap_or_default(),
                    )
                })
                .collect();
            batches.push((
                block.clone(),
                hash,
                txids,
                diff,
                updated,
                scratch.supply(),
            ));

            window.push(block.header.clone());
            parent = block.header.clone();
        }

        Ok(StagedReorg {
            state: scratch,
            old_blocks,
            batches,
        })
    }
}

/// Everything `stage_branch` prepares before storage is touched.
struct StagedReorg {
    state: UtxoState,
    old_blocks: Vec<Block>,
    batches: Vec<(
        Block,
        Hash32,
        Vec<Hash32>,
        BlockDiff,
        Vec<(xai_core::types::Address, xai_state::AccountRecord)>,
        u128,
    )>,
}
