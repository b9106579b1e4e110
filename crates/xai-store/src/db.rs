use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use xai_core::block::{Block, BlockHeader};
use xai_core::constants::{STORAGE_RETRY_BASE_MS, STORAGE_RETRY_MAX};
use xai_core::types::{Address, Hash32, Timestamp};
use xai_core::RejectReason;
use xai_state::{AccountRecord, BlockDiff, UtxoState};

/// How to look a block up.
#[derive(Clone, Copy, Debug)]
pub enum BlockLocator {
    ByIndex(u64),
    ByHash(Hash32),
}

/// The current chain tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TipInfo {
    pub index: u64,
    pub hash: Hash32,
    pub timestamp: Timestamp,
}

/// Everything one block append persists atomically.
pub struct AppendBatch<'a> {
    pub block: &'a Block,
    pub block_hash: Hash32,
    pub txids: &'a [Hash32],
    pub diff: &'a BlockDiff,
    /// Post-block records for every account the block touched.
    pub updated_accounts: Vec<(Address, AccountRecord)>,
    pub supply_after: u128,
}

/// Persistent chain storage backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   blocks       — u64 BE index  → JSON(Block) (wire-shaped, optional fields)
///   headers      — u64 BE index  → bincode(BlockHeader)
///   hash_index   — hash bytes    → u64 BE index
///   block_txids  — u64 BE index  → bincode(Vec<Hash32>)
///   txids        — txid bytes    → u64 BE index (I6: chain-wide uniqueness)
///   accounts     — address utf8  → bincode(AccountRecord)
///   diffs        — u64 BE index  → bincode(BlockDiff) (reverse diffs for rewind)
///   meta         — "tip" → u64 BE, "supply" → u128 BE
///
/// The tip pointer is written last and flushed: records beyond the tip are
/// uncommitted debris from a crash and are truncated at open. The store never
/// reports partial success — any IO failure surfaces as `StorageError`.
pub struct ChainStore {
    db: sled::Db,
    blocks: sled::Tree,
    headers: sled::Tree,
    hash_index: sled::Tree,
    block_txids: sled::Tree,
    txids: sled::Tree,
    accounts: sled::Tree,
    diffs: sled::Tree,
    meta: sled::Tree,
}

fn storage<E: std::fmt::Display>(e: E) -> RejectReason {
    RejectReason::StorageError(e.to_string())
}

fn codec<E: std::fmt::Display>(e: E) -> RejectReason {
    RejectReason::Serialization(e.to_string())
}

impl ChainStore {
    /// Open or create the store at `path`, truncating any records a crash
    /// left beyond the committed tip.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RejectReason> {
        let db = sled::open(path).map_err(storage)?;
        let store = Self {
            blocks: db.open_tree("blocks").map_err(storage)?,
            headers: db.open_tree("headers").map_err(storage)?,
            hash_index: db.open_tree("hash_index").map_err(storage)?,
            block_txids: db.open_tree("block_txids").map_err(storage)?,
            txids: db.open_tree("txids").map_err(storage)?,
            accounts: db.open_tree("accounts").map_err(storage)?,
            diffs: db.open_tree("diffs").map_err(storage)?,
            meta: db.open_tree("meta").map_err(storage)?,
            db,
        };
        store.truncate_uncommitted()?;
        Ok(store)
    }

    /// Remove records past the committed tip (crash debris from an
    /// interrupted append). Within a batch the reverse diff is written
    /// before any account mutation, so a stale block either has no account
    /// effects yet or a diff that undoes them; restoring the diff is correct
    /// in both cases (restoring untouched accounts to their prior values is
    /// a no-op).
    fn truncate_uncommitted(&self) -> Result<(), RejectReason> {
        let committed = self.tip_index()?;
        let mut stale: Vec<u64> = Vec::new();
        for item in self.blocks.iter() {
            let (key, _) = item.map_err(storage)?;
            let index = index_from_key(&key)?;
            if committed.map_or(true, |tip| index > tip) {
                stale.push(index);
            }
        }
        stale.sort_unstable();
        for &index in stale.iter().rev() {
            let key = index.to_be_bytes();
            if let Some(bytes) = self.diffs.get(key).map_err(storage)? {
                let diff: BlockDiff = bincode::deserialize(&bytes).map_err(codec)?;
                for (addr, prior) in &diff.prior_accounts {
                    match prior {
                        Some(record) => {
                            self.accounts
                                .insert(
                                    addr.as_str().as_bytes(),
                                    bincode::serialize(record).map_err(codec)?,
                                )
                                .map_err(storage)?;
                        }
                        None => {
                            self.accounts
                                .remove(addr.as_str().as_bytes())
                                .map_err(storage)?;
                        }
                    }
                }
                self.meta
                    .insert("supply", diff.prior_supply.to_be_bytes().to_vec())
                    .map_err(storage)?;
            }
            if let Some(bytes) = self.headers.get(key).map_err(storage)? {
                let header: BlockHeader = bincode::deserialize(&bytes).map_err(codec)?;
                let hash = xai_codec::block_hash(&header)?;
                self.hash_index.remove(hash.as_bytes()).map_err(storage)?;
            }
            if let Some(list) = self.block_txids.get(key).map_err(storage)? {
                let ids: Vec<Hash32> = bincode::deserialize(&list).map_err(codec)?;
                for id in ids {
                    self.txids.remove(id.as_bytes()).map_err(storage)?;
                }
            }
            self.blocks.remove(key).map_err(storage)?;
            self.headers.remove(key).map_err(storage)?;
            self.block_txids.remove(key).map_err(storage)?;
            self.diffs.remove(key).map_err(storage)?;
        }
        if !stale.is_empty() {
            warn!(removed = stale.len(), "truncated uncommitted records beyond tip");
            self.flush()?;
        }
        Ok(())
    }

    // ── Append ───────────────────────────────────────────────────────────────

    /// Persist one block: body, header, indexes, txids, reverse diff, account
    /// updates; then move the tip pointer and flush. The tip write is the
    /// commit point.
    pub fn append(&self, batch: AppendBatch<'_>) -> Result<(), RejectReason> {
        let expected = match self.tip_index()? {
            Some(tip) => tip + 1,
            None => 0,
        };
        if batch.block.header.index != expected {
            return Err(RejectReason::StorageError(format!(
                "append out of order: block index {} but next is {expected}",
                batch.block.header.index
            )));
        }

        let key = batch.block.header.index.to_be_bytes();
        // Block bodies hold wire-shaped transactions (optional fields are
        // omitted when absent), so they are stored as JSON; the fixed-shape
        // records below stay on bincode.
        self.blocks
            .insert(key, serde_json::to_vec(batch.block).map_err(codec)?)
            .map_err(storage)?;
        self.headers
            .insert(key, bincode::serialize(&batch.block.header).map_err(codec)?)
            .map_err(storage)?;
        self.hash_index
            .insert(batch.block_hash.as_bytes(), key.to_vec())
            .map_err(storage)?;
        self.block_txids
            .insert(key, bincode::serialize(&batch.txids.to_vec()).map_err(codec)?)
            .map_err(storage)?;
        for txid in batch.txids {
            self.txids.insert(txid.as_bytes(), key.to_vec()).map_err(storage)?;
        }
        self.diffs
            .insert(key, bincode::serialize(batch.diff).map_err(codec)?)
            .map_err(storage)?;
        for (addr, record) in &batch.updated_accounts {
            self.accounts
                .insert(
                    addr.as_str().as_bytes(),
                    bincode::serialize(record).map_err(codec)?,
                )
                .map_err(storage)?;
        }
        self.meta
            .insert("supply", batch.supply_after.to_be_bytes().to_vec())
            .map_err(storage)?;
        self.meta.insert("tip", key.to_vec()).map_err(storage)?;
        self.flush()?;
        debug!(index = batch.block.header.index, hash = %batch.block_hash, "block appended");
        Ok(())
    }

    // ── Rewind ───────────────────────────────────────────────────────────────

    /// Truncate the chain back to `height`, restoring accounts and supply via
    /// the persisted reverse diffs. After return, `tip().index == height`.
    ///
    /// The tip pointer moves first and is flushed: should the process die
    /// mid-rewind, everything beyond the new tip is stale debris that
    /// [`ChainStore::open`] finishes unwinding through the same diffs.
    pub fn rewind_to(&self, height: u64) -> Result<(), RejectReason> {
        let tip = self
            .tip_index()?
            .ok_or_else(|| RejectReason::StorageError("rewind on empty store".into()))?;
        if height > tip {
            return Err(RejectReason::StorageError(format!(
                "rewind target {height} is beyond tip {tip}"
            )));
        }

        self.meta
            .insert("tip", height.to_be_bytes().to_vec())
            .map_err(storage)?;
        self.flush()?;

        for index in ((height + 1)..=tip).rev() {
            let key = index.to_be_bytes();
            let diff: BlockDiff = self
                .diffs
                .get(key)
                .map_err(storage)?
                .map(|b| bincode::deserialize(&b).map_err(codec))
                .transpose()?
                .ok_or_else(|| {
                    RejectReason::StorageError(format!("missing diff for block {index}"))
                })?;

            for (addr, prior) in &diff.prior_accounts {
                match prior {
                    Some(record) => {
                        self.accounts
                            .insert(
                                addr.as_str().as_bytes(),
                                bincode::serialize(record).map_err(codec)?,
                            )
                            .map_err(storage)?;
                    }
                    None => {
                        self.accounts
                            .remove(addr.as_str().as_bytes())
                            .map_err(storage)?;
                    }
                }
            }
            self.meta
                .insert("supply", diff.prior_supply.to_be_bytes().to_vec())
                .map_err(storage)?;

            if let Some(list) = self.block_txids.get(key).map_err(storage)? {
                let ids: Vec<Hash32> = bincode::deserialize(&list).map_err(codec)?;
                for id in ids {
                    self.txids.remove(id.as_bytes()).map_err(storage)?;
                }
            }
            self.hash_index
                .remove(diff.block_hash.as_bytes())
                .map_err(storage)?;
            self.blocks.remove(key).map_err(storage)?;
            self.headers.remove(key).map_err(storage)?;
            self.block_txids.remove(key).map_err(storage)?;
            self.diffs.remove(key).map_err(storage)?;
        }

        self.flush()?;
        info!(from = tip, to = height, "chain rewound");
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn tip(&self) -> Result<Option<TipInfo>, RejectReason> {
        let Some(index) = self.tip_index()? else {
            return Ok(None);
        };
        let header = self.header(index)?.ok_or_else(|| {
            RejectReason::StorageError(format!("tip {index} has no header"))
        })?;
        Ok(Some(TipInfo {
            index,
            hash: xai_codec::block_hash(&header)?,
            timestamp: header.timestamp,
        }))
    }

    fn tip_index(&self) -> Result<Option<u64>, RejectReason> {
        Ok(self
            .meta
            .get("tip")
            .map_err(storage)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b);
                u64::from_be_bytes(arr)
            }))
    }

    pub fn header(&self, index: u64) -> Result<Option<BlockHeader>, RejectReason> {
        self.headers
            .get(index.to_be_bytes())
            .map_err(storage)?
            .map(|b| bincode::deserialize(&b).map_err(codec))
            .transpose()
    }

    pub fn read_block(&self, locator: BlockLocator) -> Result<Option<Block>, RejectReason> {
        let index = match locator {
            BlockLocator::ByIndex(i) => i,
            BlockLocator::ByHash(h) => match self.index_of_hash(&h)? {
                Some(i) => i,
                None => return Ok(None),
            },
        };
        self.blocks
            .get(index.to_be_bytes())
            .map_err(storage)?
            .map(|b| serde_json::from_slice(&b).map_err(codec))
            .transpose()
    }

    pub fn index_of_hash(&self, hash: &Hash32) -> Result<Option<u64>, RejectReason> {
        Ok(self
            .hash_index
            .get(hash.as_bytes())
            .map_err(storage)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b);
                u64::from_be_bytes(arr)
            }))
    }

    /// Headers `from..=to`, ascending. Silently clipped to what exists.
    pub fn iterate_headers(&self, from: u64, to: u64) -> Result<Vec<BlockHeader>, RejectReason> {
        let mut out = Vec::new();
        for index in from..=to {
            match self.header(index)? {
                Some(h) => out.push(h),
                None => break,
            }
        }
        Ok(out)
    }

    /// The last `n` headers ending at the tip, ascending. Median-time checks
    /// feed on this.
    pub fn last_headers(&self, n: usize) -> Result<Vec<BlockHeader>, RejectReason> {
        let Some(tip) = self.tip_index()? else {
            return Ok(Vec::new());
        };
        let from = tip.saturating_sub(n.saturating_sub(1) as u64);
        self.iterate_headers(from, tip)
    }

    pub fn contains_txid(&self, txid: &Hash32) -> Result<bool, RejectReason> {
        self.txids.contains_key(txid.as_bytes()).map_err(storage)
    }

    pub fn account(&self, addr: &Address) -> Result<Option<AccountRecord>, RejectReason> {
        self.accounts
            .get(addr.as_str().as_bytes())
            .map_err(storage)?
            .map(|b| bincode::deserialize(&b).map_err(codec))
            .transpose()
    }

    /// All persisted account records (state boot path).
    pub fn accounts(&self) -> Result<Vec<(Address, AccountRecord)>, RejectReason> {
        let mut out = Vec::new();
        for item in self.accounts.iter() {
            let (key, value) = item.map_err(storage)?;
            let addr = Address::from_raw(
                String::from_utf8(key.to_vec())
                    .map_err(|e| RejectReason::Serialization(format!("bad account key: {e}")))?,
            );
            out.push((addr, bincode::deserialize(&value).map_err(codec)?));
        }
        Ok(out)
    }

    pub fn supply(&self) -> Result<u128, RejectReason> {
        Ok(self
            .meta
            .get("supply")
            .map_err(storage)?
            .map(|b| {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&b);
                u128::from_be_bytes(arr)
            })
            .unwrap_or(0))
    }

    /// Snapshot digest at the tip — the equality check peers compare.
    pub fn snapshot_hash(&self) -> Result<Hash32, RejectReason> {
        let tip = self
            .tip()?
            .ok_or_else(|| RejectReason::StorageError("snapshot of empty store".into()))?;
        let state = UtxoState::from_accounts(self.accounts()?);
        state.snapshot_hash(tip.index, tip.hash)
    }

    /// Flush to disk, retrying transient failures with backoff. Persistent
    /// failure is surfaced for the caller to treat as fatal.
    pub fn flush(&self) -> Result<(), RejectReason> {
        let mut delay = Duration::from_millis(STORAGE_RETRY_BASE_MS);
        let mut last_err = None;
        for attempt in 0..=STORAGE_RETRY_MAX {
            match self.db.flush() {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "store flush failed");
                    last_err = Some(e);
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
        Err(storage(last_err.expect("at least one flush attempt failed")))
    }
}

fn index_from_key(key: &[u8]) -> Result<u64, RejectReason> {
    if key.len() != 8 {
        return Err(RejectReason::StorageError(format!(
            "malformed index key of {} bytes",
            key.len()
        )));
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(key);
    Ok(u64::from_be_bytes(arr))
}
