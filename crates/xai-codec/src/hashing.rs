use xai_core::block::{Block, BlockHeader};
use xai_core::transaction::Transaction;
use xai_core::types::Hash32;
use xai_core::RejectReason;

use crate::canon::{sha256_canonical, to_canonical_json};
use crate::merkle::merkle_root;

/// Transaction id: SHA-256 of the canonical JSON of the transaction with all
/// signatures removed.
pub fn txid(tx: &Transaction) -> Result<Hash32, RejectReason> {
    sha256_canonical(&tx.signing_view())
}

/// The exact bytes a sender (or sponsor) signs. Identical to the txid
/// preimage; kept separate so callers don't conflate "bytes to sign" with
/// "identifier".
pub fn tx_signing_bytes(tx: &Transaction) -> Result<Vec<u8>, RejectReason> {
    to_canonical_json(&tx.signing_view())
}

/// Block hash: SHA-256 of the canonical JSON of the seven header fields.
/// PoW is judged against this digest.
pub fn block_hash(header: &BlockHeader) -> Result<Hash32, RejectReason> {
    sha256_canonical(header)
}

/// Recompute the merkle root a block's header must commit to.
pub fn block_merkle_root(block: &Block) -> Result<Hash32, RejectReason> {
    let mut leaves = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        leaves.push(txid(tx)?);
    }
    Ok(merkle_root(&leaves))
}
