use xai_core::block::BlockHeader;
use xai_core::config::CoreConfig;
use xai_core::constants::{MAX_DIFFICULTY, MIN_DIFFICULTY, RETARGET_CLAMP_FACTOR};
use xai_core::types::Hash32;
use xai_core::RejectReason;
use xai_crypto::meets_difficulty;

/// The difficulty a block at `next_height` must declare.
///
/// Off retarget boundaries the parent's difficulty carries forward. At exact
/// multiples of the retarget window, the actual timespan of the closed window
/// is compared against `window × block_time_target_sec` and the difficulty
/// stepped up (blocks too fast) or down (too slow), clamped to ±`RETARGET_CLAMP_FACTOR`
/// bit-steps per window and to the protocol bounds.
///
/// `header_at` resolves historical headers; during a reorg it sees the
/// candidate branch where that diverges from the store.
pub fn next_difficulty<F>(
    cfg: &CoreConfig,
    next_height: u64,
    parent: &BlockHeader,
    header_at: F,
) -> Result<u32, RejectReason>
where
    F: Fn(u64) -> Result<Option<BlockHeader>, RejectReason>,
{
    let window = cfg.difficulty_retarget_window as u64;
    if next_height == 0 || next_height % window != 0 {
        return Ok(parent.difficulty);
    }

    let window_start = header_at(next_height - window)?.ok_or_else(|| {
        RejectReason::StorageError(format!(
            "missing header {} for retarget at {next_height}",
            next_height - window
        ))
    })?;

    let actual_span = (parent.timestamp - window_start.timestamp).max(1) as u64;
    let target_span = window * cfg.block_time_target_sec as u64;

    // Leading-zero-bit difficulty is logarithmic: each bit halves the solve
    // rate, so step by the log2 of the speed ratio.
    let mut steps = 0i64;
    if actual_span < target_span {
        let mut ratio = target_span / actual_span.max(1);
        while ratio >= 2 && steps < RETARGET_CLAMP_FACTOR as i64 {
            steps += 1;
            ratio /= 2;
        }
    } else {
        let mut ratio = actual_span / target_span.max(1);
        while ratio >= 2 && steps > -(RETARGET_CLAMP_FACTOR as i64) {
            steps -= 1;
            ratio /= 2;
        }
    }

    let adjusted = (parent.difficulty as i64 + steps)
        .clamp(MIN_DIFFICULTY as i64, MAX_DIFFICULTY as i64) as u32;
    Ok(adjusted)
}

/// Search a nonce meeting the header's declared difficulty. Test and miner
/// helper — the engine itself only ever verifies.
pub fn mine_header_nonce(header: &BlockHeader) -> Result<(u64, Hash32), RejectReason> {
    let mut candidate = header.clone();
    for nonce in 0u64.. {
        candidate.nonce = nonce;
        let hash = xai_codec::block_hash(&candidate)?;
        if meets_difficulty(&hash, candidate.difficulty) {
            return Ok((nonce, hash));
        }
    }
    unreachable!("u64 nonce space exhausted")
}
