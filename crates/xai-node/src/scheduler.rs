use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use xai_consensus::{BlockOutcome, ChainValidator};
use xai_core::block::Block;
use xai_core::transaction::Transaction;
use xai_core::types::{Hash32, Timestamp};
use xai_core::RejectReason;
use xai_finality::{FinalityCertificate, Vote};
use xai_state::UtxoState;
use xai_store::TipInfo;

use crate::shutdown::ShutdownSignal;

/// How long the writer keeps answering queued commands after shutdown fires
/// before aborting the rest.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Every mutation (and every read that needs writer-owned structures) is a
/// command; the writer task applies them strictly in order. This queue *is*
/// the `chain_lock` — there is exactly one consumer.
pub enum ChainCommand {
    SubmitTx {
        tx: Transaction,
        reply: oneshot::Sender<Result<Hash32, RejectReason>>,
    },
    SubmitBlock {
        block: Block,
        reply: oneshot::Sender<Result<BlockOutcome, RejectReason>>,
    },
    SubmitVote {
        vote: Vote,
        reply: oneshot::Sender<Result<Option<FinalityCertificate>, RejectReason>>,
    },
    MempoolSnapshot {
        limit: usize,
        reply: oneshot::Sender<Vec<Transaction>>,
    },
    BuildTemplate {
        limit: usize,
        reply: oneshot::Sender<Vec<Transaction>>,
    },
    GetFinality {
        height: u64,
        reply: oneshot::Sender<Option<FinalityCertificate>>,
    },
    LineageRequest {
        orphan_index: u64,
        reply: oneshot::Sender<Result<(u64, u64), RejectReason>>,
    },
    Maintenance,
}

/// The snapshot readers serve from: swapped atomically after every mutation,
/// so a reader sees the chain before or after a reorg, never mid-flight.
#[derive(Clone)]
pub struct ReadView {
    pub tip: Option<TipInfo>,
    pub state: Arc<UtxoState>,
}

/// Spawn the single-writer loop over `chain`. Returns the command queue and
/// the watch channel carrying fresh [`ReadView`]s.
pub fn spawn_writer(
    mut chain: ChainValidator,
    mut shutdown: ShutdownSignal,
) -> (
    mpsc::Sender<ChainCommand>,
    watch::Receiver<ReadView>,
    tokio::task::JoinHandle<()>,
) {
    let initial = ReadView {
        tip: chain.tip().ok().flatten(),
        state: Arc::new(chain.state_snapshot()),
    };
    let (view_tx, view_rx) = watch::channel(initial);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ChainCommand>(512);

    let handle = tokio::spawn(async move {
        info!("chain writer running");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    drain(&mut chain, &mut cmd_rx, &view_tx).await;
                    break;
                }

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    handle_command(&mut chain, cmd, &view_tx);
                }
            }
        }
        info!("chain writer stopped");
    });

    (cmd_tx, view_rx, handle)
}

/// Answer already-queued commands for a bounded grace window, then drop the
/// rest. In-flight work is never interrupted mid-mutation — the WAL protocol
/// forbids it past `begin`.
async fn drain(
    chain: &mut ChainValidator,
    cmd_rx: &mut mpsc::Receiver<ChainCommand>,
    view_tx: &watch::Sender<ReadView>,
) {
    info!("draining chain commands before shutdown");
    let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
    loop {
        let timeout = tokio::time::sleep_until(deadline);
        tokio::select! {
            _ = timeout => {
                let aborted = cmd_rx.len();
                if aborted > 0 {
                    warn!(aborted, "grace window elapsed, aborting queued commands");
                }
                break;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                handle_command(chain, cmd, view_tx);
            }
        }
    }
}

fn publish_view(chain: &ChainValidator, view_tx: &watch::Sender<ReadView>) {
    let view = ReadView {
        tip: chain.tip().ok().flatten(),
        state: Arc::new(chain.state_snapshot()),
    };
    let _ = view_tx.send(view);
}

/// Apply one command. Mutating commands publish the fresh [`ReadView`]
/// before replying, so a caller that awaited the reply immediately observes
/// its own write.
fn handle_command(
    chain: &mut ChainValidator,
    cmd: ChainCommand,
    view_tx: &watch::Sender<ReadView>,
) {
    let now = now_ts();
    match cmd {
        ChainCommand::SubmitTx { tx, reply } => {
            let result = chain.submit_tx(tx, now);
            publish_view(chain, view_tx);
            let _ = reply.send(result);
        }
        ChainCommand::SubmitBlock { block, reply } => {
            let result = chain.add_block(block, now);
            publish_view(chain, view_tx);
            let _ = reply.send(result);
        }
        ChainCommand::SubmitVote { vote, reply } => {
            let _ = reply.send(chain.submit_vote(vote, now));
        }
        ChainCommand::MempoolSnapshot { limit, reply } => {
            let _ = reply.send(chain.mempool_snapshot(limit));
        }
        ChainCommand::BuildTemplate { limit, reply } => {
            let _ = reply.send(chain.build_template(limit));
        }
        ChainCommand::GetFinality { height, reply } => {
            let _ = reply.send(chain.finality().get_finality(height).cloned());
        }
        ChainCommand::LineageRequest {
            orphan_index,
            reply,
        } => {
            let _ = reply.send(chain.lineage_request(orphan_index));
        }
        ChainCommand::Maintenance => {
            if let Err(e) = chain.run_maintenance(now) {
                warn!(error = %e, "maintenance pass failed");
            }
            publish_view(chain, view_tx);
        }
    }
}

pub fn now_ts() -> Timestamp {
    chrono::Utc::now().timestamp()
}
