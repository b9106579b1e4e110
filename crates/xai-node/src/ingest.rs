use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use xai_consensus::BlockOutcome;
use xai_core::types::Hash32;
use xai_crypto::KeyPair;
use xai_events::MisbehaviorKind;
use xai_p2p::{fresh_seq_nonce, Envelope, GossipLane, LanedEnvelope, P2pMessage, PeerTable};
use xai_store::{BlockLocator, ChainStore};

use crate::scheduler::{now_ts, ChainCommand};
use crate::shutdown::ShutdownSignal;

/// Most headers answered per GetHeaders request.
const MAX_HEADERS_PER_RESPONSE: u64 = 2_000;

/// Most block fetches triggered by one Headers announcement.
const MAX_BLOCK_FETCHES: usize = 32;

/// The P2P ingest loop: every inbound envelope runs the peer-table integrity
/// pipeline, then its payload is dispatched — mutations to the writer queue,
/// read-only queries straight against the store.
pub struct Ingest {
    pub peers: PeerTable,
    pub commands: mpsc::Sender<ChainCommand>,
    pub store: Arc<ChainStore>,
    pub outbound: mpsc::Sender<LanedEnvelope>,
    pub identity: Arc<KeyPair>,
}

impl Ingest {
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<LanedEnvelope>,
        mut shutdown: ShutdownSignal,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                laned = inbound.recv() => {
                    let Some(laned) = laned else { break };
                    self.handle(laned).await;
                }
            }
        }
        debug!("P2P ingest stopped");
    }

    async fn handle(&mut self, laned: LanedEnvelope) {
        let env = laned.envelope;
        let now = now_ts();
        let wire_size = env.to_bytes().map(|b| b.len()).unwrap_or(0);
        let peer_id = env.public_key.clone();

        if let Err(reason) = self.peers.accept(&env, wire_size, now) {
            debug!(peer = %peer_id, error = %reason, "envelope refused");
            return;
        }

        match env.payload {
            P2pMessage::Handshake(hs) => {
                debug!(peer = %hs.node_pubkey, version = %hs.node_version, "peer joined");
            }

            P2pMessage::GetHeaders { from, to } => {
                let to = to.min(from.saturating_add(MAX_HEADERS_PER_RESPONSE));
                match self.store.iterate_headers(from, to) {
                    Ok(headers) if !headers.is_empty() => {
                        self.send(&peer_id, GossipLane::Blocks, P2pMessage::Headers { headers })
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "header lookup failed"),
                }
            }

            P2pMessage::Headers { headers } => {
                let mut fetched = 0usize;
                for header in headers {
                    let Ok(hash) = xai_codec::block_hash(&header) else {
                        continue;
                    };
                    if fetched >= MAX_BLOCK_FETCHES {
                        break;
                    }
                    if matches!(self.store.index_of_hash(&hash), Ok(None)) {
                        self.send(&peer_id, GossipLane::Blocks, P2pMessage::GetBlock { hash })
                            .await;
                        fetched += 1;
                    }
                }
            }

            P2pMessage::GetBlock { hash } => {
                match self.store.read_block(BlockLocator::ByHash(hash)) {
                    Ok(Some(block)) => {
                        self.send(&peer_id, GossipLane::Blocks, P2pMessage::Block { block })
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "block lookup failed"),
                }
            }

            P2pMessage::Block { block } => {
                let index = block.header.index;
                let (reply, rx) = oneshot::channel();
                if self
                    .commands
                    .send(ChainCommand::SubmitBlock { block, reply })
                    .await
                    .is_err()
                {
                    return;
                }
                match rx.await {
                    Ok(Ok(BlockOutcome::Orphaned { missing_parent })) => {
                        self.request_lineage(&peer_id, index, missing_parent).await;
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(reason)) if reason.is_peer_fault() => {
                        self.peers.report_misbehavior(&peer_id, MisbehaviorKind::BadBlock);
                    }
                    Ok(Err(_)) | Err(_) => {}
                }
            }

            P2pMessage::Tx { tx } => {
                let (reply, rx) = oneshot::channel();
                if self
                    .commands
                    .send(ChainCommand::SubmitTx { tx, reply })
                    .await
                    .is_err()
                {
                    return;
                }
                if let Ok(Err(reason)) = rx.await {
                    if reason.is_peer_fault() {
                        self.peers
                            .report_misbehavior(&peer_id, MisbehaviorKind::BadTransaction);
                    }
                }
            }

            P2pMessage::Vote { vote } => {
                let (reply, rx) = oneshot::channel();
                if self
                    .commands
                    .send(ChainCommand::SubmitVote { vote, reply })
                    .await
                    .is_err()
                {
                    return;
                }
                if let Ok(Err(reason)) = rx.await {
                    if reason.is_peer_fault() {
                        self.peers
                            .report_misbehavior(&peer_id, MisbehaviorKind::DoubleVote);
                    }
                }
            }

            P2pMessage::Ping { nonce } => {
                self.send(&peer_id, GossipLane::Blocks, P2pMessage::Pong { nonce })
                    .await;
            }

            P2pMessage::Pong { .. } => {}
        }
    }

    /// An orphan landed: ask for the gap. Header-first up to the reorg
    /// horizon, plus the immediate missing parent by hash.
    async fn request_lineage(&mut self, peer_id: &str, orphan_index: u64, missing_parent: Hash32) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(ChainCommand::LineageRequest {
                orphan_index,
                reply,
            })
            .await
            .is_err()
        {
            return;
        }
        if let Ok(Ok((from, to))) = rx.await {
            self.send(peer_id, GossipLane::Blocks, P2pMessage::GetHeaders { from, to })
                .await;
        }
        self.send(
            peer_id,
            GossipLane::Blocks,
            P2pMessage::GetBlock {
                hash: missing_parent,
            },
        )
        .await;
    }

    /// Seal and publish a reply, charging it against the requesting peer's
    /// outbound budget.
    async fn send(&mut self, peer_id: &str, lane: GossipLane, payload: P2pMessage) {
        let now = now_ts();
        let envelope = match Envelope::seal(payload, &self.identity, fresh_seq_nonce(), now) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "failed to seal outbound envelope");
                return;
            }
        };
        let size = envelope.to_bytes().map(|b| b.len()).unwrap_or(0);
        if !self.peers.allow_outbound(peer_id, size, now) {
            debug!(peer = %peer_id, "outbound budget exhausted, reply dropped");
            return;
        }
        let _ = self.outbound.send(LanedEnvelope { lane, envelope }).await;
    }
}
