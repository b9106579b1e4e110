use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use xai_consensus::BlockOutcome;
use xai_core::block::Block;
use xai_core::config::CoreConfig;
use xai_core::transaction::Transaction;
use xai_core::types::{Address, Hash32};
use xai_core::RejectReason;
use xai_events::{CoreEvent, EventKind, EventRouter, Metrics, MetricsSnapshot};
use xai_factory::TxFactory;
use xai_finality::{FinalityCertificate, Vote};
use xai_state::AccountView;
use xai_store::{BlockLocator, ChainStore, TipInfo};

use crate::scheduler::{ChainCommand, ReadView};

/// The collaborator-facing surface of a running node: what RPC façades,
/// wallets, and explorers talk to. Mutations go through the writer queue;
/// reads are served from the latest published snapshot without touching the
/// writer.
#[derive(Clone)]
pub struct NodeHandle {
    config: CoreConfig,
    commands: mpsc::Sender<ChainCommand>,
    view: watch::Receiver<ReadView>,
    store: Arc<ChainStore>,
    events: EventRouter,
    metrics: Arc<Metrics>,
}

impl NodeHandle {
    pub fn new(
        config: CoreConfig,
        commands: mpsc::Sender<ChainCommand>,
        view: watch::Receiver<ReadView>,
        store: Arc<ChainStore>,
        events: EventRouter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            commands,
            view,
            store,
            events,
            metrics,
        }
    }

    /// A transaction factory configured for this node's network. External
    /// senders build and sign against the node's current view, then hand the
    /// finished transaction to [`NodeHandle::submit_tx`].
    pub fn tx_factory(&self) -> TxFactory {
        TxFactory::new(self.config.network, self.config.max_tx_bytes as usize)
    }

    // ── Mutations (through the writer) ───────────────────────────────────────

    pub async fn submit_tx(&self, tx: Transaction) -> Result<Hash32, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.send(ChainCommand::SubmitTx { tx, reply }).await?;
        rx.await.map_err(|_| RejectReason::Cancelled)?
    }

    pub async fn submit_block(&self, block: Block) -> Result<BlockOutcome, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.send(ChainCommand::SubmitBlock { block, reply }).await?;
        rx.await.map_err(|_| RejectReason::Cancelled)?
    }

    pub async fn submit_vote(
        &self,
        vote: Vote,
    ) -> Result<Option<FinalityCertificate>, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.send(ChainCommand::SubmitVote { vote, reply }).await?;
        rx.await.map_err(|_| RejectReason::Cancelled)?
    }

    // ── Reads (snapshot or store, never the writer) ──────────────────────────

    pub fn get_balance(&self, addr: &Address) -> u128 {
        self.view.borrow().state.balance(addr)
    }

    pub fn get_nonce(&self, addr: &Address) -> u64 {
        self.view.borrow().state.nonce(addr)
    }

    pub fn get_tip(&self) -> Option<TipInfo> {
        self.view.borrow().tip
    }

    pub fn get_block(&self, locator: BlockLocator) -> Result<Option<Block>, RejectReason> {
        self.store.read_block(locator)
    }

    pub fn supply(&self) -> u128 {
        self.view.borrow().state.supply()
    }

    /// The latest published account snapshot — what the factory validates
    /// against.
    pub fn state(&self) -> Arc<xai_state::UtxoState> {
        Arc::clone(&self.view.borrow().state)
    }

    pub async fn mempool_snapshot(&self, limit: usize) -> Result<Vec<Transaction>, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.send(ChainCommand::MempoolSnapshot { limit, reply }).await?;
        rx.await.map_err(|_| RejectReason::Cancelled)
    }

    pub async fn build_template(&self, limit: usize) -> Result<Vec<Transaction>, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.send(ChainCommand::BuildTemplate { limit, reply }).await?;
        rx.await.map_err(|_| RejectReason::Cancelled)
    }

    pub async fn get_finality(
        &self,
        height: u64,
    ) -> Result<Option<FinalityCertificate>, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.send(ChainCommand::GetFinality { height, reply }).await?;
        rx.await.map_err(|_| RejectReason::Cancelled)
    }

    /// Event stream; `kind = None` subscribes to everything.
    pub fn subscribe(&self, kind: Option<EventKind>) -> EventSubscription {
        match kind {
            Some(k) => EventSubscription::Filtered(self.events.subscribe_kind(k)),
            None => EventSubscription::All(self.events.subscribe()),
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn send(&self, cmd: ChainCommand) -> Result<(), RejectReason> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| RejectReason::Cancelled)
    }
}

/// A live event subscription handed to collaborators.
pub enum EventSubscription {
    All(tokio::sync::broadcast::Receiver<CoreEvent>),
    Filtered(xai_events::router::FilteredReceiver),
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<CoreEvent> {
        match self {
            EventSubscription::All(rx) => loop {
                match rx.recv().await {
                    Ok(ev) => return Some(ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            },
            EventSubscription::Filtered(rx) => rx.recv().await,
        }
    }
}
