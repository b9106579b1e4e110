//! xai-node — the XAI full-node binary.
//!
//! Startup sequence:
//!   1. Open the chain store
//!   2. WAL recovery — a pending reorg is rewound before anything serves
//!   3. Apply genesis if the store is fresh
//!   4. Start the single-writer scheduler (the chain lock)
//!   5. Start the P2P network and the ingest pipeline
//!   6. Serve until SIGINT, then drain within the grace window

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use xai_consensus::ChainValidator;
use xai_core::config::CoreConfig;
use xai_core::types::Network;
use xai_crypto::KeyPair;
use xai_events::{CoreEvent, EventKind, EventRouter, Metrics};
use xai_finality::{FinalityVoter, ValidatorInfo, ValidatorSet};
use xai_node::{now_ts, shutdown_pair, ChainCommand, Ingest, NodeHandle};
use xai_p2p::{
    fresh_seq_nonce, Envelope, GossipLane, Handshake, LanedEnvelope, P2pConfig, P2pMessage,
    P2pNetwork, PeerTable,
};
use xai_store::{ChainStore, Wal};

#[derive(Parser, Debug)]
#[command(name = "xai-node", version, about = "XAI full node — core consensus engine")]
struct Args {
    /// Directory for the persistent chain store and WAL.
    #[arg(long, default_value = "~/.xai/data")]
    data_dir: PathBuf,

    /// P2P listen address.
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/7777")]
    p2p_listen: String,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Path to a CoreConfig JSON file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against the testnet (TXAI addresses).
    #[arg(long)]
    testnet: bool,

    /// Path to the active validator set JSON (list of {address, stake, public_key}).
    #[arg(long)]
    validator_set: Option<PathBuf>,

    /// Hex secret key; when set and in the validator set, this node votes
    /// finality on every applied tip.
    #[arg(long)]
    validator_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xai=debug".parse().expect("static filter parses")),
        )
        .init();

    let args = Args::parse();
    info!("XAI node starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config from {}", path.display()))?;
            serde_json::from_str::<CoreConfig>(&json).context("parsing config JSON")?
        }
        None => CoreConfig::default(),
    };
    if args.testnet {
        config.network = Network::Testnet;
    }

    // ── Store + WAL recovery (before anything serves P2P) ────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let store = Arc::new(
        ChainStore::open(data_dir.join("store")).context("opening chain store")?,
    );
    let wal = Wal::open(data_dir.join("reorg.wal"));
    ChainValidator::recover_wal(&store, &wal, now_ts())
        .context("WAL recovery failed; refusing to serve")?;

    // ── Validator set + finality ─────────────────────────────────────────────
    let validator_set = load_validator_set(args.validator_set.as_deref())?;
    let events = EventRouter::new(1024);
    let metrics = Metrics::new();
    let finality = FinalityVoter::new(validator_set, events.clone(), Arc::clone(&metrics));

    // ── Chain engine + genesis ───────────────────────────────────────────────
    let mut chain = ChainValidator::new(
        config.clone(),
        Arc::clone(&store),
        wal,
        finality,
        events.clone(),
        Arc::clone(&metrics),
    )
    .map_err(|e| anyhow::anyhow!("building chain engine: {e}"))?;
    if chain.tip().map_err(|e| anyhow::anyhow!("{e}"))?.is_none() {
        info!("fresh store — writing genesis");
        chain
            .init_genesis()
            .map_err(|e| anyhow::anyhow!("applying genesis: {e}"))?;
    }

    // ── Identity ─────────────────────────────────────────────────────────────
    let identity = Arc::new(match &args.validator_key {
        Some(secret) => KeyPair::from_secret_hex(secret, config.network)
            .map_err(|e| anyhow::anyhow!("bad --validator-key: {e}"))?,
        None => {
            warn!("no --validator-key; using an ephemeral P2P identity");
            KeyPair::generate(config.network)
        }
    });
    info!(address = %identity.address, "node identity");

    // ── Scheduler (single writer) ────────────────────────────────────────────
    let (shutdown_handle, shutdown) = shutdown_pair();
    let (commands, view, writer) = xai_node::spawn_writer(chain, shutdown.clone());
    let handle = NodeHandle::new(
        config.clone(),
        commands.clone(),
        view,
        Arc::clone(&store),
        events.clone(),
        Arc::clone(&metrics),
    );

    // ── P2P network + ingest ─────────────────────────────────────────────────
    let p2p_config = P2pConfig::from_core(&config, args.p2p_listen.clone(), args.bootstrap.clone());
    let (network, p2p_handle) = P2pNetwork::new(&p2p_config)
        .map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P identity");
    let outbound = p2p_handle.outbound_tx.clone();
    let inbound = p2p_handle.inbound_rx;
    tokio::spawn(network.run());

    let peers = PeerTable::new(p2p_config.clone(), events.clone(), Arc::clone(&metrics));
    let ingest = Ingest {
        peers,
        commands: commands.clone(),
        store: Arc::clone(&store),
        outbound: outbound.clone(),
        identity: Arc::clone(&identity),
    };
    tokio::spawn(ingest.run(inbound, shutdown.clone()));

    // Introduce ourselves so peers register this identity.
    let hello = Handshake {
        node_version: format!("xai-node/{}", env!("CARGO_PKG_VERSION")),
        protocol_version: 1,
        supported_features: vec!["blocks".into(), "txs".into(), "votes".into()],
        node_pubkey: identity.public_key_hex.clone(),
        tls_cert_fp: None,
    };
    if let Ok(env) = Envelope::seal(P2pMessage::Handshake(hello), &identity, fresh_seq_nonce(), now_ts()) {
        let _ = outbound
            .send(LanedEnvelope {
                lane: GossipLane::Blocks,
                envelope: env,
            })
            .await;
    }

    // ── Background: mempool/orphan maintenance ───────────────────────────────
    {
        let commands = commands.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tick.tick() => {
                        let _ = commands.send(ChainCommand::Maintenance).await;
                    }
                }
            }
        });
    }

    // ── Background: finality voting on every applied tip ─────────────────────
    if args.validator_key.is_some() {
        let identity = Arc::clone(&identity);
        let handle = handle.clone();
        let outbound = outbound.clone();
        let mut shutdown = shutdown.clone();
        let mut blocks = handle.subscribe(Some(EventKind::Block));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    ev = blocks.recv() => {
                        let Some(CoreEvent::BlockApplied { hash, height }) = ev else {
                            if ev.is_none() { break; }
                            continue;
                        };
                        let vote = match FinalityVoter::sign_vote(&identity, hash, height) {
                            Ok(v) => v,
                            Err(e) => { warn!(error = %e, "vote signing failed"); continue; }
                        };
                        if let Err(e) = handle.submit_vote(vote.clone()).await {
                            warn!(error = %e, "local vote refused");
                            continue;
                        }
                        if let Ok(env) = Envelope::seal(
                            P2pMessage::Vote { vote },
                            &identity,
                            fresh_seq_nonce(),
                            now_ts(),
                        ) {
                            let _ = outbound
                                .send(LanedEnvelope { lane: GossipLane::Votes, envelope: env })
                                .await;
                        }
                    }
                }
            }
        });
    }

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for SIGINT")?;
    info!("shutdown requested, draining");
    shutdown_handle.trigger();
    writer.await.context("writer task join")?;
    info!("bye");
    Ok(())
}

/// Load the active validator set, or start with an empty one (finality
/// certificates then never form, which is fine for solo/dev nodes).
fn load_validator_set(path: Option<&Path>) -> anyhow::Result<ValidatorSet> {
    let Some(path) = path else {
        return Ok(ValidatorSet::new());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading validator set from {}", path.display()))?;
    let members: Vec<ValidatorInfo> =
        serde_json::from_str(&json).context("parsing validator set JSON")?;
    info!(validators = members.len(), "validator set loaded");
    Ok(ValidatorSet::from_members(members))
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
