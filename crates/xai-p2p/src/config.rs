use xai_core::config::CoreConfig;

/// Protocol versions this node speaks. Handshakes advertising anything else
/// are refused.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[1];

/// Bytes the signed envelope adds around the largest possible payload
/// (signature, key, nonce, timestamp fields and JSON framing).
pub const ENVELOPE_OVERHEAD_BYTES: usize = 4 * 1024;

/// Configuration for the XAI P2P layer.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local listen address (e.g. "/ip4/0.0.0.0/tcp/7777").
    pub listen_addr: String,
    /// Bootstrap peer multiaddresses.
    pub bootstrap_peers: Vec<String>,
    /// Protocol version string advertised via libp2p identify.
    pub identify_version: String,
    /// GossipSub topic for block propagation.
    pub blocks_topic: String,
    /// GossipSub topic for transaction propagation.
    pub txs_topic: String,
    /// GossipSub topic for finality votes.
    pub votes_topic: String,
    /// Largest envelope the transport will carry: a full block plus the
    /// envelope framing. Anything bigger is invalid by I8 before it is ever
    /// gossiped.
    pub max_envelope_bytes: usize,

    // ── Envelope integrity (lifted from CoreConfig) ──────────────────────────
    /// Replay window, seconds either side of now.
    pub nonce_ttl_secs: i64,
    pub msg_rate_max: u32,
    pub bw_in_bps: u32,
    pub bw_out_bps: u32,
    pub require_mutual_auth: bool,
    pub trusted_peer_pubkeys: Vec<String>,
    pub trusted_peer_cert_fps: Vec<String>,
}

impl P2pConfig {
    pub fn from_core(cfg: &CoreConfig, listen_addr: String, bootstrap_peers: Vec<String>) -> Self {
        Self {
            listen_addr,
            bootstrap_peers,
            identify_version: "/xai/1.0.0".into(),
            blocks_topic: "xai-blocks".into(),
            txs_topic: "xai-txs".into(),
            votes_topic: "xai-votes".into(),
            max_envelope_bytes: cfg.max_block_bytes as usize + ENVELOPE_OVERHEAD_BYTES,
            nonce_ttl_secs: cfg.nonce_ttl_sec as i64,
            msg_rate_max: cfg.peer_msg_rate_max,
            bw_in_bps: cfg.peer_bw_in_bps,
            bw_out_bps: cfg.peer_bw_out_bps,
            require_mutual_auth: cfg.require_mutual_auth,
            trusted_peer_pubkeys: cfg.trusted_peer_pubkeys.clone(),
            trusted_peer_cert_fps: cfg.trusted_peer_cert_fps.clone(),
        }
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self::from_core(
            &CoreConfig::default(),
            "/ip4/0.0.0.0/tcp/7777".into(),
            Vec::new(),
        )
    }
}
