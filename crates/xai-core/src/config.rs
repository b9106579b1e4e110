use serde::{Deserialize, Serialize};

use crate::types::Network;

/// Every operator-tunable knob of the core engine, with protocol defaults.
/// Loaded from JSON at boot; individual fields may be overridden from the
/// command line by the node binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub network: Network,

    // ── Block & transaction limits ───────────────────────────────────────────
    pub max_block_bytes: u32,
    pub max_tx_bytes: u32,

    // ── Difficulty ───────────────────────────────────────────────────────────
    /// Target seconds between blocks.
    pub block_time_target_sec: u32,
    /// Blocks per retarget window.
    pub difficulty_retarget_window: u32,

    // ── Reorg / finality ─────────────────────────────────────────────────────
    /// Maximum reorg depth; also bounds lineage-sync ancestor requests.
    pub finality_depth: u32,

    // ── Mempool ──────────────────────────────────────────────────────────────
    pub mempool_capacity: u32,
    pub mempool_ttl_sec: u32,

    // ── Orphans ──────────────────────────────────────────────────────────────
    pub orphan_capacity: u32,
    pub orphan_ttl_sec: u32,

    // ── P2P ──────────────────────────────────────────────────────────────────
    /// Replay window for message nonces, seconds either side of now.
    pub nonce_ttl_sec: u32,
    pub peer_msg_rate_max: u32,
    pub peer_bw_in_bps: u32,
    pub peer_bw_out_bps: u32,
    pub require_mutual_auth: bool,
    /// Hex-encoded secp256k1 public keys accepted in mutual-auth mode.
    pub trusted_peer_pubkeys: Vec<String>,
    /// TLS certificate fingerprints accepted in mutual-auth mode.
    pub trusted_peer_cert_fps: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            max_block_bytes: 1024 * 1024,
            max_tx_bytes: 100 * 1024,
            block_time_target_sec: 120,
            difficulty_retarget_window: 2016,
            finality_depth: 100,
            mempool_capacity: 10_000,
            mempool_ttl_sec: 3 * 3600,
            orphan_capacity: 512,
            orphan_ttl_sec: 24 * 3600,
            nonce_ttl_sec: 300,
            peer_msg_rate_max: 50,
            peer_bw_in_bps: 1024 * 1024,
            peer_bw_out_bps: 1024 * 1024,
            require_mutual_auth: false,
            trusted_peer_pubkeys: Vec::new(),
            trusted_peer_cert_fps: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// A testnet config with limits loosened for fast local chains.
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.max_block_bytes, 1_048_576);
        assert_eq!(cfg.block_time_target_sec, 120);
        assert_eq!(cfg.finality_depth, 100);
        assert!(!cfg.require_mutual_auth);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: CoreConfig =
            serde_json::from_str(r#"{"network":"testnet","mempool_capacity":64}"#).unwrap();
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.mempool_capacity, 64);
        assert_eq!(cfg.finality_depth, 100);
    }
}
