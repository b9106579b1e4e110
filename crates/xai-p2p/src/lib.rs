//! P2P message integrity and transport: the signed envelope with nonce
//! replay defense, handshake policy, per-peer rate and bandwidth budgets,
//! and the libp2p gossip wiring.

pub mod config;
pub mod message;
pub mod network;
pub mod peer;
pub mod rate;
pub mod replay;

pub use config::{P2pConfig, SUPPORTED_PROTOCOL_VERSIONS};
pub use message::{Envelope, Handshake, P2pMessage};
pub use network::{GossipLane, LanedEnvelope, P2pHandle, P2pNetwork};
pub use peer::{Peer, PeerTable};
pub use rate::TokenBucket;
pub use replay::NonceWindow;

use rand::RngCore;

/// A fresh random message nonce. 128 bits of OS randomness — collisions
/// within a replay window are not a practical concern.
pub fn fresh_seq_nonce() -> u128 {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    u128::from_be_bytes(bytes)
}
