use serde::{Deserialize, Serialize};

use xai_core::block::{Block, BlockHeader};
use xai_core::transaction::Transaction;
use xai_core::types::{Hash32, Timestamp};
use xai_core::RejectReason;
use xai_crypto::{verify_signature, KeyPair};
use xai_finality::Vote;

/// Handshake payload exchanged when a connection opens.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handshake {
    pub node_version: String,
    pub protocol_version: u32,
    pub supported_features: Vec<String>,
    /// The peer's long-lived secp256k1 identity key, hex.
    pub node_pubkey: String,
    /// TLS certificate fingerprint, required in mutual-auth deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert_fp: Option<String>,
}

/// Messages exchanged over the XAI gossip network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum P2pMessage {
    Handshake(Handshake),
    GetHeaders { from: u64, to: u64 },
    Headers { headers: Vec<BlockHeader> },
    GetBlock { hash: Hash32 },
    Block { block: Block },
    Tx { tx: Transaction },
    Vote { vote: Vote },
    Ping { nonce: u64 },
    Pong { nonce: u64 },
}

impl P2pMessage {
    /// Short label for logs and rate metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            P2pMessage::Handshake(_) => "handshake",
            P2pMessage::GetHeaders { .. } => "get_headers",
            P2pMessage::Headers { .. } => "headers",
            P2pMessage::GetBlock { .. } => "get_block",
            P2pMessage::Block { .. } => "block",
            P2pMessage::Tx { .. } => "tx",
            P2pMessage::Vote { .. } => "vote",
            P2pMessage::Ping { .. } => "ping",
            P2pMessage::Pong { .. } => "pong",
        }
    }
}

/// The signed wrapper every message travels in. `seq_nonce` is unique per
/// message within the replay window; the signature covers the canonical JSON
/// of everything except itself. The nonce is a full 128-bit value, so it is
/// string-encoded on the wire like every other 128-bit quantity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "xai_core::types::amount_string")]
    pub seq_nonce: u128,
    pub timestamp: Timestamp,
    pub payload: P2pMessage,
    /// Sender's secp256k1 public key, hex. Doubles as the peer identity.
    pub public_key: String,
    pub signature: String,
}

#[derive(Serialize)]
struct EnvelopeSigningView<'a> {
    payload: &'a P2pMessage,
    public_key: &'a str,
    #[serde(with = "xai_core::types::amount_string")]
    seq_nonce: u128,
    timestamp: Timestamp,
}

impl Envelope {
    /// Wrap and sign a payload with this node's identity key.
    pub fn seal(
        payload: P2pMessage,
        keypair: &KeyPair,
        seq_nonce: u128,
        now: Timestamp,
    ) -> Result<Self, RejectReason> {
        let view = EnvelopeSigningView {
            payload: &payload,
            public_key: &keypair.public_key_hex,
            seq_nonce,
            timestamp: now,
        };
        let bytes = xai_codec::to_canonical_json(&view)?;
        let signature = keypair.sign(&bytes);
        Ok(Self {
            seq_nonce,
            timestamp: now,
            payload,
            public_key: keypair.public_key_hex.clone(),
            signature,
        })
    }

    /// Check the envelope signature under its embedded key. Identity binding
    /// (is this the key we shook hands with?) is the peer table's job.
    pub fn verify(&self) -> Result<(), RejectReason> {
        let view = EnvelopeSigningView {
            payload: &self.payload,
            public_key: &self.public_key,
            seq_nonce: self.seq_nonce,
            timestamp: self.timestamp,
        };
        let bytes = xai_codec::to_canonical_json(&view)?;
        verify_signature(&self.public_key, &bytes, &self.signature)
    }

    /// Wire encoding for gossip propagation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RejectReason> {
        serde_json::to_vec(self).map_err(|e| RejectReason::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RejectReason> {
        serde_json::from_slice(bytes).map_err(|e| RejectReason::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::types::Network;

    #[test]
    fn seal_verify_round_trip() {
        let kp = KeyPair::generate(Network::Mainnet);
        let env = Envelope::seal(P2pMessage::Ping { nonce: 7 }, &kp, 42, 1000).unwrap();
        env.verify().unwrap();

        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        decoded.verify().unwrap();
        assert_eq!(decoded.seq_nonce, 42);
        assert_eq!(decoded.payload.kind(), "ping");
    }

    #[test]
    fn tampered_envelope_fails_verification() {
        let kp = KeyPair::generate(Network::Mainnet);
        let mut env = Envelope::seal(P2pMessage::Ping { nonce: 7 }, &kp, 42, 1000).unwrap();
        env.seq_nonce = 43;
        assert_eq!(env.verify(), Err(RejectReason::InvalidSignature));
    }

    #[test]
    fn substituted_key_fails_verification() {
        let kp = KeyPair::generate(Network::Mainnet);
        let other = KeyPair::generate(Network::Mainnet);
        let mut env = Envelope::seal(P2pMessage::Ping { nonce: 1 }, &kp, 1, 1000).unwrap();
        env.public_key = other.public_key_hex.clone();
        assert!(env.verify().is_err());
    }
}
