use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use xai_core::types::Timestamp;
use xai_core::RejectReason;
use xai_events::{CoreEvent, EventRouter, Metrics, MisbehaviorKind};

use crate::config::{P2pConfig, SUPPORTED_PROTOCOL_VERSIONS};
use crate::message::{Envelope, Handshake, P2pMessage};
use crate::rate::TokenBucket;
use crate::replay::NonceWindow;

const SCORE_START: i32 = 100;
const PENALTY_RATE: i32 = 20;
const PENALTY_REPLAY: i32 = 10;
const PENALTY_BAD_SIG: i32 = 30;
const PENALTY_BAD_TIMESTAMP: i32 = 5;
const PENALTY_BAD_PAYLOAD: i32 = 15;

/// Everything tracked per connected peer. Keyed by the peer's identity
/// pubkey, which every envelope must carry.
pub struct Peer {
    pub handshake: Handshake,
    pub last_seen: Timestamp,
    pub score: i32,
    nonce_window: NonceWindow,
    msg_bucket: TokenBucket,
    in_bucket: TokenBucket,
    out_bucket: TokenBucket,
}

/// Peer admission and per-message integrity: handshake policy, replay
/// defense, rate and bandwidth budgets, and score-based ejection.
pub struct PeerTable {
    config: P2pConfig,
    peers: HashMap<String, Peer>,
    events: EventRouter,
    metrics: Arc<Metrics>,
}

impl PeerTable {
    pub fn new(config: P2pConfig, events: EventRouter, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            peers: HashMap::new(),
            events,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn peer(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// Run the full per-message integrity pipeline on an inbound envelope.
    /// A `Handshake` payload from an unknown peer registers it (subject to
    /// version and mutual-auth policy); anything else requires a prior
    /// handshake.
    pub fn accept(
        &mut self,
        env: &Envelope,
        wire_size: usize,
        now: Timestamp,
    ) -> Result<(), RejectReason> {
        let peer_id = env.public_key.clone();

        if let P2pMessage::Handshake(hs) = &env.payload {
            return self.accept_handshake(env, hs, now);
        }

        // Rate and bandwidth first: cheapest defense against floods.
        let within_rate = match self.peers.get_mut(&peer_id) {
            Some(peer) => {
                peer.msg_bucket.try_take(1, now) && peer.in_bucket.try_take(wire_size as u64, now)
            }
            None => {
                return Err(RejectReason::HandshakeRejected(format!(
                    "no handshake from {peer_id}"
                )));
            }
        };
        if !within_rate {
            Metrics::incr(&self.metrics.rate_limited_total);
            self.penalize(&peer_id, PENALTY_RATE, MisbehaviorKind::RateLimited);
            return Err(RejectReason::RateLimited(format!(
                "peer {peer_id} over message/bandwidth budget"
            )));
        }

        // Timestamp inside the replay window.
        if (now - env.timestamp).abs() > self.config.nonce_ttl_secs {
            self.penalize(&peer_id, PENALTY_BAD_TIMESTAMP, MisbehaviorKind::ReplayNonce);
            return Err(RejectReason::BadTimestamp(format!(
                "envelope timestamp {} outside ±{}s window",
                env.timestamp, self.config.nonce_ttl_secs
            )));
        }

        // Unseen nonce within the window.
        let fresh = match self.peers.get_mut(&peer_id) {
            Some(peer) => peer
                .nonce_window
                .observe(env.seq_nonce, now, self.config.nonce_ttl_secs),
            None => return Err(RejectReason::HandshakeRejected(format!(
                "no handshake from {peer_id}"
            ))),
        };
        if let Err(e) = fresh {
            Metrics::incr(&self.metrics.nonce_replay_total);
            self.penalize(&peer_id, PENALTY_REPLAY, MisbehaviorKind::ReplayNonce);
            return Err(e);
        }

        // Signature last — the expensive check runs only on fresh traffic.
        if let Err(e) = env.verify() {
            Metrics::incr(&self.metrics.invalid_signature_total);
            self.penalize(&peer_id, PENALTY_BAD_SIG, MisbehaviorKind::InvalidSignature);
            return Err(e);
        }

        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = now;
        }
        Ok(())
    }

    fn accept_handshake(
        &mut self,
        env: &Envelope,
        hs: &Handshake,
        now: Timestamp,
    ) -> Result<(), RejectReason> {
        // The envelope must be signed by the identity it introduces.
        if env.public_key != hs.node_pubkey {
            return Err(RejectReason::HandshakeRejected(
                "envelope key differs from handshake identity".into(),
            ));
        }
        env.verify()?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&hs.protocol_version) {
            return Err(RejectReason::HandshakeRejected(format!(
                "protocol version {} unsupported",
                hs.protocol_version
            )));
        }

        if self.config.require_mutual_auth {
            // The signed handshake envelope is the challenge response; the
            // key and certificate fingerprint must both be on the trust list.
            if !self
                .config
                .trusted_peer_pubkeys
                .iter()
                .any(|k| k == &hs.node_pubkey)
            {
                return Err(RejectReason::HandshakeRejected(format!(
                    "pubkey {} not in trust list",
                    hs.node_pubkey
                )));
            }
            let fp_trusted = hs
                .tls_cert_fp
                .as_ref()
                .map(|fp| self.config.trusted_peer_cert_fps.iter().any(|t| t == fp))
                .unwrap_or(false);
            if !fp_trusted {
                return Err(RejectReason::HandshakeRejected(
                    "certificate fingerprint missing or untrusted".into(),
                ));
            }
        }

        let mut window = NonceWindow::new();
        window.observe(env.seq_nonce, now, self.config.nonce_ttl_secs)?;
        info!(peer = %hs.node_pubkey, version = hs.protocol_version, "peer handshake accepted");
        self.peers.insert(
            hs.node_pubkey.clone(),
            Peer {
                handshake: hs.clone(),
                last_seen: now,
                score: SCORE_START,
                nonce_window: window,
                msg_bucket: TokenBucket::new(self.config.msg_rate_max as u64, now),
                in_bucket: TokenBucket::new(self.config.bw_in_bps as u64, now),
                out_bucket: TokenBucket::new(self.config.bw_out_bps as u64, now),
            },
        );
        Ok(())
    }

    /// Charge an outbound send against the peer's bandwidth budget.
    pub fn allow_outbound(&mut self, peer_id: &str, size: usize, now: Timestamp) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(peer) => peer.out_bucket.try_take(size as u64, now),
            None => false,
        }
    }

    /// External misbehavior report (invalid block, bad transaction, …):
    /// validation failures score the peer down without being fatal.
    pub fn report_misbehavior(&mut self, peer_id: &str, kind: MisbehaviorKind) {
        self.penalize(peer_id, PENALTY_BAD_PAYLOAD, kind);
    }

    fn penalize(&mut self, peer_id: &str, penalty: i32, kind: MisbehaviorKind) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        peer.score -= penalty;
        debug!(peer = %peer_id, score = peer.score, ?kind, "peer penalized");
        if peer.score <= 0 {
            self.peers.remove(peer_id);
            Metrics::incr(&self.metrics.peers_dropped_total);
            warn!(peer = %peer_id, ?kind, "peer dropped for sustained violations");
            self.events.publish(CoreEvent::PeerMisbehavior {
                peer: peer_id.to_string(),
                kind,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::types::Network;
    use xai_crypto::KeyPair;

    fn handshake_for(kp: &KeyPair) -> Handshake {
        Handshake {
            node_version: "xai-node/0.1.0".into(),
            protocol_version: 1,
            supported_features: vec!["blocks".into(), "votes".into()],
            node_pubkey: kp.public_key_hex.clone(),
            tls_cert_fp: None,
        }
    }

    fn table(config: P2pConfig) -> (PeerTable, Arc<Metrics>) {
        let metrics = Metrics::new();
        (
            PeerTable::new(config, EventRouter::new(64), Arc::clone(&metrics)),
            metrics,
        )
    }

    fn connect(table: &mut PeerTable, kp: &KeyPair, now: Timestamp) {
        let env =
            Envelope::seal(P2pMessage::Handshake(handshake_for(kp)), kp, 1, now).unwrap();
        table.accept(&env, 200, now).unwrap();
    }

    #[test]
    fn handshake_then_message_accepted() {
        let kp = KeyPair::generate(Network::Mainnet);
        let (mut table, _) = table(P2pConfig::default());
        connect(&mut table, &kp, 1000);
        assert!(table.contains(&kp.public_key_hex));

        let msg = Envelope::seal(P2pMessage::Ping { nonce: 1 }, &kp, 2, 1001).unwrap();
        table.accept(&msg, 100, 1001).unwrap();
    }

    #[test]
    fn message_without_handshake_refused() {
        let kp = KeyPair::generate(Network::Mainnet);
        let (mut table, _) = table(P2pConfig::default());
        let msg = Envelope::seal(P2pMessage::Ping { nonce: 1 }, &kp, 2, 1001).unwrap();
        assert!(matches!(
            table.accept(&msg, 100, 1001),
            Err(RejectReason::HandshakeRejected(_))
        ));
    }

    #[test]
    fn unsupported_protocol_version_refused() {
        let kp = KeyPair::generate(Network::Mainnet);
        let (mut table, _) = table(P2pConfig::default());
        let mut hs = handshake_for(&kp);
        hs.protocol_version = 99;
        let env = Envelope::seal(P2pMessage::Handshake(hs), &kp, 1, 1000).unwrap();
        assert!(matches!(
            table.accept(&env, 200, 1000),
            Err(RejectReason::HandshakeRejected(_))
        ));
    }

    // S6: identical envelope resent within the TTL is accepted at most once.
    #[test]
    fn replayed_envelope_rejected_and_counted() {
        let kp = KeyPair::generate(Network::Mainnet);
        let (mut table, metrics) = table(P2pConfig::default());
        connect(&mut table, &kp, 1000);

        let msg = Envelope::seal(P2pMessage::Ping { nonce: 9 }, &kp, 42, 1000).unwrap();
        table.accept(&msg, 100, 1000).unwrap();

        let before = metrics.snapshot().nonce_replay_total;
        assert!(matches!(
            table.accept(&msg, 100, 1010),
            Err(RejectReason::ReplayNonce(_))
        ));
        assert_eq!(metrics.snapshot().nonce_replay_total, before + 1);
    }

    #[test]
    fn stale_timestamp_refused() {
        let kp = KeyPair::generate(Network::Mainnet);
        let (mut table, _) = table(P2pConfig::default());
        connect(&mut table, &kp, 10_000);

        // Default window is ±300s.
        let msg = Envelope::seal(P2pMessage::Ping { nonce: 1 }, &kp, 2, 9_000).unwrap();
        assert!(matches!(
            table.accept(&msg, 100, 10_000),
            Err(RejectReason::BadTimestamp(_))
        ));
    }

    #[test]
    fn flood_rate_limits_then_drops() {
        let kp = KeyPair::generate(Network::Mainnet);
        let mut config = P2pConfig::default();
        config.msg_rate_max = 2; // burst of 4
        let (mut table, metrics) = table(config);
        connect(&mut table, &kp, 1000);

        let mut rate_limited = 0;
        for i in 0..40u128 {
            let msg = Envelope::seal(P2pMessage::Ping { nonce: i as u64 }, &kp, 10 + i, 1000).unwrap();
            if matches!(table.accept(&msg, 10, 1000), Err(RejectReason::RateLimited(_))) {
                rate_limited += 1;
            }
            if !table.contains(&kp.public_key_hex) {
                break;
            }
        }
        assert!(rate_limited >= 1);
        assert!(
            !table.contains(&kp.public_key_hex),
            "sustained violation drops the peer"
        );
        assert!(metrics.snapshot().rate_limited_total >= 1);
        assert_eq!(metrics.snapshot().peers_dropped_total, 1);
    }

    #[test]
    fn mutual_auth_requires_trust_list() {
        let kp = KeyPair::generate(Network::Mainnet);
        let mut config = P2pConfig::default();
        config.require_mutual_auth = true;
        config.trusted_peer_pubkeys = vec![kp.public_key_hex.clone()];
        config.trusted_peer_cert_fps = vec!["fp-1".into()];
        let (mut table, _) = table(config);

        // Trusted key but no certificate fingerprint: refused.
        let env = Envelope::seal(
            P2pMessage::Handshake(handshake_for(&kp)),
            &kp,
            1,
            1000,
        )
        .unwrap();
        assert!(matches!(
            table.accept(&env, 200, 1000),
            Err(RejectReason::HandshakeRejected(_))
        ));

        // Trusted key and fingerprint: accepted.
        let mut hs = handshake_for(&kp);
        hs.tls_cert_fp = Some("fp-1".into());
        let env = Envelope::seal(P2pMessage::Handshake(hs), &kp, 2, 1001).unwrap();
        table.accept(&env, 200, 1001).unwrap();

        // Unknown key: refused.
        let stranger = KeyPair::generate(Network::Mainnet);
        let mut hs = handshake_for(&stranger);
        hs.tls_cert_fp = Some("fp-1".into());
        let env = Envelope::seal(P2pMessage::Handshake(hs), &stranger, 1, 1002).unwrap();
        assert!(matches!(
            table.accept(&env, 200, 1002),
            Err(RejectReason::HandshakeRejected(_))
        ));
    }
}
