use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad, noise, ping, tcp, yamux,
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::P2pConfig;
use crate::message::Envelope;

/// Combined libp2p network behaviour for XAI nodes: gossip for the three
/// message lanes, kademlia for peer discovery, identify + ping for liveness.
#[derive(NetworkBehaviour)]
pub struct XaiBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// Which gossip lane an envelope travels on. Blocks and votes are
/// consensus-critical and low-volume; transactions are bulk traffic. Keeping
/// them on separate topics lets light peers subscribe selectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GossipLane {
    Blocks,
    Txs,
    Votes,
}

/// An envelope tagged with its lane.
#[derive(Debug)]
pub struct LanedEnvelope {
    pub lane: GossipLane,
    pub envelope: Envelope,
}

/// Application-facing handle returned from `P2pNetwork::new()`.
pub struct P2pHandle {
    /// Send here to broadcast an envelope to all gossip peers.
    pub outbound_tx: mpsc::Sender<LanedEnvelope>,
    /// Receive here to consume envelopes arriving from peers.
    pub inbound_rx: mpsc::Receiver<LanedEnvelope>,
    /// Local libp2p peer identity.
    pub local_peer_id: PeerId,
}

/// Gossip tuning derived from chain parameters rather than transport
/// defaults:
///
/// - message ids are SHA-256 of the wire bytes, the same content addressing
///   the chain uses everywhere, so a block republished by ten peers
///   deduplicates to one delivery;
/// - the mesh heartbeat is well under a second because finality votes must
///   complete a quorum round-trip in a small fraction of the 120 s block
///   interval;
/// - the duplicate cache only needs to remember ids for as long as the
///   envelope replay window keeps a message acceptable — beyond
///   `nonce_ttl_secs` the peer table refuses it anyway;
/// - the transmit cap is the largest valid envelope (block size limit plus
///   framing), not the transport default, which is far too small for a full
///   block.
fn gossipsub_config(config: &P2pConfig) -> Result<gossipsub::Config, std::io::Error> {
    let content_address = |msg: &gossipsub::Message| {
        gossipsub::MessageId::from(xai_codec::sha256(&msg.data).to_hex())
    };
    gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_millis(500))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(content_address)
        .max_transmit_size(config.max_envelope_bytes)
        .duplicate_cache_time(Duration::from_secs(config.nonce_ttl_secs.max(0) as u64))
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Owns the libp2p Swarm. Pass to `tokio::spawn(network.run())`.
pub struct P2pNetwork {
    swarm: Swarm<XaiBehaviour>,
    blocks_topic: gossipsub::IdentTopic,
    txs_topic: gossipsub::IdentTopic,
    votes_topic: gossipsub::IdentTopic,
    outbound_rx: mpsc::Receiver<LanedEnvelope>,
    inbound_tx: mpsc::Sender<LanedEnvelope>,
}

impl P2pNetwork {
    /// Build the network and return `(P2pNetwork, P2pHandle)`.
    pub fn new(
        config: &P2pConfig,
    ) -> Result<(Self, P2pHandle), Box<dyn std::error::Error + Send + Sync>> {
        let blocks_topic = gossipsub::IdentTopic::new(&config.blocks_topic);
        let txs_topic = gossipsub::IdentTopic::new(&config.txs_topic);
        let votes_topic = gossipsub::IdentTopic::new(&config.votes_topic);

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                // Transport-level signing on top of the application envelope
                // signatures: a message must name a real libp2p identity
                // before the peer table ever sees it.
                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config(config)?,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let store = kad::store::MemoryStore::new(key.public().to_peer_id());
                let kademlia = kad::Behaviour::new(key.public().to_peer_id(), store);
                let identify = identify::Behaviour::new(identify::Config::new(
                    config.identify_version.clone(),
                    key.public(),
                ));

                Ok(XaiBehaviour {
                    gossipsub,
                    kademlia,
                    identify,
                    ping: ping::Behaviour::default(),
                })
            })?
            .build();

        for topic in [&blocks_topic, &txs_topic, &votes_topic] {
            swarm.behaviour_mut().gossipsub.subscribe(topic)?;
        }

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        let mut seeded = false;
        for entry in &config.bootstrap_peers {
            let addr: Multiaddr = match entry.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(entry = %entry, error = %e, "skipping malformed bootstrap address");
                    continue;
                }
            };
            match addr.iter().last() {
                Some(libp2p::multiaddr::Protocol::P2p(peer_id)) => {
                    swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                    seeded = true;
                }
                _ => warn!(entry = %entry, "bootstrap address carries no /p2p/ suffix"),
            }
        }
        if seeded {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                debug!(error = %e, "kademlia bootstrap deferred");
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let network = P2pNetwork {
            swarm,
            blocks_topic,
            txs_topic,
            votes_topic,
            outbound_rx,
            inbound_tx,
        };
        let handle = P2pHandle { outbound_tx, inbound_rx, local_peer_id };

        Ok((network, handle))
    }

    fn lane_of(&self, topic: &gossipsub::TopicHash) -> Option<GossipLane> {
        if *topic == self.blocks_topic.hash() {
            Some(GossipLane::Blocks)
        } else if *topic == self.txs_topic.hash() {
            Some(GossipLane::Txs)
        } else if *topic == self.votes_topic.hash() {
            Some(GossipLane::Votes)
        } else {
            None
        }
    }

    fn publish(&mut self, out: LanedEnvelope) {
        let topic = match out.lane {
            GossipLane::Blocks => self.blocks_topic.clone(),
            GossipLane::Txs => self.txs_topic.clone(),
            GossipLane::Votes => self.votes_topic.clone(),
        };
        let data = match out.envelope.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "dropping unencodable outbound envelope");
                return;
            }
        };
        if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(topic, data) {
            warn!(lane = ?out.lane, error = %e, "gossip publish failed");
        }
    }

    async fn on_swarm_event(&mut self, event: SwarmEvent<XaiBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "gossip endpoint listening");
            }
            SwarmEvent::Behaviour(XaiBehaviourEvent::Gossipsub(
                gossipsub::Event::Message { message, .. },
            )) => {
                let Some(lane) = self.lane_of(&message.topic) else {
                    debug!(topic = %message.topic, "message on unknown topic ignored");
                    return;
                };
                match Envelope::from_bytes(&message.data) {
                    Ok(envelope) => {
                        let _ = self.inbound_tx.send(LanedEnvelope { lane, envelope }).await;
                    }
                    Err(e) => debug!(lane = ?lane, error = %e, "undecodable gossip payload"),
                }
            }
            SwarmEvent::Behaviour(XaiBehaviourEvent::Identify(
                identify::Event::Received { peer_id, info, .. },
            )) => {
                // Fold identified listen addresses into the routing table so
                // kademlia can hand them to other peers.
                for addr in info.listen_addrs {
                    self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, num_established, .. } => {
                debug!(peer = %peer_id, connections = %num_established, "peer connected");
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(peer = %peer_id, cause = ?cause, "peer disconnected");
            }
            _ => {}
        }
    }

    /// Drive the P2P event loop. Run in a dedicated tokio task.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(out) = self.outbound_rx.recv() => self.publish(out),
                event = self.swarm.select_next_some() => self.on_swarm_event(event).await,
            }
        }
    }
}
