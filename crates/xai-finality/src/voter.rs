use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use xai_core::types::{Address, Hash32, Timestamp};
use xai_core::RejectReason;
use xai_crypto::{verify_signature, KeyPair};
use xai_events::{CoreEvent, EventRouter, Metrics, MisbehaviorKind};

use crate::validator_set::ValidatorSet;

/// A validator's signed endorsement of one block at one height.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vote {
    pub block_hash: Hash32,
    pub height: u64,
    pub validator: Address,
    /// Validator's secp256k1 public key, hex.
    pub public_key: String,
    /// ECDSA signature over the canonical vote payload, hex.
    pub signature: String,
}

/// The signed portion of a vote — everything but the signature.
#[derive(Serialize)]
struct VotePayload<'a> {
    block_hash: Hash32,
    height: u64,
    validator: &'a Address,
}

/// One validator's contribution inside a certificate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRecord {
    pub validator: Address,
    pub signature: String,
}

/// Proof that more than 2/3 of validator stake endorsed a block. A block with
/// a certificate is final: no later reorg may cross it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalityCertificate {
    pub block_hash: Hash32,
    pub height: u64,
    pub votes: Vec<VoteRecord>,
    pub quorum_met_at: Timestamp,
}

/// Collects votes, detects equivocation, and forms certificates.
pub struct FinalityVoter {
    set: ValidatorSet,
    /// height → validator → its vote (first one wins; a different second
    /// vote at the same height is equivocation).
    votes: HashMap<u64, HashMap<Address, Vote>>,
    certificates: BTreeMap<u64, FinalityCertificate>,
    finalized_height: Option<u64>,
    events: EventRouter,
    metrics: Arc<Metrics>,
}

impl FinalityVoter {
    pub fn new(set: ValidatorSet, events: EventRouter, metrics: Arc<Metrics>) -> Self {
        Self {
            set,
            votes: HashMap::new(),
            certificates: BTreeMap::new(),
            finalized_height: None,
            events,
            metrics,
        }
    }

    /// Governance hook: replace the active validator set.
    pub fn update_validator_set(&mut self, set: ValidatorSet) {
        info!(validators = set.len(), "validator set updated");
        self.set = set;
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.set
    }

    /// Highest finalized height, if any block is final yet.
    pub fn finalized_height(&self) -> Option<u64> {
        self.finalized_height
    }

    /// The certificate for `height`, when that exact height is finalized.
    pub fn get_finality(&self, height: u64) -> Option<&FinalityCertificate> {
        self.certificates.get(&height)
    }

    /// Is `height` at or below the finalized frontier? Certificates finalize
    /// all ancestors, not only the certified block itself.
    pub fn is_final(&self, height: u64) -> bool {
        self.finalized_height.map_or(false, |f| height <= f)
    }

    /// Sign a vote for a newly applied tip with the local validator key.
    pub fn sign_vote(keypair: &KeyPair, block_hash: Hash32, height: u64) -> Result<Vote, RejectReason> {
        let payload = VotePayload {
            block_hash,
            height,
            validator: &keypair.address,
        };
        let bytes = xai_codec::to_canonical_json(&payload)?;
        Ok(Vote {
            block_hash,
            height,
            validator: keypair.address.clone(),
            public_key: keypair.public_key_hex.clone(),
            signature: keypair.sign(&bytes),
        })
    }

    /// Verify and aggregate one incoming vote. Returns the certificate when
    /// this vote completes a quorum.
    pub fn submit_vote(
        &mut self,
        vote: Vote,
        now: Timestamp,
    ) -> Result<Option<FinalityCertificate>, RejectReason> {
        // Signature under the claimed key, and the key must belong to the
        // registered validator.
        let payload = VotePayload {
            block_hash: vote.block_hash,
            height: vote.height,
            validator: &vote.validator,
        };
        let bytes = xai_codec::to_canonical_json(&payload)?;
        verify_signature(&vote.public_key, &bytes, &vote.signature).map_err(|e| {
            Metrics::incr(&self.metrics.invalid_signature_total);
            e
        })?;

        let Some(info) = self.set.get(&vote.validator) else {
            return Err(RejectReason::PeerMisbehavior(format!(
                "{} is not an active validator",
                vote.validator
            )));
        };
        if info.public_key != vote.public_key {
            Metrics::incr(&self.metrics.invalid_signature_total);
            return Err(RejectReason::InvalidSignature);
        }

        // Double-vote detection: one validator, one height, one block.
        let height_votes = self.votes.entry(vote.height).or_default();
        if let Some(prior) = height_votes.get(&vote.validator) {
            if prior.block_hash == vote.block_hash {
                return Ok(None); // idempotent re-delivery
            }
            warn!(validator = %vote.validator, height = vote.height, "double vote detected");
            self.events.publish(CoreEvent::Misbehavior {
                validator: vote.validator.to_string(),
                kind: MisbehaviorKind::DoubleVote,
            });
            return Err(RejectReason::PeerMisbehavior(format!(
                "double vote by {} at height {}",
                vote.validator, vote.height
            )));
        }
        height_votes.insert(vote.validator.clone(), vote.clone());
        Metrics::incr(&self.metrics.votes_accepted_total);

        // Tally stake behind this exact block.
        let weight: u128 = height_votes
            .values()
            .filter(|v| v.block_hash == vote.block_hash)
            .filter_map(|v| self.set.get(&v.validator))
            .map(|i| i.stake)
            .sum();

        if !self.set.quorum_reached(weight) {
            return Ok(None);
        }
        if self.certificates.contains_key(&vote.height) {
            return Ok(None); // already certified
        }

        let certificate = FinalityCertificate {
            block_hash: vote.block_hash,
            height: vote.height,
            votes: height_votes
                .values()
                .filter(|v| v.block_hash == vote.block_hash)
                .map(|v| VoteRecord {
                    validator: v.validator.clone(),
                    signature: v.signature.clone(),
                })
                .collect(),
            quorum_met_at: now,
        };
        self.certificates.insert(vote.height, certificate.clone());
        self.finalized_height = Some(
            self.finalized_height
                .map_or(vote.height, |f| f.max(vote.height)),
        );
        Metrics::incr(&self.metrics.finality_certificates_total);
        info!(height = vote.height, block = %vote.block_hash, "finality quorum reached");
        self.events.publish(CoreEvent::BlockFinalized {
            hash: vote.block_hash,
            height: vote.height,
        });
        Ok(Some(certificate))
    }

    /// Drop vote tallies for heights at or below the finalized frontier.
    /// Certificates are kept forever — they are the proof.
    pub fn prune_tallies(&mut self) {
        if let Some(f) = self.finalized_height {
            self.votes.retain(|&h, _| h > f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator_set::ValidatorInfo;
    use xai_core::types::Network;

    fn make_set(stakes: &[u128]) -> (ValidatorSet, Vec<KeyPair>) {
        let mut set = ValidatorSet::new();
        let mut keys = Vec::new();
        for &stake in stakes {
            let kp = KeyPair::generate(Network::Mainnet);
            set.add(ValidatorInfo {
                address: kp.address.clone(),
                stake,
                public_key: kp.public_key_hex.clone(),
            });
            keys.push(kp);
        }
        (set, keys)
    }

    fn voter(set: ValidatorSet) -> FinalityVoter {
        FinalityVoter::new(set, EventRouter::new(64), Metrics::new())
    }

    #[test]
    fn quorum_emits_certificate() {
        let (set, keys) = make_set(&[101, 100, 100]);
        let mut voter = voter(set);
        let block = Hash32::from_bytes([7; 32]);

        let v1 = FinalityVoter::sign_vote(&keys[0], block, 5).unwrap();
        assert!(voter.submit_vote(v1, 10).unwrap().is_none(), "101/301 is no quorum");

        let v2 = FinalityVoter::sign_vote(&keys[1], block, 5).unwrap();
        let cert = voter.submit_vote(v2, 11).unwrap().expect("201/301 > 2/3");
        assert_eq!(cert.height, 5);
        assert_eq!(cert.votes.len(), 2);
        assert!(voter.is_final(5));
        assert!(voter.is_final(3), "ancestors finalize too");
        assert!(!voter.is_final(6));
        assert_eq!(voter.get_finality(5).unwrap().block_hash, block);
    }

    #[test]
    fn non_validator_vote_rejected() {
        let (set, _) = make_set(&[100, 100, 100]);
        let mut voter = voter(set);
        let outsider = KeyPair::generate(Network::Mainnet);
        let vote = FinalityVoter::sign_vote(&outsider, Hash32::ZERO, 1).unwrap();
        assert!(matches!(
            voter.submit_vote(vote, 0),
            Err(RejectReason::PeerMisbehavior(_))
        ));
    }

    #[test]
    fn tampered_vote_rejected() {
        let (set, keys) = make_set(&[100, 100, 100]);
        let mut voter = voter(set);
        let mut vote = FinalityVoter::sign_vote(&keys[0], Hash32::ZERO, 1).unwrap();
        vote.height = 2;
        assert_eq!(
            voter.submit_vote(vote, 0),
            Err(RejectReason::InvalidSignature)
        );
    }

    #[test]
    fn double_vote_slashes_and_rejects() {
        let (set, keys) = make_set(&[100, 100, 100]);
        let mut voter = voter(set);

        let a = FinalityVoter::sign_vote(&keys[0], Hash32::from_bytes([1; 32]), 4).unwrap();
        voter.submit_vote(a.clone(), 0).unwrap();

        // Re-delivering the same vote is a silent no-op.
        assert_eq!(voter.submit_vote(a, 1).unwrap(), None);

        // A conflicting vote at the same height is equivocation.
        let b = FinalityVoter::sign_vote(&keys[0], Hash32::from_bytes([2; 32]), 4).unwrap();
        assert!(matches!(
            voter.submit_vote(b, 2),
            Err(RejectReason::PeerMisbehavior(_))
        ));
    }

    #[test]
    fn stake_weighted_quorum() {
        let (set, keys) = make_set(&[700, 100, 100, 100]);
        let mut voter = voter(set);
        let block = Hash32::from_bytes([9; 32]);

        // The whale alone crosses 2/3 of 1000.
        let v = FinalityVoter::sign_vote(&keys[0], block, 1).unwrap();
        assert!(voter.submit_vote(v, 0).unwrap().is_some());
    }
}
