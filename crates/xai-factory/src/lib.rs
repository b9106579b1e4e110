//! Transaction construction for external senders: canonical unsigned
//! payloads, signature attachment, and full local validation. The factory
//! never touches the network — callers bring their own key custody and
//! submit the finished transaction themselves.

use serde::{Deserialize, Serialize};
use tracing::debug;

use xai_core::transaction::{Sponsor, Transaction};
use xai_core::types::{Address, Amount, Hash32, Network, Timestamp};
use xai_core::RejectReason;
use xai_crypto::{derive_address, verify_signature};
use xai_state::AccountView;

/// What a caller wants to send. The factory fills in nonce, timestamp, and
/// the canonical hash to sign.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxRequest {
    pub recipient: Address,
    pub amount: Amount,
    pub fee: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Fee sponsorship: the payer's address and public key. The sponsor's
    /// signature is attached alongside the sender's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<(Address, String)>,
}

/// A fully-formed transaction awaiting signature(s). `signing_hash` is what
/// the sender (and sponsor) sign; the same bytes become the txid.
#[derive(Clone, Debug)]
pub struct UnsignedTx {
    tx: Transaction,
    pub signing_bytes: Vec<u8>,
    pub signing_hash: Hash32,
}

impl UnsignedTx {
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }
}

/// Builds and locally validates transactions for one network.
#[derive(Clone, Debug)]
pub struct TxFactory {
    network: Network,
    max_tx_bytes: usize,
}

impl TxFactory {
    pub fn new(network: Network, max_tx_bytes: usize) -> Self {
        Self {
            network,
            max_tx_bytes,
        }
    }

    /// Build the canonical unsigned transaction: nonce is the sender's next
    /// admissible (`confirmed + 1` against the supplied view), timestamp is
    /// `now`.
    pub fn build_unsigned(
        &self,
        sender_pubkey_hex: &str,
        request: TxRequest,
        state: &impl AccountView,
        now: Timestamp,
    ) -> Result<UnsignedTx, RejectReason> {
        let pubkey_bytes = hex::decode(sender_pubkey_hex)
            .map_err(|e| RejectReason::Serialization(format!("bad sender pubkey hex: {e}")))?;
        let sender = derive_address(&pubkey_bytes, self.network);

        if request.recipient.network() != Some(self.network) {
            return Err(RejectReason::BadAddress(format!(
                "recipient {} is not a {:?} address",
                request.recipient, self.network
            )));
        }
        if request.amount == 0 {
            return Err(RejectReason::ZeroAmount);
        }

        let sponsor = request.sponsor.map(|(payer, public_key)| Sponsor {
            payer,
            public_key,
            signature: String::new(),
        });
        if let Some(s) = &sponsor {
            if s.payer.network() != Some(self.network) {
                return Err(RejectReason::BadAddress(format!(
                    "sponsor payer {} is not a {:?} address",
                    s.payer, self.network
                )));
            }
        }

        let tx = Transaction {
            sender: sender.clone(),
            recipient: request.recipient,
            amount: request.amount,
            fee: request.fee,
            nonce: state.nonce(&sender) + 1,
            timestamp: now,
            public_key: sender_pubkey_hex.to_string(),
            signature: String::new(),
            metadata: request.metadata,
            sponsor,
        };
        let signing_bytes = xai_codec::tx_signing_bytes(&tx)?;
        let signing_hash = xai_codec::sha256(&signing_bytes);
        debug!(sender = %tx.sender, nonce = tx.nonce, "unsigned transaction built");
        Ok(UnsignedTx {
            tx,
            signing_bytes,
            signing_hash,
        })
    }

    /// Attach the sender's signature (and the sponsor's, when the request
    /// declared one), then run full local validation. Returns the finished
    /// transaction and its txid.
    pub fn attach_signatures(
        &self,
        unsigned: UnsignedTx,
        sender_signature_hex: &str,
        sponsor_signature_hex: Option<&str>,
        state: &impl AccountView,
    ) -> Result<(Transaction, Hash32), RejectReason> {
        let mut tx = unsigned.tx;
        tx.signature = sender_signature_hex.to_string();
        match (&mut tx.sponsor, sponsor_signature_hex) {
            (Some(s), Some(sig)) => s.signature = sig.to_string(),
            (Some(_), None) => {
                return Err(RejectReason::InvalidSignature);
            }
            (None, Some(_)) => {
                return Err(RejectReason::Serialization(
                    "sponsor signature without a declared sponsor".into(),
                ));
            }
            (None, None) => {}
        }

        self.validate(&tx, state)?;
        let txid = xai_codec::txid(&tx)?;
        Ok((tx, txid))
    }

    /// Full local validation: signatures under the declared keys, canonical
    /// size, nonce freshness, and solvency of sender and fee payer.
    pub fn validate(&self, tx: &Transaction, state: &impl AccountView) -> Result<(), RejectReason> {
        let size = xai_codec::canonical_size(tx)?;
        if size > self.max_tx_bytes {
            return Err(RejectReason::BadSize {
                size,
                max: self.max_tx_bytes,
            });
        }

        let signing_bytes = xai_codec::tx_signing_bytes(tx)?;
        verify_signature(&tx.public_key, &signing_bytes, &tx.signature)?;
        if let Some(s) = &tx.sponsor {
            verify_signature(&s.public_key, &signing_bytes, &s.signature)?;
            let payer_key = hex::decode(&s.public_key)
                .map_err(|_| RejectReason::InvalidSignature)?;
            if derive_address(&payer_key, self.network) != s.payer {
                return Err(RejectReason::BadAddress(
                    "sponsor key does not derive the payer address".into(),
                ));
            }
        }

        let expected = state.nonce(&tx.sender) + 1;
        if tx.nonce != expected {
            return Err(RejectReason::NonceGap {
                expected,
                got: tx.nonce,
            });
        }

        let self_paying = tx.fee_payer() == &tx.sender;
        let sender_need = if self_paying {
            tx.amount + tx.fee
        } else {
            tx.amount
        };
        let sender_have = state.balance(&tx.sender);
        if sender_have < sender_need {
            return Err(RejectReason::InsufficientBalance {
                need: sender_need,
                have: sender_have,
            });
        }
        if !self_paying {
            let payer = tx.fee_payer();
            let have = state.balance(payer);
            if have < tx.fee {
                return Err(RejectReason::InsufficientBalance {
                    need: tx.fee,
                    have,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::transaction::Transaction;
    use xai_crypto::KeyPair;
    use xai_state::UtxoState;

    fn funded(kp: &KeyPair, balance: u128) -> UtxoState {
        let coinbase = Transaction {
            sender: Address::coinbase(Network::Mainnet),
            recipient: kp.address.clone(),
            amount: balance,
            fee: 0,
            nonce: 0,
            timestamp: 0,
            public_key: String::new(),
            signature: String::new(),
            metadata: None,
            sponsor: None,
        };
        let mut state = UtxoState::new();
        state.apply_tx(&coinbase, None).unwrap();
        state
    }

    #[test]
    fn build_sign_validate_round_trip() {
        let kp = KeyPair::generate(Network::Mainnet);
        let to = KeyPair::generate(Network::Mainnet).address;
        let state = funded(&kp, 100);
        let factory = TxFactory::new(Network::Mainnet, 100 * 1024);

        let unsigned = factory
            .build_unsigned(
                &kp.public_key_hex,
                TxRequest {
                    recipient: to.clone(),
                    amount: 40,
                    fee: 2,
                    metadata: None,
                    sponsor: None,
                },
                &state,
                1_700_000_000,
            )
            .unwrap();
        assert_eq!(unsigned.tx().nonce, 1);
        assert_eq!(unsigned.tx().sender, kp.address);

        let sig = kp.sign(&unsigned.signing_bytes);
        let (tx, txid) = factory
            .attach_signatures(unsigned, &sig, None, &state)
            .unwrap();
        assert_eq!(txid, xai_codec::txid(&tx).unwrap());
    }

    #[test]
    fn signing_hash_is_txid_preimage() {
        let kp = KeyPair::generate(Network::Mainnet);
        let to = KeyPair::generate(Network::Mainnet).address;
        let state = funded(&kp, 100);
        let factory = TxFactory::new(Network::Mainnet, 100 * 1024);

        let unsigned = factory
            .build_unsigned(
                &kp.public_key_hex,
                TxRequest {
                    recipient: to,
                    amount: 1,
                    fee: 1,
                    metadata: None,
                    sponsor: None,
                },
                &state,
                1,
            )
            .unwrap();
        let sig = kp.sign(&unsigned.signing_bytes);
        let expected_txid = unsigned.signing_hash;
        let (_, txid) = factory
            .attach_signatures(unsigned, &sig, None, &state)
            .unwrap();
        assert_eq!(txid, expected_txid);
    }

    #[test]
    fn overdraft_fails_validation() {
        let kp = KeyPair::generate(Network::Mainnet);
        let to = KeyPair::generate(Network::Mainnet).address;
        let state = funded(&kp, 10);
        let factory = TxFactory::new(Network::Mainnet, 100 * 1024);

        let unsigned = factory
            .build_unsigned(
                &kp.public_key_hex,
                TxRequest {
                    recipient: to,
                    amount: 10,
                    fee: 1,
                    metadata: None,
                    sponsor: None,
                },
                &state,
                1,
            )
            .unwrap();
        let sig = kp.sign(&unsigned.signing_bytes);
        assert!(matches!(
            factory.attach_signatures(unsigned, &sig, None, &state),
            Err(RejectReason::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn sponsorship_requires_both_signatures_and_solvent_payer() {
        let kp = KeyPair::generate(Network::Mainnet);
        let payer = KeyPair::generate(Network::Mainnet);
        let to = KeyPair::generate(Network::Mainnet).address;
        let mut state = funded(&kp, 10);
        let payer_coinbase = Transaction {
            sender: Address::coinbase(Network::Mainnet),
            recipient: payer.address.clone(),
            amount: 5,
            fee: 0,
            nonce: 0,
            timestamp: 0,
            public_key: String::new(),
            signature: String::new(),
            metadata: None,
            sponsor: None,
        };
        state.apply_tx(&payer_coinbase, None).unwrap();

        let factory = TxFactory::new(Network::Mainnet, 100 * 1024);
        let unsigned = factory
            .build_unsigned(
                &kp.public_key_hex,
                TxRequest {
                    recipient: to,
                    amount: 10,
                    fee: 3,
                    metadata: None,
                    sponsor: Some((payer.address.clone(), payer.public_key_hex.clone())),
                },
                &state,
                1,
            )
            .unwrap();
        let sender_sig = kp.sign(&unsigned.signing_bytes);
        let payer_sig = payer.sign(&unsigned.signing_bytes);

        // Missing sponsor signature is refused.
        assert!(factory
            .attach_signatures(unsigned.clone(), &sender_sig, None, &state)
            .is_err());

        // With both signatures the sender may spend its full balance; the
        // payer covers the fee.
        let (tx, _) = factory
            .attach_signatures(unsigned, &sender_sig, Some(&payer_sig), &state)
            .unwrap();
        assert_eq!(tx.fee_payer(), &payer.address);
    }

    #[test]
    fn wrong_network_recipient_refused() {
        let kp = KeyPair::generate(Network::Mainnet);
        let testnet_to = KeyPair::generate(Network::Testnet).address;
        let state = funded(&kp, 100);
        let factory = TxFactory::new(Network::Mainnet, 100 * 1024);

        assert!(matches!(
            factory.build_unsigned(
                &kp.public_key_hex,
                TxRequest {
                    recipient: testnet_to,
                    amount: 1,
                    fee: 0,
                    metadata: None,
                    sponsor: None,
                },
                &state,
                1,
            ),
            Err(RejectReason::BadAddress(_))
        ));
    }
}
