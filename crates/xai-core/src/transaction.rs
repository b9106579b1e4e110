use serde::{Deserialize, Serialize};

use crate::types::{amount_string, Address, Amount, Nonce, Timestamp};

// ── Sponsor ──────────────────────────────────────────────────────────────────

/// Optional fee sponsorship: a third party signs the same payload and pays
/// the fee in the sender's stead. Balance checks charge the fee against
/// `payer`, not the sender.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sponsor {
    pub payer: Address,
    /// Sponsor's secp256k1 public key, hex.
    pub public_key: String,
    /// Sponsor's ECDSA signature over the transaction's signing payload, hex.
    pub signature: String,
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// A signed XAI transaction.
///
/// The txid is SHA-256 of the canonical JSON of this object with all
/// signatures removed (see [`Transaction::signing_view`]). Amounts are
/// encoded as decimal strings on the wire so no JSON parser can drift them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    #[serde(with = "amount_string")]
    pub amount: Amount,
    #[serde(with = "amount_string")]
    pub fee: Amount,
    pub nonce: Nonce,
    pub timestamp: Timestamp,
    /// Sender's secp256k1 public key, hex.
    pub public_key: String,
    /// Sender's ECDSA signature over the signing payload, hex.
    pub signature: String,
    /// Opaque caller data. Not interpreted by consensus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<Sponsor>,
}

/// The fields covered by the txid and by every signature on the transaction:
/// everything except the signatures themselves. A sponsoring payer is
/// committed (payer + key), its signature is not.
#[derive(Serialize)]
pub struct SigningView<'a> {
    #[serde(with = "amount_string")]
    pub amount: Amount,
    #[serde(with = "amount_string")]
    pub fee: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a serde_json::Value>,
    pub nonce: Nonce,
    pub public_key: &'a str,
    pub recipient: &'a Address,
    pub sender: &'a Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor: Option<SponsorView<'a>>,
    pub timestamp: Timestamp,
}

#[derive(Serialize)]
pub struct SponsorView<'a> {
    pub payer: &'a Address,
    pub public_key: &'a str,
}

impl Transaction {
    /// Extract the signature-free view hashed into the txid and signed by the
    /// sender (and sponsor, when present).
    pub fn signing_view(&self) -> SigningView<'_> {
        SigningView {
            amount: self.amount,
            fee: self.fee,
            metadata: self.metadata.as_ref(),
            nonce: self.nonce,
            public_key: &self.public_key,
            recipient: &self.recipient,
            sender: &self.sender,
            sponsor: self.sponsor.as_ref().map(|s| SponsorView {
                payer: &s.payer,
                public_key: &s.public_key,
            }),
            timestamp: self.timestamp,
        }
    }

    /// True for the block-emission transaction: sent from the coinbase
    /// sentinel, carrying no fee.
    pub fn is_coinbase(&self) -> bool {
        self.sender.is_coinbase() && self.fee == 0
    }

    /// The account the fee is charged against: the sponsor's payer when
    /// sponsorship is attached, otherwise the sender.
    pub fn fee_payer(&self) -> &Address {
        match &self.sponsor {
            Some(s) => &s.payer,
            None => &self.sender,
        }
    }
}
