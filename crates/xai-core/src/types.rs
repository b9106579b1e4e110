use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::constants::{ADDRESS_BODY_LEN, ADDRESS_CHECKSUM_LEN};
use crate::error::RejectReason;

/// Token amount in integer base units. u128 comfortably covers the full
/// supply cap with headroom for intermediate sums.
pub type Amount = u128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Per-account transaction sequence number (monotonically increasing).
pub type Nonce = u64;

// ── Network ──────────────────────────────────────────────────────────────────

/// Which chain an address or node belongs to. Determines the address prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Address prefix for this network.
    pub fn prefix(self) -> &'static str {
        match self {
            Network::Mainnet => "XAI",
            Network::Testnet => "TXAI",
        }
    }
}

// ── Hash32 ───────────────────────────────────────────────────────────────────

/// A 32-byte SHA-256 digest. Serialized as lowercase hex without prefix —
/// the wire representation for block hashes, merkle roots, and txids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// The all-zero digest: genesis `previous_hash` and the empty merkle root.
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, RejectReason> {
        let bytes = hex::decode(s)
            .map_err(|e| RejectReason::Serialization(format!("bad hash hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(RejectReason::Serialization(format!(
                "hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({}…)", &self.to_hex()[..16])
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// A network-prefixed account address: `XAI`/`TXAI` followed by 40 lowercase
/// hex chars derived from SHA256(pubkey), with an optional 8-hex checksum
/// suffix (first 4 bytes of SHA256(prefix || body), validated when present).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string. The checksum check is performed
    /// by the caller (xai-crypto) because it needs SHA-256; this constructor
    /// validates shape only.
    pub fn parse(s: &str) -> Result<Self, RejectReason> {
        let (_, body) = split_prefix(s)?;
        if body.len() != ADDRESS_BODY_LEN && body.len() != ADDRESS_BODY_LEN + ADDRESS_CHECKSUM_LEN
        {
            return Err(RejectReason::BadAddress(format!(
                "address body must be {} or {} hex chars, got {}",
                ADDRESS_BODY_LEN,
                ADDRESS_BODY_LEN + ADDRESS_CHECKSUM_LEN,
                body.len()
            )));
        }
        if !body.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(RejectReason::BadAddress(
                "address body must be lowercase hex".into(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// Construct without validation. For internal use where the string was
    /// derived, not received.
    pub fn from_raw(s: String) -> Self {
        Self(s)
    }

    /// The coinbase sentinel for `network`: prefix followed by 40 zeros.
    /// Only valid as the sender of a block's emission transaction.
    pub fn coinbase(network: Network) -> Self {
        Self(format!("{}{}", network.prefix(), "0".repeat(ADDRESS_BODY_LEN)))
    }

    pub fn is_coinbase(&self) -> bool {
        self.body().map_or(false, |b| {
            b.len() == ADDRESS_BODY_LEN && b.bytes().all(|c| c == b'0')
        })
    }

    /// Which network this address belongs to, judged by prefix.
    pub fn network(&self) -> Option<Network> {
        if self.0.starts_with("TXAI") {
            Some(Network::Testnet)
        } else if self.0.starts_with("XAI") {
            Some(Network::Mainnet)
        } else {
            None
        }
    }

    /// The hex body (everything after the prefix), checksum included if present.
    pub fn body(&self) -> Option<&str> {
        split_prefix(&self.0).ok().map(|(_, b)| b)
    }

    /// True when the address carries the optional checksum suffix.
    pub fn has_checksum(&self) -> bool {
        self.body()
            .map_or(false, |b| b.len() == ADDRESS_BODY_LEN + ADDRESS_CHECKSUM_LEN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Split an address into (prefix, body). Longest prefix wins so `TXAI…`
/// never parses as mainnet.
fn split_prefix(s: &str) -> Result<(&str, &str), RejectReason> {
    if let Some(body) = s.strip_prefix("TXAI") {
        Ok(("TXAI", body))
    } else if let Some(body) = s.strip_prefix("XAI") {
        Ok(("XAI", body))
    } else {
        Err(RejectReason::BadAddress(format!(
            "unknown address prefix in {s:?}"
        )))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

// ── Amount serde helper ──────────────────────────────────────────────────────

/// Serialize token amounts as decimal strings. Canonical JSON encodes amounts
/// this way to keep them exact under every JSON parser.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|e| serde::de::Error::custom(format!("bad amount {s:?}: {e}")))
    }
}
