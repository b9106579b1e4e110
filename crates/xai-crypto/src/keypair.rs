use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use xai_core::types::{Address, Network};
use xai_core::RejectReason;

use crate::address::derive_address;

/// A secp256k1 keypair with its derived XAI address.
///
/// The signing key zeroizes its scalar on drop (k256 guarantee); imported
/// secret hex passes through `Zeroizing` so the intermediate copy is wiped
/// too.
pub struct KeyPair {
    signing_key: SigningKey,
    pub public_key_hex: String,
    pub address: Address,
}

impl KeyPair {
    /// Generate a fresh secp256k1 keypair for `network`.
    pub fn generate(network: Network) -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing_key, network)
    }

    /// Restore a keypair from a hex-encoded 32-byte secret scalar.
    pub fn from_secret_hex(secret_hex: &str, network: Network) -> Result<Self, RejectReason> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex)
                .map_err(|e| RejectReason::Serialization(format!("bad secret hex: {e}")))?,
        );
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| RejectReason::Serialization(format!("bad secret scalar: {e}")))?;
        Ok(Self::from_signing_key(signing_key, network))
    }

    fn from_signing_key(signing_key: SigningKey, network: Network) -> Self {
        let pubkey_bytes = signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();
        let public_key_hex = hex::encode(&pubkey_bytes);
        let address = derive_address(&pubkey_bytes, network);
        Self {
            signing_key,
            public_key_hex,
            address,
        }
    }

    /// ECDSA-sign `message` (hashed with SHA-256 internally). Deterministic
    /// per RFC 6979; the produced signature is low-S form.
    pub fn sign(&self, message: &[u8]) -> String {
        let sig: Signature = self.signing_key.sign(message);
        hex::encode(sig.to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {} }}", self.address)
    }
}

/// Verify a hex ECDSA signature over `message` under a hex SEC1 public key.
/// High-S signatures are rejected outright — only the low-S form is valid on
/// this chain, so a signature cannot be malleated into a second txid.
pub fn verify_signature(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), RejectReason> {
    let pubkey_bytes =
        hex::decode(public_key_hex).map_err(|_| RejectReason::InvalidSignature)?;
    let verifying_key =
        VerifyingKey::from_sec1_bytes(&pubkey_bytes).map_err(|_| RejectReason::InvalidSignature)?;

    let sig_bytes = hex::decode(signature_hex).map_err(|_| RejectReason::InvalidSignature)?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| RejectReason::InvalidSignature)?;
    if signature.normalize_s().is_some() {
        return Err(RejectReason::InvalidSignature);
    }

    verifying_key
        .verify(message, &signature)
        .map_err(|_| RejectReason::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate(Network::Mainnet);
        let sig = kp.sign(b"hello xai");
        assert!(verify_signature(&kp.public_key_hex, b"hello xai", &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = KeyPair::generate(Network::Mainnet);
        let sig = kp.sign(b"hello xai");
        assert_eq!(
            verify_signature(&kp.public_key_hex, b"hello xia", &sig),
            Err(RejectReason::InvalidSignature)
        );
    }

    #[test]
    fn wrong_key_fails() {
        let kp = KeyPair::generate(Network::Mainnet);
        let other = KeyPair::generate(Network::Mainnet);
        let sig = kp.sign(b"msg");
        assert!(verify_signature(&other.public_key_hex, b"msg", &sig).is_err());
    }

    #[test]
    fn secret_hex_round_trip() {
        let kp = KeyPair::generate(Network::Testnet);
        let secret = hex::encode(kp.signing_key.to_bytes());
        let restored = KeyPair::from_secret_hex(&secret, Network::Testnet).unwrap();
        assert_eq!(kp.address, restored.address);
        assert_eq!(kp.public_key_hex, restored.public_key_hex);
    }
}
