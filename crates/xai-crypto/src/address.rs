use sha2::{Digest, Sha256};

use xai_core::constants::{ADDRESS_BODY_LEN, ADDRESS_CHECKSUM_LEN};
use xai_core::types::{Address, Network};
use xai_core::RejectReason;

/// Derive the XAI address for a public key: network prefix plus the first 40
/// lowercase hex chars of SHA256(pubkey).
pub fn derive_address(pubkey_bytes: &[u8], network: Network) -> Address {
    let digest = Sha256::digest(pubkey_bytes);
    let body = &hex::encode(digest)[..ADDRESS_BODY_LEN];
    Address::from_raw(format!("{}{}", network.prefix(), body))
}

/// Derive the checksummed form: the plain address plus an 8-hex suffix, the
/// first 4 bytes of SHA256(prefix || body).
pub fn derive_address_checksummed(pubkey_bytes: &[u8], network: Network) -> Address {
    let plain = derive_address(pubkey_bytes, network);
    let check = checksum(plain.as_str());
    Address::from_raw(format!("{}{}", plain.as_str(), check))
}

/// Full address validation: shape, known prefix, and — when the optional
/// checksum suffix is present — checksum correctness.
pub fn validate_address(s: &str) -> Result<Address, RejectReason> {
    let addr = Address::parse(s)?;
    if addr.has_checksum() {
        let split = s.len() - ADDRESS_CHECKSUM_LEN;
        let (stem, suffix) = s.split_at(split);
        if checksum(stem) != suffix {
            return Err(RejectReason::BadAddress(format!(
                "checksum mismatch in {s:?}"
            )));
        }
    }
    Ok(addr)
}

/// True when `addr` belongs to `network`. Cross-network addresses are
/// rejected at validation, never silently re-prefixed.
pub fn matches_network(addr: &Address, network: Network) -> bool {
    addr.network() == Some(network)
}

fn checksum(stem: &str) -> String {
    let digest = Sha256::digest(stem.as_bytes());
    hex::encode(&digest[..ADDRESS_CHECKSUM_LEN / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_address_shape() {
        let addr = derive_address(b"\x02pubkey", Network::Mainnet);
        assert!(addr.as_str().starts_with("XAI"));
        assert_eq!(addr.as_str().len(), 3 + ADDRESS_BODY_LEN);
        assert!(matches_network(&addr, Network::Mainnet));
        assert!(!matches_network(&addr, Network::Testnet));
    }

    #[test]
    fn checksummed_form_validates() {
        let addr = derive_address_checksummed(b"\x02pubkey", Network::Testnet);
        assert_eq!(addr.as_str().len(), 4 + ADDRESS_BODY_LEN + ADDRESS_CHECKSUM_LEN);
        assert!(validate_address(addr.as_str()).is_ok());
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let addr = derive_address_checksummed(b"\x02pubkey", Network::Mainnet);
        let mut s = addr.as_str().to_string();
        // Flip the final checksum char.
        let last = s.pop().unwrap();
        s.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(
            validate_address(&s),
            Err(RejectReason::BadAddress(_))
        ));
    }

    #[test]
    fn plain_form_skips_checksum() {
        let addr = derive_address(b"\x02pubkey", Network::Mainnet);
        assert!(validate_address(addr.as_str()).is_ok());
    }

    #[test]
    fn same_key_differs_across_networks() {
        let main = derive_address(b"\x02k", Network::Mainnet);
        let test = derive_address(b"\x02k", Network::Testnet);
        assert_ne!(main.as_str(), test.as_str());
        assert_eq!(main.body(), test.body());
    }
}
