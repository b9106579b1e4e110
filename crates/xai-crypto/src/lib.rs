//! secp256k1 ECDSA signing and verification, SHA-256 address derivation,
//! and the PoW leading-zero-bits arithmetic.

pub mod address;
pub mod keypair;
pub mod pow;

pub use address::{derive_address, derive_address_checksummed, matches_network, validate_address};
pub use keypair::{verify_signature, KeyPair};
pub use pow::{leading_zero_bits, meets_difficulty};
