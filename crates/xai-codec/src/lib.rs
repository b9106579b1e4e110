//! Deterministic serialization for everything that gets hashed or signed:
//! canonical JSON, SHA-256 digests, txids, block hashes, merkle roots.

pub mod canon;
pub mod hashing;
pub mod merkle;

pub use canon::{canonical_size, sha256, sha256_canonical, to_canonical_json};
pub use hashing::{block_hash, block_merkle_root, tx_signing_bytes, txid};
pub use merkle::merkle_root;
