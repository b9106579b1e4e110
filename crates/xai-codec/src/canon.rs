use serde::Serialize;
use sha2::{Digest, Sha256};

use xai_core::types::Hash32;
use xai_core::RejectReason;

/// Serialize `value` to canonical JSON bytes: UTF-8, keys sorted
/// lexicographically, no insignificant whitespace.
///
/// `serde_json::Value` keeps object members in a `BTreeMap`, so routing the
/// serialization through a `Value` sorts keys for free; compact output does
/// the rest. Token amounts reach this layer already string-encoded by the
/// `amount_string` serde helper in xai-core, so no float ever represents a
/// balance.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, RejectReason> {
    let v = serde_json::to_value(value)
        .map_err(|e| RejectReason::Serialization(format!("to_value: {e}")))?;
    serde_json::to_vec(&v).map_err(|e| RejectReason::Serialization(format!("to_vec: {e}")))
}

/// SHA-256 of the canonical JSON of `value`.
pub fn sha256_canonical<T: Serialize>(value: &T) -> Result<Hash32, RejectReason> {
    let bytes = to_canonical_json(value)?;
    Ok(sha256(&bytes))
}

/// SHA-256 of raw bytes.
pub fn sha256(bytes: &[u8]) -> Hash32 {
    let digest = Sha256::digest(bytes);
    Hash32::from_bytes(digest.into())
}

/// Byte length of the canonical encoding. The size every I8 limit is
/// measured against.
pub fn canonical_size<T: Serialize>(value: &T) -> Result<usize, RejectReason> {
    Ok(to_canonical_json(value)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Shuffled {
        zebra: u32,
        apple: bool,
        mango: &'static str,
    }

    #[test]
    fn keys_sorted_and_compact() {
        let bytes = to_canonical_json(&Shuffled {
            zebra: 7,
            apple: true,
            mango: "m",
        })
        .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"apple":true,"mango":"m","zebra":7}"#
        );
    }

    #[test]
    fn nested_objects_sorted_too() {
        let v = serde_json::json!({"b": {"y": 1, "x": 2}, "a": 0});
        let bytes = to_canonical_json(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":0,"b":{"x":2,"y":1}}"#
        );
    }

    #[test]
    fn hash_is_stable() {
        let a = sha256_canonical(&serde_json::json!({"k": "v", "n": 3})).unwrap();
        let b = sha256_canonical(&serde_json::json!({"n": 3, "k": "v"})).unwrap();
        assert_eq!(a, b);
    }
}
