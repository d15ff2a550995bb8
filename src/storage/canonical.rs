//! Canonical JSON encoding and content hashing.
//!
//! Every identity in the repository (commit ids, state ids) is the sha256 of
//! the canonical encoding produced here, so this is the one place where
//! byte-exact compatibility matters:
//!
//! - object keys sorted by code point
//! - `,` and `:` separators, no whitespace
//! - strings JSON-escaped, non-ASCII written as raw UTF-8
//! - numbers in serde_json's shortest round-trip form
//!
//! serde_json's compact writer already produces this form as long as its
//! `preserve_order` feature stays off: objects are then `BTreeMap`s and
//! iterate in key order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::storage::error::StorageResult;

/// encode a JSON value canonically
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// encode any serializable value canonically
///
/// fails if the value has no JSON representation (for example a map with
/// non-string keys) instead of producing an implementation-specific encoding
pub fn to_canonical<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

/// hex sha256 of the canonical encoding
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    let encoded = to_canonical(value)?;
    Ok(sha256_hex(encoded.as_bytes()))
}

/// hex sha256 of an already-built JSON value
pub fn value_hash(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_sorted_keys_and_separators() {
        let value = json!({"b": 1, "a": [true, null, {"d": "x", "c": 2.5}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[true,null,{"c":2.5,"d":"x"}],"b":1}"#
        );
    }

    #[test]
    fn test_unicode_is_not_escaped() {
        let value = json!({"name": "Zoë ☃", "ctl": "a\u{01}b\n"});
        assert_eq!(
            canonical_json(&value),
            "{\"ctl\":\"a\\u0001b\\n\",\"name\":\"Zoë ☃\"}"
        );
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = json!({"x": 1, "y": {"p": 1, "q": 2}});
        let b = json!({"y": {"q": 2, "p": 1}, "x": 1});
        assert_eq!(value_hash(&a), value_hash(&b));
        assert_eq!(value_hash(&a).len(), 64);
    }

    #[test]
    fn test_hash_is_stable() {
        // sha256 of the two bytes `{}`
        assert_eq!(
            value_hash(&json!({})),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_non_string_keys_fail_fast() {
        let mut map = HashMap::new();
        map.insert((1, 2), "pair");
        assert!(to_canonical(&map).is_err());
        assert!(content_hash(&map).is_err());
    }
}
