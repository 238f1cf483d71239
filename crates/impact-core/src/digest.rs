//! Canonical JSON digests.
//!
//! Canonical form: compact JSON with object keys sorted at every depth.
//! Numeric tables go through serde as nested arrays, so equal numbers give
//! equal digests whatever container held them.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::DigestError;

/// Number of digest bytes kept in a run fingerprint.
pub const FINGERPRINT_BYTES: usize = 16;

/// Writes `value` in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn canonical_json_digest(value: &Value) -> String {
    sha256_bytes(canonical_json(value).as_bytes())
}

/// Run identity over keyed data.
///
/// Each top-level key, in sorted order, contributes its name and the
/// canonical form of its value. Returns the first [`FINGERPRINT_BYTES`]
/// bytes of the SHA-256 as lowercase hex.
pub fn fingerprint<T: Serialize + ?Sized>(keyed: &T) -> Result<String, DigestError> {
    let value = serde_json::to_value(keyed)?;
    let mut hasher = Sha256::new();
    match &value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(canonical_json(&map[key.as_str()]).as_bytes());
            }
        }
        other => hasher.update(canonical_json(other).as_bytes()),
    }
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..FINGERPRINT_BYTES]))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

pub fn sha256_file(path: &Path) -> Result<String, DigestError> {
    let bytes = std::fs::read(path).map_err(|source| DigestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sha256_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let a = json!({"b": {"y": 1, "x": [1.0, 2.0]}, "a": 0});
        assert_eq!(canonical_json(&a), r#"{"a":0,"b":{"x":[1.0,2.0],"y":1}}"#);
    }

    #[test]
    fn fingerprint_is_independent_of_map_order() {
        let mut h1: HashMap<String, Value> = HashMap::new();
        h1.insert("header".into(), json!({"Np": 1000.0, "Bcurr": 0.1}));
        h1.insert("lattice".into(), json!([{"name": "D1", "L": 0.5}]));
        let mut h2: BTreeMap<String, Value> = BTreeMap::new();
        h2.insert("lattice".into(), json!([{"L": 0.5, "name": "D1"}]));
        h2.insert("header".into(), json!({"Bcurr": 0.1, "Np": 1000.0}));
        let d1 = fingerprint(&h1).expect("d1");
        let d2 = fingerprint(&h2).expect("d2");
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), FINGERPRINT_BYTES * 2);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_changes_with_any_value() {
        let base = json!({"header": {"Np": 1000.0}, "fieldmaps": {"rfdata1": [[0.0, 1.0], [1.0, 2.0]]}});
        let changed = json!({"header": {"Np": 1000.0}, "fieldmaps": {"rfdata1": [[0.0, 1.0], [1.0, 2.5]]}});
        assert_ne!(
            fingerprint(&base).expect("base"),
            fingerprint(&changed).expect("changed")
        );
    }

    #[test]
    fn numeric_blocks_hash_by_content() {
        let nested: Vec<Vec<f64>> = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let arrays: [[f64; 2]; 2] = [[1.0, 2.0], [3.0, 4.0]];
        let a = fingerprint(&json!({ "m": nested })).expect("a");
        let b = fingerprint(&json!({ "m": arrays })).expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn sha256_bytes_is_prefixed_hex() {
        let d = sha256_bytes(b"abc");
        assert_eq!(
            d,
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
