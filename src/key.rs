//! Cache key construction.
//!
//! Keys have the shape `namespace:identifier`, optionally followed by
//! `:xxxxxxxx`, the first 8 hex characters of a SHA-256 over the canonical
//! encoding of the parameter object.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of hex characters of the parameter digest kept in the key.
pub const PARAMS_HASH_LEN: usize = 8;

/// Builder for cache keys.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Build the key for `(namespace, identifier, params)`.
    ///
    /// `None` and `Some(Value::Null)` both mean "no parameters". Parameter
    /// objects are canonicalised first, so property order never matters.
    pub fn build(namespace: &str, identifier: &str, params: Option<&Value>) -> String {
        match params {
            None | Some(Value::Null) => format!("{}:{}", namespace, identifier),
            Some(params) => format!(
                "{}:{}:{}",
                namespace,
                identifier,
                Self::params_hash(params)
            ),
        }
    }

    /// Truncated digest of the canonical parameter encoding.
    pub fn params_hash(params: &Value) -> String {
        let mut buf = Vec::with_capacity(64);
        write_canonical(params, &mut buf);
        let digest = Sha256::digest(&buf);
        let mut hex = hex::encode(digest);
        hex.truncate(PARAMS_HASH_LEN);
        hex
    }

    /// Canonical byte encoding of a parameter value.
    ///
    /// Object keys are sorted, and floats carrying an integral value are
    /// written as integers so `1` and `1.0` collide.
    pub fn canonicalize(params: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        write_canonical(params, &mut buf);
        buf
    }

    /// Key of the per-namespace invalidation set.
    pub fn invalidation_set(prefix: &str, namespace: &str) -> String {
        format!("{}:{}", prefix, namespace)
    }
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(k, out);
                out.push(b':');
                write_canonical(v, out);
            }
            out.push(b'}');
        }
    }
}

fn write_number(n: &serde_json::Number, out: &mut Vec<u8>) {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
    } else if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
    } else if let Some(f) = n.as_f64() {
        // i64::MAX as f64 and u64::MAX as f64 are 2^63 and 2^64, both exclusive
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            out.extend_from_slice((f as i64).to_string().as_bytes());
        } else if f.fract() == 0.0 && f >= i64::MAX as f64 && f < u64::MAX as f64 {
            out.extend_from_slice((f as u64).to_string().as_bytes());
        } else {
            out.extend_from_slice(f.to_string().as_bytes());
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json string escaping is deterministic
    match serde_json::to_vec(s) {
        Ok(encoded) => out.extend_from_slice(&encoded),
        Err(_) => out.extend_from_slice(s.as_bytes()),
    }
}
