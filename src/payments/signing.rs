//! Digest and MAC helpers shared by the gateway adapters.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// HMAC-SHA256 of `message` keyed by `key`. `None` only if the MAC rejects
/// the key, which HMAC never does.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(message);
    Some(mac.finalize().into_bytes().to_vec())
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Compares a received hex digest against the expected one. Case of the
/// received value is ignored; the comparison itself is constant-time.
pub fn hex_digest_matches(expected_hex: &str, received: &str) -> bool {
    let received = received.trim().to_ascii_lowercase();
    constant_time_eq(expected_hex.as_bytes(), received.as_bytes())
}

/// Parameters that take part in a signature: everything except the
/// signature field itself and empty values, in key order.
pub fn signable_params<'a>(
    params: &'a BTreeMap<String, String>,
    signature_field: &str,
) -> impl Iterator<Item = (&'a String, &'a String)> {
    let signature_field = signature_field.to_string();
    params
        .iter()
        .filter(move |(key, value)| key.as_str() != signature_field && !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_known_vector() {
        let mac = hmac_sha256(b"key", b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            hex::encode(mac),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_hex_digest_matches_ignores_case() {
        let expected = sha256_hex("abc");
        assert!(hex_digest_matches(&expected, &expected.to_uppercase()));
        assert!(!hex_digest_matches(&expected, &sha256_hex("abd")));
        assert!(!hex_digest_matches(&expected, ""));
    }

    #[test]
    fn test_signable_params_skips_signature_and_empty() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        params.insert("hash".to_string(), "x".to_string());
        params.insert("empty".to_string(), String::new());

        let keys: Vec<&str> = signable_params(&params, "hash").map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
