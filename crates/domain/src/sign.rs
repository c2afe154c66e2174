//! Keyed-digest signature scheme used by the payment gateway for both
//! outbound order submissions and inbound settlement callbacks.
//!
//! The scheme is dictated by the gateway protocol: drop `sign`/`sign_type`
//! and empty values, sort the remaining keys lexicographically, join them as
//! `k=v` with `&`, append the raw merchant key and take the MD5 hex digest.
//! Not a modern MAC, but it is what the other side verifies.

use std::collections::BTreeMap;

use hex::encode as hex_encode;
use md5::{Digest, Md5};

/// Name of the signature parameter itself, excluded from every digest.
pub const SIGN_KEY: &str = "sign";

/// Signature-type marker parameter, also excluded from the digest.
pub const SIGN_TYPE_KEY: &str = "sign_type";

/// Computes the gateway signature over the given parameters.
pub fn sign_params(params: &BTreeMap<String, String>, secret: &str) -> String {
    let mut to_sign = String::new();
    for (key, value) in params {
        if key == SIGN_KEY || key == SIGN_TYPE_KEY || value.is_empty() {
            continue;
        }
        if !to_sign.is_empty() {
            to_sign.push('&');
        }
        to_sign.push_str(key);
        to_sign.push('=');
        to_sign.push_str(value);
    }
    to_sign.push_str(secret);

    let mut hasher = Md5::new();
    hasher.update(to_sign.as_bytes());
    hex_encode(hasher.finalize())
}

/// Verifies an inbound callback: recomputes the signature over every field
/// except `sign` and compares it to the supplied one. A missing `sign`
/// parameter never verifies.
pub fn verify_params(params: &BTreeMap<String, String>, secret: &str) -> bool {
    let Some(supplied) = params.get(SIGN_KEY) else {
        return false;
    };
    sign_params(params, secret) == *supplied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("pid".to_string(), "1001".to_string());
        params.insert("out_trade_no".to_string(), "ORD1".to_string());
        params.insert("money".to_string(), "10.00".to_string());
        params.insert("name".to_string(), "Invite Code".to_string());
        params
    }

    #[test]
    fn signing_is_deterministic() {
        let params = base_params();
        assert_eq!(sign_params(&params, "secret"), sign_params(&params, "secret"));
    }

    #[test]
    fn empty_values_and_reserved_keys_are_ignored() {
        let mut params = base_params();
        let reference = sign_params(&params, "secret");
        params.insert("device".to_string(), String::new());
        params.insert(SIGN_KEY.to_string(), "bogus".to_string());
        params.insert(SIGN_TYPE_KEY.to_string(), "MD5".to_string());
        assert_eq!(sign_params(&params, "secret"), reference);
    }

    #[test]
    fn verify_round_trips_a_signed_set() {
        let mut params = base_params();
        let signature = sign_params(&params, "secret");
        params.insert(SIGN_KEY.to_string(), signature);
        assert!(verify_params(&params, "secret"));
    }

    #[test]
    fn verify_rejects_tampered_fields() {
        let mut params = base_params();
        let signature = sign_params(&params, "secret");
        params.insert(SIGN_KEY.to_string(), signature);
        params.insert("money".to_string(), "0.01".to_string());
        assert!(!verify_params(&params, "secret"));
    }

    #[test]
    fn verify_rejects_wrong_secret_and_missing_sign() {
        let mut params = base_params();
        assert!(!verify_params(&params, "secret"));
        let signature = sign_params(&params, "secret");
        params.insert(SIGN_KEY.to_string(), signature);
        assert!(!verify_params(&params, "other"));
    }
}
