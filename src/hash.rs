//! Keyed hash derivation
//!
//! HNAP uses HMAC-MD5 rendered as uppercase hex for private-key derivation,
//! login-token derivation and per-request signing.

use hmac::{Hmac, Mac};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

/// Compute the uppercase hex HMAC-MD5 of `message` keyed with `key`.
pub fn calculate_keyed_hash(message: &str, key: &str) -> String {
    let mut mac = HmacMd5::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}
