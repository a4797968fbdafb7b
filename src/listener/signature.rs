//! HMAC-SHA256 signatures on inbound deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Sign `parts` (concatenated) with `secret`, formatted as `sha256=<hex>`
pub fn sign(secret: &[u8], parts: &[&[u8]]) -> String {
    let mut mac = new_mac(secret);
    for part in parts {
        mac.update(part);
    }
    format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Check a `sha256=<hex>` header value against `parts`. Comparison is
/// constant time.
pub fn verify(secret: &[u8], parts: &[&[u8]], header: &str) -> bool {
    let Some(hex_tag) = header.strip_prefix(PREFIX) else {
        return false;
    };
    let Ok(tag) = hex::decode(hex_tag) else {
        return false;
    };

    let mut mac = new_mac(secret);
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(&tag).is_ok()
}

fn new_mac(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}
