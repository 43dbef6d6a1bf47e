//! Time-based one-time codes bound to a browser-generated identifier.
//!
//! This is a custom HMAC construction with 1-hour windows, not RFC 6238:
//! `code = hex(HMAC-SHA256(secret, "<browserId>:<windowIndex>"))[..16]`.
//! Validation accepts the current and previous window so clients straddling
//! a boundary are not rejected.

use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Window length: codes rotate hourly.
const WINDOW_MS: i64 = 3_600_000;

/// Hex digits kept from the HMAC output.
const CODE_LEN: usize = 16;

/// Strict key grammar: `totp_<uuid-v4>_<hex{16}>`, lowercase throughout.
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^totp_([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})_([0-9a-f]{16})$",
    )
    .expect("TOTP key pattern is valid")
});

/// Issues a fresh 256-bit shared secret, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Index of the hour-long window containing `now`.
fn current_window() -> i64 {
    Utc::now().timestamp_millis() / WINDOW_MS
}

fn code_for_window(browser_id: &str, secret: &str, window: i64) -> String {
    // The key is the UTF-8 bytes of the issued hex string, matching what a
    // browser-side HMAC library does with the secret it was handed.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}:{}", browser_id, window).as_bytes());
    let digest = mac.finalize().into_bytes();
    hex::encode(digest)[..CODE_LEN].to_string()
}

/// Generates the code for the window `offset` steps from the current one.
pub fn generate_code(browser_id: &str, secret: &str, offset: i64) -> String {
    code_for_window(browser_id, secret, current_window() + offset)
}

/// Validates a submitted code against the current and previous window.
pub fn validate_code(browser_id: &str, secret: &str, code: &str) -> bool {
    let window = current_window();
    [0i64, -1]
        .iter()
        .any(|offset| constant_time_eq(code_for_window(browser_id, secret, window + offset).as_bytes(), code.as_bytes()))
}

/// Constant-time byte comparison. A length mismatch short-circuits to
/// false; equal-length inputs are compared without early exit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Parses a `totp_<browserId>_<code>` credential under the strict grammar.
/// Returns the browser id and code segments, or `None` if malformed.
pub fn parse_key(key: &str) -> Option<(String, String)> {
    KEY_PATTERN
        .captures(key)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Formats a browser id and code as a submitted credential.
pub fn format_key(browser_id: &str, code: &str) -> String {
    format!("totp_{}_{}", browser_id, code)
}
