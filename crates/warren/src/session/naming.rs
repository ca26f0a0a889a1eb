//! Session identifiers and derived names.

use once_cell::sync::Lazy;
use regex::Regex;

static SESSION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^s[a-zA-Z0-9]+$").expect("Invalid regex pattern for session id"));

/// Prefix of the tmux session backing a registry row.
pub const BACKING_PREFIX: &str = "sess";

/// New session identifier: `s`, unix milliseconds, then 64 random bits in hex.
pub fn generate_session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: [u8; 8] = rand::random();
    format!("s{}{}", millis, hex::encode(suffix))
}

/// Name of the in-container session that backs `session_id`.
pub fn backing_name(session_id: &str) -> String {
    format!("{}{}", BACKING_PREFIX, session_id)
}

pub fn is_valid_session_id(id: &str) -> bool {
    SESSION_ID.is_match(id)
}

/// Display name given to the `n`th session of a user.
pub fn default_display_name(n: i64) -> String {
    format!("Agent {}", n)
}
