use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

const SESSION_SUFFIX_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SESSION_SUFFIX_LEN: usize = 7;

/// Mint a batch session id: `session-{unix millis}-{7 random base36 chars}`.
pub fn session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SESSION_SUFFIX_LEN)
        .map(|_| SESSION_SUFFIX_CHARSET[rng.gen_range(0..SESSION_SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("session-{}-{}", millis, suffix)
}

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
