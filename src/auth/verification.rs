use rand::{distributions::Alphanumeric, distributions::DistString, rngs::OsRng};

const TOKEN_LEN: usize = 32;

/// Fresh opaque verification token.
pub fn issue_token() -> String {
    Alphanumeric.sample_string(&mut OsRng, TOKEN_LEN)
}

/// Exact, case-sensitive comparison. A user without a stored token never
/// matches. Tokens do not expire and are not consumed on success.
pub fn tokens_match(stored: Option<&str>, supplied: &str) -> bool {
    match stored {
        Some(stored) => !stored.is_empty() && stored == supplied,
        None => false,
    }
}
