//! The `jwtToken` session cookie and the OAuth handshake state cookie.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

pub const SESSION_COOKIE_NAME: &str = "jwtToken";

/// `HttpOnly`, `Secure` session cookie living for `ttl_days`.
pub fn session_cookie(token: &str, ttl_days: i64) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = ttl_days.max(0) * 24 * 60 * 60;
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; Secure; Max-Age={max_age}"
    ))
}

pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("jwtToken=; Path=/; HttpOnly; Secure; Max-Age=0")
}

/// Session token from the request cookies, if any.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE_NAME)
}

/// Short-lived cookie holding the CSRF state of an OAuth handshake.
pub const OAUTH_STATE_COOKIE_NAME: &str = "oauthState";

pub fn oauth_state_cookie(state: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{OAUTH_STATE_COOKIE_NAME}={state}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=600"
    ))
}

pub fn clear_oauth_state_cookie() -> HeaderValue {
    HeaderValue::from_static("oauthState=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0")
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or_default().trim();
            let val = parts.next().unwrap_or_default().trim();
            if key == name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}
