use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::{JwtConfig, MAX_SESSION_DAYS};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("failed to sign session token: {0}")]
    Signing(String),
    #[error("session token signature is invalid")]
    InvalidSignature,
    #[error("session token is malformed: {0}")]
    Malformed(String),
}

/// Session token payload.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user id
    pub iat: i64,
    pub exp: i64,
}

/// Outcome of reading a session token whose signature checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub user_id: String,
    pub expired: bool,
}

/// HS256 keys plus the configured session lifetime.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_days: i64,
}

impl From<&JwtConfig> for SessionKeys {
    fn from(cfg: &JwtConfig) -> Self {
        Self::new(&cfg.secret, cfg.expiration_days)
    }
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_days,
        }
    }

    pub fn ttl_days(&self) -> i64 {
        self.ttl_days
    }

    /// Signs a token for `user_id` valid for `ttl_days` from now. Any number
    /// of tokens per user may be valid at once. Lifetimes beyond
    /// `MAX_SESSION_DAYS` either way are clamped.
    pub fn issue(&self, user_id: &str, ttl_days: i64) -> Result<String, TokenError> {
        let ttl_days = ttl_days.clamp(-MAX_SESSION_DAYS, MAX_SESSION_DAYS);
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + Duration::days(ttl_days)).unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(user_id, ttl_days, "session token signed");
        Ok(token)
    }

    /// Signature and shape are checked here; expiry is reported, not rejected.
    pub fn parse(&self, token: &str) -> Result<ParsedToken, TokenError> {
        let claims = self.decode_claims(token)?;
        let expired = claims.exp <= OffsetDateTime::now_utc().unix_timestamp();
        debug!(user_id = %claims.sub, expired, "session token verified");
        Ok(ParsedToken {
            user_id: claims.sub,
            expired,
        })
    }

    /// Re-issues for the same subject. The old token stays valid until its
    /// own expiry.
    pub fn refresh(&self, token: &str, ttl_days: i64) -> Result<String, TokenError> {
        let claims = self.decode_claims(token)?;
        self.issue(&claims.sub, ttl_days)
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;
        if data.claims.sub.is_empty() {
            return Err(TokenError::Malformed("empty subject".into()));
        }
        Ok(data.claims)
    }
}
