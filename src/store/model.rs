use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One application-defined attachment on a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUserData {
    pub data: Map<String, Value>,
}

/// User record as the credential store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String, // argon2 PHC string, never leaves the service
    pub profile_picture: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub verified: bool,
    pub verification_token: Option<String>,
    pub last_logged_in: Option<OffsetDateTime>,
    pub raw_data: Vec<RawUserData>,
}

/// Federated identity; `id` is the provider's subject.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthUserRecord {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub profile_picture: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub verified: bool,
    pub oauth_provider: String,
    pub verification_token: Option<String>,
    pub raw_data: Vec<RawUserData>,
}

/// Partial update; `None` fields are left untouched. `updated_at` is always
/// bumped by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
    pub verified: Option<bool>,
    pub verification_token: Option<String>,
    pub last_logged_in: Option<OffsetDateTime>,
    pub raw_data: Option<Vec<RawUserData>>,
}

impl UserUpdate {
    pub fn apply(&self, user: &mut UserRecord, now: OffsetDateTime) {
        if let Some(v) = &self.username {
            user.username = v.clone();
        }
        if let Some(v) = &self.first_name {
            user.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            user.last_name = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = &self.profile_picture {
            user.profile_picture = v.clone();
        }
        if let Some(v) = self.verified {
            user.verified = v;
        }
        if let Some(v) = &self.verification_token {
            user.verification_token = Some(v.clone());
        }
        if let Some(v) = self.last_logged_in {
            user.last_logged_in = Some(v);
        }
        if let Some(v) = &self.raw_data {
            user.raw_data = v.clone();
        }
        user.updated_at = now;
    }
}
