use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::warn;

use crate::{
    error::ApiError,
    store::{RawUserData, UserRecord},
};

/// Unwraps a JSON body, turning axum's rejection into the API error shape.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            warn!(error = %rejection, "invalid request body");
            Err(ApiError::validation("Invalid Request body"))
        }
    }
}

pub(crate) fn query_args<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    match query {
        Ok(Query(args)) => Ok(args),
        Err(rejection) => {
            warn!(error = %rejection, "invalid query");
            Err(ApiError::validation("invalid query"))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerificationTarget {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendVerificationQuery {
    #[serde(rename = "tokenSet", default)]
    pub token_set: Option<String>,
}

impl SendVerificationQuery {
    pub fn use_session(&self) -> bool {
        self.token_set.as_deref() == Some("true")
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub email: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: Option<String>,
}

/// What the provider appends to the callback redirect.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Empty or missing fields keep the stored values.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub raw_data: Option<Vec<RawUserData>>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeUsernameRequest {
    pub username: String,
    #[serde(rename = "newUserName")]
    pub new_username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailRequest {
    pub email: String,
    pub new_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Arbitrary object appended as one raw-data entry.
pub type RawDataRequest = Map<String, Value>;

/// Profile as verified by the OAuth provider. The callback hands it to the
/// client, which posts it back to create the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthUserRequest {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub profile_picture: String,
    #[serde(default)]
    pub verified: bool,
    pub oauth_provider: String,
}

/// User as returned to clients. The password hash and verification token
/// stay inside the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub profile_picture: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_logged_in: Option<OffsetDateTime>,
    pub raw_data: Vec<RawUserData>,
}

impl From<UserRecord> for PublicUser {
    fn from(u: UserRecord) -> Self {
        Self {
            id: u.id,
            username: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            profile_picture: u.profile_picture,
            created_at: u.created_at,
            updated_at: u.updated_at,
            verified: u.verified,
            last_logged_in: u.last_logged_in,
            raw_data: u.raw_data,
        }
    }
}
