use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::{
    auth::{jwt::TokenError, oauth::OAuthError, password::PasswordError},
    mail::MailError,
    store::StoreError,
};

/// Body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request-boundary error. Every handler returns this and it renders as
/// `{ "error": ... }` with the matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    DuplicateIdentity(String),
    #[error("{0}")]
    WrongPassword(String),
    #[error("{0}")]
    NotFound(String),
    #[error("User is already verified")]
    AlreadyVerified,
    #[error("Wrong token Provided")]
    TokenMismatch,
    #[error("Please Log in")]
    SessionExpired,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Delivery(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized() -> Self {
        Self::Unauthorized("User is not authorised please log in".into())
    }

    pub fn user_not_found() -> Self {
        Self::NotFound("User Not Found".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::DuplicateIdentity(_)
            | ApiError::WrongPassword(_)
            | ApiError::NotFound(_)
            | ApiError::AlreadyVerified
            | ApiError::TokenMismatch
            | ApiError::SessionExpired
            | ApiError::Unsupported(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Delivery(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(field) => {
                ApiError::DuplicateIdentity(format!("User already exist with this {field}"))
            }
            StoreError::NotFound => ApiError::user_not_found(),
            StoreError::Unsupported(what) => ApiError::Unsupported(what),
            StoreError::Backend(msg) => ApiError::Internal(format!("Something went wrong: {msg}")),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(msg) => ApiError::Internal(msg),
            TokenError::InvalidSignature | TokenError::Malformed(_) => ApiError::unauthorized(),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::UnknownProvider(_) | OAuthError::Disabled(_) => {
                ApiError::validation(e.to_string())
            }
            OAuthError::Exchange(_) | OAuthError::Profile(_) => {
                ApiError::Delivery(format!("something went wrong: {e}"))
            }
            OAuthError::Config(_) | OAuthError::Client(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<MailError> for ApiError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::Disabled => ApiError::validation(
                "SMTP is not configured or turned off please check again and restart the app",
            ),
            MailError::InvalidAddress(addr) => {
                ApiError::validation(format!("Invalid email address: {addr}"))
            }
            other => ApiError::Delivery(other.to_string()),
        }
    }
}
