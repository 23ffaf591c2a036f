use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::cookies;
use crate::{error::ApiError, state::AppState};

/// Id of the user whose session guarded this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Sliding-window session guard: the cookie must carry a valid, unexpired
/// token; the handler then runs and the response gets a re-issued cookie.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = cookies::session_token(req.headers()).ok_or_else(ApiError::unauthorized)?;

    let parsed = state.keys.parse(&token).map_err(|e| {
        warn!(error = %e, "rejected session token");
        ApiError::unauthorized()
    })?;
    if parsed.expired {
        warn!(user_id = %parsed.user_id, "expired session");
        return Err(ApiError::SessionExpired);
    }

    let ttl_days = state.keys.ttl_days();
    let fresh = state.keys.refresh(&token, ttl_days)?;
    let cookie = cookies::session_cookie(&fresh, ttl_days)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    req.extensions_mut().insert(AuthUser(parsed.user_id));
    let mut res = next.run(req).await;

    // A handler that set its own cookie (e.g. clearing it) wins.
    if !res.headers().contains_key(SET_COOKIE) {
        res.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(res)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(ApiError::unauthorized)
    }
}
