use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::{
    auth::extractors::{require_session, AuthUser},
    error::ApiError,
    response::{reply, SuccessResponse},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    pub email_subject: String,
    pub email_to: String,
    pub email_body: String,
}

/// Liveness probe, session echo and free-form mail.
pub fn featured_routes(state: AppState) -> Router<AppState> {
    let guard = middleware::from_fn_with_state(state.clone(), require_session);

    let mail = Router::new().route("/email/send-email", post(send_email));
    let mail = if state.config.smtp.allowed_for_everyone {
        mail
    } else {
        mail.route_layer(guard.clone())
    };

    Router::new()
        .route("/ping", get(ping))
        .merge(
            Router::new()
                .route("/auth/user-id", get(user_id))
                .route_layer(guard),
        )
        .merge(mail)
}

pub async fn ping() -> Response {
    reply(StatusCode::OK, SuccessResponse::new("Pong"))
}

pub async fn user_id(AuthUser(user_id): AuthUser) -> Response {
    reply(StatusCode::OK, SuccessResponse::new("").with("userID", user_id))
}

#[instrument(skip(state, payload))]
pub async fn send_email(
    State(state): State<AppState>,
    payload: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::validation("Invalid request body"))?;
    if req.email_to.trim().is_empty() || req.email_subject.trim().is_empty() {
        return Err(ApiError::validation(
            "Invalid request body: emailTo and emailSubject are required",
        ));
    }

    state
        .mailer
        .send(req.email_to.trim(), &req.email_subject, &req.email_body)
        .await?;
    info!(to = %req.email_to, "free-form email sent");
    Ok(reply(
        StatusCode::ACCEPTED,
        SuccessResponse::new("Email has been sent successfully"),
    ))
}
