use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    middleware,
    response::Response,
    routing::get,
    Router,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{
        dto::PublicUser,
        extractors::{require_session, AuthUser},
        services::AuthService,
    },
    error::ApiError,
    response::SuccessResponse,
    state::AppState,
    store::Subscription,
};

pub fn live_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/ws/api/user/get-user", get(user_feed))
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

/// Text frame carrying one user snapshot under `data.<key>`.
fn user_frame(message: &str, key: &str, user: impl serde::Serialize) -> Result<String, ApiError> {
    let user = serde_json::to_value(user).map_err(|e| ApiError::Internal(e.to_string()))?;
    serde_json::to_string(&SuccessResponse::new(message).with(key, user))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Upgrades to a socket that streams the session user's record.
///
/// The current record and the subscription are obtained before the upgrade,
/// so a missing user or a store without live updates is an ordinary error
/// response.
pub async fn user_feed(
    ws: WebSocketUpgrade,
    State(auth): State<AuthService>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, ApiError> {
    let current = auth.get_user(&user_id).await?;
    let first = user_frame("User data", "userData", current)?;
    let subscription = auth.subscribe(&user_id).await?;

    Ok(ws.on_upgrade(move |socket| pump(socket, user_id, first, subscription)))
}

async fn pump(mut socket: WebSocket, user_id: String, first: String, mut sub: Subscription) {
    info!(%user_id, "live user feed opened");
    if socket.send(Message::Text(first)).await.is_err() {
        sub.cancel();
        return;
    }

    loop {
        tokio::select! {
            update = sub.next() => {
                let Some(user) = update else {
                    debug!(%user_id, "user feed ended");
                    break;
                };
                let frame = match user_frame("User updated", "user", PublicUser::from(user)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode user update");
                        break;
                    }
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    sub.cancel();
    info!(%user_id, "live user feed closed");
}
