use axum::Router;

use crate::state::AppState;

pub mod cookies;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod oauth;
pub mod password;
pub mod services;
pub mod verification;

/// Account routes, with the OAuth ones when enabled.
pub fn router(state: AppState) -> Router<AppState> {
    let oauth = state.config.auth.oauth_enabled;
    let routes = handlers::auth_routes(state);
    if oauth {
        routes.merge(handlers::oauth_routes())
    } else {
        routes
    }
}
