use std::net::SocketAddr;

use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth,
    config::HttpConfig,
    routes::{featured::featured_routes, live::live_routes},
    state::AppState,
};

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();

    let mut api = featured_routes(state.clone());
    if config.auth.enabled {
        api = api.merge(auth::router(state.clone()));
    }

    let mut app = Router::new().nest("/api", api);
    if config.auth.real_time_user_data {
        app = app.merge(live_routes(state.clone()));
    }

    app.with_state(state)
        .layer(DefaultBodyLimit::max(config.http.body_limit))
        .layer(cors_layer(&config.http))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// `*` allows any origin; credentials then cannot be allowed.
fn cors_layer(http: &HttpConfig) -> CorsLayer {
    if http.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = http
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::very_permissive()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

pub async fn serve(app: Router, http: &HttpConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", http.host, http.port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
