use anyhow::Context;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod mail;
mod provision;
mod response;
mod routes;
mod state;
mod store;

use crate::{
    config::AppConfig,
    provision::{provision_all, specs_from_config, DockerCli},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "hearthbase=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load configuration")?;

    if config.provision.enabled {
        let specs = specs_from_config(&config).context("container specs")?;
        provision_all(&DockerCli::default(), &specs)
            .await
            .context("provision database containers")?;
    }

    let http = config.http.clone();
    let state = AppState::init(config).await.context("initialise state")?;
    let app = app::build_app(state);
    app::serve(app, &http).await
}
