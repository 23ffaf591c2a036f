use std::sync::Arc;

use crate::{
    auth::{
        jwt::SessionKeys,
        oauth::{OAuthError, OAuthProviders},
    },
    config::AppConfig,
    db,
    mail::{DisabledMailer, MailSender, SmtpMailer},
    store::CredentialStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub mailer: Arc<dyn MailSender>,
    pub keys: SessionKeys,
    pub oauth: OAuthProviders,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = db::connect(&config.database).await?;
        tracing::info!(backend = store.backend(), "credential store connected");

        let mailer: Arc<dyn MailSender> = if config.smtp.enabled {
            Arc::new(SmtpMailer::new(&config.smtp)?)
        } else {
            Arc::new(DisabledMailer)
        };

        Ok(Self::from_parts(config, store, mailer)?)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn MailSender>,
    ) -> Result<Self, OAuthError> {
        let keys = SessionKeys::from(&config.jwt);
        let oauth = OAuthProviders::new(&config.oauth)?;
        Ok(Self {
            config,
            store,
            mailer,
            keys,
            oauth,
        })
    }
}
