//! Provider redirect/callback handshake for Google and GitHub.

use std::str::FromStr;

use axum::extract::FromRef;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::{header::ACCEPT, redirect::Policy, Client};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::{
    auth::dto::OAuthUserRequest,
    config::{OAuthConfig, OAuthProviderConfig},
    state::AppState,
};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

type ProviderClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unknown OAuth provider {0}")]
    UnknownProvider(String),
    #[error("{0} OAuth is not enabled")]
    Disabled(&'static str),
    #[error("invalid OAuth endpoint: {0}")]
    Config(String),
    #[error("OAuth code exchange failed: {0}")]
    Exchange(String),
    #[error("failed to fetch OAuth profile: {0}")]
    Profile(String),
    #[error("failed to build http client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    GitHub,
}

impl FromStr for Provider {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::GitHub),
            other => Err(OAuthError::UnknownProvider(other.to_string())),
        }
    }
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::GitHub => "github",
        }
    }

    fn auth_url(&self) -> &'static str {
        match self {
            Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::GitHub => "https://github.com/login/oauth/authorize",
        }
    }

    fn token_url(&self) -> &'static str {
        match self {
            Self::Google => "https://oauth2.googleapis.com/token",
            Self::GitHub => "https://github.com/login/oauth/access_token",
        }
    }

    fn scopes(&self) -> &'static [&'static str] {
        match self {
            Self::Google => &["openid", "email", "profile"],
            Self::GitHub => &["read:user", "user:email"],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

fn google_profile(info: GoogleUserInfo) -> OAuthUserRequest {
    let email = info.email.unwrap_or_default();
    let username = email.split('@').next().unwrap_or_default().to_string();
    OAuthUserRequest {
        id: info.sub,
        username,
        first_name: info.given_name.unwrap_or_default(),
        last_name: info.family_name.unwrap_or_default(),
        email,
        profile_picture: info.picture.unwrap_or_default(),
        verified: info.email_verified,
        oauth_provider: Provider::Google.as_str().to_string(),
    }
}

/// GitHub hides the address unless it is public; the primary verified one
/// from `/user/emails` is preferred.
fn github_profile(user: GitHubUser, emails: &[GitHubEmail]) -> OAuthUserRequest {
    let primary = emails.iter().find(|e| e.primary && e.verified);
    let (email, verified) = match (primary, user.email) {
        (Some(e), _) => (e.email.clone(), true),
        (None, Some(public)) => {
            let verified = emails.iter().any(|e| e.verified && e.email == public);
            (public, verified)
        }
        (None, None) => (String::new(), false),
    };

    let name = user.name.unwrap_or_default();
    let (first_name, last_name) = match name.trim().split_once(char::is_whitespace) {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.trim().to_string(), String::new()),
    };

    OAuthUserRequest {
        id: user.id.to_string(),
        username: user.login,
        first_name,
        last_name,
        email,
        profile_picture: user.avatar_url.unwrap_or_default(),
        verified,
        oauth_provider: Provider::GitHub.as_str().to_string(),
    }
}

/// Configured providers plus the HTTP client used to talk to them.
#[derive(Clone)]
pub struct OAuthProviders {
    config: OAuthConfig,
    http: Client,
}

impl FromRef<AppState> for OAuthProviders {
    fn from_ref(state: &AppState) -> Self {
        state.oauth.clone()
    }
}

impl OAuthProviders {
    pub fn new(config: &OAuthConfig) -> Result<Self, OAuthError> {
        // Token endpoints must not be followed through redirects.
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .redirect(Policy::none())
            .build()
            .map_err(|e| OAuthError::Client(e.to_string()))?;
        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    /// Parses the path segment and checks the provider is configured.
    pub fn resolve(&self, name: &str) -> Result<Provider, OAuthError> {
        let provider = name.parse::<Provider>()?;
        self.credentials(provider)?;
        Ok(provider)
    }

    fn credentials(&self, provider: Provider) -> Result<&OAuthProviderConfig, OAuthError> {
        let creds = match provider {
            Provider::Google => self.config.google.as_ref(),
            Provider::GitHub => self.config.github.as_ref(),
        };
        creds.ok_or(OAuthError::Disabled(provider.as_str()))
    }

    pub fn callback_url(&self, provider: Provider) -> String {
        format!(
            "{}/api/auth/oauth/callback/{}",
            self.config.backend_url,
            provider.as_str()
        )
    }

    fn client(&self, provider: Provider) -> Result<ProviderClient, OAuthError> {
        let creds = self.credentials(provider)?;
        let invalid = |e: oauth2::url::ParseError| OAuthError::Config(e.to_string());
        Ok(BasicClient::new(ClientId::new(creds.client_id.clone()))
            .set_client_secret(ClientSecret::new(creds.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(provider.auth_url().to_string()).map_err(invalid)?)
            .set_token_uri(TokenUrl::new(provider.token_url().to_string()).map_err(invalid)?)
            .set_redirect_uri(RedirectUrl::new(self.callback_url(provider)).map_err(invalid)?))
    }

    /// Provider consent URL and the CSRF state the callback must echo.
    pub fn authorize_url(&self, provider: Provider) -> Result<(String, String), OAuthError> {
        let client = self.client(provider)?;
        let (url, state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(provider.scopes().iter().map(|s| Scope::new(s.to_string())))
            .url();
        debug!(provider = provider.as_str(), "oauth consent url built");
        Ok((url.to_string(), state.secret().clone()))
    }

    /// Trades the authorization code for a token and reads the profile.
    #[instrument(skip(self, code))]
    pub async fn complete(
        &self,
        provider: Provider,
        code: String,
    ) -> Result<OAuthUserRequest, OAuthError> {
        let client = self.client(provider)?;
        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                error!(error = %e, "oauth code exchange failed");
                OAuthError::Exchange(e.to_string())
            })?;
        let access = token.access_token().secret();

        let profile = match provider {
            Provider::Google => {
                let info: GoogleUserInfo = self
                    .get_json("https://openidconnect.googleapis.com/v1/userinfo", access)
                    .await?;
                google_profile(info)
            }
            Provider::GitHub => {
                let user: GitHubUser = self.get_json("https://api.github.com/user", access).await?;
                let emails: Vec<GitHubEmail> = self
                    .get_json("https://api.github.com/user/emails", access)
                    .await?;
                github_profile(user, &emails)
            }
        };
        info!(user_id = %profile.id, "oauth profile fetched");
        Ok(profile)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::Profile(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::Profile(format!("{url} - {}", response.status())));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| OAuthError::Profile(e.to_string()))
    }
}
