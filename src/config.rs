use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Longest session a token may be issued for.
pub const MAX_SESSION_DAYS: i64 = 3650;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{0}")]
    Inconsistent(String),
}

/// Databases the service knows how to run and talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    MongoDb,
    MariaDb,
    Redis,
}

impl FromStr for DatabaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "mariadb" | "mysql" => Ok(Self::MariaDb),
            "redis" => Ok(Self::Redis),
            other => Err(other.to_string()),
        }
    }
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MongoDb => "mongodb",
            Self::MariaDb => "mariadb",
            Self::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub body_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub primary: DatabaseKind,
    pub running: Vec<DatabaseKind>,
    pub name: String,
    pub mongodb_url: Option<String>,
    pub mongodb_root_password: Option<String>,
    pub mongodb_port: u16,
    pub mariadb_url: Option<String>,
    pub mariadb_root_password: Option<String>,
    pub mariadb_port: u16,
    pub redis_root_password: Option<String>,
    pub redis_port: u16,
    pub connect_attempts: u32,
}

impl DatabaseConfig {
    pub fn is_running(&self, kind: DatabaseKind) -> bool {
        self.running.contains(&kind)
    }

    pub fn mongodb_url(&self) -> String {
        match &self.mongodb_url {
            Some(url) => url.clone(),
            None => format!(
                "mongodb://root:{}@127.0.0.1:{}/?directConnection=true&serverSelectionTimeoutMS=2000",
                self.mongodb_root_password.as_deref().unwrap_or_default(),
                self.mongodb_port
            ),
        }
    }

    pub fn mariadb_url(&self) -> String {
        match &self.mariadb_url {
            Some(url) => url.clone(),
            None => format!(
                "mysql://root:{}@127.0.0.1:{}/{}",
                self.mariadb_root_password.as_deref().unwrap_or_default(),
                self.mariadb_port,
                self.name
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub oauth_enabled: bool,
    pub set_token_after_signup: bool,
    pub email_verification_enabled: bool,
    pub send_email_after_signup: bool,
    pub real_time_user_data: bool,
    pub live_update_queue: usize,
    pub default_profile_picture_url: String,
}

/// Client credentials registered with one OAuth provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Provider handshake settings. A provider is usable only when configured.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Public base URL of this service; callbacks live under it.
    pub backend_url: String,
    pub google: Option<OAuthProviderConfig>,
    pub github: Option<OAuthProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub allowed_for_everyone: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    pub enabled: bool,
    pub container_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub oauth: OAuthConfig,
    pub smtp: SmtpConfig,
    pub provision: ProvisionConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup and validates it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let http = HttpConfig {
            host: env.string("APP_HOST", "0.0.0.0"),
            port: env.parsed("APP_PORT", 6644)?,
            cors_origins: env.list("CORS_ALLOWED_ORIGINS", "*"),
            body_limit: env.parsed("BODY_LIMIT_BYTES", 100 * 1024 * 1024)?,
        };

        let database = DatabaseConfig {
            primary: env.parsed_kind("PRIMARY_DB", "mongodb")?,
            running: env
                .list("RUNNING_DATABASES", "mongodb")
                .iter()
                .map(|v| {
                    v.parse::<DatabaseKind>().map_err(|value| ConfigError::Invalid {
                        key: "RUNNING_DATABASES",
                        value,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            name: env.string("DATABASE_NAME", "hearthbase"),
            mongodb_url: env.optional("MONGODB_URL"),
            mongodb_root_password: env.optional("MONGODB_ROOT_PASSWORD"),
            mongodb_port: env.parsed("MONGODB_PORT", 27018)?,
            mariadb_url: env.optional("MARIADB_URL"),
            mariadb_root_password: env.optional("MARIADB_ROOT_PASSWORD"),
            mariadb_port: env.parsed("MARIADB_PORT", 6645)?,
            redis_root_password: env.optional("REDIS_ROOT_PASSWORD"),
            redis_port: env.parsed("REDIS_PORT", 6656)?,
            connect_attempts: env.parsed("DB_CONNECT_ATTEMPTS", 30)?,
        };

        let jwt = JwtConfig {
            secret: env.optional("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            expiration_days: env.parsed("JWT_EXPIRATION_DAYS", 7)?,
        };

        let auth = AuthConfig {
            enabled: env.parsed("AUTH_ENABLED", true)?,
            oauth_enabled: env.parsed("OAUTH_ENABLED", false)?,
            set_token_after_signup: env.parsed("SET_TOKEN_AFTER_SIGNUP", false)?,
            email_verification_enabled: env.parsed("EMAIL_VERIFICATION_ENABLED", false)?,
            send_email_after_signup: env.parsed("SEND_EMAIL_AFTER_SIGNUP", false)?,
            real_time_user_data: env.parsed("REAL_TIME_USER_DATA", false)?,
            live_update_queue: env.parsed("LIVE_UPDATE_QUEUE", 16)?,
            default_profile_picture_url: env.string("DEFAULT_PROFILE_PICTURE_URL", ""),
        };

        let oauth = OAuthConfig {
            backend_url: env
                .string("BACKEND_URL", "http://localhost:6644")
                .trim_end_matches('/')
                .to_string(),
            google: env.provider(
                "GOOGLE_OAUTH_ENABLED",
                "GOOGLE_OAUTH_CLIENT_ID",
                "GOOGLE_OAUTH_CLIENT_SECRET",
            )?,
            github: env.provider(
                "GITHUB_OAUTH_ENABLED",
                "GITHUB_OAUTH_CLIENT_ID",
                "GITHUB_OAUTH_CLIENT_SECRET",
            )?,
        };

        let smtp = SmtpConfig {
            enabled: env.parsed("SMTP_ENABLED", false)?,
            host: env.string("SMTP_HOST", "smtp.gmail.com"),
            port: env.parsed("SMTP_PORT", 587)?,
            username: env.string("SMTP_USERNAME", ""),
            password: env.string("SMTP_PASSWORD", ""),
            allowed_for_everyone: env.parsed("SMTP_ALLOWED_FOR_EVERYONE", false)?,
        };

        let provision = ProvisionConfig {
            enabled: env.parsed("PROVISION_CONTAINERS", false)?,
            container_prefix: env.string("CONTAINER_PREFIX", "hearthbase"),
        };

        let config = Self {
            http,
            database,
            jwt,
            auth,
            oauth,
            smtp,
            provision,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if !(1..=MAX_SESSION_DAYS).contains(&self.jwt.expiration_days) {
            return Err(ConfigError::Invalid {
                key: "JWT_EXPIRATION_DAYS",
                value: self.jwt.expiration_days.to_string(),
            });
        }
        if self.http.cors_origins.is_empty() {
            return Err(ConfigError::Missing("CORS_ALLOWED_ORIGINS"));
        }
        if self.auth.live_update_queue == 0 {
            return Err(ConfigError::Invalid {
                key: "LIVE_UPDATE_QUEUE",
                value: "0".into(),
            });
        }

        let db = &self.database;
        if db.primary == DatabaseKind::Redis {
            return Err(ConfigError::Inconsistent(
                "PRIMARY_DB must be mongodb or mariadb".into(),
            ));
        }
        if !db.is_running(db.primary) {
            return Err(ConfigError::Inconsistent(format!(
                "primary database {} is not listed in RUNNING_DATABASES",
                db.primary.as_str()
            )));
        }
        if db.is_running(DatabaseKind::MongoDb)
            && db.mongodb_url.is_none()
            && db.mongodb_root_password.is_none()
        {
            return Err(ConfigError::Missing("MONGODB_ROOT_PASSWORD"));
        }
        if db.is_running(DatabaseKind::MariaDb)
            && db.mariadb_url.is_none()
            && db.mariadb_root_password.is_none()
        {
            return Err(ConfigError::Missing("MARIADB_ROOT_PASSWORD"));
        }
        if db.is_running(DatabaseKind::Redis) && db.redis_root_password.is_none() {
            return Err(ConfigError::Missing("REDIS_ROOT_PASSWORD"));
        }

        let has_provider = self.oauth.google.is_some() || self.oauth.github.is_some();
        if has_provider && !self.auth.oauth_enabled {
            return Err(ConfigError::Inconsistent(
                "GOOGLE_OAUTH_ENABLED / GITHUB_OAUTH_ENABLED require OAUTH_ENABLED".into(),
            ));
        }
        for (key, provider) in [
            ("GOOGLE_OAUTH_CLIENT_ID", &self.oauth.google),
            ("GITHUB_OAUTH_CLIENT_ID", &self.oauth.github),
        ] {
            if let Some(p) = provider {
                if p.client_id.is_empty() || p.client_secret.is_empty() {
                    return Err(ConfigError::Missing(key));
                }
            }
        }
        if has_provider && !self.oauth.backend_url.starts_with("http") {
            return Err(ConfigError::Invalid {
                key: "BACKEND_URL",
                value: self.oauth.backend_url.clone(),
            });
        }

        if self.smtp.enabled {
            if self.smtp.host.is_empty() {
                return Err(ConfigError::Missing("SMTP_HOST"));
            }
            if self.smtp.username.is_empty() {
                return Err(ConfigError::Missing("SMTP_USERNAME"));
            }
            if self.smtp.password.is_empty() {
                return Err(ConfigError::Missing("SMTP_PASSWORD"));
            }
        }
        if self.auth.send_email_after_signup
            && !(self.auth.email_verification_enabled && self.smtp.enabled)
        {
            return Err(ConfigError::Inconsistent(
                "SEND_EMAIL_AFTER_SIGNUP requires EMAIL_VERIFICATION_ENABLED and SMTP_ENABLED"
                    .into(),
            ));
        }
        Ok(())
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn list(&self, key: &str, default: &str) -> Vec<String> {
        self.string(key, default)
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }

    /// Credentials for a provider switched on by `enabled_key`.
    fn provider(
        &self,
        enabled_key: &'static str,
        id_key: &str,
        secret_key: &str,
    ) -> Result<Option<OAuthProviderConfig>, ConfigError> {
        if !self.parsed(enabled_key, false)? {
            return Ok(None);
        }
        Ok(Some(OAuthProviderConfig {
            client_id: self.string(id_key, ""),
            client_secret: self.string(secret_key, ""),
        }))
    }

    fn parsed_kind(&self, key: &'static str, default: &str) -> Result<DatabaseKind, ConfigError> {
        self.string(key, default)
            .parse()
            .map_err(|value| ConfigError::Invalid { key, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s3cret"),
            ("MONGODB_ROOT_PASSWORD", "root"),
        ]))
        .expect("config should load");

        assert_eq!(config.http.port, 6644);
        assert_eq!(config.http.cors_origins, vec!["*".to_string()]);
        assert_eq!(config.database.primary, DatabaseKind::MongoDb);
        assert_eq!(config.jwt.expiration_days, 7);
        assert!(config.auth.enabled);
        assert!(!config.smtp.enabled);
        assert!(config.database.mongodb_url().contains(":27018"));
    }

    #[test]
    fn missing_jwt_secret_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("MONGODB_ROOT_PASSWORD", "root")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn primary_must_be_running() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("PRIMARY_DB", "mariadb"),
            ("RUNNING_DATABASES", "mongodb"),
            ("MONGODB_ROOT_PASSWORD", "root"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn explicit_url_replaces_root_password() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("PRIMARY_DB", "mariadb"),
            ("RUNNING_DATABASES", "mariadb"),
            ("MARIADB_URL", "mysql://app:pw@db:3306/app"),
        ]))
        .expect("config should load");
        assert_eq!(config.database.mariadb_url(), "mysql://app:pw@db:3306/app");
    }

    #[test]
    fn signup_mail_requires_smtp_and_verification() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("SEND_EMAIL_AFTER_SIGNUP", "true"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn bad_numbers_are_reported_with_their_key() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("APP_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "APP_PORT",
                value: "eighty".into()
            }
        );
    }

    #[test]
    fn running_databases_parse_as_a_list() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("RUNNING_DATABASES", "mongodb, redis"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("REDIS_ROOT_PASSWORD", "root"),
        ]))
        .expect("config should load");
        assert_eq!(
            config.database.running,
            vec![DatabaseKind::MongoDb, DatabaseKind::Redis]
        );
    }

    #[test]
    fn session_lifetime_is_bounded() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("JWT_EXPIRATION_DAYS", "200000000000000"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "JWT_EXPIRATION_DAYS",
                ..
            }
        ));

        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("JWT_EXPIRATION_DAYS", "3650"),
        ]))
        .expect("upper bound is inclusive");
        assert_eq!(config.jwt.expiration_days, MAX_SESSION_DAYS);
    }

    #[test]
    fn oauth_providers_need_credentials_and_the_main_switch() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("GITHUB_OAUTH_ENABLED", "true"),
            ("GITHUB_OAUTH_CLIENT_ID", "id"),
            ("GITHUB_OAUTH_CLIENT_SECRET", "secret"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));

        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("OAUTH_ENABLED", "true"),
            ("GOOGLE_OAUTH_ENABLED", "true"),
            ("GOOGLE_OAUTH_CLIENT_ID", "id"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("GOOGLE_OAUTH_CLIENT_ID"));

        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_ROOT_PASSWORD", "root"),
            ("OAUTH_ENABLED", "true"),
            ("GOOGLE_OAUTH_ENABLED", "true"),
            ("GOOGLE_OAUTH_CLIENT_ID", "id"),
            ("GOOGLE_OAUTH_CLIENT_SECRET", "secret"),
            ("BACKEND_URL", "https://api.example.com/"),
        ]))
        .expect("google configured");
        assert_eq!(config.oauth.backend_url, "https://api.example.com");
        assert_eq!(config.oauth.google.unwrap().client_id, "id");
        assert!(config.oauth.github.is_none());
    }
}
