use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            ChangeEmailRequest, ChangeUsernameRequest, DeleteUserRequest, LoginRequest,
            OAuthUserRequest, PublicUser, RawDataRequest, SignupRequest, UpdateUserRequest,
        },
        jwt::SessionKeys,
        password::{hash_password, verify_password},
        verification,
    },
    config::AppConfig,
    error::ApiError,
    mail::{self, MailSender},
    state::AppState,
    store::{CredentialStore, OAuthUserRecord, RawUserData, Subscription, UserRecord, UserUpdate},
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(value)
}

fn checked_email(raw: &str) -> Result<String, ApiError> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation(format!("Invalid email: {email}")));
    }
    Ok(email)
}

#[derive(Debug)]
pub struct SignupOutcome {
    pub user_id: String,
    pub session_token: Option<String>,
    pub verification_sent: bool,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug)]
pub struct OAuthOutcome {
    pub user_id: String,
    pub created: bool,
    pub token: String,
}

/// Request-level account flows. Handlers translate the outcomes into HTTP.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    mailer: Arc<dyn MailSender>,
    keys: SessionKeys,
    config: Arc<AppConfig>,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            mailer: state.mailer.clone(),
            keys: state.keys.clone(),
            config: state.config.clone(),
        }
    }
}

impl AuthService {
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// True when `token` is a live session: good signature and not expired.
    fn has_live_session(&self, token: Option<&str>) -> bool {
        token
            .and_then(|t| self.keys.parse(t).ok())
            .map(|parsed| !parsed.expired)
            .unwrap_or(false)
    }

    async fn user_by_id(&self, id: &str) -> Result<UserRecord, ApiError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(ApiError::user_not_found)
    }

    fn ensure_verification_mail(&self) -> Result<(), ApiError> {
        if !self.config.auth.email_verification_enabled {
            return Err(ApiError::validation(
                "Email Verification is not configured or turned off please check again and restart the app",
            ));
        }
        if !self.config.smtp.enabled {
            return Err(ApiError::validation(
                "SMTP is not configured or turned off please check again and restart the app",
            ));
        }
        Ok(())
    }

    async fn mail_verification_token(&self, email: &str, token: &str) -> Result<(), ApiError> {
        self.mailer
            .send(email, mail::VERIFICATION_SUBJECT, &mail::verification_email(token))
            .await
            .map_err(|e| {
                error!(error = %e, email, "verification email failed");
                ApiError::from(e)
            })
    }

    pub async fn signup(
        &self,
        req: SignupRequest,
        session: Option<&str>,
    ) -> Result<SignupOutcome, ApiError> {
        if self.has_live_session(session) {
            warn!("signup attempted with a live session");
            return Err(ApiError::validation(
                "Valid Token found please log out first then sign up",
            ));
        }

        let username = required(&req.username, "username")?.to_string();
        let email = checked_email(&req.email)?;
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            warn!("password too short");
            return Err(ApiError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let now = OffsetDateTime::now_utc();
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            username,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            email,
            password_hash: hash_password(&req.password)?,
            profile_picture: self.config.auth.default_profile_picture_url.clone(),
            created_at: now,
            updated_at: now,
            verified: false,
            verification_token: Some(verification::issue_token()),
            last_logged_in: None,
            raw_data: Vec::new(),
        };

        // The store's uniqueness constraint settles concurrent signups.
        self.store.insert(&user).await.map_err(|e| {
            warn!(error = %e, email = %user.email, "signup rejected by store");
            ApiError::from(e)
        })?;
        info!(user_id = %user.id, email = %user.email, "user registered");

        let session_token = if self.config.auth.set_token_after_signup {
            Some(self.keys.issue(&user.id, self.keys.ttl_days())?)
        } else {
            None
        };

        let verification_sent = if self.config.auth.send_email_after_signup {
            self.ensure_verification_mail()?;
            let token = user.verification_token.as_deref().unwrap_or_default();
            self.mail_verification_token(&user.email, token).await?;
            true
        } else {
            false
        };

        Ok(SignupOutcome {
            user_id: user.id,
            session_token,
            verification_sent,
        })
    }

    /// Id of the still-existing user behind a live session token.
    pub async fn session_user(&self, session: Option<&str>) -> Result<Option<String>, ApiError> {
        match session.and_then(|t| self.keys.parse(t).ok()) {
            Some(parsed) if !parsed.expired => Ok(self
                .store
                .find_by_id(&parsed.user_id)
                .await?
                .map(|user| user.id)),
            _ => Ok(None),
        }
    }

    /// Callers answer live sessions through [`AuthService::session_user`]
    /// before reaching here.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginOutcome, ApiError> {
        let email = checked_email(&req.email)?;
        let user = match self.store.find_by_email(&email).await? {
            Some(u) => u,
            None => {
                warn!(email = %email, "login unknown email");
                return Err(ApiError::NotFound("User Doesnt Exist".into()));
            }
        };

        if !verify_password(&req.password, &user.password_hash)? {
            // No lockout: repeated failures are only logged.
            warn!(user_id = %user.id, "login invalid password");
            return Err(ApiError::WrongPassword("Wrong Password".into()));
        }

        let token = self.keys.issue(&user.id, self.keys.ttl_days())?;
        let update = UserUpdate {
            last_logged_in: Some(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        self.store.update_fields(&user.id, &update).await?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome {
            user_id: user.id,
            token,
        })
    }

    /// Rotates the user's verification token and mails the new one.
    pub async fn send_verification_email(&self, user_id: &str) -> Result<(), ApiError> {
        self.ensure_verification_mail()?;
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

        let token = verification::issue_token();
        let update = UserUpdate {
            verification_token: Some(token.clone()),
            ..Default::default()
        };
        self.store.update_fields(&user.id, &update).await?;
        self.mail_verification_token(&user.email, &token).await?;
        info!(user_id = %user.id, "verification email sent");
        Ok(())
    }

    pub async fn verify_email(&self, email: &str, token: &str) -> Result<(), ApiError> {
        if email.trim().is_empty() || token.is_empty() {
            return Err(ApiError::validation("Email and token are required"));
        }
        let email = checked_email(email)?;
        let user = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not Found".into()))?;

        if user.verified {
            return Err(ApiError::AlreadyVerified);
        }
        if !verification::tokens_match(user.verification_token.as_deref(), token) {
            warn!(user_id = %user.id, "verification token mismatch");
            return Err(ApiError::TokenMismatch);
        }

        // The token stays stored after use.
        let update = UserUpdate {
            verified: Some(true),
            ..Default::default()
        };
        self.store.update_fields(&user.id, &update).await?;
        info!(user_id = %user.id, "email verified");
        Ok(())
    }

    pub async fn email_available(&self, email: Option<&str>) -> Result<(), ApiError> {
        let email = checked_email(required(email.unwrap_or_default(), "email")?)?;
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(ApiError::DuplicateIdentity("User already exist".into()));
        }
        Ok(())
    }

    pub async fn username_available(&self, username: Option<&str>) -> Result<(), ApiError> {
        let username = required(username.unwrap_or_default(), "username")?;
        if self.store.find_by_username(username).await?.is_some() {
            return Err(ApiError::DuplicateIdentity("User already exist".into()));
        }
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<PublicUser, ApiError> {
        Ok(self.user_by_id(user_id).await?.into())
    }

    pub async fn update_user_info(
        &self,
        user_id: &str,
        req: UpdateUserRequest,
    ) -> Result<(), ApiError> {
        let user = self.user_by_id(user_id).await?;

        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let update = UserUpdate {
            first_name: non_empty(req.first_name),
            last_name: non_empty(req.last_name),
            profile_picture: non_empty(req.profile_picture),
            raw_data: req.raw_data.filter(|entries| !entries.is_empty()),
            ..Default::default()
        };
        self.store.update_fields(&user.id, &update).await?;
        info!(user_id = %user.id, "user info updated");
        Ok(())
    }

    pub async fn change_username(
        &self,
        session_user: &str,
        req: ChangeUsernameRequest,
    ) -> Result<(), ApiError> {
        let current = required(&req.username, "username")?;
        let new_username = required(&req.new_username, "newUserName")?.to_string();
        required(&req.password, "password")?;

        let user = self
            .store
            .find_by_username(current)
            .await?
            .ok_or_else(ApiError::user_not_found)?;
        if user.id != session_user {
            warn!(session_user, other_user = %user.id, "username change for another account");
            return Err(ApiError::unauthorized());
        }
        if !verify_password(&req.password, &user.password_hash)? {
            warn!(user_id = %user.id, "username change with wrong password");
            return Err(ApiError::WrongPassword("Wrong Password or Username".into()));
        }
        let holder = self.store.find_by_username(&new_username).await?;
        if holder.is_some_and(|other| other.id != user.id) {
            return Err(ApiError::DuplicateIdentity(
                "User already exist with this username".into(),
            ));
        }

        let update = UserUpdate {
            username: Some(new_username),
            ..Default::default()
        };
        self.store.update_fields(&user.id, &update).await?;
        info!(user_id = %user.id, "username changed");
        Ok(())
    }

    /// Moves the account to a new address; it must be verified again.
    pub async fn change_email(
        &self,
        session_user: &str,
        req: ChangeEmailRequest,
    ) -> Result<(), ApiError> {
        let email = checked_email(&req.email)?;
        let new_email = checked_email(&req.new_email)?;
        required(&req.password, "password")?;

        let user = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or_else(ApiError::user_not_found)?;
        if user.id != session_user {
            warn!(session_user, other_user = %user.id, "email change for another account");
            return Err(ApiError::unauthorized());
        }
        if !verify_password(&req.password, &user.password_hash)? {
            warn!(user_id = %user.id, "email change with wrong password");
            return Err(ApiError::WrongPassword("Wrong Password or email".into()));
        }
        if new_email != user.email && self.store.find_by_email(&new_email).await?.is_some() {
            return Err(ApiError::DuplicateIdentity(
                "User already exist with this email".into(),
            ));
        }

        let update = UserUpdate {
            email: Some(new_email),
            verified: Some(false),
            ..Default::default()
        };
        self.store.update_fields(&user.id, &update).await?;
        info!(user_id = %user.id, "email changed, verification reset");
        Ok(())
    }

    pub async fn append_raw_data(&self, user_id: &str, data: RawDataRequest) -> Result<(), ApiError> {
        self.store
            .append_raw_data(user_id, RawUserData { data })
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, user_id: &str, req: DeleteUserRequest) -> Result<(), ApiError> {
        let email = checked_email(&req.email)?;
        let user = self.user_by_id(user_id).await?;

        if user.email != email || !verify_password(&req.password, &user.password_hash)? {
            warn!(user_id = %user.id, "account deletion with wrong credentials");
            return Err(ApiError::WrongPassword("Wrong Password or email".into()));
        }

        self.store.delete(&user.id).await?;
        info!(user_id = %user.id, "account deleted");
        Ok(())
    }

    /// Signs the OAuth user up on first sight, then issues a session either way.
    pub async fn create_oauth_user(
        &self,
        req: OAuthUserRequest,
        session: Option<&str>,
    ) -> Result<OAuthOutcome, ApiError> {
        if self.has_live_session(session) {
            return Err(ApiError::validation(
                "Valid Token found please log out first then sign up",
            ));
        }
        let id = required(&req.id, "id")?.to_string();
        let provider = required(&req.oauth_provider, "oauthProvider")?.to_string();

        let created = match self.store.find_oauth_by_id(&id).await? {
            Some(_) => false,
            None => {
                let username = required(&req.username, "username")?.to_string();
                let email = checked_email(&req.email)?;
                let now = OffsetDateTime::now_utc();
                let user = OAuthUserRecord {
                    id: id.clone(),
                    username,
                    first_name: req.first_name.trim().to_string(),
                    last_name: req.last_name.trim().to_string(),
                    email,
                    profile_picture: req.profile_picture,
                    created_at: now,
                    updated_at: now,
                    verified: req.verified,
                    oauth_provider: provider,
                    verification_token: Some(verification::issue_token()),
                    raw_data: Vec::new(),
                };
                self.store.insert_oauth(&user).await?;
                info!(user_id = %id, provider = %user.oauth_provider, "oauth user registered");
                true
            }
        };

        let token = self.keys.issue(&id, self.keys.ttl_days())?;
        Ok(OAuthOutcome {
            user_id: id,
            created,
            token,
        })
    }

    pub async fn oauth_email_available(&self, email: Option<&str>) -> Result<(), ApiError> {
        let email = checked_email(required(email.unwrap_or_default(), "email")?)?;
        if self.store.find_oauth_by_email(&email).await?.is_some() {
            return Err(ApiError::DuplicateIdentity("User already exist".into()));
        }
        Ok(())
    }

    pub async fn oauth_username_available(&self, username: Option<&str>) -> Result<(), ApiError> {
        let username = required(username.unwrap_or_default(), "username")?;
        if self.store.find_oauth_by_username(username).await?.is_some() {
            return Err(ApiError::DuplicateIdentity("User already exist".into()));
        }
        Ok(())
    }

    pub async fn subscribe(&self, user_id: &str) -> Result<Subscription, ApiError> {
        Ok(self
            .store
            .subscribe(user_id, self.config.auth.live_update_queue)
            .await?)
    }
}
