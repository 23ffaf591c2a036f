pub mod mariadb;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod mongo;
pub mod subscription;

use async_trait::async_trait;
use thiserror::Error;

pub use model::{OAuthUserRecord, RawUserData, UserRecord, UserUpdate};
pub use subscription::Subscription;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write; carries the field name.
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error("record not found")]
    NotFound,
    #[error("{0}")]
    Unsupported(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port for accounts. One implementation per backend; the rest
/// of the service only sees this trait.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>>;

    /// Fails with [`StoreError::Duplicate`] when id, email or username is taken.
    async fn insert(&self, user: &UserRecord) -> StoreResult<()>;
    async fn update_fields(&self, id: &str, update: &UserUpdate) -> StoreResult<()>;
    /// Atomic with respect to concurrent appends on the same user.
    async fn append_raw_data(&self, id: &str, entry: RawUserData) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;

    async fn find_oauth_by_id(&self, id: &str) -> StoreResult<Option<OAuthUserRecord>>;
    async fn find_oauth_by_email(&self, email: &str) -> StoreResult<Option<OAuthUserRecord>>;
    async fn find_oauth_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<OAuthUserRecord>>;
    async fn insert_oauth(&self, user: &OAuthUserRecord) -> StoreResult<()>;

    /// Live feed of the user's record, re-queried after every change.
    async fn subscribe(&self, id: &str, capacity: usize) -> StoreResult<Subscription>;
}

/// Which unique field a backend's duplicate-key message refers to. Only the
/// key or index name is read; the duplicated value can contain anything.
pub(crate) fn duplicate_field(message: &str) -> &'static str {
    let key = if let Some((_, key)) = message.rsplit_once(" for key ") {
        // MariaDB: Duplicate entry '<value>' for key '<key>'
        key.trim().trim_matches(|c| c == '\'' || c == '`')
    } else if let Some((_, rest)) = message.split_once(" index: ") {
        // MongoDB: ... index: <name> dup key: { ... }
        rest.split_whitespace().next().unwrap_or_default()
    } else {
        ""
    };

    let key = key.to_ascii_lowercase();
    if key.contains("username") {
        "username"
    } else if key.contains("email") {
        "email"
    } else {
        "id"
    }
}
