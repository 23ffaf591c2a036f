use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{broadcast, Mutex};

use super::{
    CredentialStore, OAuthUserRecord, RawUserData, StoreError, StoreResult, Subscription,
    UserRecord, UserUpdate,
};

#[derive(Default)]
struct Tables {
    users: HashMap<String, UserRecord>,
    oauth_users: HashMap<String, OAuthUserRecord>,
}

/// In-process store for tests. Changes are announced on a broadcast channel
/// so subscriptions behave like the document store's change streams.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            changes,
        }
    }

    fn announce(&self, id: &str) {
        // No receivers is fine.
        let _ = self.changes.send(id.to_string());
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.tables.lock().await.users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn insert(&self, user: &UserRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate("id"));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("username"));
        }
        tables.users.insert(user.id.clone(), user.clone());
        drop(tables);
        self.announce(&user.id);
        Ok(())
    }

    async fn update_fields(&self, id: &str, update: &UserUpdate) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(email) = &update.email {
            if tables.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Duplicate("email"));
            }
        }
        if let Some(username) = &update.username {
            if tables
                .users
                .values()
                .any(|u| u.id != id && &u.username == username)
            {
                return Err(StoreError::Duplicate("username"));
            }
        }
        let user = tables.users.get_mut(id).ok_or(StoreError::NotFound)?;
        update.apply(user, OffsetDateTime::now_utc());
        drop(tables);
        self.announce(id);
        Ok(())
    }

    async fn append_raw_data(&self, id: &str, entry: RawUserData) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let user = tables.users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.raw_data.push(entry);
        user.updated_at = OffsetDateTime::now_utc();
        drop(tables);
        self.announce(id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let removed = self.tables.lock().await.users.remove(id);
        match removed {
            Some(_) => {
                self.announce(id);
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn find_oauth_by_id(&self, id: &str) -> StoreResult<Option<OAuthUserRecord>> {
        Ok(self.tables.lock().await.oauth_users.get(id).cloned())
    }

    async fn find_oauth_by_email(&self, email: &str) -> StoreResult<Option<OAuthUserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.oauth_users.values().find(|u| u.email == email).cloned())
    }

    async fn find_oauth_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<OAuthUserRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .oauth_users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_oauth(&self, user: &OAuthUserRecord) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.oauth_users.contains_key(&user.id) {
            return Err(StoreError::Duplicate("id"));
        }
        if tables.oauth_users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        if tables.oauth_users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("username"));
        }
        tables.oauth_users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn subscribe(&self, id: &str, capacity: usize) -> StoreResult<Subscription> {
        if self.find_by_id(id).await?.is_none() {
            return Err(StoreError::NotFound);
        }
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let id = id.to_string();
        Ok(Subscription::spawn(capacity, move |tx| async move {
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == id => {}
                    Ok(_) => continue,
                    // Missed notifications still mean "something changed".
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                match store.find_by_id(&id).await {
                    Ok(Some(user)) => {
                        if tx.send(user).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }))
    }
}

#[cfg(test)]
pub(crate) fn sample_user(id: &str, username: &str, email: &str) -> UserRecord {
    let now = OffsetDateTime::now_utc();
    UserRecord {
        id: id.into(),
        username: username.into(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: email.into(),
        password_hash: String::new(),
        profile_picture: String::new(),
        created_at: now,
        updated_at: now,
        verified: false,
        verification_token: None,
        last_logged_in: None,
        raw_data: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_rejects_duplicate_identity() {
        let store = MemoryStore::new();
        store.insert(&sample_user("1", "ada", "ada@x.com")).await.unwrap();

        let err = store
            .insert(&sample_user("2", "other", "ada@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate("email"));

        let err = store
            .insert(&sample_user("3", "ada", "new@x.com"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate("username"));
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let store = MemoryStore::new();
        store.insert(&sample_user("1", "ada", "ada@x.com")).await.unwrap();

        let update = UserUpdate {
            first_name: Some("Augusta".into()),
            ..Default::default()
        };
        store.update_fields("1", &update).await.unwrap();

        let user = store.find_by_id("1").await.unwrap().unwrap();
        assert_eq!(user.first_name, "Augusta");
        assert_eq!(user.last_name, "Lovelace");
        assert_eq!(user.email, "ada@x.com");
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .update_fields("nope", &UserUpdate::default())
                .await
                .unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(store.delete("nope").await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn subscription_sees_appends() {
        let store = MemoryStore::new();
        store.insert(&sample_user("1", "ada", "ada@x.com")).await.unwrap();
        let mut sub = store.subscribe("1", 4).await.unwrap();

        let mut data = serde_json::Map::new();
        data.insert("score".into(), json!(7));
        store.append_raw_data("1", RawUserData { data }).await.unwrap();

        let user = sub.next().await.unwrap();
        assert_eq!(user.raw_data.len(), 1);
        assert_eq!(user.raw_data[0].data["score"], json!(7));
    }
}
