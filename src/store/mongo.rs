use async_trait::async_trait;
use futures_util::StreamExt;
use mongodb::{
    bson::{self, doc, DateTime as BsonDateTime, Document},
    change_stream::event::OperationType,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ChangeStreamOptions, FullDocumentType, IndexOptions},
    Client, Collection, IndexModel,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{
    duplicate_field, CredentialStore, OAuthUserRecord, RawUserData, StoreError, StoreResult,
    Subscription, UserRecord, UserUpdate,
};

const USERS: &str = "users";
const OAUTH_USERS: &str = "oauth_users";
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    id: String,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    password: String,
    #[serde(default)]
    profile_picture: String,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    verification_token: Option<String>,
    #[serde(default)]
    last_logged_in: Option<BsonDateTime>,
    #[serde(default)]
    raw_data: Vec<RawUserData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthUserDocument {
    id: String,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    #[serde(default)]
    profile_picture: String,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
    #[serde(default)]
    verified: bool,
    oauth_provider: String,
    #[serde(default)]
    verification_token: Option<String>,
    #[serde(default)]
    raw_data: Vec<RawUserData>,
}

fn to_bson_time(t: OffsetDateTime) -> BsonDateTime {
    BsonDateTime::from_millis((t.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn from_bson_time(t: BsonDateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(t.timestamp_millis()) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl From<&UserRecord> for UserDocument {
    fn from(u: &UserRecord) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            email: u.email.clone(),
            password: u.password_hash.clone(),
            profile_picture: u.profile_picture.clone(),
            created_at: to_bson_time(u.created_at),
            updated_at: to_bson_time(u.updated_at),
            verified: u.verified,
            verification_token: u.verification_token.clone(),
            last_logged_in: u.last_logged_in.map(to_bson_time),
            raw_data: u.raw_data.clone(),
        }
    }
}

impl From<UserDocument> for UserRecord {
    fn from(d: UserDocument) -> Self {
        Self {
            id: d.id,
            username: d.username,
            first_name: d.first_name,
            last_name: d.last_name,
            email: d.email,
            password_hash: d.password,
            profile_picture: d.profile_picture,
            created_at: from_bson_time(d.created_at),
            updated_at: from_bson_time(d.updated_at),
            verified: d.verified,
            verification_token: d.verification_token,
            last_logged_in: d.last_logged_in.map(from_bson_time),
            raw_data: d.raw_data,
        }
    }
}

impl From<&OAuthUserRecord> for OAuthUserDocument {
    fn from(u: &OAuthUserRecord) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            email: u.email.clone(),
            profile_picture: u.profile_picture.clone(),
            created_at: to_bson_time(u.created_at),
            updated_at: to_bson_time(u.updated_at),
            verified: u.verified,
            oauth_provider: u.oauth_provider.clone(),
            verification_token: u.verification_token.clone(),
            raw_data: u.raw_data.clone(),
        }
    }
}

impl From<OAuthUserDocument> for OAuthUserRecord {
    fn from(d: OAuthUserDocument) -> Self {
        Self {
            id: d.id,
            username: d.username,
            first_name: d.first_name,
            last_name: d.last_name,
            email: d.email,
            profile_picture: d.profile_picture,
            created_at: from_bson_time(d.created_at),
            updated_at: from_bson_time(d.updated_at),
            verified: d.verified,
            oauth_provider: d.oauth_provider,
            verification_token: d.verification_token,
            raw_data: d.raw_data,
        }
    }
}

fn map_err(e: MongoError) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(we)) = e.kind.as_ref() {
        if we.code == DUPLICATE_KEY {
            return StoreError::Duplicate(duplicate_field(&we.message));
        }
    }
    StoreError::Backend(e.to_string())
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// `$set` document for a partial update.
fn set_document(update: &UserUpdate, now: OffsetDateTime) -> StoreResult<Document> {
    let mut set = doc! { "updatedAt": to_bson_time(now) };
    if let Some(v) = &update.username {
        set.insert("username", v.clone());
    }
    if let Some(v) = &update.first_name {
        set.insert("firstName", v.clone());
    }
    if let Some(v) = &update.last_name {
        set.insert("lastName", v.clone());
    }
    if let Some(v) = &update.email {
        set.insert("email", v.clone());
    }
    if let Some(v) = &update.profile_picture {
        set.insert("profilePicture", v.clone());
    }
    if let Some(v) = update.verified {
        set.insert("verified", v);
    }
    if let Some(v) = &update.verification_token {
        set.insert("verificationToken", v.clone());
    }
    if let Some(v) = update.last_logged_in {
        set.insert("lastLoggedIn", to_bson_time(v));
    }
    if let Some(v) = &update.raw_data {
        set.insert("rawData", bson::to_bson(v).map_err(backend)?);
    }
    Ok(set)
}

/// Document store backend. Live user data relies on change streams, so the
/// server must run as a replica set.
#[derive(Clone)]
pub struct MongoStore {
    users: Collection<UserDocument>,
    oauth_users: Collection<OAuthUserDocument>,
}

impl MongoStore {
    pub async fn connect(url: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(url).await.map_err(map_err)?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(map_err)?;
        debug!(database, "mongodb reachable");
        Ok(Self {
            users: db.collection(USERS),
            oauth_users: db.collection(OAUTH_USERS),
        })
    }

    /// Unique indexes on id, email and username for both collections.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        for field in ["id", "email", "username"] {
            self.users
                .create_index(unique_index(field), None)
                .await
                .map_err(map_err)?;
            self.oauth_users
                .create_index(unique_index(field), None)
                .await
                .map_err(map_err)?;
        }
        info!("mongodb indexes ensured");
        Ok(())
    }

    async fn find_user(&self, filter: Document) -> StoreResult<Option<UserRecord>> {
        let found = self.users.find_one(filter, None).await.map_err(map_err)?;
        Ok(found.map(UserRecord::from))
    }

    async fn find_oauth_user(&self, filter: Document) -> StoreResult<Option<OAuthUserRecord>> {
        let found = self
            .oauth_users
            .find_one(filter, None)
            .await
            .map_err(map_err)?;
        Ok(found.map(OAuthUserRecord::from))
    }
}

fn unique_index(field: &str) -> IndexModel {
    let mut keys = Document::new();
    keys.insert(field, 1);
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

#[async_trait]
impl CredentialStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        self.find_user(doc! { "id": id }).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        self.find_user(doc! { "email": email }).await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        self.find_user(doc! { "username": username }).await
    }

    async fn insert(&self, user: &UserRecord) -> StoreResult<()> {
        self.users
            .insert_one(UserDocument::from(user), None)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn update_fields(&self, id: &str, update: &UserUpdate) -> StoreResult<()> {
        let set = set_document(update, OffsetDateTime::now_utc())?;
        let result = self
            .users
            .update_one(doc! { "id": id }, doc! { "$set": set }, None)
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_raw_data(&self, id: &str, entry: RawUserData) -> StoreResult<()> {
        let entry = bson::to_bson(&entry).map_err(backend)?;
        let now = to_bson_time(OffsetDateTime::now_utc());
        let result = self
            .users
            .update_one(
                doc! { "id": id },
                doc! { "$push": { "rawData": entry }, "$set": { "updatedAt": now } },
                None,
            )
            .await
            .map_err(map_err)?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let result = self
            .users
            .delete_one(doc! { "id": id }, None)
            .await
            .map_err(map_err)?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_oauth_by_id(&self, id: &str) -> StoreResult<Option<OAuthUserRecord>> {
        self.find_oauth_user(doc! { "id": id }).await
    }

    async fn find_oauth_by_email(&self, email: &str) -> StoreResult<Option<OAuthUserRecord>> {
        self.find_oauth_user(doc! { "email": email }).await
    }

    async fn find_oauth_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<OAuthUserRecord>> {
        self.find_oauth_user(doc! { "username": username }).await
    }

    async fn insert_oauth(&self, user: &OAuthUserRecord) -> StoreResult<()> {
        self.oauth_users
            .insert_one(OAuthUserDocument::from(user), None)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn subscribe(&self, id: &str, capacity: usize) -> StoreResult<Subscription> {
        if self.find_by_id(id).await?.is_none() {
            return Err(StoreError::NotFound);
        }

        // Deletes carry no full document, so every delete is let through and
        // checked against the store below.
        let pipeline = [doc! { "$match": { "$or": [
            { "fullDocument.id": id },
            { "operationType": "delete" },
        ] } }];
        let options = change_stream_options();
        let mut events = self
            .users
            .clone_with_type::<Document>()
            .watch(pipeline, options)
            .await
            .map_err(map_err)?;

        let store = self.clone();
        let id = id.to_string();
        Ok(Subscription::spawn(capacity, move |tx| async move {
            while let Some(event) = events.next().await {
                let is_delete = match event {
                    Ok(event) => matches!(event.operation_type, OperationType::Delete),
                    Err(e) => {
                        warn!(error = %e, user_id = %id, "change stream failed");
                        break;
                    }
                };
                // Re-query so the consumer always sees the stored state.
                match store.find_by_id(&id).await {
                    Ok(Some(_)) if is_delete => continue,
                    Ok(Some(user)) => {
                        if tx.send(user).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, user_id = %id, "re-query after change failed");
                        break;
                    }
                }
            }
            debug!(user_id = %id, "change stream closed");
        }))
    }
}

/// Updates are re-read so `fullDocument` carries the whole record.
fn change_stream_options() -> ChangeStreamOptions {
    ChangeStreamOptions::builder()
        .full_document(Some(FullDocumentType::UpdateLookup))
        .build()
}
