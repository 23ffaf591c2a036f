use async_trait::async_trait;
use sqlx::{mysql::MySqlPoolOptions, FromRow, MySql, MySqlPool, QueryBuilder};
use time::OffsetDateTime;

use super::{
    duplicate_field, CredentialStore, OAuthUserRecord, RawUserData, StoreError, StoreResult,
    Subscription, UserRecord, UserUpdate,
};

const USER_COLUMNS: &str = "id, username, first_name, last_name, email, password_hash, \
     profile_picture, created_at, updated_at, verified, verification_token, last_logged_in, raw_data";

const OAUTH_COLUMNS: &str = "id, username, first_name, last_name, email, profile_picture, \
     created_at, updated_at, verified, oauth_provider, verification_token, raw_data";

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    profile_picture: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    verified: bool,
    verification_token: Option<String>,
    last_logged_in: Option<OffsetDateTime>,
    raw_data: String,
}

#[derive(Debug, FromRow)]
struct OAuthUserRow {
    id: String,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    profile_picture: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    verified: bool,
    oauth_provider: String,
    verification_token: Option<String>,
    raw_data: String,
}

// raw_data lives in a LONGTEXT column as a JSON array.
fn decode_raw(text: &str) -> StoreResult<Vec<RawUserData>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(text).map_err(|e| StoreError::Backend(format!("raw_data: {e}")))
}

fn encode_raw(entries: &[RawUserData]) -> StoreResult<String> {
    serde_json::to_string(entries).map_err(|e| StoreError::Backend(format!("raw_data: {e}")))
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(r: UserRow) -> StoreResult<Self> {
        Ok(Self {
            raw_data: decode_raw(&r.raw_data)?,
            id: r.id,
            username: r.username,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            password_hash: r.password_hash,
            profile_picture: r.profile_picture,
            created_at: r.created_at,
            updated_at: r.updated_at,
            verified: r.verified,
            verification_token: r.verification_token,
            last_logged_in: r.last_logged_in,
        })
    }
}

impl TryFrom<OAuthUserRow> for OAuthUserRecord {
    type Error = StoreError;

    fn try_from(r: OAuthUserRow) -> StoreResult<Self> {
        Ok(Self {
            raw_data: decode_raw(&r.raw_data)?,
            id: r.id,
            username: r.username,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            profile_picture: r.profile_picture,
            created_at: r.created_at,
            updated_at: r.updated_at,
            verified: r.verified,
            oauth_provider: r.oauth_provider,
            verification_token: r.verification_token,
        })
    }
}

fn map_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Duplicate(duplicate_field(db.message()));
        }
    }
    StoreError::Backend(e.to_string())
}

#[derive(Debug, Clone, Copy)]
enum Lookup {
    Id,
    Email,
    Username,
}

impl Lookup {
    fn column(self) -> &'static str {
        match self {
            Lookup::Id => "id",
            Lookup::Email => "email",
            Lookup::Username => "username",
        }
    }
}

/// Relational backend. Live user data is not available here.
#[derive(Clone)]
pub struct MariaDbStore {
    pool: MySqlPool,
}

impl MariaDbStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(map_err)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn fetch_user(&self, by: Lookup, value: &str) -> StoreResult<Option<UserRecord>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = ?",
            by.column()
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(UserRecord::try_from).transpose()
    }

    async fn fetch_oauth_user(
        &self,
        by: Lookup,
        value: &str,
    ) -> StoreResult<Option<OAuthUserRecord>> {
        let sql = format!(
            "SELECT {OAUTH_COLUMNS} FROM oauth_users WHERE {} = ?",
            by.column()
        );
        let row = sqlx::query_as::<_, OAuthUserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
        row.map(OAuthUserRecord::try_from).transpose()
    }
}

/// `UPDATE users SET ...` with one assignment per present field.
fn build_update(
    id: &str,
    update: &UserUpdate,
    now: OffsetDateTime,
) -> StoreResult<QueryBuilder<'static, MySql>> {
    let mut qb = QueryBuilder::<MySql>::new("UPDATE users SET updated_at = ");
    qb.push_bind(now);
    if let Some(v) = &update.username {
        qb.push(", username = ").push_bind(v.clone());
    }
    if let Some(v) = &update.first_name {
        qb.push(", first_name = ").push_bind(v.clone());
    }
    if let Some(v) = &update.last_name {
        qb.push(", last_name = ").push_bind(v.clone());
    }
    if let Some(v) = &update.email {
        qb.push(", email = ").push_bind(v.clone());
    }
    if let Some(v) = &update.profile_picture {
        qb.push(", profile_picture = ").push_bind(v.clone());
    }
    if let Some(v) = update.verified {
        qb.push(", verified = ").push_bind(v);
    }
    if let Some(v) = &update.verification_token {
        qb.push(", verification_token = ").push_bind(v.clone());
    }
    if let Some(v) = update.last_logged_in {
        qb.push(", last_logged_in = ").push_bind(v);
    }
    if let Some(v) = &update.raw_data {
        qb.push(", raw_data = ").push_bind(encode_raw(v)?);
    }
    qb.push(" WHERE id = ").push_bind(id.to_string());
    Ok(qb)
}

#[async_trait]
impl CredentialStore for MariaDbStore {
    fn backend(&self) -> &'static str {
        "mariadb"
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        self.fetch_user(Lookup::Id, id).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        self.fetch_user(Lookup::Email, email).await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        self.fetch_user(Lookup::Username, username).await
    }

    async fn insert(&self, user: &UserRecord) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.profile_picture)
            .bind(user.created_at)
            .bind(user.updated_at)
            .bind(user.verified)
            .bind(&user.verification_token)
            .bind(user.last_logged_in)
            .bind(encode_raw(&user.raw_data)?)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn update_fields(&self, id: &str, update: &UserUpdate) -> StoreResult<()> {
        let mut qb = build_update(id, update, OffsetDateTime::now_utc())?;
        let result = qb.build().execute(&self.pool).await.map_err(map_err)?;
        // MySQL reports zero affected rows when the values did not change.
        if result.rows_affected() == 0 && self.find_by_id(id).await?.is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_raw_data(&self, id: &str, entry: RawUserData) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT raw_data FROM users WHERE id = ? FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
        let Some((raw,)) = row else {
            return Err(StoreError::NotFound);
        };

        let mut entries = decode_raw(&raw)?;
        entries.push(entry);

        sqlx::query("UPDATE users SET raw_data = ?, updated_at = ? WHERE id = ?")
            .bind(encode_raw(&entries)?)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn find_oauth_by_id(&self, id: &str) -> StoreResult<Option<OAuthUserRecord>> {
        self.fetch_oauth_user(Lookup::Id, id).await
    }

    async fn find_oauth_by_email(&self, email: &str) -> StoreResult<Option<OAuthUserRecord>> {
        self.fetch_oauth_user(Lookup::Email, email).await
    }

    async fn find_oauth_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<OAuthUserRecord>> {
        self.fetch_oauth_user(Lookup::Username, username).await
    }

    async fn insert_oauth(&self, user: &OAuthUserRecord) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO oauth_users ({OAUTH_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.profile_picture)
            .bind(user.created_at)
            .bind(user.updated_at)
            .bind(user.verified)
            .bind(&user.oauth_provider)
            .bind(&user.verification_token)
            .bind(encode_raw(&user.raw_data)?)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn subscribe(&self, _id: &str, _capacity: usize) -> StoreResult<Subscription> {
        Err(StoreError::Unsupported(
            "Real time user data is only available with MongoDB as the primary database".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_sql_lists_only_present_fields() {
        let update = UserUpdate {
            first_name: Some("Ada".into()),
            verified: Some(true),
            ..Default::default()
        };
        let qb = build_update("42", &update, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(
            qb.sql(),
            "UPDATE users SET updated_at = ?, first_name = ?, verified = ? WHERE id = ?"
        );
    }

    #[test]
    fn raw_data_text_roundtrip_and_empty() {
        assert!(decode_raw("").unwrap().is_empty());

        let mut data = serde_json::Map::new();
        data.insert("k".into(), json!([1, 2]));
        let text = encode_raw(&[RawUserData { data }]).unwrap();
        assert_eq!(text, r#"[{"data":{"k":[1,2]}}]"#);
        assert_eq!(decode_raw(&text).unwrap()[0].data["k"], json!([1, 2]));
    }

    #[test]
    fn identity_columns_compare_case_sensitively() {
        let sql = include_str!("../../migrations/20250201000000_binary_collation.sql");
        for table in ["users", "oauth_users"] {
            let block = sql
                .split(&format!("ALTER TABLE {table}\n"))
                .nth(1)
                .and_then(|rest| rest.split(';').next())
                .expect("table altered");
            for column in ["id", "username", "email", "verification_token"] {
                let line = block
                    .lines()
                    .find(|l| l.split_whitespace().nth(1) == Some(column))
                    .unwrap_or_else(|| panic!("{table}.{column} not altered"));
                assert!(line.contains("COLLATE utf8mb4_bin"), "{table}.{column}");
            }
        }
    }

    #[test]
    fn corrupt_raw_data_is_a_backend_error() {
        assert!(matches!(decode_raw("{nope"), Err(StoreError::Backend(_))));
    }
}
