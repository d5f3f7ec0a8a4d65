//! Postgres drivers: the audit shadow and the user directory.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::{AuditRecord, AuditStore, StoreError, User, UserDirectory};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Opens a pool against `url`.
///
/// Creation fails if the first connection cannot be established, which
/// is the only time a Postgres outage is fatal.
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    tracing::info!(max_connections, "connected to postgres");
    Ok(pool)
}

/// Applies the bundled schema. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// [`AuditStore`] over the `user_sessions` table.
#[derive(Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditStore for PgAuditStore {
    async fn upsert_session(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_sessions (session_token, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_token) DO UPDATE
            SET expires_at = EXCLUDED.expires_at, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.token)
        .bind(&record.user_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<AuditRecord>, StoreError> {
        let record = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT session_token, user_id, expires_at, created_at
            FROM user_sessions
            WHERE session_token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_sessions WHERE session_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// [`UserDirectory`] over the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<User, StoreError> {
        // `column` is one of our own literals, never client input.
        let query = format!(
            "SELECT id, username, email, password_hash, created_at, updated_at \
             FROM users WHERE {column} = $1"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }
}

impl UserDirectory for PgUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.find_one("username", username).await
    }

    async fn find_by_id(&self, id: &str) -> Result<User, StoreError> {
        self.find_one("id", id).await
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR email = $2)",
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "user created");
                Ok(user)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::Conflict("username or email already exists".into()),
            ),
            Err(e) => Err(e.into()),
        }
    }
}
