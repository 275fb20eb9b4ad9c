use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::auth::Password;
use crate::error::DatabaseError;
use crate::store::{bounded, UserStore, VerificationStore};
use crate::users::{Ban, NewUser, User};
use crate::verification::Verification;

/// Postgres-backed credential and verification store
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    deadline: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    created_at: DateTime<Utc>,
    username: String,
    email: String,
    password_hash: String,
    token_hash: String,
    activated: bool,
    version: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password: Password::from_hash(row.password_hash),
            token_hash: row.token_hash,
            activated: row.activated,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, created_at, username, email, password_hash, token_hash, activated, version";

#[async_trait]
impl UserStore for PgStore {
    async fn insert(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let query = format!(
            r#"
            INSERT INTO users (username, email, password_hash, token_hash, activated)
            VALUES ($1, $2, $3, $4, FALSE)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = bounded(
            self.deadline,
            sqlx::query_as::<_, UserRow>(&query)
                .bind(&user.username)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.token_hash)
                .fetch_one(&self.pool),
        )
        .await?;

        Ok(row.into())
    }

    async fn get_by_username(&self, username: &str) -> Result<User, DatabaseError> {
        let query = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);

        let row = bounded(
            self.deadline,
            sqlx::query_as::<_, UserRow>(&query)
                .bind(username)
                .fetch_one(&self.pool),
        )
        .await?;

        Ok(row.into())
    }

    async fn get_by_email(&self, email: &str) -> Result<User, DatabaseError> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);

        let row = bounded(
            self.deadline,
            sqlx::query_as::<_, UserRow>(&query)
                .bind(email)
                .fetch_one(&self.pool),
        )
        .await?;

        Ok(row.into())
    }

    async fn update(&self, user: &mut User) -> Result<(), DatabaseError> {
        let password_hash = user
            .password
            .hash()
            .ok_or_else(|| DatabaseError::Storage("user has no password hash".to_string()))?;

        let result = bounded(
            self.deadline,
            sqlx::query_as::<_, (i32,)>(
                r#"
                UPDATE users
                SET email = $1, password_hash = $2, token_hash = $3, activated = $4,
                    version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&user.email)
            .bind(password_hash)
            .bind(&user.token_hash)
            .bind(user.activated)
            .bind(user.id)
            .bind(user.version)
            .fetch_one(&self.pool),
        )
        .await;

        match result {
            Ok((version,)) => {
                user.version = version;
                Ok(())
            }
            // No row matched the id and version pair
            Err(DatabaseError::RecordNotFound) => Err(DatabaseError::EditConflict),
            Err(e) => Err(e),
        }
    }

    async fn delete_by_username(&self, username: &str) -> Result<(), DatabaseError> {
        let result = bounded(
            self.deadline,
            sqlx::query("DELETE FROM users WHERE username = $1")
                .bind(username)
                .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::RecordNotFound);
        }
        Ok(())
    }

    async fn is_admin(&self, user_id: i64) -> Result<bool, DatabaseError> {
        let (exists,) = bounded(
            self.deadline,
            sqlx::query_as::<_, (bool,)>(
                "SELECT EXISTS (SELECT 1 FROM admins WHERE user_id = $1)",
            )
            .bind(user_id)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(exists)
    }

    async fn has_active_ban(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let (exists,) = bounded(
            self.deadline,
            sqlx::query_as::<_, (bool,)>(
                "SELECT EXISTS (SELECT 1 FROM bans WHERE user_id = $1 AND expiry > $2)",
            )
            .bind(user_id)
            .bind(now)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(exists)
    }

    async fn insert_ban(
        &self,
        user_id: i64,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Ban, DatabaseError> {
        let row = bounded(
            self.deadline,
            sqlx::query_as::<_, (i64, i64, DateTime<Utc>)>(
                r#"
                INSERT INTO bans (user_id, expiry)
                SELECT id, $2 FROM users WHERE id = $1
                ON CONFLICT (user_id) DO UPDATE SET expiry = EXCLUDED.expiry
                WHERE bans.expiry <= $3
                RETURNING id, user_id, expiry
                "#,
            )
            .bind(user_id)
            .bind(expiry)
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;

        if let Some((id, user_id, expiry)) = row {
            return Ok(Ban {
                id,
                user_id,
                expiry,
            });
        }

        // Nothing written: either no such user or a ban still in force
        let (user_exists,) = bounded(
            self.deadline,
            sqlx::query_as::<_, (bool,)>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool),
        )
        .await?;

        if user_exists {
            Err(DatabaseError::DuplicateBan)
        } else {
            Err(DatabaseError::RecordNotFound)
        }
    }

    async fn purge_expired_bans(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = bounded(
            self.deadline,
            sqlx::query("DELETE FROM bans WHERE expiry <= $1")
                .bind(now)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_by_verification_code(
        &self,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<User, DatabaseError> {
        let row = bounded(
            self.deadline,
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT users.id, users.created_at, users.username, users.email,
                       users.password_hash, users.token_hash, users.activated, users.version
                FROM users
                INNER JOIN verifications ON users.id = verifications.user_id
                WHERE verifications.code_hash = $1 AND verifications.expiry > $2
                "#,
            )
            .bind(code_hash)
            .bind(now)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl VerificationStore for PgStore {
    async fn upsert(&self, verification: &Verification) -> Result<(), DatabaseError> {
        bounded(
            self.deadline,
            sqlx::query(
                r#"
                INSERT INTO verifications (code_hash, user_id, expiry)
                VALUES ($1, $2, $3)
                ON CONFLICT (user_id)
                DO UPDATE SET code_hash = EXCLUDED.code_hash, expiry = EXCLUDED.expiry
                "#,
            )
            .bind(&verification.code_hash)
            .bind(verification.user_id)
            .bind(verification.expiry)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<(), DatabaseError> {
        bounded(
            self.deadline,
            sqlx::query("DELETE FROM verifications WHERE user_id = $1")
                .bind(user_id)
                .execute(&self.pool),
        )
        .await?;

        Ok(())
    }
}
