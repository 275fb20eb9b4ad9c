/// Credential and verification storage
///
/// The auth core only talks to storage through these two traits. `PgStore`
/// is the production implementation; `MemoryStore` backs tests and local
/// runs without a database.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::users::{Ban, NewUser, User};
use crate::verification::Verification;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new, unactivated user. Username and email must both be unused.
    async fn insert(&self, user: &NewUser) -> Result<User, DatabaseError>;

    async fn get_by_username(&self, username: &str) -> Result<User, DatabaseError>;

    async fn get_by_email(&self, email: &str) -> Result<User, DatabaseError>;

    /// Write back email, password hash, rotation secret and activation flag.
    ///
    /// Succeeds only if the stored version still equals `user.version`; on
    /// success `user.version` is advanced to the new value.
    async fn update(&self, user: &mut User) -> Result<(), DatabaseError>;

    async fn delete_by_username(&self, username: &str) -> Result<(), DatabaseError>;

    async fn is_admin(&self, user_id: i64) -> Result<bool, DatabaseError>;

    /// Whether `user_id` has a ban expiring after `now`
    async fn has_active_ban(&self, user_id: i64, now: DateTime<Utc>)
        -> Result<bool, DatabaseError>;

    /// Ban `user_id` until `expiry`.
    ///
    /// A ban that already lapsed at `now` is replaced; an active one fails
    /// with `DuplicateBan`.
    async fn insert_ban(
        &self,
        user_id: i64,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Ban, DatabaseError>;

    /// Delete every ban that expired at or before `now`, returning the count
    async fn purge_expired_bans(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;

    /// Find the user owning an unexpired verification record with this hash
    async fn get_by_verification_code(
        &self,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<User, DatabaseError>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Store `verification` as the only record for its user, replacing the
    /// code and expiry of any existing one in a single write
    async fn upsert(&self, verification: &Verification) -> Result<(), DatabaseError>;

    /// Remove the record for `user_id`, if any
    async fn delete_for_user(&self, user_id: i64) -> Result<(), DatabaseError>;
}

/// Run a storage future under a deadline.
///
/// A slow or stuck store fails the operation with `DatabaseError::Timeout`
/// instead of holding the request open.
pub async fn bounded<T, F>(deadline: Duration, operation: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result.map_err(DatabaseError::from),
        Err(_) => {
            tracing::error!(deadline_ms = deadline.as_millis() as u64, "Storage deadline exceeded");
            Err(DatabaseError::Timeout)
        }
    }
}
