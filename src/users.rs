/// User records as held by the credential store
///
/// A `User` is what the store hands back: identity, password hash, the
/// per-user token rotation secret, activation state and the optimistic-lock
/// version. Role is never stored on the record; it is derived per request
/// (see `auth::roles`).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::Password;

/// A persisted user
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password: Password,
    /// Rotation secret bound into every refresh token; rotating it revokes them all
    pub token_hash: String,
    pub activated: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The public view of this user, without hash or rotation secret
    pub fn projection(&self) -> UserProjection {
        UserProjection {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            activated: self.activated,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// A user that has not been inserted yet
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub token_hash: String,
}

impl NewUser {
    /// Prepare a user for insertion. New users always start unactivated.
    ///
    /// # Panics
    /// Panics if `password` carries no hash. Storing a user without one is
    /// a programming error, not a validation failure.
    pub fn new(username: String, email: String, password: &Password, token_hash: String) -> Self {
        let password_hash = match password.hash() {
            Some(hash) if !hash.is_empty() => hash.to_string(),
            _ => panic!("missing password hash for user"),
        };

        Self {
            username,
            email,
            password_hash,
            token_hash,
        }
    }
}

/// Sanitised user returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct UserProjection {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub activated: bool,
    pub created_at: String,
}

/// A ban on a user until `expiry`
#[derive(Debug, Clone, Serialize)]
pub struct Ban {
    pub id: i64,
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
}

impl Ban {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}
