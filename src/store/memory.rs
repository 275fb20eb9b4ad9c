use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::auth::{generate_rotation_secret, Password};
use crate::error::DatabaseError;
use crate::store::{UserStore, VerificationStore};
use crate::users::{Ban, NewUser, User};
use crate::verification::Verification;

/// In-process store with the same uniqueness and versioning rules as
/// `PgStore`. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    next_user_id: i64,
    next_ban_id: i64,
    users: BTreeMap<i64, User>,
    admins: HashSet<i64>,
    /// Keyed by user id; one ban per user
    bans: HashMap<i64, Ban>,
    /// Keyed by user id; one record per user
    verifications: HashMap<i64, Verification>,
}

impl Tables {
    fn find_user<P>(&self, predicate: P) -> Result<User, DatabaseError>
    where
        P: Fn(&User) -> bool,
    {
        self.users
            .values()
            .find(|u| predicate(u))
            .cloned()
            .ok_or(DatabaseError::RecordNotFound)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user directly, bypassing the HTTP flow.
    ///
    /// # Panics
    /// Panics if the username or email is taken or hashing fails. Meant for
    /// fixtures and local seeding only.
    pub async fn seed_user(&self, username: &str, email: &str, password: &str) -> User {
        let password = Password::set_blocking(password.to_string())
            .await
            .expect("Failed to hash seed password");
        let new_user = NewUser::new(
            username.to_string(),
            email.to_string(),
            &password,
            generate_rotation_secret(),
        );

        UserStore::insert(self, &new_user)
            .await
            .expect("Failed to seed user")
    }

    /// Add `user_id` to the administrators
    pub async fn grant_admin(&self, user_id: i64) {
        self.inner.write().await.admins.insert(user_id);
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let mut tables = self.inner.write().await;

        if tables.users.values().any(|u| u.email == user.email) {
            return Err(DatabaseError::DuplicateEmail);
        }
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(DatabaseError::DuplicateUsername);
        }

        tables.next_user_id += 1;
        let stored = User {
            id: tables.next_user_id,
            username: user.username.clone(),
            email: user.email.clone(),
            password: Password::from_hash(user.password_hash.clone()),
            token_hash: user.token_hash.clone(),
            activated: false,
            version: 1,
            created_at: Utc::now(),
        };
        tables.users.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn get_by_username(&self, username: &str) -> Result<User, DatabaseError> {
        self.inner.read().await.find_user(|u| u.username == username)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, DatabaseError> {
        self.inner.read().await.find_user(|u| u.email == email)
    }

    async fn update(&self, user: &mut User) -> Result<(), DatabaseError> {
        let mut tables = self.inner.write().await;

        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(DatabaseError::DuplicateEmail);
        }

        let stored = match tables.users.get_mut(&user.id) {
            Some(stored) if stored.version == user.version => stored,
            _ => return Err(DatabaseError::EditConflict),
        };

        stored.email = user.email.clone();
        stored.password = user.password.clone();
        stored.token_hash = user.token_hash.clone();
        stored.activated = user.activated;
        stored.version += 1;
        user.version = stored.version;

        Ok(())
    }

    async fn delete_by_username(&self, username: &str) -> Result<(), DatabaseError> {
        let mut tables = self.inner.write().await;
        let id = tables.find_user(|u| u.username == username)?.id;

        tables.users.remove(&id);
        tables.admins.remove(&id);
        tables.bans.remove(&id);
        tables.verifications.remove(&id);
        Ok(())
    }

    async fn is_admin(&self, user_id: i64) -> Result<bool, DatabaseError> {
        Ok(self.inner.read().await.admins.contains(&user_id))
    }

    async fn has_active_ban(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let tables = self.inner.read().await;
        Ok(tables
            .bans
            .get(&user_id)
            .map(|ban| ban.is_active_at(now))
            .unwrap_or(false))
    }

    async fn insert_ban(
        &self,
        user_id: i64,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Ban, DatabaseError> {
        let mut tables = self.inner.write().await;

        if !tables.users.contains_key(&user_id) {
            return Err(DatabaseError::RecordNotFound);
        }

        // A lapsed ban keeps its row id until the sweeper removes it
        let id = match tables.bans.get(&user_id) {
            Some(existing) if existing.is_active_at(now) => {
                return Err(DatabaseError::DuplicateBan)
            }
            Some(existing) => existing.id,
            None => {
                tables.next_ban_id += 1;
                tables.next_ban_id
            }
        };

        let ban = Ban {
            id,
            user_id,
            expiry,
        };
        tables.bans.insert(user_id, ban.clone());

        Ok(ban)
    }

    async fn purge_expired_bans(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut tables = self.inner.write().await;
        let before = tables.bans.len();
        tables.bans.retain(|_, ban| ban.is_active_at(now));
        Ok((before - tables.bans.len()) as u64)
    }

    async fn get_by_verification_code(
        &self,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<User, DatabaseError> {
        let tables = self.inner.read().await;
        let user_id = tables
            .verifications
            .values()
            .find(|v| v.code_hash == code_hash && !v.is_expired_at(now))
            .map(|v| v.user_id)
            .ok_or(DatabaseError::RecordNotFound)?;

        tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or(DatabaseError::RecordNotFound)
    }
}

#[async_trait]
impl VerificationStore for MemoryStore {
    async fn upsert(&self, verification: &Verification) -> Result<(), DatabaseError> {
        let mut tables = self.inner.write().await;

        if !tables.users.contains_key(&verification.user_id) {
            return Err(DatabaseError::RecordNotFound);
        }

        tables.verifications.insert(
            verification.user_id,
            Verification::from_stored(
                verification.code_hash.clone(),
                verification.user_id,
                verification.expiry,
            ),
        );
        Ok(())
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<(), DatabaseError> {
        self.inner.write().await.verifications.remove(&user_id);
        Ok(())
    }
}
