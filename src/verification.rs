/// Account-activation verification codes
///
/// A code is 16 random bytes encoded as unpadded base32. The plaintext goes
/// back to the caller exactly once; only its SHA-256 digest is stored. A
/// user has at most one live record, and issuing a new code replaces the
/// old one.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{AppError, DatabaseError};
use crate::store::{UserStore, VerificationStore};
use crate::users::User;

const CODE_BYTES: usize = 16;

/// A verification record. `plaintext` is only populated on the value
/// returned from `generate`/`issue_verification`; records read back from
/// storage never carry it.
#[derive(Clone)]
pub struct Verification {
    plaintext: Option<String>,
    pub code_hash: Vec<u8>,
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
}

impl std::fmt::Debug for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verification")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl Verification {
    /// Generate a fresh code for `user_id`, valid until `now + ttl`
    pub fn generate(user_id: i64, ttl: Duration, now: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; CODE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes);
        let code_hash = hash_code(&plaintext);

        Self {
            plaintext: Some(plaintext),
            code_hash,
            user_id,
            expiry: now + ttl,
        }
    }

    /// Rebuild a record loaded from storage
    pub fn from_stored(code_hash: Vec<u8>, user_id: i64, expiry: DateTime<Utc>) -> Self {
        Self {
            plaintext: None,
            code_hash,
            user_id,
            expiry,
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// SHA-256 of a plaintext code
pub fn hash_code(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Create and store a new code for `user_id`, superseding any existing one.
///
/// Returns the record with its plaintext; this is the only time the
/// plaintext is available.
pub async fn issue_verification(
    store: &dyn VerificationStore,
    user_id: i64,
    ttl: Duration,
) -> Result<Verification, AppError> {
    let verification = Verification::generate(user_id, ttl, Utc::now());

    store.upsert(&verification).await?;

    tracing::info!(user_id = user_id, expiry = %verification.expiry, "Verification code issued");
    Ok(verification)
}

/// Resolve a presented plaintext code to its user.
///
/// Expired records never resolve. Unknown and expired codes both fail with
/// `RecordNotFound`.
pub async fn user_for_code(
    store: &dyn UserStore,
    plaintext: &str,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    let code_hash = hash_code(plaintext);
    Ok(store.get_by_verification_code(&code_hash, now).await?)
}

/// Activate the account owning `plaintext` and consume its code.
///
/// Activation is idempotent: an already active account stays active, and
/// losing an optimistic-lock race to a concurrent activation of the same
/// user still succeeds. The record is deleted by user id once the flag is
/// committed, after which the code no longer resolves.
pub async fn activate_account(
    users: &dyn UserStore,
    verifications: &dyn VerificationStore,
    plaintext: &str,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    let mut user = user_for_code(users, plaintext, now).await?;

    if !user.activated {
        user.activated = true;
        match users.update(&mut user).await {
            Ok(()) => {}
            Err(DatabaseError::EditConflict) => {
                user = users.get_by_username(&user.username).await?;
                if !user.activated {
                    return Err(DatabaseError::EditConflict.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    verifications.delete_for_user(user.id).await?;

    tracing::info!(user_id = user.id, "Account activated");
    Ok(user)
}
