/// Password Hashing and Verification
///
/// Passwords are hashed with bcrypt at a fixed cost. A `Password` only ever
/// holds the hash; plaintext passes through `set`/`matches` and is dropped.
/// bcrypt is CPU-bound, so async callers go through the `*_blocking`
/// variants which run on the blocking thread pool.

use bcrypt::{hash, verify};

use crate::error::AppError;

/// Fixed work factor. Roughly tens of milliseconds per verification on
/// server hardware.
pub const PASSWORD_HASH_COST: u32 = 10;

/// A user's stored password
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Password {
    hash: Option<String>,
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("hash", &self.hash.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Password {
    /// Wrap a hash loaded from storage
    pub fn from_hash(hash: String) -> Self {
        Self { hash: Some(hash) }
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Hash `plaintext` and store the result
    ///
    /// # Errors
    /// `AppError::Hashing` if the bcrypt primitive fails
    pub fn set(&mut self, plaintext: &str) -> Result<(), AppError> {
        let hashed = hash(plaintext, PASSWORD_HASH_COST)?;
        self.hash = Some(hashed);
        Ok(())
    }

    /// Compare `plaintext` against the stored hash in constant time.
    ///
    /// A mismatch is `Ok(false)`, never an error. Errors are reserved for a
    /// missing or corrupt hash.
    pub fn matches(&self, plaintext: &str) -> Result<bool, AppError> {
        let stored = self
            .hash
            .as_deref()
            .ok_or_else(|| AppError::Hashing("no password hash to compare against".to_string()))?;

        verify(plaintext, stored).map_err(AppError::from)
    }

    /// Hash `plaintext` off the async executor
    pub async fn set_blocking(plaintext: String) -> Result<Password, AppError> {
        tokio::task::spawn_blocking(move || {
            let mut password = Password::default();
            password.set(&plaintext)?;
            Ok(password)
        })
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {}", e)))?
    }

    /// Verify `plaintext` off the async executor
    pub async fn matches_blocking(&self, plaintext: String) -> Result<bool, AppError> {
        let password = self.clone();
        tokio::task::spawn_blocking(move || password.matches(&plaintext))
            .await
            .map_err(|e| AppError::Internal(format!("password verification task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_stores_bcrypt_hash() {
        let mut password = Password::default();
        password.set("correcthorse1").expect("Failed to hash password");

        let hash = password.hash().unwrap();
        assert_ne!(hash, "correcthorse1");
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_matches_correct_password() {
        let mut password = Password::default();
        password.set("correcthorse1").unwrap();

        assert!(password.matches("correcthorse1").expect("Failed to verify password"));
    }

    #[test]
    fn test_mismatch_is_not_an_error() {
        let mut password = Password::default();
        password.set("correcthorse1").unwrap();

        for wrong in ["correcthorse2", "", "CORRECTHORSE1", "correcthorse1 "] {
            assert!(!password.matches(wrong).expect("mismatch must not error"));
        }
    }

    #[test]
    fn test_salted_hashes_differ() {
        let mut first = Password::default();
        let mut second = Password::default();
        first.set("correcthorse1").unwrap();
        second.set("correcthorse1").unwrap();

        assert_ne!(first.hash(), second.hash());
    }

    #[test]
    fn test_corrupt_hash_is_an_error() {
        let password = Password::from_hash("not-a-bcrypt-hash".to_string());
        assert!(matches!(password.matches("anything"), Err(AppError::Hashing(_))));
    }

    #[test]
    fn test_missing_hash_is_an_error() {
        assert!(Password::default().matches("anything").is_err());
    }

    #[test]
    fn test_debug_redacts_hash() {
        let mut password = Password::default();
        password.set("correcthorse1").unwrap();
        let rendered = format!("{:?}", password);

        assert!(!rendered.contains("$2"));
    }

    #[tokio::test]
    async fn test_blocking_round_trip() {
        let password = Password::set_blocking("correcthorse1".to_string()).await.unwrap();

        assert!(password.matches_blocking("correcthorse1".to_string()).await.unwrap());
        assert!(!password.matches_blocking("wrong-horse".to_string()).await.unwrap());
    }
}
