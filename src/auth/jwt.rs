/// JWT Token Service
///
/// Issues and validates HS256-signed access and refresh tokens. The signing
/// secret is handed in once at construction and never changes for the life
/// of the service. Replacing the secret invalidates every token it issued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;

use crate::auth::claims::{AccessClaims, Expiring, RefreshClaims, TokenKind};
use crate::auth::identity::AuthenticatedUser;
use crate::auth::refresh_token::generate_custom_key;
use crate::auth::roles::Role;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::users::User;

/// Source of "now" for issuing and checking expiry
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
    clock: Clock,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: &JwtSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_token_expiry: config.access_token_expiry,
            refresh_token_expiry: config.refresh_token_expiry,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock, for tests that need to move time
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn access_token_expiry(&self) -> i64 {
        self.access_token_expiry
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Issue an access token carrying the user's identity and `role`
    ///
    /// # Errors
    /// Returns error if token encoding fails
    pub fn generate_access_token(&self, user: &AuthenticatedUser) -> Result<String, AppError> {
        let now = self.now().timestamp();
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            activated: user.activated,
            role: user.role,
            typ: TokenKind::Access,
            exp: now + self.access_token_expiry,
            iat: now,
            iss: self.issuer.clone(),
        };
        self.sign(&claims)
    }

    /// Issue an access token for a stored user
    pub fn generate_access_token_for(&self, user: &User, role: Role) -> Result<String, AppError> {
        self.generate_access_token(&AuthenticatedUser::from_user(user, role))
    }

    /// Issue a refresh token bound to the user's current rotation secret
    pub fn generate_refresh_token(&self, user: &User) -> Result<String, AppError> {
        let now = self.now().timestamp();
        let claims = RefreshClaims {
            sub: user.id,
            username: user.username.clone(),
            custom_key: generate_custom_key(&user.username, &user.token_hash),
            typ: TokenKind::Refresh,
            exp: now + self.refresh_token_expiry,
            iat: now,
            iss: self.issuer.clone(),
        };
        self.sign(&claims)
    }

    /// Validate an access token's signature, issuer, kind and expiry
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims: AccessClaims = self.verify(token)?;
        self.check(claims.typ, TokenKind::Access, &claims)?;
        Ok(claims)
    }

    /// Validate a refresh token's signature, issuer, kind and expiry.
    ///
    /// This does not check the custom key; callers must compare it against
    /// the stored rotation secret (`verify_refresh_binding`).
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        let claims: RefreshClaims = self.verify(token)?;
        self.check(claims.typ, TokenKind::Refresh, &claims)?;
        Ok(claims)
    }

    fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        // Expiry is checked against our own clock in `check`.
        validation.validate_exp = false;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "JWT validation error");
                AuthError::InvalidToken
            })
    }

    fn check<C: Expiring>(
        &self,
        actual: TokenKind,
        expected: TokenKind,
        claims: &C,
    ) -> Result<(), AuthError> {
        if actual != expected {
            tracing::debug!(?actual, ?expected, "Wrong token kind presented");
            return Err(AuthError::InvalidToken);
        }
        if claims.is_expired_at(self.now()) {
            tracing::debug!("Token has expired");
            return Err(AuthError::InvalidToken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh_token::{generate_rotation_secret, verify_refresh_binding};
    use crate::auth::Password;
    use chrono::Duration;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 24 * 3600,
            refresh_token_expiry: 7 * 24 * 3600,
            issuer: "test".to_string(),
        }
    }

    fn fixed_clock(at: DateTime<Utc>) -> Clock {
        Arc::new(move || at)
    }

    fn test_user() -> User {
        User {
            id: 11,
            username: "grace".to_string(),
            email: "grace@example.com".to_string(),
            password: Password::default(),
            token_hash: generate_rotation_secret(),
            activated: false,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_and_validate_access_token() {
        let service = TokenService::new(&get_test_config());
        let user = test_user();

        let token = service.generate_access_token_for(&user, Role::Admin).unwrap();
        let claims = service.validate_access_token(&token).expect("Failed to validate token");

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "grace");
        assert_eq!(claims.email, "grace@example.com");
        assert!(!claims.activated);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_access_token_expires() {
        let issued_at = Utc::now();
        let issuer = TokenService::new(&get_test_config()).with_clock(fixed_clock(issued_at));
        let token = issuer.generate_access_token_for(&test_user(), Role::User).unwrap();

        let just_before = TokenService::new(&get_test_config())
            .with_clock(fixed_clock(issued_at + Duration::hours(23)));
        assert!(just_before.validate_access_token(&token).is_ok());

        let skewed = TokenService::new(&get_test_config())
            .with_clock(fixed_clock(issued_at + Duration::hours(25)));
        assert_eq!(
            skewed.validate_access_token(&token),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_invalid_token() {
        let service = TokenService::new(&get_test_config());
        assert!(service.validate_access_token("invalid.token.here").is_err());
        assert!(service.validate_access_token("").is_err());
    }

    #[test]
    fn test_tampered_token() {
        let service = TokenService::new(&get_test_config());
        let token = service.generate_access_token_for(&test_user(), Role::User).unwrap();

        let tampered = format!("{}X", token);
        assert!(service.validate_access_token(&tampered).is_err());
    }

    #[test]
    fn test_wrong_issuer() {
        let service = TokenService::new(&get_test_config());
        let token = service.generate_access_token_for(&test_user(), Role::User).unwrap();

        let mut config = get_test_config();
        config.issuer = "wrong-issuer".to_string();
        assert!(TokenService::new(&config).validate_access_token(&token).is_err());
    }

    #[test]
    fn test_other_signing_secret_rejects() {
        let service = TokenService::new(&get_test_config());
        let token = service.generate_access_token_for(&test_user(), Role::User).unwrap();

        let mut config = get_test_config();
        config.secret = "a-completely-different-secret-of-32-bytes!".to_string();
        assert!(TokenService::new(&config).validate_access_token(&token).is_err());
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let service = TokenService::new(&get_test_config());
        let user = test_user();

        let access = service.generate_access_token_for(&user, Role::User).unwrap();
        let refresh = service.generate_refresh_token(&user).unwrap();

        assert!(service.validate_refresh_token(&access).is_err());
        assert!(service.validate_access_token(&refresh).is_err());
    }

    #[test]
    fn test_refresh_token_round_trip_and_expiry() {
        let issued_at = Utc::now();
        let service = TokenService::new(&get_test_config()).with_clock(fixed_clock(issued_at));
        let user = test_user();

        let token = service.generate_refresh_token(&user).unwrap();
        let claims = service.validate_refresh_token(&token).unwrap();
        assert_eq!(claims.username, user.username);
        assert!(verify_refresh_binding(&claims, &user).is_ok());

        let later = TokenService::new(&get_test_config())
            .with_clock(fixed_clock(issued_at + Duration::days(8)));
        assert!(later.validate_refresh_token(&token).is_err());
    }

    #[test]
    fn test_rotation_revokes_old_refresh_tokens() {
        let service = TokenService::new(&get_test_config());
        let mut user = test_user();

        let old = service.generate_refresh_token(&user).unwrap();
        user.token_hash = generate_rotation_secret();
        let new = service.generate_refresh_token(&user).unwrap();

        let old_claims = service.validate_refresh_token(&old).unwrap();
        assert!(verify_refresh_binding(&old_claims, &user).is_err());

        let new_claims = service.validate_refresh_token(&new).unwrap();
        assert!(verify_refresh_binding(&new_claims, &user).is_ok());
    }
}
