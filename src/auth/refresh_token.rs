/// Refresh token binding
///
/// A refresh token is stateless, but it embeds a "custom key": an
/// HMAC-SHA256 of the username keyed by the user's rotation secret. When the
/// token comes back, the key is re-derived from the secret currently in the
/// store. Rotating the secret therefore revokes every outstanding refresh
/// token for that user with no revocation list.

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::auth::claims::RefreshClaims;
use crate::error::AuthError;
use crate::users::User;

type HmacSha256 = Hmac<Sha256>;

const ROTATION_SECRET_LENGTH: usize = 32;

/// Generate a fresh per-user rotation secret
pub fn generate_rotation_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROTATION_SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// Derive the custom key for `username` under `rotation_secret`.
///
/// Deterministic: equal inputs always give equal output.
pub fn generate_custom_key(username: &str, rotation_secret: &str) -> String {
    // HMAC accepts keys of any length, including empty ones.
    let mut mac = HmacSha256::new_from_slice(rotation_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(username.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a validated refresh token against the user's current stored state.
///
/// The token must name the same user id, and its custom key must match the
/// key derived from the rotation secret as it is right now. The email is
/// deliberately not compared: changing an address does not end sessions,
/// rotating the secret does.
pub fn verify_refresh_binding(claims: &RefreshClaims, user: &User) -> Result<(), AuthError> {
    if claims.sub != user.id || claims.username != user.username {
        tracing::warn!(user_id = user.id, "Refresh token subject does not match stored user");
        return Err(AuthError::InvalidToken);
    }

    let expected = generate_custom_key(&user.username, &user.token_hash);
    if bool::from(expected.as_bytes().ct_eq(claims.custom_key.as_bytes())) {
        Ok(())
    } else {
        tracing::info!(user_id = user.id, "Refresh token custom key is stale");
        Err(AuthError::InvalidToken)
    }
}
