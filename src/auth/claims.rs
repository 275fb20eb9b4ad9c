/// JWT Claims structures
///
/// Access and refresh tokens carry different payloads. Both embed a `typ`
/// marker so one kind can never be presented as the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::roles::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims for short-lived access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: i64,
    pub username: String,
    pub email: String,
    pub activated: bool,
    pub role: Role,
    pub typ: TokenKind,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
}

/// Claims for refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: i64,
    pub username: String,
    /// Keyed hash of the username under the user's rotation secret at issue time
    pub custom_key: String,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

/// Expiry check shared by both claim kinds
pub trait Expiring {
    fn expires_at(&self) -> i64;

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now.timestamp()
    }
}

impl Expiring for AccessClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl Expiring for RefreshClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}
