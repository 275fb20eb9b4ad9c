/// Authentication module
///
/// Password hashing, token issuance and validation, refresh-token binding,
/// role derivation and the per-request identity.

mod claims;
mod identity;
mod jwt;
mod password;
mod refresh_token;
mod roles;

pub use claims::{AccessClaims, Expiring, RefreshClaims, TokenKind};
pub use identity::{AuthenticatedUser, CurrentUser, Identity};
pub use jwt::{Clock, TokenService};
pub use password::{Password, PASSWORD_HASH_COST};
pub use refresh_token::{generate_custom_key, generate_rotation_secret, verify_refresh_binding};
pub use roles::{derive_role, resolve_role, run_ban_sweeper, Role, Roles};
