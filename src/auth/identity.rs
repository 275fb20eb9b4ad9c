/// Request identity
///
/// The authentication middleware attaches exactly one `Identity` to every
/// request it passes on. Unauthenticated requests carry `Anonymous`, which
/// is a real value and never the same thing as "no identity attached".

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use serde::Serialize;

use crate::auth::claims::AccessClaims;
use crate::auth::roles::Role;
use crate::error::{AppError, AuthError};
use crate::users::User;

/// A caller whose credential has been verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub activated: bool,
    pub role: Role,
}

impl AuthenticatedUser {
    /// Rebuild an identity straight from access token claims
    pub fn from_claims(claims: &AccessClaims) -> Self {
        Self {
            id: claims.sub,
            username: claims.username.clone(),
            email: claims.email.clone(),
            activated: claims.activated,
            role: claims.role,
        }
    }

    pub fn from_user(user: &User, role: Role) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            activated: user.activated,
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated(AuthenticatedUser),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(user) => Some(user),
        }
    }
}

/// Extracts the identity attached by the authentication middleware.
///
/// Fails with `AuthenticationRequired` when the route is not behind that
/// middleware, so a wiring mistake can never read as an anonymous caller.
impl FromRequest for Identity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let identity = req.extensions().get::<Identity>().cloned();
        ready(identity.ok_or_else(|| {
            tracing::error!(path = %req.path(), "No identity attached to request");
            AppError::Auth(AuthError::AuthenticationRequired)
        }))
    }
}

/// Extracts the authenticated caller, rejecting anonymous requests
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match req.extensions().get::<Identity>() {
            Some(Identity::Authenticated(user)) => Ok(CurrentUser(user.clone())),
            _ => Err(AppError::Auth(AuthError::AuthenticationRequired)),
        };
        ready(result)
    }
}
