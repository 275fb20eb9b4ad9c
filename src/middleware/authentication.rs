/// Authentication Middleware
///
/// Resolves the caller's identity from the `Authorization` header and
/// attaches it to the request extensions. Every request that passes carries
/// exactly one `Identity`:
///
/// - no header: `Identity::Anonymous`
/// - a header that is not exactly `Bearer <token>`: rejected with an
///   invalid-token error
/// - on the refresh endpoint: the token is a refresh token, checked against
///   the user's current rotation secret in the store
/// - everywhere else: the token is an access token, and the identity is
///   rebuilt from its claims without touching the store

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{self, HeaderMap, HeaderValue},
    Error, HttpMessage,
};
use chrono::Utc;
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{resolve_role, verify_refresh_binding, AuthenticatedUser, Identity, TokenService};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::middleware::reject;
use crate::store::UserStore;

/// Path on which the bearer credential is a refresh token
pub const REFRESH_PATH: &str = "/tokens/refresh";

pub struct Authentication {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserStore>,
}

impl Authentication {
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthenticationService {
            service: Rc::new(service),
            tokens: self.tokens.clone(),
            users: self.users.clone(),
        }))
    }
}

pub struct AuthenticationService<S> {
    service: Rc<S>,
    tokens: Arc<TokenService>,
    users: Arc<dyn UserStore>,
}

impl<S, B> Service<ServiceRequest> for AuthenticationService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let tokens = self.tokens.clone();
        let users = self.users.clone();
        let credential = bearer_credential(req.headers());
        let is_refresh = req.path() == REFRESH_PATH;

        Box::pin(async move {
            let identity = match credential {
                Ok(None) => Ok(Identity::Anonymous),
                Ok(Some(token)) if is_refresh => {
                    identify_by_refresh_token(&tokens, users.as_ref(), &token).await
                }
                Ok(Some(token)) => identify_by_access_token(&tokens, &token),
                Err(e) => Err(e.into()),
            };

            let mut res = match identity {
                Ok(identity) => {
                    req.extensions_mut().insert(identity);
                    service.call(req).await?.map_into_left_body()
                }
                Err(e) => reject(req, e),
            };

            res.headers_mut()
                .append(header::VARY, HeaderValue::from_static("Authorization"));
            Ok(res)
        })
    }
}

/// Extract the token from an `Authorization` header.
///
/// `Ok(None)` when the header is absent. The header must be exactly two
/// space-separated parts with the `Bearer` scheme.
pub fn bearer_credential(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    let value = match headers.get(header::AUTHORIZATION) {
        None => return Ok(None),
        Some(value) => value.to_str().map_err(|_| {
            tracing::warn!("Authorization header is not valid ASCII");
            AuthError::InvalidToken
        })?,
    };

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(Some(token.to_string())),
        _ => {
            tracing::warn!("Malformed Authorization header");
            Err(AuthError::InvalidToken)
        }
    }
}

fn identify_by_access_token(tokens: &TokenService, token: &str) -> Result<Identity, AppError> {
    let claims = tokens.validate_access_token(token)?;

    tracing::debug!(user_id = claims.sub, "Access token validated");
    Ok(Identity::Authenticated(AuthenticatedUser::from_claims(&claims)))
}

async fn identify_by_refresh_token(
    tokens: &TokenService,
    users: &dyn UserStore,
    token: &str,
) -> Result<Identity, AppError> {
    let claims = tokens.validate_refresh_token(token)?;

    let user = match users.get_by_username(&claims.username).await {
        Ok(user) => user,
        Err(DatabaseError::RecordNotFound) => {
            tracing::info!(user_id = claims.sub, "Refresh token names a user that no longer exists");
            return Err(AuthError::InvalidToken.into());
        }
        Err(e) => return Err(e.into()),
    };

    verify_refresh_binding(&claims, &user)?;
    let role = resolve_role(users, user.id, Utc::now()).await?;

    tracing::debug!(user_id = user.id, "Refresh token validated");
    Ok(Identity::Authenticated(AuthenticatedUser::from_user(&user, role)))
}
