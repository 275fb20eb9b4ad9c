/// Token Routes
///
/// Login, access-token refresh and refresh-token revocation.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{generate_rotation_secret, resolve_role, CurrentUser, Password};
use crate::error::{AppError, AuthError, DatabaseError, ErrorContext};
use crate::startup::AppState;
use crate::users::User;
use crate::validators::{validate_login, LoginIdentifier};

/// Cost-10 bcrypt hash owned by no account. Unknown identifiers are checked
/// against it so they take as long as a wrong password.
const UNKNOWN_USER_HASH: &str = "$2a$10$N9qo8uLOickgx2ZMRZoMyeIjZAgcfl7p92ldGxad68LJZdL17lhWy";

/// Login request; one of `username` or `email` is required
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// POST /tokens/authentication
///
/// Authenticate with email or username and password.
///
/// # Errors
/// - 422: Validation error (neither identifier well-formed, bad password shape)
/// - 401: Invalid credentials (unknown user or wrong password)
/// - 500: Internal server error
///
/// Unknown users and wrong passwords produce the same response. Logging in
/// does not require, and never performs, account activation.
pub async fn login(
    form: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let LoginRequest {
        username,
        email,
        password,
    } = form.into_inner();

    let identifier = validate_login(username.as_deref(), email.as_deref(), &password)?;
    let user = match find_user(&state, &identifier).await? {
        Some(user) => user,
        None => {
            let _ = Password::from_hash(UNKNOWN_USER_HASH.to_string())
                .matches_blocking(password)
                .await;
            tracing::info!(request_id = %context.request_id, "Unknown login identifier");
            return Err(AuthError::InvalidCredentials.into());
        }
    };
    let context = context.with_user_id(user.id);

    if !user.password.matches_blocking(password).await? {
        let e = AppError::from(AuthError::InvalidCredentials);
        context.log_error(&e);
        return Err(e);
    }

    let role = resolve_role(state.users.as_ref(), user.id, Utc::now()).await?;
    let access_token = state.tokens.generate_access_token_for(&user, role)?;
    let refresh_token = state.tokens.generate_refresh_token(&user)?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = user.id,
        role = %role,
        "User logged in successfully"
    );

    Ok(HttpResponse::Created().json(AuthResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.access_token_expiry(),
    }))
}

async fn find_user(
    state: &AppState,
    identifier: &LoginIdentifier,
) -> Result<Option<User>, AppError> {
    let result = match identifier {
        LoginIdentifier::Email(email) => state.users.get_by_email(email).await,
        LoginIdentifier::Username(username) => state.users.get_by_username(username).await,
    };

    match result {
        Ok(user) => Ok(Some(user)),
        Err(DatabaseError::RecordNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// POST /tokens/refresh
///
/// The bearer credential here is a refresh token. The authentication
/// middleware has already checked it against the current rotation secret
/// and derived the role from the store.
pub async fn refresh(
    CurrentUser(user): CurrentUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let access_token = state.tokens.generate_access_token(&user)?;

    tracing::info!(user_id = user.id, "Access token refreshed");

    Ok(HttpResponse::Created().json(AccessTokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.access_token_expiry(),
    }))
}

/// POST /tokens/revoke
///
/// Rotate the caller's rotation secret, which invalidates every refresh
/// token issued to them. Access tokens already issued stay valid until they
/// expire.
pub async fn revoke(
    CurrentUser(caller): CurrentUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_revocation").with_user_id(caller.id);

    let mut user = state.users.get_by_username(&caller.username).await?;
    if user.id != caller.id {
        return Err(AuthError::InvalidToken.into());
    }

    user.token_hash = generate_rotation_secret();
    state.users.update(&mut user).await.map_err(|e| {
        let e = AppError::from(e);
        context.log_error(&e);
        e
    })?;

    tracing::info!(request_id = %context.request_id, user_id = user.id, "Refresh tokens revoked");

    Ok(HttpResponse::Ok().json(json!({
        "message": "all refresh tokens for this account have been revoked"
    })))
}
