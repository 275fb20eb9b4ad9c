/// User Routes
///
/// Registration, account activation, activation-code re-request, and the
/// caller's own identity and profile.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{
    generate_rotation_secret, resolve_role, AuthenticatedUser, CurrentUser, Password, Role,
};
use crate::email_client::{Mailer, USER_WELCOME_TEMPLATE, VERIFICATION_CODE_TEMPLATE};
use crate::error::{AppError, DatabaseError, ErrorContext, ValidationErrors};
use crate::startup::AppState;
use crate::users::{NewUser, UserProjection};
use crate::validators::{parse_email, parse_verification_code, validate_registration};
use crate::verification::{activate_account, issue_verification};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ActivationRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct VerificationRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct UserEnvelope {
    pub user: UserProjection,
}

/// POST /users
///
/// Create an unactivated account and mail its activation code.
///
/// # Errors
/// - 422: Validation errors (username/email/password shape)
/// - 409: Username or email already registered
/// - 500: Internal server error
pub async fn register(
    form: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");
    let RegisterRequest {
        username,
        email,
        password,
    } = form.into_inner();

    let input = validate_registration(&username, &email, &password)?;
    let password = Password::set_blocking(password).await?;

    let new_user = NewUser::new(input.username, input.email, &password, generate_rotation_secret());
    let user = state.users.insert(&new_user).await.map_err(|e| {
        let e = AppError::from(e);
        context.log_error(&e);
        e
    })?;

    let verification = issue_verification(
        state.verifications.as_ref(),
        user.id,
        state.settings.verification.ttl(),
    )
    .await?;

    dispatch_email(
        state.mailer.clone(),
        user.email.clone(),
        USER_WELCOME_TEMPLATE,
        json!({
            "user_id": user.id,
            "username": user.username,
            "activation_code": verification.plaintext(),
        }),
    );

    tracing::info!(
        request_id = %context.request_id,
        user_id = user.id,
        "User registered successfully"
    );

    Ok(HttpResponse::Accepted().json(UserEnvelope {
        user: user.projection(),
    }))
}

/// PUT /users/activated
pub async fn activate(
    form: web::Json<ActivationRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    activate_with_code(&form.code, &state).await
}

/// GET /users/activate?code=
pub async fn activate_by_link(
    query: web::Query<ActivationRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    activate_with_code(&query.code, &state).await
}

async fn activate_with_code(code: &str, state: &AppState) -> Result<HttpResponse, AppError> {
    let code = parse_verification_code(code).map_err(ValidationErrors::from)?;

    let user = activate_account(
        state.users.as_ref(),
        state.verifications.as_ref(),
        &code,
        Utc::now(),
    )
    .await
    .map_err(|e| match e {
        AppError::Database(DatabaseError::RecordNotFound) => {
            ValidationErrors::single("code", "invalid or expired activation code").into()
        }
        other => other,
    })?;

    Ok(HttpResponse::Ok().json(UserEnvelope {
        user: user.projection(),
    }))
}

/// POST /users/verification
///
/// Issue a fresh activation code for an unactivated account, replacing any
/// earlier one. The response is the same whether or not the address is
/// registered.
pub async fn request_verification(
    form: web::Json<VerificationRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let email = parse_email(&form.email).map_err(ValidationErrors::from)?;

    match state.users.get_by_email(&email).await {
        Ok(user) if !user.activated => {
            let verification = issue_verification(
                state.verifications.as_ref(),
                user.id,
                state.settings.verification.ttl(),
            )
            .await?;

            dispatch_email(
                state.mailer.clone(),
                user.email.clone(),
                VERIFICATION_CODE_TEMPLATE,
                json!({ "activation_code": verification.plaintext() }),
            );
        }
        Ok(user) => {
            tracing::info!(user_id = user.id, "Verification requested for active account");
        }
        Err(DatabaseError::RecordNotFound) => {
            tracing::info!("Verification requested for unknown address");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(HttpResponse::Accepted().json(json!({
        "message": "an email will be sent to you containing activation instructions"
    })))
}

/// GET /users/me
///
/// The identity as the access token describes it; no store round-trip.
pub async fn me(CurrentUser(user): CurrentUser) -> HttpResponse {
    #[derive(Serialize)]
    struct Envelope {
        user: AuthenticatedUser,
    }

    HttpResponse::Ok().json(Envelope { user })
}

/// GET /account
///
/// The stored profile of an activated caller, with a freshly derived role.
pub async fn account(
    CurrentUser(caller): CurrentUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    #[derive(Serialize)]
    struct Envelope {
        user: UserProjection,
        role: Role,
    }

    let user = state.users.get_by_username(&caller.username).await?;
    let role = resolve_role(state.users.as_ref(), user.id, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(Envelope {
        user: user.projection(),
        role,
    }))
}

/// Send mail in the background. A failed send is logged and never undoes
/// the work already committed by the caller.
fn dispatch_email(
    mailer: Arc<dyn Mailer>,
    recipient: String,
    template: &'static str,
    data: serde_json::Value,
) {
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&recipient, template, data).await {
            tracing::error!(template = template, error = %e, "Failed to send email");
        }
    });
}
