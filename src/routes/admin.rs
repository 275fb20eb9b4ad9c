/// Administrator Routes
///
/// Every handler here sits behind the admin role gate.

use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::auth::CurrentUser;
use crate::error::{AppError, ValidationErrors};
use crate::startup::AppState;
use crate::validators::parse_username;

const MAX_BAN_DAYS: i64 = 3650;

#[derive(Deserialize)]
pub struct BanRequest {
    pub days: i64,
}

/// POST /admin/users/{id}/bans
///
/// # Errors
/// - 422: `days` outside 1..=3650
/// - 404: No such user
/// - 409: The user already has an active ban
pub async fn ban_user(
    CurrentUser(admin): CurrentUser,
    path: web::Path<i64>,
    form: web::Json<BanRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    if !(1..=MAX_BAN_DAYS).contains(&form.days) {
        return Err(ValidationErrors::single(
            "days",
            format!("must be between 1 and {}", MAX_BAN_DAYS),
        )
        .into());
    }

    let now = Utc::now();
    let ban = state
        .users
        .insert_ban(user_id, now + Duration::days(form.days), now)
        .await?;

    tracing::info!(
        admin_id = admin.id,
        user_id = user_id,
        expiry = %ban.expiry,
        "User banned"
    );

    Ok(HttpResponse::Created().json(json!({ "ban": ban })))
}

/// DELETE /admin/users/{username}
pub async fn delete_user(
    CurrentUser(admin): CurrentUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let username = parse_username(&path.into_inner()).map_err(ValidationErrors::from)?;

    state.users.delete_by_username(&username).await?;

    tracing::info!(admin_id = admin.id, username = %username, "User deleted");

    Ok(HttpResponse::Ok().json(json!({ "message": "user successfully deleted" })))
}
