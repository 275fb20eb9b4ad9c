//! Registration, login, refresh and revocation through the HTTP surface

mod common;

use common::{spawn_app, PASSWORD};
use ocm_auth::store::UserStore;
use serde_json::{json, Value};

// --- Registration ---

#[tokio::test]
async fn register_returns_202_with_sanitized_projection() {
    let app = spawn_app().await;

    let response = app.register("alice", "alice@example.com", PASSWORD).await;
    assert_eq!(202, response.status().as_u16());

    let body: Value = response.json().await.expect("Failed to parse response");
    let user = &body["user"];
    assert_eq!(user["username"], "alice");
    assert_eq!(user["email"], "alice@example.com");
    assert_eq!(user["activated"], false);
    for secret in ["password", "password_hash", "token_hash", "hash"] {
        assert!(user.get(secret).is_none(), "projection leaked {}", secret);
    }
}

#[tokio::test]
async fn register_sends_welcome_email_with_code() {
    let app = spawn_app().await;
    app.register("bob", "bob@example.com", PASSWORD).await;

    let sent = app.wait_for_emails(1).await;
    assert_eq!(sent[0].recipient, "bob@example.com");
    assert_eq!(sent[0].template, "user_welcome");
    assert_eq!(sent[0].data["username"], "bob");
    assert!(sent[0].data["activation_code"].as_str().unwrap().len() > 20);
}

#[tokio::test]
async fn register_reports_every_invalid_field() {
    let app = spawn_app().await;

    let response = app.register("x", "not-an-email", "short").await;
    assert_eq!(422, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    for field in ["username", "email", "password"] {
        assert!(body["fields"].get(field).is_some(), "missing error for {}", field);
    }
}

#[tokio::test]
async fn register_rejects_duplicates_with_field() {
    let app = spawn_app().await;
    app.register("carol", "carol@example.com", PASSWORD).await;

    let same_email = app.register("caroline", "carol@example.com", PASSWORD).await;
    assert_eq!(409, same_email.status().as_u16());
    let body: Value = same_email.json().await.unwrap();
    assert!(body["fields"].get("email").is_some());

    let same_name = app.register("carol", "other@example.com", PASSWORD).await;
    assert_eq!(409, same_name.status().as_u16());
    let body: Value = same_name.json().await.unwrap();
    assert!(body["fields"].get("username").is_some());
}

#[tokio::test]
async fn register_succeeds_when_mailer_fails() {
    let app = common::spawn_app_with_mailer(common::RecordingMailer::failing()).await;

    let response = app.register("dave", "dave@example.com", PASSWORD).await;
    assert_eq!(202, response.status().as_u16());
    assert!(app.store.get_by_username("dave").await.is_ok());
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/users"))
        .header("Content-Type", "application/json")
        .body("{\"username\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(422, response.status().as_u16());
}

// --- Login ---

#[tokio::test]
async fn login_wrong_password_and_unknown_user_look_the_same() {
    let app = spawn_app().await;
    app.register("erin", "erin@example.com", PASSWORD).await;

    let wrong_password = app
        .login(json!({ "email": "erin@example.com", "password": "wronghorse1" }))
        .await;
    let unknown_user = app
        .login(json!({ "email": "nobody@example.com", "password": PASSWORD }))
        .await;

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_user.status().as_u16());

    let first: Value = wrong_password.json().await.unwrap();
    let second: Value = unknown_user.json().await.unwrap();
    assert_eq!(first["code"], "INVALID_CREDENTIALS");
    assert_eq!(first["message"], second["message"]);
}

#[tokio::test]
async fn login_by_username_or_email() {
    let app = spawn_app().await;
    app.register("frank", "frank@example.com", PASSWORD).await;

    let by_username = app
        .login(json!({ "username": "frank", "password": PASSWORD }))
        .await;
    assert_eq!(201, by_username.status().as_u16());

    let by_email = app
        .login(json!({ "email": "frank@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(201, by_email.status().as_u16());

    let body: Value = by_email.json().await.unwrap();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 86_400);
    assert!(body["refresh_token"].is_string());
}

#[tokio::test]
async fn login_with_malformed_identifiers_fails_validation() {
    let app = spawn_app().await;

    let response = app
        .login(json!({ "username": "!", "email": "nope", "password": PASSWORD }))
        .await;
    assert_eq!(422, response.status().as_u16());

    let response = app.login(json!({ "password": PASSWORD })).await;
    assert_eq!(422, response.status().as_u16());
}

#[tokio::test]
async fn login_does_not_activate_the_account() {
    let app = spawn_app().await;
    app.register("grace", "grace@example.com", PASSWORD).await;

    app.login_tokens("grace", PASSWORD).await;

    let stored = app.store.get_by_username("grace").await.unwrap();
    assert!(!stored.activated);
}

// --- End to end ---

#[tokio::test]
async fn unactivated_user_can_log_in_but_not_reach_activated_routes() {
    let app = spawn_app().await;

    let response = app.register("heidi", "heidi@example.com", PASSWORD).await;
    assert_eq!(202, response.status().as_u16());

    let wrong = app
        .login(json!({ "username": "heidi", "password": "notthepassword" }))
        .await;
    assert_eq!(401, wrong.status().as_u16());

    let (access, _) = app.login_tokens("heidi", PASSWORD).await;

    let me = app.get_with_token("/users/me", &access).await;
    assert_eq!(200, me.status().as_u16());
    let me: Value = me.json().await.unwrap();
    assert_eq!(me["user"]["username"], "heidi");
    assert_eq!(me["user"]["role"], "user");

    let account = app.get_with_token("/account", &access).await;
    assert_eq!(403, account.status().as_u16());
    let body: Value = account.json().await.unwrap();
    assert_eq!(body["code"], "INACTIVE_ACCOUNT");

    let code = app.activation_code_for("heidi@example.com", 1).await;
    assert_eq!(200, app.activate(&code).await.status().as_u16());

    // The old access token still says unactivated; a new login picks up the flag.
    let (access, _) = app.login_tokens("heidi", PASSWORD).await;
    let account = app.get_with_token("/account", &access).await;
    assert_eq!(200, account.status().as_u16());
    let body: Value = account.json().await.unwrap();
    assert_eq!(body["user"]["activated"], true);
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn anonymous_requests_to_gated_routes_are_rejected() {
    let app = spawn_app().await;

    for path in ["/users/me", "/account"] {
        let response = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(401, response.status().as_u16(), "{}", path);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "AUTHENTICATION_REQUIRED");
    }
}

#[tokio::test]
async fn garbage_bearer_token_is_invalid_token() {
    let app = spawn_app().await;

    let response = app.get_with_token("/users/me", "not.a.token").await;
    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_TOKEN");
}

// --- Refresh and revocation ---

#[tokio::test]
async fn refresh_token_mints_access_token() {
    let app = spawn_app().await;
    app.register("ivan", "ivan@example.com", PASSWORD).await;
    let (_, refresh) = app.login_tokens("ivan", PASSWORD).await;

    let response = app.post_with_token("/tokens/refresh", &refresh).await;
    assert_eq!(201, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    let access = body["access_token"].as_str().unwrap();
    assert!(body.get("refresh_token").is_none());

    let me = app.get_with_token("/users/me", access).await;
    assert_eq!(200, me.status().as_u16());
}

#[tokio::test]
async fn token_kinds_cannot_be_swapped() {
    let app = spawn_app().await;
    app.register("judy", "judy@example.com", PASSWORD).await;
    let (access, refresh) = app.login_tokens("judy", PASSWORD).await;

    let access_as_refresh = app.post_with_token("/tokens/refresh", &access).await;
    assert_eq!(401, access_as_refresh.status().as_u16());

    let refresh_as_access = app.get_with_token("/users/me", &refresh).await;
    assert_eq!(401, refresh_as_access.status().as_u16());
}

#[tokio::test]
async fn revoke_invalidates_outstanding_refresh_tokens() {
    let app = spawn_app().await;
    app.register("mallory", "mallory@example.com", PASSWORD).await;
    let (access, old_refresh) = app.login_tokens("mallory", PASSWORD).await;

    let response = app.post_with_token("/tokens/revoke", &access).await;
    assert_eq!(200, response.status().as_u16());

    let stale = app.post_with_token("/tokens/refresh", &old_refresh).await;
    assert_eq!(401, stale.status().as_u16());

    let (_, new_refresh) = app.login_tokens("mallory", PASSWORD).await;
    let fresh = app.post_with_token("/tokens/refresh", &new_refresh).await;
    assert_eq!(201, fresh.status().as_u16());
}

#[tokio::test]
async fn refresh_picks_up_role_changes() {
    let app = spawn_app().await;
    app.register("niaj", "niaj@example.com", PASSWORD).await;
    let (_, refresh) = app.login_tokens("niaj", PASSWORD).await;

    let user = app.store.get_by_username("niaj").await.unwrap();
    app.store.grant_admin(user.id).await;

    let response = app.post_with_token("/tokens/refresh", &refresh).await;
    let body: Value = response.json().await.unwrap();
    let claims = app
        .tokens
        .validate_access_token(body["access_token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.role, ocm_auth::auth::Role::Admin);
}
