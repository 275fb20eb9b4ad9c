use actix_web::dev::Server;
use actix_web::{web, App, HttpRequest, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{Role, Roles, TokenService};
use crate::configuration::Settings;
use crate::email_client::Mailer;
use crate::error::{AppError, ValidationErrors};
use crate::logger::RequestLogger;
use crate::middleware::{require_activated, require_authenticated, require_role, Authentication};
use crate::routes::{
    account, activate, activate_by_link, ban_user, delete_user, health_check, login, me, refresh,
    register, request_verification, revoke,
};
use crate::store::{UserStore, VerificationStore};

/// Everything the handlers share. Built once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub users: Arc<dyn UserStore>,
    pub verifications: Arc<dyn VerificationStore>,
    pub mailer: Arc<dyn Mailer>,
    pub settings: Arc<Settings>,
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let state_data = web::Data::new(state);

    let server = HttpServer::new(move || {
        let state = state_data.clone();

        App::new()
            // Global middleware; the last one wrapped runs first
            .wrap(Authentication::new(state.tokens.clone(), state.users.clone()))
            .wrap(RequestLogger)

            // Shared state
            .app_data(state)
            .app_data(web::JsonConfig::default().error_handler(malformed_body))
            .app_data(web::QueryConfig::default().error_handler(malformed_query))

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/users", web::post().to(register))
            .route("/users/activated", web::put().to(activate))
            .route("/users/activate", web::get().to(activate_by_link))
            .route("/users/verification", web::post().to(request_verification))
            .route("/tokens/authentication", web::post().to(login))

            // Authenticated routes
            .service(
                web::resource("/tokens/refresh")
                    .wrap(require_authenticated())
                    .route(web::post().to(refresh)),
            )
            .service(
                web::resource("/tokens/revoke")
                    .wrap(require_authenticated())
                    .route(web::post().to(revoke)),
            )
            .service(
                web::resource("/users/me")
                    .wrap(require_authenticated())
                    .route(web::get().to(me)),
            )

            // Activated accounts only
            .service(
                web::resource("/account")
                    .wrap(require_activated())
                    .route(web::get().to(account)),
            )

            // Administrators only
            .service(
                web::scope("/admin")
                    .wrap(require_role(Roles::new([Role::Admin])))
                    .route("/users/{id}/bans", web::post().to(ban_user))
                    .route("/users/{username}", web::delete().to(delete_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

fn malformed_body(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::from(ValidationErrors::single("body", err.to_string())).into()
}

fn malformed_query(err: actix_web::error::QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::from(ValidationErrors::single("query", err.to_string())).into()
}
