/// Middleware module
///
/// Authentication attaches an identity to every request; the authorization
/// gates then admit or reject it per route.

mod authentication;
mod authorization;

pub use authentication::{bearer_credential, Authentication, REFRESH_PATH};
pub use authorization::{
    authorize, require_activated, require_authenticated, require_role, Authorize, Gate,
};

use actix_web::{
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
};

use crate::error::AppError;

/// Short-circuit a request with the error's response
fn reject<B>(req: ServiceRequest, err: AppError) -> ServiceResponse<EitherBody<B>> {
    req.error_response(err).map_into_right_body()
}
