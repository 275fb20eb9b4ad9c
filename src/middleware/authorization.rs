/// Authorization gates
///
/// Each gate runs after `Authentication` and reads the attached identity.
/// The gates are ordered: `Activated` implies `Authenticated`, and `Role`
/// implies `Activated`, so wrapping a route in the strongest gate it needs
/// is enough.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::{AuthenticatedUser, Identity, Roles};
use crate::error::AuthError;
use crate::middleware::reject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Authenticated,
    Activated,
    /// An empty allow-list admits every role
    Role(Roles),
}

/// Check `identity` against `gate`, returning the admitted user
pub fn authorize<'a>(identity: &'a Identity, gate: &Gate) -> Result<&'a AuthenticatedUser, AuthError> {
    let user = match identity {
        Identity::Anonymous => return Err(AuthError::AuthenticationRequired),
        Identity::Authenticated(user) => user,
    };

    if matches!(gate, Gate::Authenticated) {
        return Ok(user);
    }
    if !user.activated {
        return Err(AuthError::InactiveAccount);
    }

    match gate {
        Gate::Role(allowed) if !allowed.includes(user.role) => Err(AuthError::NotPermitted),
        _ => Ok(user),
    }
}

/// Middleware wrapping a route or scope in one gate
#[derive(Debug, Clone)]
pub struct Authorize {
    gate: Rc<Gate>,
}

pub fn require_authenticated() -> Authorize {
    Authorize {
        gate: Rc::new(Gate::Authenticated),
    }
}

pub fn require_activated() -> Authorize {
    Authorize {
        gate: Rc::new(Gate::Activated),
    }
}

pub fn require_role(allowed: Roles) -> Authorize {
    Authorize {
        gate: Rc::new(Gate::Role(allowed)),
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authorize
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthorizeService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthorizeService {
            service: Rc::new(service),
            gate: self.gate.clone(),
        }))
    }
}

pub struct AuthorizeService<S> {
    service: Rc<S>,
    gate: Rc<Gate>,
}

impl<S, B> Service<ServiceRequest> for AuthorizeService<S>
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
        let decision = match req.extensions().get::<Identity>() {
            Some(identity) => authorize(identity, &self.gate).map(|user| user.id),
            None => {
                tracing::error!(path = %req.path(), "Authorization gate reached without an identity");
                Err(AuthError::AuthenticationRequired)
            }
        };

        match decision {
            Ok(user_id) => {
                tracing::debug!(user_id = user_id, gate = ?self.gate, "Request authorized");
                let service = self.service.clone();
                Box::pin(async move { Ok(service.call(req).await?.map_into_left_body()) })
            }
            Err(e) => {
                tracing::info!(gate = ?self.gate, error = %e, "Request rejected by gate");
                Box::pin(async move { Ok(reject(req, e.into())) })
            }
        }
    }
}
