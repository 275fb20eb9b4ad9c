mod admin;
mod health_check;
mod tokens;
mod users;

pub use admin::{ban_user, delete_user};
pub use health_check::health_check;
pub use tokens::{login, refresh, revoke};
pub use users::{account, activate, activate_by_link, me, register, request_verification};
