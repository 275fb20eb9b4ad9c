/// Role derivation
///
/// Roles are computed per request from two facts held by the credential
/// store: administrator membership and an unexpired ban. Administrator
/// status wins over a ban; the ban is only consulted for non-admins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppError;
use crate::store::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Banned,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Banned => "banned",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An allow-list of roles. An empty list places no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles(Vec<Role>);

impl Roles {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    /// The unrestricted set
    pub fn any() -> Self {
        Self::default()
    }

    pub fn includes(&self, role: Role) -> bool {
        self.0.is_empty() || self.0.contains(&role)
    }
}

/// Pure role computation
pub fn derive_role(is_admin: bool, has_active_ban: bool) -> Role {
    if is_admin {
        Role::Admin
    } else if has_active_ban {
        Role::Banned
    } else {
        Role::User
    }
}

/// Look up the facts for `user_id` and derive its role.
///
/// The ban check is scoped to this user and only runs for non-admins.
/// It never deletes anything; expired bans are removed by the sweeper.
pub async fn resolve_role(
    store: &dyn UserStore,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Role, AppError> {
    if store.is_admin(user_id).await? {
        return Ok(Role::Admin);
    }
    let banned = store.has_active_ban(user_id, now).await?;
    Ok(derive_role(false, banned))
}

/// Periodically delete expired ban records.
///
/// Runs until the process exits. Failures are logged and retried on the
/// next tick.
pub async fn run_ban_sweeper(store: std::sync::Arc<dyn UserStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match store.purge_expired_bans(Utc::now()).await {
            Ok(0) => tracing::debug!("Ban sweep found nothing to purge"),
            Ok(purged) => tracing::info!(purged = purged, "Purged expired bans"),
            Err(e) => tracing::error!(error = %e, "Ban sweep failed"),
        }
    }
}
