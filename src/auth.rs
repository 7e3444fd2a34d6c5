use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::UserId;

/// Shared-secret cleartext auth. Every login user checks against the same
/// password; the user name only carries the caller identity.
#[derive(Debug)]
pub struct RentdAuthSource {
    password: String,
}

impl RentdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RentdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("login as {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Caller identity from the startup user name. Anything that is not an
/// integer id logs in anonymously.
pub fn caller_from_login(user: Option<&str>) -> Option<UserId> {
    user.and_then(|u| u.trim().parse().ok())
}
