use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Startup user name that marks an unauthenticated diner.
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug)]
pub struct CoversAuthSource {
    password: String,
}

impl CoversAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CoversAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!("password login for user {:?}", login.user());
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// The caller behind a request. Built per request from connection metadata and
/// handed to every engine operation explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    uid: Option<String>,
    role: Role,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            uid: None,
            role: Role::User,
        }
    }

    pub fn user(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            role: Role::User,
        }
    }

    pub fn admin(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            role: Role::Admin,
        }
    }

    /// Resolve from the pgwire startup `user`. Admin uids come from config.
    pub fn from_login(user: Option<&str>, admins: &HashSet<String>) -> Self {
        match user.map(str::trim) {
            None | Some("") | Some(ANONYMOUS_USER) => Self::anonymous(),
            Some(uid) if admins.contains(uid) => Self::admin(uid),
            Some(uid) => Self::user(uid),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_login() {
        let admins: HashSet<String> = ["root-uid".to_string()].into_iter().collect();

        assert_eq!(Identity::from_login(None, &admins), Identity::anonymous());
        assert_eq!(Identity::from_login(Some(""), &admins), Identity::anonymous());
        assert_eq!(Identity::from_login(Some("anonymous"), &admins), Identity::anonymous());

        let owner = Identity::from_login(Some("owner-1"), &admins);
        assert_eq!(owner.uid(), Some("owner-1"));
        assert_eq!(owner.role(), Role::User);

        let admin = Identity::from_login(Some("root-uid"), &admins);
        assert!(admin.is_admin());
    }
}
