//! Role-based authorization policies.

use newsgate_protocol::Principal;

/// The result of evaluating a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    /// No principal: the caller must sign in (`401`).
    Unauthenticated,
    /// Signed in without a required role (`403`).
    Forbidden,
}

/// "Authenticated, and in at least one of these roles."
#[derive(Debug, Clone)]
pub struct RolePolicy {
    name: &'static str,
    roles: Vec<String>,
}

impl RolePolicy {
    pub fn any_of<I, R>(name: &'static str, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            name,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// The policy guarding the admin area: `admin` or `writer`.
    pub fn admin() -> Self {
        Self::any_of("admin", ["admin", "writer"])
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn evaluate(&self, principal: Option<&Principal>) -> Authorization {
        let Some(principal) = principal else {
            return Authorization::Unauthenticated;
        };
        if self.roles.iter().any(|role| principal.is_in_role(role)) {
            Authorization::Allowed
        } else {
            Authorization::Forbidden
        }
    }
}
