//! Claims principals: who a session says its user is.
//!
//! A [`Principal`] is captured once, at sign-in, and never edited claim by
//! claim afterwards. If anything about the user changes, the old principal
//! is thrown away and a new one built. That is what makes the embedded
//! security-stamp claim useful: it is a snapshot of the stamp at sign-in
//! time, and comparing it with the store's current stamp tells us whether
//! the credential has changed since.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Well-known claim types.
pub mod claim_types {
    /// The stable user identifier.
    pub const SUBJECT: &str = "sub";
    /// The user name shown in the UI.
    pub const NAME: &str = "name";
    /// One claim per role.
    pub const ROLE: &str = "role";
    /// The security stamp captured at sign-in.
    pub const SECURITY_STAMP: &str = "security_stamp";
}

/// One name/value pair asserted about the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// An authenticated identity.
///
/// Construct through [`Principal::builder`]. The builder guarantees at most
/// one claim of the security-stamp type (setting it twice replaces the
/// first value), so lookups by claim type are unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    user_id: UserId,
    claims: Vec<Claim>,
}

impl Principal {
    /// Starts building a principal for `user_id`. The `sub` claim is added
    /// automatically.
    pub fn builder(user_id: UserId) -> PrincipalBuilder {
        PrincipalBuilder {
            claims: vec![Claim::new(claim_types::SUBJECT, user_id.as_str())],
            user_id,
            stamp_claim_type: claim_types::SECURITY_STAMP.to_string(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Value of the first claim of `claim_type`, if any.
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// The user name claim, if one was issued.
    pub fn name(&self) -> Option<&str> {
        self.find_first(claim_types::NAME)
    }

    /// All role claims, in issue order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.claims
            .iter()
            .filter(|c| c.claim_type == claim_types::ROLE)
            .map(|c| c.value.as_str())
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles().any(|r| r == role)
    }
}

/// Builder for [`Principal`].
#[derive(Debug)]
pub struct PrincipalBuilder {
    user_id: UserId,
    claims: Vec<Claim>,
    stamp_claim_type: String,
}

impl PrincipalBuilder {
    /// Appends an arbitrary claim.
    pub fn claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(claim_type, value));
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.claim(claim_types::NAME, name)
    }

    pub fn role(self, role: impl Into<String>) -> Self {
        self.claim(claim_types::ROLE, role)
    }

    /// Uses a non-default claim type for the security stamp. Call before
    /// [`security_stamp`](Self::security_stamp).
    pub fn stamp_claim_type(mut self, claim_type: impl Into<String>) -> Self {
        self.stamp_claim_type = claim_type.into();
        self
    }

    /// Sets the security-stamp claim, replacing any earlier value.
    pub fn security_stamp(mut self, stamp: impl Into<String>) -> Self {
        let claim_type = self.stamp_claim_type.clone();
        self.claims.retain(|c| c.claim_type != claim_type);
        self.claims.push(Claim::new(claim_type, stamp));
        self
    }

    pub fn build(self) -> Principal {
        Principal {
            user_id: self.user_id,
            claims: self.claims,
        }
    }
}

/// The authentication state attached to a connection.
///
/// `None` is anonymous. The revalidator flips a live session to anonymous
/// when its credential goes stale; the hosting layer treats that flip as a
/// forced sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthenticationState(Option<Principal>);

impl AuthenticationState {
    pub fn authenticated(principal: Principal) -> Self {
        Self(Some(principal))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.0.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.0.is_some()
    }
}
