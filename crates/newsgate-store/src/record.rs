//! The credential record shape and the input for creating users.

use newsgate_protocol::UserId;
use rand::Rng;

/// What the store knows about a user, minus secrets.
///
/// The password hash is deliberately not part of the record: records are
/// cloned into principals, logs and tests, and a hash has no business
/// travelling with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: UserId,
    pub user_name: String,
    /// Changes on every credential-affecting event (password change, role
    /// change, explicit revocation). `None` when the store never set one.
    pub security_stamp: Option<String>,
    pub roles: Vec<String>,
}

/// Input for [`InMemoryStore::add_user`](crate::InMemoryStore::add_user).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub(crate) id: Option<UserId>,
    pub(crate) user_name: String,
    pub(crate) password: Option<String>,
    pub(crate) roles: Vec<String>,
    pub(crate) security_stamp: Option<String>,
}

impl NewUser {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            id: None,
            user_name: user_name.into(),
            password: None,
            roles: Vec::new(),
            security_stamp: None,
        }
    }

    /// Fixes the user id instead of generating one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(UserId::new(id));
        self
    }

    /// Sets a password. Without one the user can't sign in through the
    /// login endpoint, only be signed in programmatically.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Fixes the initial stamp instead of generating one.
    pub fn security_stamp(mut self, stamp: impl Into<String>) -> Self {
        self.security_stamp = Some(stamp.into());
        self
    }
}

/// Generates a fresh security stamp: 32 uppercase hex characters
/// (128 bits of randomness).
pub fn new_security_stamp() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode_upper(bytes)
}

/// Generates a user id: `u-` followed by 16 lowercase hex characters.
pub(crate) fn new_user_id() -> UserId {
    let bytes: [u8; 8] = rand::rng().random();
    UserId(format!("u-{}", hex::encode(bytes)))
}
