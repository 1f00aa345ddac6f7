//! Error types for the credential store.

use newsgate_protocol::UserId;

/// Errors returned by credential store operations.
///
/// The first two variants are faults of the store itself. Callers on the
/// revalidation path must not read them as "the user is gone": a store
/// that is down says nothing about whether a credential was revoked.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached (connection refused, pool
    /// exhausted, timeout).
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but the lookup itself failed.
    #[error("credential lookup failed: {0}")]
    Lookup(String),

    /// A management operation named a user that doesn't exist.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// Another user already has this (normalized) user name.
    #[error("user name {0:?} is already taken")]
    DuplicateUserName(String),

    /// Hashing or verifying a password failed for a reason other than a
    /// wrong password.
    #[error("password hashing failed: {0}")]
    Password(String),
}

impl StoreError {
    /// `true` for faults that may go away on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Lookup(_))
    }
}
