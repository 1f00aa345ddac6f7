//! The credential store interface the session layer consumes.
//!
//! Newsgate doesn't own user storage. A deployment plugs in whatever holds
//! its users (a SQL table, a directory service, the bundled
//! [`InMemoryStore`](crate::InMemoryStore)) by implementing two traits:
//!
//! - [`StoreProvider`]: long-lived, shared by every session. Its only job
//!   is to hand out short-lived scopes.
//! - [`CredentialStore`]: one scope. Opened right before a check and
//!   dropped right after, so a store connection is held for the duration
//!   of one lookup and never across a revalidation sleep.
//!
//! ```text
//!   revalidator tick
//!        │
//!        ▼
//!   provider.open_scope() ──→ scope.find_user_by_principal()
//!                                  │
//!                                  ▼
//!                             scope.current_stamp()
//!                                  │
//!                                  ▼
//!                             drop(scope)   ← always, even on error
//! ```

use std::future::Future;

use newsgate_protocol::Principal;

use crate::{CredentialRecord, StoreError};

/// One scoped handle onto the credential store.
///
/// # Trait bounds
///
/// - `Send + Sync` → a scope is created inside a revalidator task and may
///   be polled on any runtime worker thread.
/// - `'static` → a scope owns what it needs (typically a pooled
///   connection or an `Arc` of shared state) instead of borrowing from
///   the provider, so it can be dropped independently.
///
/// Release happens in `Drop`. Implementations return their connection to
/// the pool there.
pub trait CredentialStore: Send + Sync + 'static {
    /// Looks up the user the principal names (by its user id).
    ///
    /// # Returns
    /// - `Ok(Some(record))`: the user exists
    /// - `Ok(None)`: no such user (deleted, or never existed)
    /// - `Err(_)`: the store could not answer
    fn find_user_by_principal(
        &self,
        principal: &Principal,
    ) -> impl Future<Output = Result<Option<CredentialRecord>, StoreError>> + Send;

    /// Whether this store keeps security stamps at all. Stores that don't
    /// make every stamp comparison succeed.
    fn supports_stamp_tracking(&self) -> bool;

    /// The user's current security stamp. `None` means the record has no
    /// stamp, which is different from an empty stamp.
    fn current_stamp(
        &self,
        user: &CredentialRecord,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Checks a user name and password. Used by sign-in only; the
    /// revalidation path never sees passwords.
    ///
    /// # Returns
    /// - `Ok(Some(record))`: credentials are valid
    /// - `Ok(None)`: unknown user or wrong password (indistinguishable on
    ///   purpose)
    fn verify_password(
        &self,
        user_name: &str,
        password: &str,
    ) -> impl Future<Output = Result<Option<CredentialRecord>, StoreError>> + Send;
}

/// Hands out [`CredentialStore`] scopes.
///
/// Shared behind an `Arc` by every revalidator and request handler.
pub trait StoreProvider: Send + Sync + 'static {
    /// The scope type this provider produces.
    type Scope: CredentialStore;

    /// Opens a new scope. The caller drops it as soon as its check is done.
    ///
    /// # Errors
    /// [`StoreError::Unavailable`] when no scope can be obtained right now.
    fn open_scope(&self) -> impl Future<Output = Result<Self::Scope, StoreError>> + Send;
}
