//! An in-process credential store.
//!
//! Good enough for the demo site and for tests: users live in a
//! `tokio::sync::RwLock<HashMap>`, scopes are `Arc` clones, and a few
//! counters make scope lifetimes observable. The management methods
//! (`set_password`, `set_roles`, `update_security_stamp`, `remove_user`)
//! stand in for the account-management layer that, in a real deployment,
//! lives outside the session core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use newsgate_protocol::{Principal, UserId};
use tokio::sync::RwLock;

use crate::password;
use crate::record::new_user_id;
use crate::{CredentialRecord, CredentialStore, NewUser, StoreError, StoreProvider, new_security_stamp};

#[derive(Debug)]
struct UserEntry {
    record: CredentialRecord,
    password_hash: Option<String>,
}

#[derive(Debug)]
struct Inner {
    users: RwLock<HashMap<UserId, UserEntry>>,
    stamp_tracking: AtomicBool,
    open_scopes: AtomicUsize,
    scopes_opened: AtomicU64,
    lookups: AtomicU64,
}

/// Shared in-memory credential store. Cloning is cheap and every clone
/// sees the same users.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// An empty store with stamp tracking enabled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                users: RwLock::new(HashMap::new()),
                stamp_tracking: AtomicBool::new(true),
                open_scopes: AtomicUsize::new(0),
                scopes_opened: AtomicU64::new(0),
                lookups: AtomicU64::new(0),
            }),
        }
    }

    /// Turns stamp tracking on or off. With tracking off, stamp comparison
    /// always succeeds.
    pub fn set_stamp_tracking(&self, enabled: bool) {
        self.inner.stamp_tracking.store(enabled, Ordering::SeqCst);
    }

    /// Adds a user. Generates the id and stamp unless `new` fixes them.
    ///
    /// # Errors
    /// - [`StoreError::DuplicateUserName`] if the name (compared
    ///   case-insensitively) is taken
    /// - [`StoreError::Password`] if hashing fails
    pub async fn add_user(&self, new: NewUser) -> Result<CredentialRecord, StoreError> {
        let password_hash = match new.password {
            Some(pw) => Some(hash_blocking(pw).await?),
            None => None,
        };

        let mut users = self.inner.users.write().await;
        let wanted = normalize(&new.user_name);
        if users
            .values()
            .any(|e| normalize(&e.record.user_name) == wanted)
        {
            return Err(StoreError::DuplicateUserName(new.user_name));
        }

        let record = CredentialRecord {
            id: new.id.unwrap_or_else(new_user_id),
            user_name: new.user_name,
            security_stamp: Some(new.security_stamp.unwrap_or_else(new_security_stamp)),
            roles: new.roles,
        };
        users.insert(
            record.id.clone(),
            UserEntry {
                record: record.clone(),
                password_hash,
            },
        );

        tracing::info!(user_id = %record.id, user_name = %record.user_name, "user added");
        Ok(record)
    }

    /// Deletes a user. Returns `false` if there was none.
    pub async fn remove_user(&self, id: &UserId) -> bool {
        let removed = self.inner.users.write().await.remove(id).is_some();
        if removed {
            tracing::info!(user_id = %id, "user removed");
        }
        removed
    }

    /// Snapshot of a user's record.
    pub async fn get(&self, id: &UserId) -> Option<CredentialRecord> {
        self.inner
            .users
            .read()
            .await
            .get(id)
            .map(|e| e.record.clone())
    }

    /// Rotates the user's stamp to a fresh random value and returns it.
    /// Every live session of this user becomes stale.
    ///
    /// # Errors
    /// [`StoreError::UserNotFound`] if there is no such user.
    pub async fn update_security_stamp(&self, id: &UserId) -> Result<String, StoreError> {
        let stamp = new_security_stamp();
        self.set_security_stamp(id, Some(stamp.clone())).await?;
        Ok(stamp)
    }

    /// Sets the stamp to an exact value (or clears it).
    ///
    /// # Errors
    /// [`StoreError::UserNotFound`] if there is no such user.
    pub async fn set_security_stamp(
        &self,
        id: &UserId,
        stamp: Option<String>,
    ) -> Result<(), StoreError> {
        let mut users = self.inner.users.write().await;
        let entry = users
            .get_mut(id)
            .ok_or_else(|| StoreError::UserNotFound(id.clone()))?;
        entry.record.security_stamp = stamp;
        tracing::debug!(user_id = %id, "security stamp changed");
        Ok(())
    }

    /// Changes the password. This is a credential change, so the stamp
    /// rotates too.
    ///
    /// # Errors
    /// [`StoreError::UserNotFound`] or [`StoreError::Password`].
    pub async fn set_password(&self, id: &UserId, password: &str) -> Result<(), StoreError> {
        let hash = hash_blocking(password.to_string()).await?;
        let mut users = self.inner.users.write().await;
        let entry = users
            .get_mut(id)
            .ok_or_else(|| StoreError::UserNotFound(id.clone()))?;
        entry.password_hash = Some(hash);
        entry.record.security_stamp = Some(new_security_stamp());
        tracing::info!(user_id = %id, "password changed, security stamp rotated");
        Ok(())
    }

    /// Replaces the user's roles and rotates the stamp.
    ///
    /// # Errors
    /// [`StoreError::UserNotFound`] if there is no such user.
    pub async fn set_roles(&self, id: &UserId, roles: Vec<String>) -> Result<(), StoreError> {
        let mut users = self.inner.users.write().await;
        let entry = users
            .get_mut(id)
            .ok_or_else(|| StoreError::UserNotFound(id.clone()))?;
        entry.record.roles = roles;
        entry.record.security_stamp = Some(new_security_stamp());
        tracing::info!(user_id = %id, "roles changed, security stamp rotated");
        Ok(())
    }

    /// Number of scopes currently alive (opened and not yet dropped).
    pub fn open_scopes(&self) -> usize {
        self.inner.open_scopes.load(Ordering::SeqCst)
    }

    /// Total scopes ever opened.
    pub fn scopes_opened(&self) -> u64 {
        self.inner.scopes_opened.load(Ordering::SeqCst)
    }

    /// Total `find_user_by_principal` calls.
    pub fn lookup_count(&self) -> u64 {
        self.inner.lookups.load(Ordering::SeqCst)
    }
}

impl StoreProvider for InMemoryStore {
    type Scope = InMemoryScope;

    async fn open_scope(&self) -> Result<InMemoryScope, StoreError> {
        self.inner.open_scopes.fetch_add(1, Ordering::SeqCst);
        self.inner.scopes_opened.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryScope {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// One scope onto an [`InMemoryStore`]. Decrements the open-scope counter
/// when dropped.
#[derive(Debug)]
pub struct InMemoryScope {
    inner: Arc<Inner>,
}

impl Drop for InMemoryScope {
    fn drop(&mut self) {
        self.inner.open_scopes.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CredentialStore for InMemoryScope {
    async fn find_user_by_principal(
        &self,
        principal: &Principal,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.inner.lookups.fetch_add(1, Ordering::SeqCst);
        let users = self.inner.users.read().await;
        Ok(users.get(principal.user_id()).map(|e| e.record.clone()))
    }

    fn supports_stamp_tracking(&self) -> bool {
        self.inner.stamp_tracking.load(Ordering::SeqCst)
    }

    async fn current_stamp(&self, user: &CredentialRecord) -> Result<Option<String>, StoreError> {
        // The record was read through this same scope, so its stamp is the
        // store's answer as of that read.
        Ok(user.security_stamp.clone())
    }

    async fn verify_password(
        &self,
        user_name: &str,
        password: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let wanted = normalize(user_name);
        let found = {
            let users = self.inner.users.read().await;
            users
                .values()
                .find(|e| normalize(&e.record.user_name) == wanted)
                .map(|e| (e.record.clone(), e.password_hash.clone()))
        };

        let Some((record, Some(hash))) = found else {
            return Ok(None);
        };
        let password = password.to_string();
        let ok = tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
            .await
            .map_err(|e| StoreError::Password(e.to_string()))?;
        Ok(ok.then_some(record))
    }
}

fn normalize(user_name: &str) -> String {
    user_name.trim().to_lowercase()
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn hash_blocking(password: String) -> Result<String, StoreError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| StoreError::Password(e.to_string()))?
}
