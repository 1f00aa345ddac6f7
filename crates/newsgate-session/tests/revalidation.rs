//! Integration tests for the revalidation loop.
//!
//! All tests run on tokio's paused clock. Sleeping in the test body
//! auto-advances time, so the revalidator's ticks land at exact instants
//! (20s, 40s, ...) and "between tick n and n+1" is a precise statement.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use newsgate_protocol::{ConnectionId, Principal, UserId};
use newsgate_session::{
    resolve_sign_in, InvalidationReason, RevalidationConfig, RevalidationOutcome, Revalidator,
    RevalidatorHandle, RevalidatorState, SessionManager, SignOutOutcome,
};
use newsgate_store::{
    CredentialRecord, CredentialStore, InMemoryScope, InMemoryStore, NewUser, StoreError,
    StoreProvider,
};
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

// =========================================================================
// Helpers
// =========================================================================

const INTERVAL: Duration = Duration::from_secs(20);

fn user_id() -> UserId {
    UserId::new("u-1")
}

fn principal(stamp: &str) -> Principal {
    Principal::builder(user_id())
        .name("alice")
        .security_stamp(stamp)
        .build()
}

async fn store_with_stamp(stamp: &str) -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .add_user(NewUser::new("alice").id("u-1").security_stamp(stamp))
        .await
        .unwrap();
    store
}

fn config() -> RevalidationConfig {
    RevalidationConfig::with_interval(INTERVAL)
}

fn start<P: StoreProvider>(provider: P, stamp: &str) -> RevalidatorHandle {
    Revalidator::start(Arc::new(provider), principal(stamp), &config(), ConnectionId(1))
}

/// Sleeps until `secs` after `origin`.
async fn at(origin: Instant, secs: u64) {
    time::sleep_until(origin + Duration::from_secs(secs)).await;
}

/// A provider whose scopes can be made to fail.
#[derive(Clone)]
struct FlakyProvider {
    store: InMemoryStore,
    failing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyProvider {
    fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            failing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StoreProvider for FlakyProvider {
    type Scope = InMemoryScope;

    async fn open_scope(&self) -> Result<InMemoryScope, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.store.open_scope().await
    }
}

/// A provider whose lookups take an hour.
#[derive(Clone)]
struct SlowProvider {
    store: InMemoryStore,
}

struct SlowScope {
    inner: InMemoryScope,
}

impl StoreProvider for SlowProvider {
    type Scope = SlowScope;

    async fn open_scope(&self) -> Result<SlowScope, StoreError> {
        Ok(SlowScope {
            inner: self.store.open_scope().await?,
        })
    }
}

impl CredentialStore for SlowScope {
    async fn find_user_by_principal(
        &self,
        principal: &Principal,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        time::sleep(Duration::from_secs(3600)).await;
        self.inner.find_user_by_principal(principal).await
    }

    fn supports_stamp_tracking(&self) -> bool {
        self.inner.supports_stamp_tracking()
    }

    async fn current_stamp(&self, user: &CredentialRecord) -> Result<Option<String>, StoreError> {
        self.inner.current_stamp(user).await
    }

    async fn verify_password(
        &self,
        user_name: &str,
        password: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.inner.verify_password(user_name, password).await
    }
}

// =========================================================================
// Stamp comparison over time
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_unchanged_stamp_never_invalidates() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let handle = start(store.clone(), "A");

    at(origin, 20 * 50 + 1).await;

    assert_eq!(handle.state(), RevalidatorState::Active);
    assert!(handle.auth_state().borrow().is_authenticated());
    assert_eq!(store.lookup_count(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_stamp_change_invalidates_within_one_interval() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let handle = start(store.clone(), "A");
    let auth = handle.auth_state();

    // Three matching ticks: 20s, 40s, 60s.
    at(origin, 61).await;
    assert_eq!(handle.state(), RevalidatorState::Active);
    assert_eq!(store.lookup_count(), 3);

    store
        .set_security_stamp(&user_id(), Some("B".into()))
        .await
        .unwrap();

    at(origin, 79).await;
    assert_eq!(handle.state(), RevalidatorState::Active, "not before tick 4");
    assert!(auth.borrow().is_authenticated());

    at(origin, 81).await;
    assert_eq!(handle.state(), RevalidatorState::Invalidated);
    assert!(!auth.borrow().is_authenticated());
    assert_eq!(
        handle.join().await.unwrap(),
        RevalidationOutcome::Invalidated(InvalidationReason::StampMismatch)
    );
}

#[tokio::test(start_paused = true)]
async fn test_user_deleted_invalidates_at_next_tick() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let handle = start(store.clone(), "A");

    at(origin, 45).await;
    assert!(store.remove_user(&user_id()).await);

    at(origin, 59).await;
    assert_eq!(handle.state(), RevalidatorState::Active);

    at(origin, 61).await;
    assert_eq!(
        handle.join().await.unwrap(),
        RevalidationOutcome::Invalidated(InvalidationReason::UserNotFound)
    );
    assert_eq!(store.lookup_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stamp_tracking_disabled_ignores_stamp_changes() {
    let store = store_with_stamp("A").await;
    store.set_stamp_tracking(false);
    let origin = Instant::now();
    let handle = start(store.clone(), "A");

    at(origin, 30).await;
    store.update_security_stamp(&user_id()).await.unwrap();

    at(origin, 201).await;
    assert_eq!(handle.state(), RevalidatorState::Active);
    assert_eq!(store.lookup_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_no_scope_open_between_ticks() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let _handle = start(store.clone(), "A");

    for secs in [10, 30, 50, 70] {
        at(origin, secs).await;
        assert_eq!(store.open_scopes(), 0, "scope leaked at {secs}s");
    }
    assert_eq!(store.scopes_opened(), 3);
}

// =========================================================================
// Store faults
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_store_errors_skip_and_retry() {
    let store = store_with_stamp("A").await;
    let provider = FlakyProvider::new(store.clone());
    provider.set_failing(true);
    let origin = Instant::now();
    let handle = start(provider.clone(), "A");

    // A stamp change during the outage can't be seen yet, and the outage
    // itself must not sign anyone out.
    store
        .set_security_stamp(&user_id(), Some("B".into()))
        .await
        .unwrap();
    at(origin, 61).await;
    assert_eq!(handle.state(), RevalidatorState::Active);
    assert!(handle.auth_state().borrow().is_authenticated());
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);

    provider.set_failing(false);
    at(origin, 81).await;
    assert_eq!(
        handle.join().await.unwrap(),
        RevalidationOutcome::Invalidated(InvalidationReason::StampMismatch)
    );
}

#[tokio::test(start_paused = true)]
async fn test_store_recovery_keeps_valid_session_active() {
    let store = store_with_stamp("A").await;
    let provider = FlakyProvider::new(store.clone());
    let origin = Instant::now();
    let handle = start(provider.clone(), "A");

    at(origin, 25).await;
    provider.set_failing(true);
    at(origin, 65).await;
    provider.set_failing(false);
    at(origin, 101).await;

    assert_eq!(handle.state(), RevalidatorState::Active);
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 5);
}

// =========================================================================
// Cancellation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_while_sleeping_makes_no_store_calls() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let handle = start(store.clone(), "A");

    at(origin, 30).await;
    handle.cancel();
    let auth = handle.auth_state();
    assert_eq!(handle.join().await.unwrap(), RevalidationOutcome::Cancelled);

    at(origin, 200).await;
    assert_eq!(store.lookup_count(), 1);
    assert!(auth.borrow().is_authenticated(), "cancel is not a sign-out");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_lookup_releases_scope() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let handle = start(SlowProvider { store: store.clone() }, "A");

    at(origin, 25).await;
    assert_eq!(store.open_scopes(), 1, "lookup should be in flight");

    handle.cancel();
    assert_eq!(handle.join().await.unwrap(), RevalidationOutcome::Cancelled);
    assert_eq!(store.open_scopes(), 0);
    assert_eq!(store.lookup_count(), 0, "the lookup never completed");
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_cancels_task() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let handle = start(store.clone(), "A");
    let auth = handle.auth_state();
    drop(handle);

    at(origin, 100).await;
    assert_eq!(store.lookup_count(), 0);
    assert!(auth.has_changed().is_err(), "channel closes with the task");
}

// =========================================================================
// Through the session manager
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_out_between_ticks_prevents_stale_check() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let mut mgr = SessionManager::new(Arc::new(store.clone()), config());
    let sid = mgr.sign_in(principal("A"));
    let session = mgr.attach(ConnectionId(1), &sid).unwrap();

    at(origin, 30).await;
    assert!(matches!(
        mgr.sign_out(&sid),
        SignOutOutcome::SignedOut { connections_cancelled: 1, .. }
    ));

    at(origin, 120).await;
    assert_eq!(store.lookup_count(), 1);
    assert!(session.auth_state.has_changed().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_finished_signs_out_invalidated_session() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let mut mgr = SessionManager::new(Arc::new(store.clone()), config());
    let sid = mgr.sign_in(principal("A"));
    mgr.attach(ConnectionId(1), &sid).unwrap();
    mgr.attach(ConnectionId(2), &sid).unwrap();

    store.update_security_stamp(&user_id()).await.unwrap();
    at(origin, 21).await;

    let removed = mgr.cleanup_finished();
    assert_eq!(removed.len(), 2);
    assert_eq!(mgr.sign_in_count(), 0);
    assert_eq!(mgr.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_replace_principal_revalidates_new_stamp() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let mut mgr = SessionManager::new(Arc::new(store.clone()), config());
    let sid = mgr.sign_in(principal("A"));
    let session = mgr.attach(ConnectionId(1), &sid).unwrap();

    at(origin, 30).await;
    // Password changed and the user signed in again in the same session.
    store
        .set_security_stamp(&user_id(), Some("B".into()))
        .await
        .unwrap();
    mgr.replace_principal(&sid, principal("B")).unwrap();

    at(origin, 200).await;
    assert_eq!(mgr.revalidator_state(ConnectionId(1)), Some(RevalidatorState::Active));
    assert!(session.auth_state.borrow().is_authenticated());
}

// =========================================================================
// Sign-ins without a live connection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_resolve_sign_in_within_interval_skips_store() {
    let provider = FlakyProvider::new(store_with_stamp("A").await);
    let origin = Instant::now();
    let sessions = Mutex::new(SessionManager::new(Arc::new(provider.clone()), config()));
    let sid = sessions.lock().await.sign_in(principal("A"));

    at(origin, 19).await;
    assert_eq!(resolve_sign_in(&sessions, &sid).await, Some(principal("A")));
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_sign_in_stamp_changed_signs_out() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let sessions = Mutex::new(SessionManager::new(Arc::new(store.clone()), config()));
    let sid = sessions.lock().await.sign_in(principal("A"));

    store.update_security_stamp(&user_id()).await.unwrap();
    at(origin, 21).await;

    assert_eq!(resolve_sign_in(&sessions, &sid).await, None);
    assert_eq!(sessions.lock().await.sign_in_count(), 0);
    assert_eq!(store.open_scopes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_sign_in_user_deleted_signs_out() {
    let store = store_with_stamp("A").await;
    let origin = Instant::now();
    let sessions = Mutex::new(SessionManager::new(Arc::new(store.clone()), config()));
    let sid = sessions.lock().await.sign_in(principal("A"));

    assert!(store.remove_user(&user_id()).await);
    at(origin, 3600).await;

    assert_eq!(resolve_sign_in(&sessions, &sid).await, None);
    assert!(sessions.lock().await.principal(&sid).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_resolve_sign_in_valid_check_lasts_one_interval() {
    let provider = FlakyProvider::new(store_with_stamp("A").await);
    let origin = Instant::now();
    let sessions = Mutex::new(SessionManager::new(Arc::new(provider.clone()), config()));
    let sid = sessions.lock().await.sign_in(principal("A"));

    at(origin, 25).await;
    assert!(resolve_sign_in(&sessions, &sid).await.is_some());
    assert!(resolve_sign_in(&sessions, &sid).await.is_some());
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 1);

    at(origin, 46).await;
    assert!(resolve_sign_in(&sessions, &sid).await.is_some());
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resolve_sign_in_store_error_keeps_session_and_retries() {
    let provider = FlakyProvider::new(store_with_stamp("A").await);
    let origin = Instant::now();
    let sessions = Mutex::new(SessionManager::new(Arc::new(provider.clone()), config()));
    let sid = sessions.lock().await.sign_in(principal("A"));

    provider.set_failing(true);
    at(origin, 21).await;
    assert_eq!(resolve_sign_in(&sessions, &sid).await, Some(principal("A")));
    assert_eq!(sessions.lock().await.sign_in_count(), 1);

    // Not marked checked: the next request tries the store again.
    provider.set_failing(false);
    provider
        .store
        .set_security_stamp(&user_id(), Some("B".into()))
        .await
        .unwrap();
    assert_eq!(resolve_sign_in(&sessions, &sid).await, None);
    assert_eq!(provider.attempts.load(Ordering::SeqCst), 2);
}
