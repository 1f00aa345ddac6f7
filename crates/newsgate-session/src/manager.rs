//! The session manager: sign-ins and the live connections bound to them.
//!
//! Two maps:
//!
//! - `sign_ins`: session id (the session cookie) → principal, with when it
//!   was last checked against the store and last used. This is the entry
//!   sign-out clears.
//! - `live`: connection id → the session it belongs to plus that
//!   connection's revalidator. One session can have several live
//!   connections (several tabs); each has exactly one revalidator.
//!
//! ```text
//! sign_in() ──→ attach() ──→ [live, revalidating] ──→ detach()
//!                                  │                     (cancel)
//!                                  ├── invalidated ──→ cleanup_finished()
//!                                  │                     (signs the session out)
//!                                  └── sign_out() ──→ every live revalidator
//!                                                     of the session cancelled
//! ```
//!
//! Requests that carry the session cookie but have no circuit go through
//! [`resolve_sign_in`]: once the last check is older than one revalidation
//! interval the principal is checked again before it is trusted. A sign-in
//! unused for `sign_in_idle_timeout` with no live connection is evicted.
//!
//! # Concurrency note
//!
//! `SessionManager` uses plain `HashMap`s and `&mut self`. The hosting
//! layer owns it behind one `tokio::sync::Mutex`. None of its methods
//! await while holding state except [`shutdown`](SessionManager::shutdown),
//! which joins tasks that are already cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use newsgate_protocol::{AuthenticationState, ConnectionId, Principal, SessionId, UserId};
use newsgate_store::StoreProvider;
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::{
    validate_authentication_state, RevalidationConfig, Revalidator, RevalidatorHandle,
    RevalidatorState, SessionError, Validation,
};

/// A live connection attached to a signed-in session.
#[derive(Debug)]
pub struct Session {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    /// The principal at attach time.
    pub principal: Principal,
    /// Flips to anonymous when revalidation fails. Closes when the
    /// connection's revalidator is gone for any other reason.
    pub auth_state: watch::Receiver<AuthenticationState>,
}

/// Result of [`SessionManager::sign_out`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutOutcome {
    SignedOut {
        user_id: UserId,
        connections_cancelled: usize,
    },
    /// There was nothing to sign out. Still a success.
    NotSignedIn,
}

/// What [`SessionManager::check_sign_in`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInCheck {
    /// Checked against the store within the last interval.
    Fresh(Principal),
    /// Must be checked again before it is trusted.
    Stale(Principal),
}

struct SignIn {
    principal: Principal,
    validated_at: Instant,
    last_seen: Instant,
}

impl SignIn {
    fn new(principal: Principal, now: Instant) -> Self {
        Self {
            principal,
            validated_at: now,
            last_seen: now,
        }
    }
}

struct LiveSession {
    session_id: SessionId,
    revalidator: RevalidatorHandle,
}

/// Registry of sign-ins and live sessions.
pub struct SessionManager<P: StoreProvider> {
    provider: Arc<P>,
    config: RevalidationConfig,
    sign_ins: HashMap<SessionId, SignIn>,
    live: HashMap<ConnectionId, LiveSession>,
}

impl<P: StoreProvider> SessionManager<P> {
    pub fn new(provider: Arc<P>, config: RevalidationConfig) -> Self {
        Self {
            provider,
            config: config.validated(),
            sign_ins: HashMap::new(),
            live: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn config(&self) -> &RevalidationConfig {
        &self.config
    }

    /// Registers a sign-in and returns its new session id. The principal
    /// counts as checked now. Idle sign-ins are swept first.
    pub fn sign_in(&mut self, principal: Principal) -> SessionId {
        self.prune_idle();

        let session_id = SessionId::new(generate_session_id());
        tracing::info!(
            %session_id,
            user_id = %principal.user_id(),
            "signed in"
        );
        self.sign_ins
            .insert(session_id.clone(), SignIn::new(principal, Instant::now()));
        session_id
    }

    /// The principal of a signed-in session, as last stored. Does not
    /// recheck or count as use; see [`resolve_sign_in`] for that.
    pub fn principal(&self, session_id: &SessionId) -> Option<&Principal> {
        self.sign_ins.get(session_id).map(|entry| &entry.principal)
    }

    /// Looks up a sign-in for a request and marks it used.
    ///
    /// Returns `None` if the session isn't signed in or has been idle too
    /// long (it is evicted then). Otherwise says whether the principal is
    /// due for another store check.
    pub fn check_sign_in(&mut self, session_id: &SessionId) -> Option<SignInCheck> {
        let now = Instant::now();
        if self.is_idle(session_id, now) {
            tracing::info!(%session_id, "idle sign-in evicted");
            self.sign_out(session_id);
            return None;
        }

        let interval = self.config.revalidation_interval;
        let entry = self.sign_ins.get_mut(session_id)?;
        entry.last_seen = now;
        let principal = entry.principal.clone();
        if now.duration_since(entry.validated_at) >= interval {
            Some(SignInCheck::Stale(principal))
        } else {
            Some(SignInCheck::Fresh(principal))
        }
    }

    /// Applies the verdict of a store check made for `checked`.
    ///
    /// Valid marks the sign-in checked now. Invalid signs the session out.
    /// If the principal was replaced while the check ran, the verdict is
    /// about a principal the session no longer holds and is dropped.
    ///
    /// Returns the session's principal if it is still signed in.
    pub fn record_validation(
        &mut self,
        session_id: &SessionId,
        checked: &Principal,
        verdict: Validation,
    ) -> Option<Principal> {
        let entry = self.sign_ins.get_mut(session_id)?;
        if entry.principal != *checked {
            tracing::debug!(%session_id, "principal replaced during check, verdict dropped");
            return Some(entry.principal.clone());
        }

        match verdict {
            Validation::Valid => {
                entry.validated_at = Instant::now();
                Some(entry.principal.clone())
            }
            Validation::Invalid(reason) => {
                tracing::info!(
                    %session_id,
                    user_id = %checked.user_id(),
                    %reason,
                    "sign-in failed revalidation"
                );
                self.sign_out(session_id);
                None
            }
        }
    }

    /// Evicts every sign-in that has had no request and no live connection
    /// for `sign_in_idle_timeout`.
    ///
    /// Returns the sessions evicted.
    pub fn prune_idle(&mut self) -> Vec<SessionId> {
        let now = Instant::now();
        let idle: Vec<SessionId> = self
            .sign_ins
            .keys()
            .filter(|session_id| self.is_idle(session_id, now))
            .cloned()
            .collect();
        for session_id in &idle {
            self.sign_out(session_id);
        }
        if !idle.is_empty() {
            tracing::info!(evicted = idle.len(), "idle sign-ins evicted");
        }
        idle
    }

    fn is_idle(&self, session_id: &SessionId, now: Instant) -> bool {
        let Some(entry) = self.sign_ins.get(session_id) else {
            return false;
        };
        now.duration_since(entry.last_seen) >= self.config.sign_in_idle_timeout
            && !self.live.values().any(|live| &live.session_id == session_id)
    }

    /// Binds a live connection to a signed-in session and starts its
    /// revalidator.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if the session isn't signed in
    /// - [`SessionError::AlreadyAttached`] if the connection already has a
    ///   live revalidator
    pub fn attach(
        &mut self,
        connection_id: ConnectionId,
        session_id: &SessionId,
    ) -> Result<Session, SessionError> {
        self.cleanup_finished();

        let principal = self
            .sign_ins
            .get(session_id)
            .map(|entry| entry.principal.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

        if self.live.contains_key(&connection_id) {
            return Err(SessionError::AlreadyAttached(connection_id));
        }

        let revalidator = Revalidator::start(
            Arc::clone(&self.provider),
            principal.clone(),
            &self.config,
            connection_id,
        );
        let auth_state = revalidator.auth_state();
        self.live.insert(
            connection_id,
            LiveSession {
                session_id: session_id.clone(),
                revalidator,
            },
        );

        tracing::debug!(%session_id, %connection_id, "connection attached");
        Ok(Session {
            session_id: session_id.clone(),
            connection_id,
            principal,
            auth_state,
        })
    }

    /// Ends a live connection and cancels its revalidator. The sign-in
    /// stays.
    ///
    /// Returns the session the connection belonged to, or `None` if it
    /// was not attached (already detached, or removed by sign-out).
    pub fn detach(&mut self, connection_id: ConnectionId) -> Option<SessionId> {
        let live = self.live.remove(&connection_id)?;
        live.revalidator.cancel();
        // The idle clock starts when the last connection goes away.
        if let Some(entry) = self.sign_ins.get_mut(&live.session_id) {
            entry.last_seen = Instant::now();
        }
        tracing::debug!(session_id = %live.session_id, %connection_id, "connection detached");
        Some(live.session_id)
    }

    /// Ends a session: removes the sign-in and cancels every live
    /// revalidator bound to it. Idempotent.
    pub fn sign_out(&mut self, session_id: &SessionId) -> SignOutOutcome {
        let Some(SignIn { principal, .. }) = self.sign_ins.remove(session_id) else {
            tracing::debug!(%session_id, "sign-out for a session that is not signed in");
            return SignOutOutcome::NotSignedIn;
        };

        let connections: Vec<ConnectionId> = self
            .live
            .iter()
            .filter(|(_, live)| &live.session_id == session_id)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in &connections {
            if let Some(live) = self.live.remove(connection_id) {
                live.revalidator.cancel();
            }
        }

        tracing::info!(
            %session_id,
            user_id = %principal.user_id(),
            connections = connections.len(),
            "signed out"
        );
        SignOutOutcome::SignedOut {
            user_id: principal.user_id().clone(),
            connections_cancelled: connections.len(),
        }
    }

    /// Replaces a session's principal wholesale (re-authentication) and
    /// restarts the revalidator of every live connection on it.
    ///
    /// Returns the number of revalidators restarted.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the session isn't signed in.
    pub fn replace_principal(
        &mut self,
        session_id: &SessionId,
        principal: Principal,
    ) -> Result<usize, SessionError> {
        let entry = self
            .sign_ins
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        let now = Instant::now();
        entry.principal = principal.clone();
        entry.validated_at = now;
        entry.last_seen = now;

        let connections: Vec<ConnectionId> = self
            .live
            .iter()
            .filter(|(_, live)| &live.session_id == session_id)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in &connections {
            if let Some(live) = self.live.remove(connection_id) {
                let revalidator = live.revalidator.restart(
                    Arc::clone(&self.provider),
                    principal.clone(),
                    &self.config,
                );
                self.live.insert(
                    *connection_id,
                    LiveSession {
                        session_id: live.session_id,
                        revalidator,
                    },
                );
            }
        }

        tracing::info!(
            %session_id,
            user_id = %principal.user_id(),
            restarted = connections.len(),
            "principal replaced"
        );
        Ok(connections.len())
    }

    /// Drops live entries whose revalidator has stopped. A session with an
    /// invalidated connection is signed out as a whole.
    ///
    /// Returns the connections removed.
    pub fn cleanup_finished(&mut self) -> Vec<ConnectionId> {
        let finished: Vec<(ConnectionId, SessionId, RevalidatorState)> = self
            .live
            .iter()
            .filter(|(_, live)| live.revalidator.is_finished())
            .map(|(id, live)| (*id, live.session_id.clone(), live.revalidator.state()))
            .collect();

        let mut removed = Vec::with_capacity(finished.len());
        let mut invalidated: Vec<SessionId> = Vec::new();
        for (connection_id, session_id, state) in finished {
            self.live.remove(&connection_id);
            removed.push(connection_id);
            if state == RevalidatorState::Invalidated && !invalidated.contains(&session_id) {
                invalidated.push(session_id);
            }
        }

        for session_id in invalidated {
            if let SignOutOutcome::SignedOut {
                connections_cancelled,
                ..
            } = self.sign_out(&session_id)
            {
                tracing::info!(
                    %session_id,
                    connections_cancelled,
                    "invalidated session removed"
                );
            }
        }
        removed
    }

    /// Cancels every revalidator and waits for them to stop. Sign-ins are
    /// kept.
    ///
    /// Returns how many revalidators were stopped.
    pub async fn shutdown(&mut self) -> usize {
        let live: Vec<LiveSession> = self.live.drain().map(|(_, live)| live).collect();
        for entry in &live {
            entry.revalidator.cancel();
        }
        let count = live.len();
        for entry in live {
            if let Err(e) = entry.revalidator.join().await {
                tracing::warn!(error = %e, "revalidator did not stop cleanly");
            }
        }
        tracing::info!(stopped = count, "session manager shut down");
        count
    }

    /// Lifecycle state of a connection's revalidator.
    pub fn revalidator_state(&self, connection_id: ConnectionId) -> Option<RevalidatorState> {
        self.live
            .get(&connection_id)
            .map(|live| live.revalidator.state())
    }

    pub fn sign_in_count(&self) -> usize {
        self.sign_ins.len()
    }

    /// Number of live connections across all sessions.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of live connections bound to `session_id`.
    pub fn live_count_for(&self, session_id: &SessionId) -> usize {
        self.live
            .values()
            .filter(|live| &live.session_id == session_id)
            .count()
    }
}

/// The principal behind `session_id`, fit to trust for one request.
///
/// A principal last checked less than one revalidation interval ago is
/// returned as is. An older one is checked against the store first,
/// without holding the lock during the lookup:
///
/// - valid → returned, and counts as checked now
/// - invalid (user gone, stamp changed) → the session is signed out and
///   the caller is anonymous
/// - store error → returned unchanged; the next request tries again
pub async fn resolve_sign_in<P: StoreProvider>(
    sessions: &Mutex<SessionManager<P>>,
    session_id: &SessionId,
) -> Option<Principal> {
    let (principal, provider, stamp_claim_type) = {
        let mut manager = sessions.lock().await;
        match manager.check_sign_in(session_id)? {
            SignInCheck::Fresh(principal) => return Some(principal),
            SignInCheck::Stale(principal) => (
                principal,
                Arc::clone(&manager.provider),
                manager.config.security_stamp_claim_type.clone(),
            ),
        }
    };

    match validate_authentication_state(provider.as_ref(), &principal, &stamp_claim_type).await {
        Ok(verdict) => sessions
            .lock()
            .await
            .record_validation(session_id, &principal, verdict),
        Err(e) => {
            tracing::warn!(
                %session_id,
                user_id = %principal.user_id(),
                error = %e,
                "sign-in check failed, keeping session"
            );
            Some(principal)
        }
    }
}

/// 128 random bits as 32 lowercase hex characters.
fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}
