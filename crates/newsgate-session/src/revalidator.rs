//! The per-connection revalidation task.
//!
//! ```text
//!  start() ──→ spawn ──→ ┌──────────────────────────────────────────┐
//!                        │ loop                                     │
//!                        │   select! { cancel | wait_for_tick }     │
//!                        │   select! { cancel | open scope + check }│
//!                        │   record_check_end                       │
//!                        │   Valid   → continue                     │
//!                        │   Invalid → publish anonymous, break     │
//!                        │   Err     → warn, continue               │
//!                        └──────────────────────────────────────────┘
//! ```
//!
//! Both suspension points race the cancel signal with `biased;` so a
//! cancel that is already pending always wins: a cancelled revalidator
//! never starts another store call. If the cancel lands while a lookup is
//! in flight, the lookup future (and the store scope inside it) is
//! dropped on the spot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use newsgate_interval::RevalidationTimer;
use newsgate_protocol::{AuthenticationState, ConnectionId, Principal};
use newsgate_store::StoreProvider;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{
    cancellation, validate_authentication_state, CancelHandle, CancelSignal, RevalidationConfig,
    RevalidationOutcome, RevalidatorState, SessionError, Validation,
};

/// Starts revalidators. See the module docs for the loop itself.
pub struct Revalidator;

impl Revalidator {
    /// Spawns a revalidator for `principal` on the current tokio runtime.
    ///
    /// The returned handle scopes the task: dropping it cancels the task.
    pub fn start<P: StoreProvider>(
        provider: Arc<P>,
        principal: Principal,
        config: &RevalidationConfig,
        connection_id: ConnectionId,
    ) -> RevalidatorHandle {
        let auth = Arc::new(AuthChannel::new(principal.clone()));
        spawn(provider, principal, config, connection_id, auth, 0)
    }
}

/// The authentication-state channel of one connection, shared by its
/// successive revalidators.
///
/// Every restart starts a new generation. Only a task of the current
/// generation may publish anonymous, and the generation check runs under
/// the channel's write lock, so a superseded task can never overwrite the
/// principal a restart just published.
#[derive(Debug)]
struct AuthChannel {
    tx: watch::Sender<AuthenticationState>,
    generation: AtomicU64,
}

impl AuthChannel {
    fn new(principal: Principal) -> Self {
        let (tx, _) = watch::channel(AuthenticationState::authenticated(principal));
        Self {
            tx,
            generation: AtomicU64::new(0),
        }
    }

    fn subscribe(&self) -> watch::Receiver<AuthenticationState> {
        self.tx.subscribe()
    }

    /// Publishes `principal` and retires every earlier generation.
    /// Returns the new generation.
    fn renew(&self, principal: Principal) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = AuthenticationState::authenticated(principal);
        });
        generation
    }

    /// Publishes anonymous if `generation` is still current. Returns
    /// whether it did.
    fn invalidate(&self, generation: u64) -> bool {
        self.tx.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = AuthenticationState::anonymous();
            true
        })
    }
}

fn spawn<P: StoreProvider>(
    provider: Arc<P>,
    principal: Principal,
    config: &RevalidationConfig,
    connection_id: ConnectionId,
    auth: Arc<AuthChannel>,
    generation: u64,
) -> RevalidatorHandle {
    let (cancel, signal) = cancellation();
    let (state_tx, state_rx) = watch::channel(RevalidatorState::Active);

    let task = Task {
        provider,
        principal,
        stamp_claim_type: config.security_stamp_claim_type.clone(),
        timer: RevalidationTimer::new(config.timer_config()),
        cancel: signal,
        auth: Arc::clone(&auth),
        generation,
        state_tx,
        connection_id,
    };

    debug!(
        %connection_id,
        user_id = %task.principal.user_id(),
        interval_ms = task.timer.interval().as_millis() as u64,
        "revalidator started"
    );

    RevalidatorHandle {
        cancel,
        auth,
        state_rx,
        connection_id,
        task: tokio::spawn(task.run()),
    }
}

struct Task<P> {
    provider: Arc<P>,
    principal: Principal,
    stamp_claim_type: String,
    timer: RevalidationTimer,
    cancel: CancelSignal,
    auth: Arc<AuthChannel>,
    generation: u64,
    state_tx: watch::Sender<RevalidatorState>,
    connection_id: ConnectionId,
}

impl<P: StoreProvider> Task<P> {
    async fn run(mut self) -> RevalidationOutcome {
        let connection_id = self.connection_id;
        let mut consecutive_failures: u32 = 0;

        let outcome = loop {
            let tick = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break RevalidationOutcome::Cancelled,
                tick = self.timer.wait_for_tick() => tick,
            };

            let verdict = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break RevalidationOutcome::Cancelled,
                verdict = validate_authentication_state(
                    self.provider.as_ref(),
                    &self.principal,
                    &self.stamp_claim_type,
                ) => verdict,
            };
            self.timer.record_check_end();

            match verdict {
                Ok(Validation::Valid) => {
                    if consecutive_failures > 0 {
                        info!(%connection_id, consecutive_failures, "credential store recovered");
                    }
                    consecutive_failures = 0;
                    trace!(%connection_id, tick = tick.tick, "session still valid");
                }
                Ok(Validation::Invalid(reason)) => {
                    info!(
                        %connection_id,
                        user_id = %self.principal.user_id(),
                        tick = tick.tick,
                        %reason,
                        "session failed revalidation"
                    );
                    break RevalidationOutcome::Invalidated(reason);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        %connection_id,
                        tick = tick.tick,
                        consecutive_failures,
                        error = %e,
                        "revalidation check failed, retrying next interval"
                    );
                }
            }
        };

        if matches!(outcome, RevalidationOutcome::Invalidated(_))
            && !self.auth.invalidate(self.generation)
        {
            debug!(%connection_id, "superseded by a restart, not publishing anonymous");
        }
        self.state_tx.send_replace(outcome.state());
        debug!(
            %connection_id,
            state = %outcome.state(),
            ticks = self.timer.tick_count(),
            "revalidator stopped"
        );
        outcome
    }
}

/// Owner's handle to a running revalidator.
///
/// Dropping the handle cancels the task (the cancel signal fires when its
/// sender goes away).
#[derive(Debug)]
pub struct RevalidatorHandle {
    cancel: CancelHandle,
    auth: Arc<AuthChannel>,
    state_rx: watch::Receiver<RevalidatorState>,
    connection_id: ConnectionId,
    task: JoinHandle<RevalidationOutcome>,
}

impl RevalidatorHandle {
    /// Requests cancellation. Idempotent; a no-op once the task finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A receiver for the connection's authentication state.
    ///
    /// It starts authenticated and changes to anonymous when the session
    /// fails revalidation. The channel closes once the task has stopped
    /// and every handle sharing it is gone, so a receiver that sees the
    /// channel close while still authenticated knows the session was ended
    /// from outside (sign-out, shutdown).
    pub fn auth_state(&self) -> watch::Receiver<AuthenticationState> {
        self.auth.subscribe()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RevalidatorState {
        *self.state_rx.borrow()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns `true` once the task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels this revalidator and starts a new one for `principal` that
    /// publishes on the same authentication-state channel.
    ///
    /// Used when a session's principal is replaced wholesale. Receivers
    /// see the new principal rather than a closed channel.
    pub fn restart<P: StoreProvider>(
        self,
        provider: Arc<P>,
        principal: Principal,
        config: &RevalidationConfig,
    ) -> RevalidatorHandle {
        self.cancel.cancel();
        let Self {
            auth,
            connection_id,
            ..
        } = self;
        let generation = auth.renew(principal.clone());
        spawn(provider, principal, config, connection_id, auth, generation)
    }

    /// Waits for the task to end and returns how it ended.
    ///
    /// Does not cancel. Call [`cancel`](Self::cancel) first to stop a task
    /// that is still active.
    ///
    /// # Errors
    /// [`SessionError::RevalidatorFailed`] if the task panicked.
    pub async fn join(self) -> Result<RevalidationOutcome, SessionError> {
        // Keep the cancel handle alive: dropping it would cancel the task.
        let Self { cancel, task, .. } = self;
        let result = task.await;
        drop(cancel);
        result.map_err(|e| SessionError::RevalidatorFailed(e.to_string()))
    }
}
