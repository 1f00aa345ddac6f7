//! `NewsgateServer` builder, shared state and router.
//!
//! This is the entry point for running a Newsgate host. It ties the
//! layers together: store → session manager → HTTP and circuit handlers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use newsgate_protocol::{ConnectionId, JsonCodec, Principal, SessionId};
use newsgate_session::{resolve_sign_in, RevalidationConfig, SessionManager};
use newsgate_store::StoreProvider;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::authz::RolePolicy;
use crate::config::ServerConfig;
use crate::cookie::{read_cookie, SESSION_COOKIE};
use crate::{account, antiforgery, circuit, pages, NewsgateError};

/// State shared by every request and circuit task.
///
/// Held in an `Arc`; the session manager sits behind one async mutex.
pub struct AppState<P: StoreProvider> {
    sessions: Mutex<SessionManager<P>>,
    provider: Arc<P>,
    codec: JsonCodec,
    secure_cookies: bool,
    admin_policy: RolePolicy,
    next_connection: AtomicU64,
    shutting_down: AtomicBool,
}

impl<P: StoreProvider> AppState<P> {
    pub fn new(provider: Arc<P>, config: &ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(SessionManager::new(
                Arc::clone(&provider),
                config.revalidation.clone(),
            )),
            provider,
            codec: JsonCodec,
            secure_cookies: config.secure_cookies,
            admin_policy: RolePolicy::admin(),
            next_connection: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn sessions(&self) -> &Mutex<SessionManager<P>> {
        &self.sessions
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    pub(crate) fn codec(&self) -> &JsonCodec {
        &self.codec
    }

    pub(crate) fn admin_policy(&self) -> &RolePolicy {
        &self.admin_policy
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Marks the host as stopping and stops every revalidator. Open
    /// circuits notice and close with `server_shutdown`.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.sessions.lock().await.shutdown().await
    }

    /// The caller's session, from the session cookie. A principal not
    /// checked for one revalidation interval is rechecked against the
    /// store first; a stale one signs the session out and reads as
    /// anonymous.
    pub(crate) async fn current_session(&self, headers: &HeaderMap) -> Option<(SessionId, Principal)> {
        let session_id = SessionId::new(read_cookie(headers, SESSION_COOKIE)?);
        let principal = resolve_sign_in(&self.sessions, &session_id).await?;
        Some((session_id, principal))
    }
}

/// Builds the HTTP router.
///
/// ```text
/// GET  /                      landing page
/// GET  /admin                 admin-or-writer area
/// GET  /_circuit              live connection (websocket)
/// GET  /Account/Antiforgery   issue antiforgery token
/// POST /Account/Login         sign in
/// POST /Account/Logout        sign out
/// ```
pub fn router<P: StoreProvider>(state: Arc<AppState<P>>) -> Router {
    let account = Router::new()
        .route("/Antiforgery", get(antiforgery::issue::<P>))
        .route("/Login", post(account::login::<P>))
        .route("/Logout", post(account::logout::<P>));

    Router::new()
        .route("/", get(pages::index::<P>))
        .route("/admin", get(pages::admin::<P>))
        .route("/_circuit", get(circuit::connect::<P>))
        .nest("/Account", account)
        .with_state(state)
}

/// Builder for configuring and starting a Newsgate server.
///
/// # Example
///
/// ```rust,ignore
/// let server = NewsgateServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .revalidation_interval(Duration::from_secs(20))
///     .build(store)
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Clone, Default)]
pub struct NewsgateServerBuilder {
    config: ServerConfig,
}

impl NewsgateServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    pub fn revalidation(mut self, revalidation: RevalidationConfig) -> Self {
        self.config.revalidation = revalidation;
        self
    }

    pub fn revalidation_interval(mut self, interval: Duration) -> Self {
        self.config.revalidation.revalidation_interval = interval;
        self
    }

    pub fn secure_cookies(mut self, secure: bool) -> Self {
        self.config.secure_cookies = secure;
        self
    }

    /// Binds the listener and builds the server around `provider`.
    ///
    /// # Errors
    /// [`NewsgateError::Io`] if the address can't be bound.
    pub async fn build<P: StoreProvider>(self, provider: P) -> Result<NewsgateServer<P>, NewsgateError> {
        let config = self.config.validated();
        let listener = TcpListener::bind(&config.bind).await?;
        let state = AppState::new(Arc::new(provider), &config);

        tracing::info!(
            addr = %listener.local_addr()?,
            revalidation_interval_ms = config.revalidation.revalidation_interval.as_millis() as u64,
            secure_cookies = config.secure_cookies,
            "newsgate server bound"
        );
        Ok(NewsgateServer { listener, state })
    }
}

/// A bound Newsgate server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct NewsgateServer<P: StoreProvider> {
    listener: TcpListener,
    state: Arc<AppState<P>>,
}

impl<P: StoreProvider> NewsgateServer<P> {
    pub fn builder() -> NewsgateServerBuilder {
        NewsgateServerBuilder::new()
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared state, for inspecting sessions from outside.
    pub fn state(&self) -> &Arc<AppState<P>> {
        &self.state
    }

    /// Serves until Ctrl-C.
    pub async fn run(self) -> Result<(), NewsgateError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves until `shutdown` completes, then stops every revalidator
    /// and waits for in-flight requests.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), NewsgateError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = router(Arc::clone(&self.state));
        let state = Arc::clone(&self.state);
        tracing::info!("newsgate server running");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let stopped = state.shutdown().await;
                tracing::info!(revalidators = stopped, "shutting down");
            })
            .await?;
        Ok(())
    }
}
