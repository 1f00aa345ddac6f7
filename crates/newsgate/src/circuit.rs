//! Live connections ("circuits") over websocket.
//!
//! A circuit is the unit that owns one revalidator. Its lifetime:
//!
//! 1. `GET /_circuit` with a signed-in session cookie → upgrade
//! 2. attach to the session (starts the revalidator), send `welcome`
//! 3. loop over two event sources:
//!    - client frames: `ping` → `pong`, `disconnect` → close
//!    - the session's authentication state:
//!      anonymous → `signed_out{session_expired}`, sign the session out,
//!      close; channel closed while still authenticated → the session was
//!      ended elsewhere, `signed_out{signed_out}` (or `server_shutdown`),
//!      close
//! 4. on exit, a drop guard detaches the connection, which cancels the
//!    revalidator
//!
//! The select over the two sources is not biased: neither side can starve
//! the other for long, and a sign-out racing a ping loses nothing.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use newsgate_protocol::{
    ClientMessage, Codec, ConnectionId, ServerMessage, SessionId, SignOutReason,
};
use newsgate_store::StoreProvider;

use crate::cookie::{read_cookie, SESSION_COOKIE};
use crate::server::AppState;
use crate::NewsgateError;

/// Detaches the connection when the circuit task exits.
///
/// `Drop` is synchronous, so the async lock runs in a spawned task.
struct CircuitGuard<P: StoreProvider> {
    connection_id: ConnectionId,
    state: Arc<AppState<P>>,
}

impl<P: StoreProvider> Drop for CircuitGuard<P> {
    fn drop(&mut self) {
        let connection_id = self.connection_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.sessions().lock().await.detach(connection_id);
        });
    }
}

/// `GET /_circuit`
pub(crate) async fn connect<P: StoreProvider>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some((session_id, _)) = state.current_session(&headers).await else {
        return (StatusCode::UNAUTHORIZED, "sign in required").into_response();
    };
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run(socket, state, session_id).await {
            tracing::debug!(error = %e, "circuit ended with error");
        }
    })
}

async fn run<P: StoreProvider>(
    mut socket: WebSocket,
    state: Arc<AppState<P>>,
    session_id: SessionId,
) -> Result<(), NewsgateError> {
    let connection_id = state.next_connection_id();

    // Signed out between the upgrade request and now?
    let attached = state.sessions().lock().await.attach(connection_id, &session_id);
    let session = match attached {
        Ok(session) => session,
        Err(e) => {
            let err = NewsgateError::from(e);
            send(
                &mut socket,
                &state,
                &ServerMessage::Error {
                    code: err.status().as_u16(),
                    message: err.to_string(),
                },
            )
            .await?;
            let _ = socket.send(Message::Close(None)).await;
            return Ok(());
        }
    };
    let _guard = CircuitGuard {
        connection_id,
        state: Arc::clone(&state),
    };

    tracing::info!(%session_id, %connection_id, user_id = %session.principal.user_id(), "circuit opened");
    send(
        &mut socket,
        &state,
        &ServerMessage::Welcome {
            connection_id,
            user_id: session.principal.user_id().clone(),
            user_name: session.principal.name().map(String::from),
        },
    )
    .await?;

    let mut auth = session.auth_state;
    loop {
        tokio::select! {
            changed = auth.changed() => {
                let closed = changed.is_err();
                let authenticated = auth.borrow_and_update().is_authenticated();

                if authenticated && !closed {
                    tracing::debug!(%connection_id, "principal replaced");
                    continue;
                }

                let reason = if !authenticated {
                    // The revalidator invalidated this session: end it for
                    // every tab, not just this one.
                    state.sessions().lock().await.sign_out(&session_id);
                    SignOutReason::SessionExpired
                } else if state.is_shutting_down() {
                    SignOutReason::ServerShutdown
                } else {
                    SignOutReason::SignedOut
                };
                tracing::info!(%connection_id, ?reason, "circuit signed out");
                send(&mut socket, &state, &ServerMessage::SignedOut { reason }).await?;
                break;
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text(&mut socket, &state, connection_id, text.as_str()).await? {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(%connection_id, "client closed circuit");
                        break;
                    }
                    // Binary and control frames carry nothing for us.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(%connection_id, error = %e, "circuit recv failed");
                        break;
                    }
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    tracing::info!(%connection_id, "circuit closed");
    // _guard drops here → detach.
    Ok(())
}

/// Handles one client text frame. Returns `false` when the circuit should
/// close.
async fn handle_text<P: StoreProvider>(
    socket: &mut WebSocket,
    state: &AppState<P>,
    connection_id: ConnectionId,
    text: &str,
) -> Result<bool, NewsgateError> {
    let message: ClientMessage = match state.codec().decode(text.as_bytes()) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(%connection_id, error = %e, "undecodable client frame");
            send(
                socket,
                state,
                &ServerMessage::Error {
                    code: 400,
                    message: e.to_string(),
                },
            )
            .await?;
            return Ok(true);
        }
    };

    match message {
        ClientMessage::Ping { client_time } => {
            send(
                socket,
                state,
                &ServerMessage::Pong {
                    client_time,
                    server_time: unix_millis(),
                },
            )
            .await?;
            Ok(true)
        }
        ClientMessage::Disconnect => Ok(false),
    }
}

async fn send<P: StoreProvider>(
    socket: &mut WebSocket,
    state: &AppState<P>,
    message: &ServerMessage,
) -> Result<(), NewsgateError> {
    let text = state.codec().encode_text(message)?;
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
