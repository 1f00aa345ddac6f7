//! Error types for the session layer.

use newsgate_protocol::{ConnectionId, SessionId};

/// Errors returned by [`SessionManager`](crate::SessionManager) and
/// [`RevalidatorHandle::join`](crate::RevalidatorHandle::join).
///
/// Invalidation and cancellation are not errors; they are the two normal
/// ways a revalidator ends (see [`RevalidationOutcome`](crate::RevalidationOutcome)).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No sign-in exists for this session id (never signed in, or already
    /// signed out).
    #[error("no signed-in session {0}")]
    NotFound(SessionId),

    /// The connection already has a live revalidator.
    #[error("connection {0} already has a live session")]
    AlreadyAttached(ConnectionId),

    #[error("connection {0} is not attached")]
    ConnectionNotFound(ConnectionId),

    /// The revalidator task panicked or was aborted by the runtime.
    #[error("revalidator task failed: {0}")]
    RevalidatorFailed(String),
}
