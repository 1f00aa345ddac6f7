//! Unified error type for the Newsgate host.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use newsgate_protocol::ProtocolError;
use newsgate_session::SessionError;
use newsgate_store::StoreError;

use crate::config::ConfigError;

/// Top-level error that wraps every crate-specific error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum NewsgateError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Binding or serving the listener failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A websocket send or receive failed.
    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),
}

impl NewsgateError {
    /// The HTTP status a handler answers with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(SessionError::NotFound(_)) => StatusCode::UNAUTHORIZED,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NewsgateError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            // Internal details stay in the log.
            return (status, "internal error").into_response();
        }
        (status, self.to_string()).into_response()
    }
}
