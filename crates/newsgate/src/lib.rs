//! # Newsgate
//!
//! A web host whose signed-in sessions stay honest: every live connection
//! re-checks its user's security stamp against the credential store on a
//! fixed interval, and a stale session is signed out within one interval.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use newsgate::prelude::*;
//!
//! # async fn demo() -> Result<(), NewsgateError> {
//! let store = InMemoryStore::new();
//! store.add_user(NewUser::new("alice").password("correct horse")).await?;
//!
//! let server = NewsgateServerBuilder::new()
//!     .bind("127.0.0.1:8080")
//!     .build(store)
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! ## Surfaces
//!
//! - `POST /Account/Login`, `POST /Account/Logout` (antiforgery required)
//! - `GET /Account/Antiforgery` for the token
//! - `GET /_circuit` for live connections, speaking JSON
//!   [`ClientMessage`](newsgate_protocol::ClientMessage) /
//!   [`ServerMessage`](newsgate_protocol::ServerMessage) frames

pub mod account;
pub mod antiforgery;
pub mod authz;
mod circuit;
pub mod config;
pub mod cookie;
mod error;
mod pages;
mod server;
pub mod telemetry;

pub use error::NewsgateError;
pub use server::{router, AppState, NewsgateServer, NewsgateServerBuilder};

/// Everything an application needs to stand up a server.
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::{NewsgateError, NewsgateServer, NewsgateServerBuilder};
    pub use newsgate_interval::{MissedTickPolicy, TimerConfig};
    pub use newsgate_protocol::{
        AuthenticationState, ClientMessage, ConnectionId, Principal, ServerMessage, SessionId,
        SignOutReason, UserId,
    };
    pub use newsgate_session::{RevalidationConfig, SessionManager};
    pub use newsgate_store::{
        CredentialRecord, CredentialStore, InMemoryStore, NewUser, StoreError, StoreProvider,
    };
}
