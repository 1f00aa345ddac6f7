//! Identity newtypes and the live-connection ("circuit") wire messages.
//!
//! Everything in this module either names something (a user, a signed-in
//! session, a live connection) or travels over the circuit websocket as
//! JSON. The exact JSON shapes are pinned down by the tests at the bottom,
//! because the browser script parses them by hand.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identifier of a user record in the credential store.
///
/// Newtype over `String` so a user id can't be passed where a session id
/// is expected, even though both are strings underneath.
///
/// `#[serde(transparent)]` keeps the JSON form a plain string:
/// `UserId("u-1")` is `"u-1"`, not `{ "0": "u-1" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a user id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a signed-in session: the value of the session cookie.
///
/// Issued by the session manager on sign-in (128 random bits, hex) and
/// forgotten on sign-out. Possessing it is possessing the session, so the
/// `Display` form is truncated to keep full ids out of log files.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wraps a raw cookie value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw id (for writing it back into a cookie).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "S-{prefix}")
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// Opaque identifier for one live connection (one open circuit socket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Circuit messages
// ---------------------------------------------------------------------------

/// Why the server ended a circuit's authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    /// Revalidation found the credential stale (stamp changed or user
    /// deleted). Shown to the user as "your session expired".
    SessionExpired,
    /// The session was signed out explicitly (logout endpoint, possibly
    /// from another tab).
    SignedOut,
    /// The server is shutting down.
    ServerShutdown,
}

/// Client → Server messages on the circuit socket.
///
/// Internally tagged: `{ "type": "ping", "client_time": 5 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive. The server echoes `client_time` back in a `Pong`.
    Ping { client_time: u64 },
    /// The page is going away; close the circuit.
    Disconnect,
}

/// Server → Client messages on the circuit socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message after the upgrade: the circuit is bound to this user.
    Welcome {
        connection_id: ConnectionId,
        user_id: UserId,
        user_name: Option<String>,
    },

    /// Reply to `Ping`.
    Pong { client_time: u64, server_time: u64 },

    /// The authenticated session ended. The server closes the socket
    /// right after sending this.
    SignedOut { reason: SignOutReason },

    /// Something went wrong. `code` follows HTTP conventions.
    Error { code: u16, message: String },
}

// =========================================================================
// Tests
// =========================================================================
