//! Shared vocabulary for Newsgate.
//!
//! - **Identity** ([`UserId`], [`SessionId`], [`ConnectionId`]): what the
//!   other crates use to name users, signed-in sessions and live
//!   connections.
//! - **Claims** ([`Principal`], [`Claim`], [`AuthenticationState`]): the
//!   identity attached to a session, including the security-stamp claim
//!   the revalidator compares against the credential store.
//! - **Circuit wire format** ([`ClientMessage`], [`ServerMessage`]) and the
//!   [`Codec`] that turns them into bytes.
//!
//! ```text
//! newsgate (host) → newsgate-session → newsgate-store
//!         \______________ all depend on ______________/
//!                      newsgate-protocol
//! ```

mod codec;
mod error;
mod principal;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use principal::{claim_types, AuthenticationState, Claim, Principal, PrincipalBuilder};
pub use types::{ClientMessage, ConnectionId, ServerMessage, SessionId, SignOutReason, UserId};
