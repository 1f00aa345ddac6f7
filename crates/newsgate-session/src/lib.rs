//! Session revalidation for Newsgate.
//!
//! A signed-in user's session carries a [`Principal`] captured at sign-in,
//! including a snapshot of the user's security stamp. Every live
//! connection bound to that session gets one [`Revalidator`]: a background
//! task that, on a fixed interval, asks the credential store whether the
//! snapshot still matches. When it doesn't (or the user is gone), the
//! revalidator flips the connection's [`AuthenticationState`] to anonymous
//! and stops. The hosting layer treats that flip as a forced sign-out.
//!
//! # How it fits in the stack
//!
//! ```text
//! Hosting layer (newsgate)     ← HTTP sign-in/sign-out, circuit sockets
//!     ↕
//! Session layer (this crate)   ← sign-ins, live sessions, revalidators
//!     ↕
//! Store + interval (below)     ← credential lookups, tick timing
//! ```
//!
//! [`Principal`]: newsgate_protocol::Principal
//! [`AuthenticationState`]: newsgate_protocol::AuthenticationState

mod cancel;
mod config;
mod error;
mod manager;
mod revalidator;
mod state;
mod validation;

pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use config::RevalidationConfig;
pub use error::SessionError;
pub use manager::{resolve_sign_in, Session, SessionManager, SignInCheck, SignOutOutcome};
pub use revalidator::{Revalidator, RevalidatorHandle};
pub use state::{InvalidationReason, RevalidationOutcome, RevalidatorState};
pub use validation::{validate_authentication_state, validate_security_stamp, Validation};
