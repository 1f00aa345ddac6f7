//! Credential storage for Newsgate.
//!
//! The session core only needs to ask a store three questions (does this
//! user exist, does the store track security stamps, what is the user's
//! stamp right now) plus, at sign-in, "is this password right". This crate
//! defines those questions as traits and ships one answerer:
//!
//! - [`StoreProvider`] / [`CredentialStore`]: the interface, with scoped
//!   acquisition (one scope per check, released on drop)
//! - [`CredentialRecord`]: the minimal user shape the core reads
//! - [`InMemoryStore`]: a process-local implementation for the demo site
//!   and tests
//! - [`hash_password`] / [`verify_password`]: Argon2 PHC helpers
//!
//! Mutating stamps is not the session core's business. Only account
//! management (here: the `InMemoryStore` management methods) does that.

mod error;
mod memory;
mod password;
mod record;
mod store;

pub use error::StoreError;
pub use memory::{InMemoryScope, InMemoryStore};
pub use password::{hash_password, verify_password};
pub use record::{new_security_stamp, CredentialRecord, NewUser};
pub use store::{CredentialStore, StoreProvider};
