//! Revalidator lifecycle states and outcomes.

use std::fmt;

/// The lifecycle state of one revalidator.
///
/// ```text
///            ┌── tick: stamp matches ──┐
///            ▼                         │
///         Active ──────────────────────┘
///          │  │
///          │  └── tick: mismatch / user missing ──→ Invalidated
///          └───── cancel ─────────────────────────→ Cancelled
/// ```
///
/// `Invalidated` and `Cancelled` are terminal. A store fault on a tick
/// leaves the revalidator `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidatorState {
    Active,
    Invalidated,
    Cancelled,
}

impl RevalidatorState {
    /// Returns `true` once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Invalidated | Self::Cancelled)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    ///
    /// Every state is reachable from `Active`; nothing leaves a terminal
    /// state, not even a self-transition.
    pub fn can_transition_to(self, _target: Self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for RevalidatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Invalidated => write!(f, "Invalidated"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Why a session failed revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// The principal's user no longer exists in the store.
    UserNotFound,
    /// The stamp in the principal differs from the store's current stamp.
    StampMismatch,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserNotFound => write!(f, "user not found"),
            Self::StampMismatch => write!(f, "security stamp mismatch"),
        }
    }
}

/// How a revalidator task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    Invalidated(InvalidationReason),
    Cancelled,
}

impl RevalidationOutcome {
    /// The terminal state this outcome corresponds to.
    pub fn state(self) -> RevalidatorState {
        match self {
            Self::Invalidated(_) => RevalidatorState::Invalidated,
            Self::Cancelled => RevalidatorState::Cancelled,
        }
    }
}
