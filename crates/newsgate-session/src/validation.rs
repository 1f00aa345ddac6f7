//! The stamp-comparison contract.
//!
//! One check answers one question: is the principal captured at sign-in
//! still an accurate picture of the user in the store?
//!
//! 1. No such user → invalid.
//! 2. The store doesn't track stamps → valid.
//! 3. Otherwise the principal's stamp claim must equal the store's current
//!    stamp exactly. An absent stamp on one side and a present one on the
//!    other is a mismatch; both absent is a match.
//!
//! A store error is neither valid nor invalid. It is returned as `Err` and
//! the caller decides what to do with it.

use newsgate_protocol::Principal;
use newsgate_store::{CredentialStore, StoreError, StoreProvider};

use crate::InvalidationReason;

/// The verdict of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(InvalidationReason),
}

impl Validation {
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Compares `principal`'s stamp claim with the store's current stamp,
/// using an already-open scope.
///
/// # Errors
/// Whatever the store returns; never mapped to a verdict.
pub async fn validate_security_stamp<S: CredentialStore>(
    store: &S,
    principal: &Principal,
    stamp_claim_type: &str,
) -> Result<Validation, StoreError> {
    let Some(user) = store.find_user_by_principal(principal).await? else {
        return Ok(Validation::Invalid(InvalidationReason::UserNotFound));
    };

    if !store.supports_stamp_tracking() {
        return Ok(Validation::Valid);
    }

    let claimed = principal.find_first(stamp_claim_type);
    let current = store.current_stamp(&user).await?;

    if claimed == current.as_deref() {
        Ok(Validation::Valid)
    } else {
        Ok(Validation::Invalid(InvalidationReason::StampMismatch))
    }
}

/// Opens a scope, runs [`validate_security_stamp`], and releases the scope.
///
/// The scope lives inside this future. It is dropped when the check
/// returns, fails, or when the future itself is dropped mid-lookup.
///
/// # Errors
/// [`StoreError`] from opening the scope or from the lookup.
pub async fn validate_authentication_state<P: StoreProvider>(
    provider: &P,
    principal: &Principal,
    stamp_claim_type: &str,
) -> Result<Validation, StoreError> {
    let scope = provider.open_scope().await?;
    let verdict = validate_security_stamp(&scope, principal, stamp_claim_type).await;
    drop(scope);
    verdict
}
