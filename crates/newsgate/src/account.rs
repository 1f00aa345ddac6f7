//! The `/Account` route group: sign-in and sign-out.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use newsgate_protocol::{Principal, SessionId};
use newsgate_session::SignOutOutcome;
use newsgate_store::{CredentialRecord, CredentialStore, StoreProvider};
use serde::Deserialize;

use crate::antiforgery::Antiforgery;
use crate::cookie::{clear_cookie, read_cookie, set_cookie, SESSION_COOKIE};
use crate::server::AppState;
use crate::NewsgateError;

/// Where sign-in and sign-out send the browser. Fixed; never taken from
/// the request.
pub const HOME: &str = "/";

/// Body of `POST /Account/Login` (form-encoded).
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub user_name: String,
    pub password: String,
}

/// The principal issued for `record` at sign-in.
pub fn principal_for(record: &CredentialRecord, stamp_claim_type: &str) -> Principal {
    let builder = record
        .roles
        .iter()
        .fold(
            Principal::builder(record.id.clone()).name(record.user_name.clone()),
            |b, role| b.role(role.clone()),
        )
        .stamp_claim_type(stamp_claim_type);
    match &record.security_stamp {
        Some(stamp) => builder.security_stamp(stamp.clone()).build(),
        None => builder.build(),
    }
}

/// `POST /Account/Login`
pub(crate) async fn login<P: StoreProvider>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    _antiforgery: Antiforgery,
    Form(form): Form<LoginForm>,
) -> Result<Response, NewsgateError> {
    let record = {
        let scope = state.provider().open_scope().await?;
        scope.verify_password(&form.user_name, &form.password).await?
    };
    let Some(record) = record else {
        tracing::info!(user_name = %form.user_name, "sign-in rejected");
        return Ok((StatusCode::UNAUTHORIZED, "invalid user name or password").into_response());
    };

    let session_id = {
        let mut sessions = state.sessions().lock().await;
        // A fresh id on every sign-in; the old session (if any) ends.
        if let Some(previous) = read_cookie(&headers, SESSION_COOKIE) {
            sessions.sign_out(&SessionId::new(previous));
        }
        let principal = principal_for(&record, &sessions.config().security_stamp_claim_type);
        sessions.sign_in(principal)
    };

    Ok((
        [(
            header::SET_COOKIE,
            set_cookie(SESSION_COOKIE, session_id.as_str(), state.secure_cookies()),
        )],
        Redirect::to(HOME),
    )
        .into_response())
}

/// `POST /Account/Logout`
///
/// Ends the caller's session (if any), expires the cookie and redirects
/// home. Query strings such as `returnUrl` are ignored.
pub(crate) async fn logout<P: StoreProvider>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
    _antiforgery: Antiforgery,
) -> impl IntoResponse {
    match read_cookie(&headers, SESSION_COOKIE) {
        Some(raw) => {
            let session_id = SessionId::new(raw);
            let outcome = state.sessions().lock().await.sign_out(&session_id);
            if outcome == SignOutOutcome::NotSignedIn {
                tracing::debug!(%session_id, "sign-out with a stale session cookie");
            }
        }
        None => tracing::debug!("anonymous sign-out"),
    }

    (
        [(
            header::SET_COOKIE,
            clear_cookie(SESSION_COOKIE, state.secure_cookies()),
        )],
        Redirect::to(HOME),
    )
}
