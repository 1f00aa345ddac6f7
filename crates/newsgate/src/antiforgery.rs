//! Antiforgery (CSRF) protection by double submit.
//!
//! `GET /Account/Antiforgery` sets a random token in the
//! `newsgate.antiforgery` cookie and returns the same token in the body.
//! A state-changing request proves it came from our own page by echoing
//! the token in the `x-csrf-token` header: a cross-site form can make the
//! browser send the cookie, but it can't read it to fill in the header.
//!
//! Handlers opt in by taking an [`Antiforgery`] argument. The extractor
//! runs before the handler body, so a rejected request has no side
//! effects.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use newsgate_store::StoreProvider;
use rand::Rng;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::cookie::{read_cookie, set_cookie, ANTIFORGERY_COOKIE};
use crate::server::AppState;

/// Header carrying the echoed token.
pub const ANTIFORGERY_HEADER: &str = "x-csrf-token";

/// Proof that the request passed the antiforgery check.
#[derive(Debug, Clone, Copy)]
pub struct Antiforgery;

/// Why the antiforgery check failed. Always answered with `403`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiforgeryRejection {
    MissingCookie,
    MissingHeader,
    Mismatch,
}

impl IntoResponse for AntiforgeryRejection {
    fn into_response(self) -> Response {
        tracing::debug!(reason = ?self, "antiforgery check failed");
        (StatusCode::FORBIDDEN, "antiforgery token missing or invalid").into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Antiforgery {
    type Rejection = AntiforgeryRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cookie = read_cookie(&parts.headers, ANTIFORGERY_COOKIE)
            .ok_or(AntiforgeryRejection::MissingCookie)?;
        let echoed = parts
            .headers
            .get(ANTIFORGERY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(AntiforgeryRejection::MissingHeader)?;

        if bool::from(cookie.as_bytes().ct_eq(echoed.as_bytes())) {
            Ok(Antiforgery)
        } else {
            Err(AntiforgeryRejection::Mismatch)
        }
    }
}

/// 256 random bits as 64 lowercase hex characters.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenResponse {
    token: String,
}

/// `GET /Account/Antiforgery`
pub(crate) async fn issue<P: StoreProvider>(
    State(state): State<Arc<AppState<P>>>,
) -> impl IntoResponse {
    let token = generate_token();
    (
        [(
            header::SET_COOKIE,
            set_cookie(ANTIFORGERY_COOKIE, &token, state.secure_cookies()),
        )],
        Json(TokenResponse { token }),
    )
}
