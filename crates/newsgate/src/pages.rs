//! The two plain pages: the landing page and the admin area.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use newsgate_protocol::Principal;
use newsgate_store::StoreProvider;

use crate::authz::Authorization;
use crate::server::AppState;

fn display_name(principal: &Principal) -> &str {
    principal
        .name()
        .unwrap_or_else(|| principal.user_id().as_str())
}

/// `GET /`
pub(crate) async fn index<P: StoreProvider>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
) -> String {
    match state.current_session(&headers).await {
        Some((_, principal)) => format!("Newsgate\nsigned in as {}\n", display_name(&principal)),
        None => "Newsgate\nnot signed in\n".to_string(),
    }
}

/// `GET /admin`
pub(crate) async fn admin<P: StoreProvider>(
    State(state): State<Arc<AppState<P>>>,
    headers: HeaderMap,
) -> Response {
    let principal = state.current_session(&headers).await.map(|(_, p)| p);
    match state.admin_policy().evaluate(principal.as_ref()) {
        Authorization::Allowed => {
            let name = principal.as_ref().map(display_name).unwrap_or_default();
            (StatusCode::OK, format!("admin area: {name}\n")).into_response()
        }
        Authorization::Unauthenticated => {
            (StatusCode::UNAUTHORIZED, "sign in required").into_response()
        }
        Authorization::Forbidden => (StatusCode::FORBIDDEN, "forbidden").into_response(),
    }
}
