//! HTTP tests for the `/Account` routes and the pages, driven through the
//! router with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use newsgate::account::principal_for;
use newsgate::config::ServerConfig;
use newsgate::prelude::*;
use newsgate::{router, AppState};
use tower::ServiceExt;

// =========================================================================
// Helpers
// =========================================================================

const CSRF: &str = "test-antiforgery-token";

struct TestApp {
    store: InMemoryStore,
    state: Arc<AppState<InMemoryStore>>,
    router: Router,
}

async fn app() -> TestApp {
    let store = InMemoryStore::new();
    store
        .add_user(
            NewUser::new("alice")
                .id("u-alice")
                .password("alice-pass")
                .role("writer")
                .security_stamp("A"),
        )
        .await
        .unwrap();
    store
        .add_user(NewUser::new("bob").id("u-bob").role("reader"))
        .await
        .unwrap();

    let state = AppState::new(Arc::new(store.clone()), &ServerConfig::default());
    let router = router(Arc::clone(&state));
    TestApp {
        store,
        state,
        router,
    }
}

impl TestApp {
    async fn sign_in(&self, user_id: &str, roles: &[&str]) -> SessionId {
        let principal = roles
            .iter()
            .fold(
                Principal::builder(UserId::new(user_id)).name(user_id),
                |b, r| b.role(*r),
            )
            .build();
        self.state.sessions().lock().await.sign_in(principal)
    }

    /// Signs a stored user in with their current security stamp, the way
    /// a password login does.
    async fn sign_in_stored(&self, user_id: &str) -> SessionId {
        let record = self.store.get(&UserId::new(user_id)).await.unwrap();
        let mut sessions = self.state.sessions().lock().await;
        let principal = principal_for(&record, &sessions.config().security_stamp_claim_type);
        sessions.sign_in(principal)
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn is_signed_in(&self, session_id: &SessionId) -> bool {
        self.state
            .sessions()
            .lock()
            .await
            .principal(session_id)
            .is_some()
    }
}

fn logout_request(uri: &str, session: Option<&SessionId>, csrf: Option<&str>) -> Request<Body> {
    let mut cookie = format!("newsgate.antiforgery={CSRF}");
    if let Some(sid) = session {
        cookie.push_str(&format!("; newsgate.session={}", sid.as_str()));
    }
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::COOKIE, cookie);
    if let Some(token) = csrf {
        builder = builder.header("x-csrf-token", token);
    }
    builder.body(Body::empty()).unwrap()
}

fn login_request(user_name: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/Account/Login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::COOKIE, format!("newsgate.antiforgery={CSRF}"))
        .header("x-csrf-token", CSRF)
        .body(Body::from(format!("user_name={user_name}&password={password}")))
        .unwrap()
}

fn get(uri: &str, session: Option<&SessionId>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(sid) = session {
        builder = builder.header(header::COOKIE, format!("newsgate.session={}", sid.as_str()));
    }
    builder.body(Body::empty()).unwrap()
}

fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

fn set_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// =========================================================================
// Sign-out
// =========================================================================

#[tokio::test]
async fn test_logout_signed_in_clears_session_and_redirects_home() {
    let app = app().await;
    let sid = app.sign_in("u-alice", &["writer"]).await;

    let response = app
        .send(logout_request("/Account/Logout", Some(&sid), Some(CSRF)))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));
    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("newsgate.session=;"));
    assert!(cookie.contains("Max-Age=0"));
    assert!(!app.is_signed_in(&sid).await);
}

#[tokio::test]
async fn test_logout_ignores_return_url() {
    let app = app().await;
    let sid = app.sign_in("u-alice", &[]).await;

    let response = app
        .send(logout_request(
            "/Account/Logout?returnUrl=https%3A%2F%2Fevil.example%2F",
            Some(&sid),
            Some(CSRF),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));
}

#[tokio::test]
async fn test_logout_twice_is_idempotent() {
    let app = app().await;
    let sid = app.sign_in("u-alice", &[]).await;

    for _ in 0..2 {
        let response = app
            .send(logout_request("/Account/Logout", Some(&sid), Some(CSRF)))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), Some("/"));
    }
    assert_eq!(app.state.sessions().lock().await.sign_in_count(), 0);
}

#[tokio::test]
async fn test_logout_anonymous_redirects_without_store_calls() {
    let app = app().await;

    let response = app
        .send(logout_request("/Account/Logout", None, Some(CSRF)))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));
    assert_eq!(app.store.scopes_opened(), 0);
    assert_eq!(app.store.lookup_count(), 0);
}

#[tokio::test]
async fn test_logout_without_antiforgery_is_forbidden_and_keeps_session() {
    let app = app().await;
    let sid = app.sign_in("u-alice", &[]).await;

    let response = app
        .send(logout_request("/Account/Logout", Some(&sid), None))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(logout_request("/Account/Logout", Some(&sid), Some("forged")))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(app.is_signed_in(&sid).await);
}

#[tokio::test]
async fn test_logout_get_is_method_not_allowed() {
    let app = app().await;
    let sid = app.sign_in("u-alice", &[]).await;

    let response = app.send(get("/Account/Logout", Some(&sid))).await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(app.is_signed_in(&sid).await);
}

// =========================================================================
// Antiforgery token
// =========================================================================

#[tokio::test]
async fn test_antiforgery_issues_matching_cookie_and_body() {
    let app = app().await;

    let response = app.send(get("/Account/Antiforgery", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    let token = body["token"].as_str().unwrap();
    assert_eq!(token.len(), 64);
    assert!(cookie.starts_with(&format!("newsgate.antiforgery={token};")));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
}

// =========================================================================
// Sign-in
// =========================================================================

#[tokio::test]
async fn test_login_valid_credentials_signs_in() {
    let app = app().await;

    let response = app.send(login_request("alice", "alice-pass")).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));
    let cookie = set_cookie(&response);
    let sid = cookie
        .strip_prefix("newsgate.session=")
        .and_then(|rest| rest.split(';').next())
        .map(SessionId::new)
        .unwrap();

    let sessions = app.state.sessions().lock().await;
    let principal = sessions.principal(&sid).unwrap();
    assert_eq!(principal.user_id(), &UserId::new("u-alice"));
    assert_eq!(principal.name(), Some("alice"));
    assert!(principal.is_in_role("writer"));
    assert_eq!(principal.find_first("security_stamp"), Some("A"));
}

#[tokio::test]
async fn test_login_wrong_password_is_unauthorized() {
    let app = app().await;

    let response = app.send(login_request("alice", "wrong")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_empty());
    assert_eq!(app.state.sessions().lock().await.sign_in_count(), 0);
}

#[tokio::test]
async fn test_login_without_antiforgery_is_forbidden() {
    let app = app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/Account/Login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("user_name=alice&password=alice-pass"))
        .unwrap();

    let response = app.send(request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.store.scopes_opened(), 0);
}

// =========================================================================
// Pages
// =========================================================================

#[tokio::test]
async fn test_admin_requires_sign_in() {
    let app = app().await;
    let response = app.send(get("/admin", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_reader_is_forbidden() {
    let app = app().await;
    let sid = app.sign_in("u-bob", &["reader"]).await;
    let response = app.send(get("/admin", Some(&sid))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_writer_is_allowed() {
    let app = app().await;
    let sid = app.sign_in("u-alice", &["writer"]).await;
    let response = app.send(get("/admin", Some(&sid))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "admin area: u-alice\n");
}

#[tokio::test]
async fn test_index_shows_sign_in_state() {
    let app = app().await;
    let response = app.send(get("/", None)).await;
    assert_eq!(body_text(response).await, "Newsgate\nnot signed in\n");

    let sid = app.sign_in("u-alice", &[]).await;
    let response = app.send(get("/", Some(&sid))).await;
    assert_eq!(body_text(response).await, "Newsgate\nsigned in as u-alice\n");
}

// =========================================================================
// Revalidation without a live connection
// =========================================================================

/// Past the default 20 second revalidation interval.
const PAST_INTERVAL: Duration = Duration::from_secs(21);

#[tokio::test(start_paused = true)]
async fn test_admin_after_user_deleted_is_unauthorized() {
    let app = app().await;
    let sid = app.sign_in_stored("u-alice").await;
    let response = app.send(get("/admin", Some(&sid))).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(app.store.remove_user(&UserId::new("u-alice")).await);
    tokio::time::sleep(PAST_INTERVAL).await;

    let response = app.send(get("/admin", Some(&sid))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!app.is_signed_in(&sid).await);
}

#[tokio::test(start_paused = true)]
async fn test_admin_after_stamp_rotated_is_unauthorized() {
    let app = app().await;
    let sid = app.sign_in_stored("u-alice").await;

    app.store
        .update_security_stamp(&UserId::new("u-alice"))
        .await
        .unwrap();

    // Within the interval the sign-in is trusted without a lookup.
    let response = app.send(get("/admin", Some(&sid))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.lookup_count(), 0);

    tokio::time::sleep(PAST_INTERVAL).await;
    let response = app.send(get("/admin", Some(&sid))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.send(get("/", Some(&sid))).await;
    assert_eq!(body_text(response).await, "Newsgate\nnot signed in\n");
}

#[tokio::test(start_paused = true)]
async fn test_admin_unchanged_stamp_stays_allowed_across_intervals() {
    let app = app().await;
    let sid = app.sign_in_stored("u-alice").await;

    for _ in 0..3 {
        tokio::time::sleep(PAST_INTERVAL).await;
        let response = app.send(get("/admin", Some(&sid))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.store.lookup_count(), 3);
    assert_eq!(app.store.open_scopes(), 0);
}
