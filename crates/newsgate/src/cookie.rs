//! Cookie helpers. The host only ever reads one cookie at a time and
//! writes whole `Set-Cookie` lines, so there is no cookie jar.

use axum::http::HeaderMap;
use axum::http::header::COOKIE;

/// Session cookie: holds the session id.
pub const SESSION_COOKIE: &str = "newsgate.session";

/// Antiforgery cookie: holds the double-submit token.
pub const ANTIFORGERY_COOKIE: &str = "newsgate.antiforgery";

/// Value of cookie `name` from the request's `Cookie` headers.
pub(crate) fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// A `Set-Cookie` line for an HttpOnly, SameSite=Strict cookie on `/`.
pub(crate) fn set_cookie(name: &str, value: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly; SameSite=Strict; Path=/{secure}")
}

/// A `Set-Cookie` line that expires `name` immediately.
pub(crate) fn clear_cookie(name: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{name}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{secure}")
}
