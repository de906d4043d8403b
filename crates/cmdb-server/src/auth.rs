//! Authentication and permission gates.
//!
//! A login issues an HS256 JWT. Browsers carry it in the session cookie,
//! API clients in `Authorization: Bearer`. The token only names the user;
//! permissions are always read from [`AccessControl`] so changes apply to
//! live sessions.
//!
//! [`AccessControl`]: cmdb_core::rbac::AccessControl

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE, LOCATION, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use cmdb_core::rbac::{Action, User};

use crate::error::AppError;
use crate::html;
use crate::state::SharedState;

pub const SESSION_COOKIE: &str = "graphcmdb_session";
pub const FLASH_COOKIE: &str = "graphcmdb_flash";

pub const LOGIN_PATH: &str = "/users/login/";
pub const HOME_PATH: &str = "/cmdb/";

// ── Tokens ───────────────────────────────────────────────────────

/// JWT claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the username
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

pub fn encode_token(username: &str, secret: &str, ttl_secs: u64) -> Result<String, AppError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: username.to_string(),
        iat: now,
        exp: now + ttl_secs as i64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to encode token: {e}")))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))
}

// ── Cookies ──────────────────────────────────────────────────────

/// Value of cookie `name` from the request headers.
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

pub fn session_cookie(token: &str, ttl_secs: u64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_secs}")
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// A one-shot message shown on the next full page.
pub fn flash_cookie(message: &str) -> String {
    format!(
        "{FLASH_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age=60",
        urlencoding::encode(message)
    )
}

pub fn clear_flash_cookie() -> String {
    format!("{FLASH_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

pub fn read_flash(headers: &HeaderMap) -> Option<String> {
    let raw = cookie(headers, FLASH_COOKIE).filter(|v| !v.is_empty())?;
    urlencoding::decode(&raw).ok().map(|s| s.into_owned())
}

/// 302 to `location`, optionally setting cookies.
pub fn found(location: &str, cookies: &[String]) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(location) {
        headers.insert(LOCATION, value);
    }
    for c in cookies {
        if let Ok(value) = HeaderValue::from_str(c) {
            headers.append(SET_COOKIE, value);
        }
    }
    response
}

/// Only same-site absolute paths are accepted as a post-login target.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") => n,
        _ => HOME_PATH,
    }
}

// ── Extractors ───────────────────────────────────────────────────

fn request_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    bearer.or_else(|| cookie(&parts.headers, SESSION_COOKIE).filter(|v| !v.is_empty()))
}

/// The active user behind the request's token, if any.
fn authenticate(parts: &Parts, state: &SharedState) -> Result<User, AppError> {
    let token = request_token(parts)
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;
    let claims = decode_token(&token, &state.config.server.session_secret)?;
    state
        .acl
        .user(&claims.sub)
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("Unknown or inactive user".to_string()))
}

/// Authenticated user for the JSON API. Rejects with a 401 JSON body.
#[derive(Debug, Clone)]
pub struct ApiUser(pub User);

impl FromRequestParts<SharedState> for ApiUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = authenticate(parts, state).map(ApiUser);
        async move { result }
    }
}

/// Authenticated user for HTML pages. Redirects to the login page.
#[derive(Debug, Clone)]
pub struct SessionUser(pub User);

impl FromRequestParts<SharedState> for SessionUser {
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = authenticate(parts, state).map(SessionUser).map_err(|e| {
            tracing::debug!(path = %parts.uri.path(), reason = %e, "Redirecting to login");
            let next = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or(HOME_PATH);
            found(
                &format!("{LOGIN_PATH}?next={}", urlencoding::encode(next)),
                &[],
            )
        });
        async move { result }
    }
}

/// Whether the request was issued by HTMX.
#[derive(Debug, Clone, Copy)]
pub struct Htmx(pub bool);

impl<S: Send + Sync> FromRequestParts<S> for Htmx {
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let htmx = parts
            .headers
            .get("hx-request")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        async move { Ok(Htmx(htmx)) }
    }
}

// ── Permission Gates ─────────────────────────────────────────────

/// Deny an HTML request. Full navigations go back to the dashboard with a
/// flash; HTMX requests get a fragment retargeted at the error surface.
pub fn deny(message: &str, htmx: Htmx) -> Response {
    if htmx.0 {
        htmx_error(StatusCode::FORBIDDEN, message)
    } else {
        found(HOME_PATH, &[flash_cookie(message)])
    }
}

/// An error fragment routed to `#error-surface` whatever the request's target.
pub fn htmx_error(status: StatusCode, message: &str) -> Response {
    let mut response = (status, Html(html::error_fragment(message))).into_response();
    let headers = response.headers_mut();
    headers.insert("hx-retarget", HeaderValue::from_static("#error-surface"));
    headers.insert("hx-reswap", HeaderValue::from_static("innerHTML"));
    response
}

pub fn denied_message(action: Action, label: &str) -> String {
    format!("Access Denied: you do not have permission to {action} {label}.")
}

/// Gate an HTML handler on a node permission.
pub fn require_node(state: &SharedState, user: &User, action: Action, label: &str, htmx: Htmx) -> Result<(), Response> {
    if state.acl.has_node_permission(user, action, Some(label)) {
        Ok(())
    } else {
        tracing::info!(user = %user.username, action = %action, label, "Permission denied");
        Err(deny(&denied_message(action, label), htmx))
    }
}

pub fn require_staff(user: &User, htmx: Htmx) -> Result<(), Response> {
    if user.is_active && (user.is_staff || user.is_superuser) {
        Ok(())
    } else {
        Err(deny("Access Denied: staff access required.", htmx))
    }
}

/// Gate a JSON handler on a node permission.
pub fn require_api(state: &SharedState, user: &User, action: Action, label: &str) -> Result<(), AppError> {
    if state.acl.has_node_permission(user, action, Some(label)) {
        Ok(())
    } else {
        Err(AppError::Forbidden(denied_message(action, label)))
    }
}

// ── Handlers ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NextParam {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

pub async fn login_page(Query(params): Query<NextParam>) -> Html<String> {
    Html(html::login_page(safe_next(params.next.as_deref()), None))
}

pub async fn login_submit(State(state): State<SharedState>, Form(form): Form<LoginForm>) -> Response {
    let next = safe_next(form.next.as_deref()).to_string();
    let Some(user) = state.acl.authenticate(&form.username, &form.password) else {
        tracing::info!(username = %form.username, "Login failed");
        return Html(html::login_page(&next, Some("Invalid username or password."))).into_response();
    };

    let ttl = state.config.server.session_ttl_secs;
    match encode_token(&user.username, &state.config.server.session_secret, ttl) {
        Ok(token) => {
            tracing::info!(username = %user.username, "Login succeeded");
            found(&next, &[session_cookie(&token, ttl)])
        }
        Err(e) => e.into_response(),
    }
}

pub async fn logout() -> Response {
    found(LOGIN_PATH, &[clear_session_cookie()])
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    username: String,
    password: String,
}

/// `POST /api/auth/token/`: trade credentials for a bearer token.
pub async fn api_token(State(state): State<SharedState>, body: Bytes) -> Result<Json<serde_json::Value>, AppError> {
    let request: TokenRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {e}")))?;
    let user = state
        .acl
        .authenticate(&request.username, &request.password)
        .ok_or_else(|| AppError::Unauthorized("Invalid username or password".to_string()))?;

    let ttl = state.config.server.session_ttl_secs;
    let token = encode_token(&user.username, &state.config.server.session_secret, ttl)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "token": token,
        "expires_in": ttl,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-minimum-32-chars!!";

    #[test]
    fn test_token_round_trip_and_wrong_secret() {
        let token = encode_token("alice", SECRET, 60).unwrap();
        assert_eq!(decode_token(&token, SECRET).unwrap().sub, "alice");
        assert!(decode_token(&token, "another-secret-of-the-same-size!!").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(decode_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("a=1; graphcmdb_flash=Hello%20there; b=2"));
        assert_eq!(cookie(&headers, "a").as_deref(), Some("1"));
        assert_eq!(read_flash(&headers).as_deref(), Some("Hello there"));
        assert_eq!(cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_safe_next() {
        assert_eq!(safe_next(Some("/cmdb/Rack/")), "/cmdb/Rack/");
        assert_eq!(safe_next(Some("//evil.example")), HOME_PATH);
        assert_eq!(safe_next(Some("https://evil.example")), HOME_PATH);
        assert_eq!(safe_next(None), HOME_PATH);
    }

    #[test]
    fn test_htmx_denial_is_retargeted() {
        let response = deny(&denied_message(Action::Delete, "Rack"), Htmx(true));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()["hx-retarget"], "#error-surface");
        assert_eq!(response.headers()["hx-reswap"], "innerHTML");

        let response = deny(&denied_message(Action::Delete, "Rack"), Htmx(false));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], HOME_PATH);
        assert!(response.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .starts_with("graphcmdb_flash=Access%20Denied"));
    }
}
