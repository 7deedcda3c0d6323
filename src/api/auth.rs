use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::client::request_context;
use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{RequestContext, User, UserSummary};
use crate::identity::{Acknowledgement, AuthError, CapabilitySet, Destination, Identity};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub token: String,
    pub user: UserSummary,
    pub area: Area,
}

/// Where the client should send the user next.
#[derive(Debug, Serialize)]
pub struct Area {
    pub destination: Destination,
    pub path: &'static str,
}

impl From<Destination> for Area {
    fn from(destination: Destination) -> Self {
        Self {
            destination,
            path: destination.path(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionResponse {
    Authenticated {
        user: UserSummary,
        area: Area,
        capabilities: CapabilitySet,
    },
    Anonymous,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetCompletion {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
}

/// Session token from the session cookie, or an `Authorization: Bearer` header.
pub fn extract_token(jar: &CookieJar, headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(cookie) = jar.get(cookie_name) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((state.config.auth.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.auth.secure_cookies)
        .build()
}

fn clear_session_cookie(state: &AppState, jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build((state.config.auth.cookie_name.clone(), "")).path("/"))
}

/// POST /api/auth/sign-up
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<UserSummary>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.require("email", &request.email);
    errors.require("password", &request.password);
    errors.finish()?;

    let user = state
        .auth
        .register(&request.email, &request.password, request.name.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(UserSummary::from(user))))
}

/// POST /api/auth/sign-in
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    ClientContext(context): ClientContext,
    jar: CookieJar,
    Json(request): Json<SignInRequest>,
) -> Result<(CookieJar, Json<SignInResponse>), ApiError> {
    let login = state
        .auth
        .login(&request.email, &request.password, &context)
        .await?;

    let jar = jar.add(session_cookie(&state, login.token.clone()));

    Ok((
        jar,
        Json(SignInResponse {
            token: login.token,
            user: UserSummary::from(login.user),
            area: login.destination.into(),
        }),
    ))
}

/// GET /api/auth/session
///
/// A presented token that does not validate is a 401 and clears the cookie;
/// no token at all is simply anonymous. A banned account gets the 403
/// `account_banned` envelope and keeps its cookie.
pub async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let token = extract_token(&jar, &headers, &state.config.auth.cookie_name);

    match state.auth.check_session(token.as_deref()).await {
        Ok(Identity::Authenticated { user, .. }) => {
            let capabilities = state.auth.authorize(&user).await?;
            let area = state.auth.router.decide(&user).into();
            Ok(Json(SessionResponse::Authenticated {
                user: UserSummary::from(user),
                area,
                capabilities,
            })
            .into_response())
        }
        Ok(Identity::Anonymous) => Ok(Json(SessionResponse::Anonymous).into_response()),
        Err(e @ (AuthError::SessionInvalid | AuthError::SessionExpired)) => {
            Ok((clear_session_cookie(&state, jar), ApiError::from(e)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /api/auth/sign-out
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    if let Some(token) = extract_token(&jar, &headers, &state.config.auth.cookie_name) {
        state.auth.logout(&token).await?;
    }
    Ok((clear_session_cookie(&state, jar), StatusCode::NO_CONTENT))
}

/// POST /api/auth/password-reset/request
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetRequest>,
) -> (StatusCode, Json<Acknowledgement>) {
    let ack = state.auth.request_password_reset(&request.email);
    (StatusCode::ACCEPTED, Json(ack))
}

/// POST /api/auth/password-reset/complete
pub async fn complete_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetCompletion>,
) -> Result<Json<Acknowledgement>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.require("email", &request.email);
    errors.require("token", &request.token);
    errors.finish()?;

    let ack = state
        .auth
        .complete_password_reset(&request.email, &request.password, &request.token)
        .await?;
    Ok(Json(ack))
}

/// Session metadata for the current request
pub struct ClientContext(pub RequestContext);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientContext(request_context(&parts.headers, &parts.extensions)))
    }
}

/// The caller's user row, freshly loaded through their session and
/// authorized. Banned callers are rejected here.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = extract_token(&jar, &parts.headers, &state.config.auth.cookie_name)
            .ok_or_else(ApiError::unauthorized)?;
        let (user, _session) = state.auth.sessions.validate(&token).await?;
        state.auth.authorize(&user).await?;
        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_takes_precedence_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert("cookie", HeaderValue::from_static("sid=from-cookie"));
        let jar = CookieJar::from_headers(&headers);

        assert_eq!(extract_token(&jar, &headers, "sid").as_deref(), Some("from-cookie"));
        assert_eq!(extract_token(&jar, &headers, "other").as_deref(), Some("from-header"));
    }

    #[test]
    fn test_missing_or_malformed_header_yields_none() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        assert!(extract_token(&jar, &headers, "sid").is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_token(&jar, &headers, "sid").is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(extract_token(&jar, &headers, "sid").is_none());
    }
}
