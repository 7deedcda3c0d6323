pub mod admin;
pub mod auth;
pub mod client;
pub mod error;
pub mod rate_limit;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential-handling routes get the tighter budget
    let credential_routes = Router::new()
        .route("/sign-up", post(auth::sign_up))
        .route("/sign-in", post(auth::sign_in))
        .route("/password-reset/request", post(auth::request_password_reset))
        .route("/password-reset/complete", post(auth::complete_password_reset))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let session_routes = Router::new()
        .route("/session", get(auth::session))
        .route("/sign-out", post(auth::sign_out))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/:id/role", put(admin::set_role))
        .route(
            "/users/:id/ban",
            post(admin::ban_user).delete(admin::unban_user),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", credential_routes.merge(session_routes))
        .nest("/api/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
