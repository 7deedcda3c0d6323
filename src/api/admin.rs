//! User administration endpoints.
//!
//! The caller comes from `CurrentUser`, reloaded from storage on every
//! request; `AdminDirectory` then re-checks admin status itself.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::ApiError;
use crate::db::UserSummary;
use crate::identity::{PageRequest, UserFilter};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<String>,
    pub banned: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    #[serde(default)]
    pub reason: String,
    pub duration_seconds: Option<i64>,
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    let filter = UserFilter {
        role: query.role,
        banned: query.banned,
        search: query.search,
    };
    let page = PageRequest::new(query.limit, query.offset);

    let result = state.auth.admin.list_users(&caller, &filter, page).await?;

    Ok(Json(ListUsersResponse {
        users: result.users.into_iter().map(UserSummary::from).collect(),
        total: result.total,
        limit: result.limit,
        offset: result.offset,
    }))
}

/// PUT /api/admin/users/:id/role
pub async fn set_role(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<UserSummary>, ApiError> {
    let user = state.auth.admin.set_role(&caller, &id, &request.role).await?;
    Ok(Json(user.into()))
}

/// POST /api/admin/users/:id/ban
pub async fn ban_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<BanRequest>,
) -> Result<Json<UserSummary>, ApiError> {
    let user = state
        .auth
        .admin
        .ban_user(&caller, &id, &request.reason, request.duration_seconds)
        .await?;
    Ok(Json(user.into()))
}

/// DELETE /api/admin/users/:id/ban
pub async fn unban_user(
    State(state): State<Arc<AppState>>,
    CurrentUser(caller): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<UserSummary>, ApiError> {
    let user = state.auth.admin.unban_user(&caller, &id).await?;
    Ok(Json(user.into()))
}
