use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{self, actions, entities};
use crate::jwt::AuthUser;
use crate::models::user::{AuthResponse, ChangePasswordRequest, DbUser, LoginRequest, User};
use crate::utils::{hash_password, utc_now, verify_password};

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("email and password are required"));
    }

    let email = payload.email.trim().to_lowercase();

    let row = sqlx::query(
        "SELECT id, email, password_hash, full_name, role, department_id, is_active, created_at, updated_at, last_login \
         FROM users WHERE email = ? AND is_active = 1",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    let db_user = row_parsers::db_user_from_row(&row)?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(utc_now().to_rfc3339())
        .bind(db_user.id.to_string())
        .execute(&state.pool)
        .await?;

    events::record(
        &state.audit,
        Some(db_user.id),
        actions::USER_LOGIN,
        entities::USER,
        Some(db_user.id.to_string()),
        None,
    );

    let user: User = db_user.into();
    let token = state.jwt.encode(&user)?;

    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let db_user = fetch_user_by_id(&state.pool, auth.user_id).await?;
    Ok(Json(db_user.into()))
}

#[utoipa::path(
    post,
    path = "/auth/change-password",
    tag = "Auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 401, description = "Current password is wrong")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let db_user = fetch_user_by_id(&state.pool, auth.user_id).await?;

    if !verify_password(&payload.current_password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("current password is incorrect"));
    }

    let new_hash = hash_password(&payload.new_password)?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(new_hash)
        .bind(utc_now().to_rfc3339())
        .bind(auth.user_id.to_string())
        .execute(&state.pool)
        .await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::PASSWORD_CHANGED,
        entities::USER,
        Some(auth.user_id.to_string()),
        None,
    );

    Ok(Json(MessageResponse {
        message: "password changed".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged")),
    security(("bearerAuth" = []))
)]
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<MessageResponse>> {
    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::USER_LOGOUT,
        entities::USER,
        Some(auth.user_id.to_string()),
        Some(json!({ "email": auth.email })),
    );

    Ok(Json(MessageResponse {
        message: "logged out".to_string(),
    }))
}

pub(crate) async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    let row = sqlx::query(
        "SELECT id, email, password_hash, full_name, role, department_id, is_active, created_at, updated_at, last_login \
         FROM users WHERE id = ?",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))?;

    row_parsers::db_user_from_row(&row)
}
