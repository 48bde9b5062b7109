//! Admin user management. Every endpoint requires the admin role; every
//! mutation is journaled with enough detail to reconstruct what changed.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{self, actions, entities};
use crate::jwt::AuthUser;
use crate::models::user::{
    CreateUserRequest, ResetPasswordRequest, Role, UpdateUserRequest, User,
};
use crate::routes::auth::fetch_user_by_id;
use crate::utils::{hash_password, utc_now};

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses(
        (status = 200, description = "All users, newest first", body = Vec<User>),
        (status = 403, description = "Admin role required")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<User>>> {
    auth.principal().require_admin()?;

    let rows = sqlx::query(
        "SELECT id, email, password_hash, full_name, role, department_id, is_active, created_at, updated_at, last_login \
         FROM users ORDER BY created_at DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let users = rows
        .iter()
        .map(|row| row_parsers::db_user_from_row(row).map(User::from))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(users))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid role or password"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    auth.principal().require_admin()?;

    let role: Role = payload.role.parse()?;
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.full_name.trim().is_empty() {
        return Err(AppError::validation("email and full name are required"));
    }

    let password_hash = hash_password(&payload.password)?;

    ensure_department_exists(&state, payload.department_id).await?;
    ensure_email_available(&state, &email, None).await?;

    let user_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, full_name, role, department_id, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(&email)
    .bind(password_hash)
    .bind(payload.full_name.trim())
    .bind(role.as_str())
    .bind(payload.department_id.to_string())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let user: User = fetch_user_by_id(&state.pool, user_id).await?.into();

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::USER_CREATED,
        entities::USER,
        Some(user_id.to_string()),
        Some(json!({
            "email": user.email,
            "full_name": user.full_name,
            "role": user.role,
            "department_id": user.department_id,
        })),
    );

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    auth.principal().require_admin()?;

    let role: Role = payload.role.parse()?;
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.full_name.trim().is_empty() {
        return Err(AppError::validation("email and full name are required"));
    }

    let old_user = fetch_user_by_id(&state.pool, id).await?;
    ensure_department_exists(&state, payload.department_id).await?;
    ensure_email_available(&state, &email, Some(id)).await?;

    sqlx::query(
        "UPDATE users SET email = ?, full_name = ?, role = ?, department_id = ?, is_active = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&email)
    .bind(payload.full_name.trim())
    .bind(role.as_str())
    .bind(payload.department_id.to_string())
    .bind(payload.is_active)
    .bind(utc_now().to_rfc3339())
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let user: User = fetch_user_by_id(&state.pool, id).await?.into();

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::USER_UPDATED,
        entities::USER,
        Some(id.to_string()),
        Some(json!({
            "old": {
                "email": old_user.email,
                "full_name": old_user.full_name,
                "role": old_user.role,
                "department_id": old_user.department_id,
                "is_active": old_user.is_active,
            },
            "new": {
                "email": user.email,
                "full_name": user.full_name,
                "role": user.role,
                "department_id": user.department_id,
                "is_active": user.is_active,
            },
        })),
    );

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete own account"),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.principal().require_admin()?;

    if id == auth.user_id {
        return Err(AppError::validation("cannot delete your own account"));
    }

    let user = fetch_user_by_id(&state.pool, id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::USER_DELETED,
        entities::USER,
        Some(id.to_string()),
        Some(json!({
            "email": user.email,
            "full_name": user.full_name,
        })),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/users/{id}/reset-password",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn reset_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth.principal().require_admin()?;

    let password_hash = hash_password(&payload.new_password)?;
    let user = fetch_user_by_id(&state.pool, id).await?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(utc_now().to_rfc3339())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::PASSWORD_RESET_BY_ADMIN,
        entities::USER,
        Some(id.to_string()),
        Some(json!({
            "email": user.email,
            "reset_by": auth.email,
        })),
    );

    Ok(Json(json!({ "message": "password reset" })))
}

async fn ensure_email_available(state: &AppState, email: &str, exclude: Option<Uuid>) -> AppResult<()> {
    let count: i64 = match exclude {
        Some(id) => {
            sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND id != ?")
                .bind(email)
                .bind(id.to_string())
                .fetch_one(&state.pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
                .bind(email)
                .fetch_one(&state.pool)
                .await?
        }
    };

    if count > 0 {
        return Err(AppError::conflict("email already registered"));
    }

    Ok(())
}

async fn ensure_department_exists(state: &AppState, department_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM departments WHERE id = ?")
        .bind(department_id.to_string())
        .fetch_one(&state.pool)
        .await?;

    if count == 0 {
        return Err(AppError::not_found("department not found"));
    }

    Ok(())
}
