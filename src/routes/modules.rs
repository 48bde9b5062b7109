//! Module and permission-matrix administration.
//!
//! Admins manage the module catalog, department grants, and per-user
//! overrides; `my_modules` is the one endpoint open to every authenticated
//! user.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{self, actions, entities};
use crate::jwt::AuthUser;
use crate::models::module::{
    AccessibleModule, AssignModuleRequest, Department, DepartmentModuleGrant, DepartmentModuleView,
    DepartmentSummary, EffectivePermission, Module, ModuleCreateRequest, ModulePermission,
    ModuleSummary, PermissionCreateRequest, SetUserPermissionRequest, UserPermissionOverride,
};
use crate::models::user::Role;
use crate::routes::auth::fetch_user_by_id;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/modules",
    tag = "Modules",
    responses((status = 200, description = "Module catalog with usage counts", body = Vec<ModuleSummary>)),
    security(("bearerAuth" = []))
)]
pub async fn list_modules(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ModuleSummary>>> {
    auth.principal().require_admin()?;

    let rows = sqlx::query(
        "SELECT m.id, m.module_key, m.module_name, m.description, m.icon, m.is_active, m.created_at, m.updated_at, \
           (SELECT COUNT(*) FROM module_permissions WHERE module_id = m.id) AS permissions_count, \
           (SELECT COUNT(*) FROM department_modules WHERE module_id = m.id) AS departments_count \
         FROM modules m ORDER BY m.module_name",
    )
    .fetch_all(&state.pool)
    .await?;

    let modules = rows
        .iter()
        .map(|row| {
            Ok(ModuleSummary {
                module: row_parsers::module_from_row(row)?,
                permissions_count: row.try_get("permissions_count").unwrap_or(0),
                departments_count: row.try_get("departments_count").unwrap_or(0),
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(modules))
}

#[utoipa::path(
    post,
    path = "/modules",
    tag = "Modules",
    request_body = ModuleCreateRequest,
    responses(
        (status = 201, description = "Module created", body = Module),
        (status = 409, description = "Module key already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_module(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ModuleCreateRequest>,
) -> AppResult<(StatusCode, Json<Module>)> {
    auth.principal().require_admin()?;

    let module_key = payload.module_key.trim();
    if module_key.is_empty() || payload.module_name.trim().is_empty() {
        return Err(AppError::validation("module key and name are required"));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM modules WHERE module_key = ?")
        .bind(module_key)
        .fetch_one(&state.pool)
        .await?;
    if existing > 0 {
        return Err(AppError::conflict("a module with that key already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO modules (id, module_key, module_name, description, icon, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(module_key)
    .bind(payload.module_name.trim())
    .bind(&payload.description)
    .bind(&payload.icon)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let module = fetch_module_by_id(&state, id).await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::MODULE_CREATED,
        entities::MODULE,
        Some(id.to_string()),
        Some(json!({
            "module_key": module.module_key,
            "module_name": module.module_name,
        })),
    );

    Ok((StatusCode::CREATED, Json(module)))
}

#[utoipa::path(
    get,
    path = "/modules/departments",
    tag = "Modules",
    responses((status = 200, description = "Departments with usage counts", body = Vec<DepartmentSummary>)),
    security(("bearerAuth" = []))
)]
pub async fn list_departments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<DepartmentSummary>>> {
    auth.principal().require_admin()?;

    let rows = sqlx::query(
        "SELECT d.id, d.name, d.created_at, \
           (SELECT COUNT(*) FROM users WHERE department_id = d.id AND is_active = 1) AS users_count, \
           (SELECT COUNT(*) FROM department_modules WHERE department_id = d.id) AS modules_count \
         FROM departments d ORDER BY d.name",
    )
    .fetch_all(&state.pool)
    .await?;

    let departments = rows
        .iter()
        .map(|row| {
            Ok(DepartmentSummary {
                department: row_parsers::department_from_row(row)?,
                users_count: row.try_get("users_count").unwrap_or(0),
                modules_count: row.try_get("modules_count").unwrap_or(0),
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(departments))
}

#[utoipa::path(
    get,
    path = "/modules/departments/{department_id}/modules",
    tag = "Modules",
    params(("department_id" = Uuid, Path, description = "Department ID")),
    responses(
        (status = 200, description = "Every module with its grant state for the department", body = Vec<DepartmentModuleView>),
        (status = 404, description = "Department not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn department_modules(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(department_id): Path<Uuid>,
) -> AppResult<Json<Vec<DepartmentModuleView>>> {
    auth.principal().require_admin()?;

    ensure_department_exists(&state, department_id).await?;

    let rows = sqlx::query(
        "SELECT m.id, m.module_key, m.module_name, m.description, m.icon, m.is_active, m.created_at, m.updated_at, \
           dm.has_access AS grant_access, dm.created_at AS assigned_at \
         FROM modules m \
         LEFT JOIN department_modules dm ON m.id = dm.module_id AND dm.department_id = ? \
         ORDER BY m.module_name",
    )
    .bind(department_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let views = rows
        .iter()
        .map(|row| {
            let has_access: Option<i64> = row.try_get("grant_access").ok();
            let assigned_at: Option<String> = row.try_get("assigned_at").ok();
            let assigned_at = match assigned_at {
                Some(s) => Some(row_parsers::parse_datetime(&s)?),
                None => None,
            };

            Ok(DepartmentModuleView {
                module: row_parsers::module_from_row(row)?,
                has_access: has_access.map(|v| v != 0).unwrap_or(false),
                assigned_at,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(views))
}

#[utoipa::path(
    post,
    path = "/modules/departments/assign",
    tag = "Modules",
    request_body = AssignModuleRequest,
    responses(
        (status = 200, description = "Module granted to department", body = DepartmentModuleGrant),
        (status = 404, description = "Department or module not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_module_to_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<AssignModuleRequest>,
) -> AppResult<Json<DepartmentModuleGrant>> {
    auth.principal().require_admin()?;

    ensure_department_exists(&state, payload.department_id).await?;
    fetch_module_by_id(&state, payload.module_id).await?;

    let grant = state
        .access
        .grant_module_to_department(payload.department_id, payload.module_id)
        .await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::MODULE_ASSIGNED_TO_DEPARTMENT,
        entities::DEPARTMENT_MODULE,
        None,
        Some(json!({
            "department_id": payload.department_id,
            "module_id": payload.module_id,
        })),
    );

    Ok(Json(grant))
}

#[utoipa::path(
    delete,
    path = "/modules/departments/{department_id}/modules/{module_id}",
    tag = "Modules",
    params(
        ("department_id" = Uuid, Path, description = "Department ID"),
        ("module_id" = Uuid, Path, description = "Module ID")
    ),
    responses((status = 200, description = "Access revoked")),
    security(("bearerAuth" = []))
)]
pub async fn revoke_module_from_department(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((department_id, module_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<serde_json::Value>> {
    auth.principal().require_admin()?;

    state
        .access
        .revoke_module_from_department(department_id, module_id)
        .await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::MODULE_REVOKED_FROM_DEPARTMENT,
        entities::DEPARTMENT_MODULE,
        None,
        Some(json!({
            "department_id": department_id,
            "module_id": module_id,
        })),
    );

    Ok(Json(json!({ "message": "access revoked" })))
}

#[utoipa::path(
    get,
    path = "/modules/{module_key}/permissions",
    tag = "Modules",
    params(("module_key" = String, Path, description = "Module key")),
    responses(
        (status = 200, description = "Permissions defined for the module", body = Vec<ModulePermission>),
        (status = 404, description = "Module not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_module_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(module_key): Path<String>,
) -> AppResult<Json<Vec<ModulePermission>>> {
    auth.principal().require_admin()?;

    let module = fetch_module_by_key(&state, &module_key).await?;

    let rows = sqlx::query(
        "SELECT id, module_id, permission_key, permission_name, created_at \
         FROM module_permissions WHERE module_id = ? ORDER BY permission_key",
    )
    .bind(module.id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let permissions = rows
        .iter()
        .map(row_parsers::module_permission_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(permissions))
}

#[utoipa::path(
    post,
    path = "/modules/{module_key}/permissions",
    tag = "Modules",
    params(("module_key" = String, Path, description = "Module key")),
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = ModulePermission),
        (status = 404, description = "Module not found"),
        (status = 409, description = "Permission key already exists in the module")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_module_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(module_key): Path<String>,
    Json(payload): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<ModulePermission>)> {
    auth.principal().require_admin()?;

    let permission_key = payload.permission_key.trim();
    if permission_key.is_empty() || payload.permission_name.trim().is_empty() {
        return Err(AppError::validation("permission key and name are required"));
    }

    let module = fetch_module_by_key(&state, &module_key).await?;

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM module_permissions WHERE module_id = ? AND permission_key = ?",
    )
    .bind(module.id.to_string())
    .bind(permission_key)
    .fetch_one(&state.pool)
    .await?;
    if existing > 0 {
        return Err(AppError::conflict("permission key already exists in this module"));
    }

    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO module_permissions (id, module_id, permission_key, permission_name, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(module.id.to_string())
    .bind(permission_key)
    .bind(payload.permission_name.trim())
    .bind(utc_now().to_rfc3339())
    .execute(&state.pool)
    .await?;

    let row = sqlx::query(
        "SELECT id, module_id, permission_key, permission_name, created_at \
         FROM module_permissions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_one(&state.pool)
    .await?;
    let permission = row_parsers::module_permission_from_row(&row)?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::PERMISSION_CREATED,
        entities::MODULE_PERMISSION,
        Some(id.to_string()),
        Some(json!({
            "module_key": module.module_key,
            "permission_key": permission.permission_key,
        })),
    );

    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    post,
    path = "/modules/users/permissions",
    tag = "Modules",
    request_body = SetUserPermissionRequest,
    responses(
        (status = 200, description = "Override stored", body = UserPermissionOverride),
        (status = 404, description = "User, module, or permission not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_user_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SetUserPermissionRequest>,
) -> AppResult<Json<UserPermissionOverride>> {
    auth.principal().require_admin()?;

    fetch_user_by_id(&state.pool, payload.user_id).await?;
    fetch_module_by_id(&state, payload.module_id).await?;

    let belongs: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM module_permissions WHERE id = ? AND module_id = ?",
    )
    .bind(payload.permission_id.to_string())
    .bind(payload.module_id.to_string())
    .fetch_one(&state.pool)
    .await?;
    if belongs == 0 {
        return Err(AppError::not_found("permission not found in that module"));
    }

    let override_row = state
        .access
        .set_user_permission(
            payload.user_id,
            payload.module_id,
            payload.permission_id,
            payload.granted,
            auth.user_id,
        )
        .await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::PERMISSION_GRANTED,
        entities::USER_PERMISSION,
        Some(override_row.id.to_string()),
        Some(json!({
            "user_id": payload.user_id,
            "module_id": payload.module_id,
            "permission_id": payload.permission_id,
            "granted": payload.granted,
        })),
    );

    Ok(Json(override_row))
}

#[utoipa::path(
    get,
    path = "/modules/users/{user_id}/permissions",
    tag = "Modules",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Resolved permission matrix for the user", body = Vec<EffectivePermission>),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn user_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<EffectivePermission>>> {
    auth.principal().require_admin()?;

    let target = fetch_user_by_id(&state.pool, user_id).await?;
    let rows = effective_rows(&state, user_id, target.department_id, target.role).await?;

    Ok(Json(rows))
}

#[utoipa::path(
    get,
    path = "/modules/mine",
    tag = "Modules",
    responses((status = 200, description = "Modules the caller can open, with held permissions", body = Vec<AccessibleModule>)),
    security(("bearerAuth" = []))
)]
pub async fn my_modules(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<AccessibleModule>>> {
    let rows = effective_rows(&state, auth.user_id, auth.department_id, auth.role).await?;

    // Group effective-true rows into one entry per module.
    let mut grouped: BTreeMap<String, AccessibleModule> = BTreeMap::new();
    for row in rows.into_iter().filter(|r| r.has_permission) {
        grouped
            .entry(row.module_key.clone())
            .or_insert_with(|| AccessibleModule {
                module_key: row.module_key.clone(),
                module_name: row.module_name.clone(),
                description: None,
                icon: None,
                permissions: Vec::new(),
            })
            .permissions
            .push(row.permission_key);
    }

    // Attach catalog metadata for the modules that survived.
    let mut modules = Vec::with_capacity(grouped.len());
    for (module_key, mut entry) in grouped {
        let row = sqlx::query("SELECT description, icon FROM modules WHERE module_key = ?")
            .bind(&module_key)
            .fetch_optional(&state.pool)
            .await?;
        if let Some(row) = row {
            entry.description = row.try_get("description").ok().flatten();
            entry.icon = row.try_get("icon").ok().flatten();
        }
        modules.push(entry);
    }

    Ok(Json(modules))
}

/// Resolve every (module, permission) pair on active modules for one user:
/// override first, department default otherwise, everything for admins.
async fn effective_rows(
    state: &AppState,
    user_id: Uuid,
    department_id: Uuid,
    role: Role,
) -> AppResult<Vec<EffectivePermission>> {
    let rows = sqlx::query(
        "SELECT m.module_key, m.module_name, mp.permission_key, mp.permission_name, \
           ump.granted AS override_granted, \
           COALESCE(dm.has_access, 0) AS dept_access \
         FROM modules m \
         JOIN module_permissions mp ON mp.module_id = m.id \
         LEFT JOIN user_module_permissions ump \
           ON ump.module_id = m.id AND ump.permission_id = mp.id AND ump.user_id = ? \
         LEFT JOIN department_modules dm \
           ON dm.module_id = m.id AND dm.department_id = ? \
         WHERE m.is_active = 1 \
         ORDER BY m.module_name, mp.permission_key",
    )
    .bind(user_id.to_string())
    .bind(department_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    rows.iter()
        .map(|row| {
            let override_granted: Option<i64> = row
                .try_get("override_granted")
                .map_err(|e| AppError::internal(format!("missing override_granted: {}", e)))?;
            let dept_access: i64 = row
                .try_get("dept_access")
                .map_err(|e| AppError::internal(format!("missing dept_access: {}", e)))?;

            let (has_permission, source) = if role.is_admin() {
                (true, "role")
            } else {
                match override_granted {
                    Some(granted) => (granted != 0, "override"),
                    None => (dept_access != 0, "department"),
                }
            };

            Ok(EffectivePermission {
                module_key: row
                    .try_get("module_key")
                    .map_err(|e| AppError::internal(format!("missing module_key: {}", e)))?,
                module_name: row
                    .try_get("module_name")
                    .map_err(|e| AppError::internal(format!("missing module_name: {}", e)))?,
                permission_key: row
                    .try_get("permission_key")
                    .map_err(|e| AppError::internal(format!("missing permission_key: {}", e)))?,
                permission_name: row
                    .try_get("permission_name")
                    .map_err(|e| AppError::internal(format!("missing permission_name: {}", e)))?,
                has_permission,
                source: source.to_string(),
            })
        })
        .collect::<Result<Vec<_>, AppError>>()
}

async fn fetch_module_by_id(state: &AppState, module_id: Uuid) -> AppResult<Module> {
    let row = sqlx::query(
        "SELECT id, module_key, module_name, description, icon, is_active, created_at, updated_at \
         FROM modules WHERE id = ?",
    )
    .bind(module_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("module not found"))?;

    row_parsers::module_from_row(&row)
}

async fn fetch_module_by_key(state: &AppState, module_key: &str) -> AppResult<Module> {
    let row = sqlx::query(
        "SELECT id, module_key, module_name, description, icon, is_active, created_at, updated_at \
         FROM modules WHERE module_key = ?",
    )
    .bind(module_key)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("module not found"))?;

    row_parsers::module_from_row(&row)
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
