use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::principal::Principal;
use crate::db::row_parsers;
use crate::errors::AppError;
use crate::models::module::{DepartmentModuleGrant, UserPermissionOverride};

/// Read side of the permission graph. Pure queries over current state; no
/// caching, so administrative changes take effect on the next check.
#[async_trait]
pub trait AccessEvaluator: Send + Sync {
    /// Module-level access: admin, or an active department grant on an
    /// active module.
    async fn can_access_module(&self, principal: &Principal, module_key: &str) -> Result<bool, AppError>;

    /// Permission-level access: admin, else the user's override for the
    /// exact triple, else the department module default.
    async fn has_permission(
        &self,
        principal: &Principal,
        module_key: &str,
        permission_key: &str,
    ) -> Result<bool, AppError>;
}

/// Request-time decision for one protected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(&'static str),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    /// Map a denial to the typed error the routing layer surfaces.
    pub fn require(self) -> Result<(), AppError> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny("not authenticated") => {
                Err(AppError::unauthorized("not authenticated"))
            }
            AccessDecision::Deny(reason) => Err(AppError::forbidden(reason)),
        }
    }
}

/// The authorization gate. Runs before the gated operation's business logic;
/// a denial short-circuits without touching the store beyond the reads here
/// and without writing any audit entry.
///
/// Denials are not journaled (matching the store's history); they are
/// surfaced through `tracing` for operators instead.
pub async fn decide<E: AccessEvaluator + ?Sized>(
    evaluator: &E,
    principal: Option<&Principal>,
    module_key: &str,
    permission_key: Option<&str>,
) -> Result<AccessDecision, AppError> {
    let principal = match principal {
        Some(p) => p,
        None => return Ok(AccessDecision::Deny("not authenticated")),
    };

    if principal.is_admin() {
        return Ok(AccessDecision::Allow);
    }

    if !evaluator.can_access_module(principal, module_key).await? {
        tracing::debug!(
            user_id = %principal.user_id,
            module = %module_key,
            "module access denied"
        );
        return Ok(AccessDecision::Deny("no module access"));
    }

    if let Some(permission) = permission_key {
        if !evaluator.has_permission(principal, module_key, permission).await? {
            tracing::debug!(
                user_id = %principal.user_id,
                module = %module_key,
                permission = %permission,
                "permission denied"
            );
            return Ok(AccessDecision::Deny("missing permission"));
        }
    }

    Ok(AccessDecision::Allow)
}

/// `decide` + `require` in one call, for handler use.
pub async fn require_access<E: AccessEvaluator + ?Sized>(
    evaluator: &E,
    principal: Option<&Principal>,
    module_key: &str,
    permission_key: Option<&str>,
) -> Result<(), AppError> {
    decide(evaluator, principal, module_key, permission_key)
        .await?
        .require()
}

/// Store-backed evaluator plus the upsert mutators for the grant and
/// override relations. Concurrent writers to the same key are serialized by
/// the unique constraints; last writer wins.
#[derive(Debug, Clone)]
pub struct SqlAccessEvaluator {
    pool: SqlitePool,
}

impl SqlAccessEvaluator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert keyed on (department, module); re-assigning toggles
    /// `has_access` back on rather than inserting a second row.
    pub async fn grant_module_to_department(
        &self,
        department_id: Uuid,
        module_id: Uuid,
    ) -> Result<DepartmentModuleGrant, AppError> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO department_modules (department_id, module_id, has_access, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?) \
             ON CONFLICT (department_id, module_id) DO UPDATE SET has_access = 1, updated_at = excluded.updated_at",
        )
        .bind(department_id.to_string())
        .bind(module_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT department_id, module_id, has_access, created_at, updated_at \
             FROM department_modules WHERE department_id = ? AND module_id = ?",
        )
        .bind(department_id.to_string())
        .bind(module_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        row_parsers::department_module_grant_from_row(&row)
    }

    /// Revoking flips `has_access` off; a pair that was never granted stays
    /// absent, which reads the same way.
    pub async fn revoke_module_from_department(
        &self,
        department_id: Uuid,
        module_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE department_modules SET has_access = 0, updated_at = ? \
             WHERE department_id = ? AND module_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(department_id.to_string())
        .bind(module_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert keyed on (user, module, permission); the stored `granted`
    /// value - true or false - fully replaces the department default for
    /// that triple.
    pub async fn set_user_permission(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        permission_id: Uuid,
        granted: bool,
        granted_by: Uuid,
    ) -> Result<UserPermissionOverride, AppError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO user_module_permissions (id, user_id, module_id, permission_id, granted, granted_by, granted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user_id, module_id, permission_id) \
             DO UPDATE SET granted = excluded.granted, granted_by = excluded.granted_by, granted_at = excluded.granted_at",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(module_id.to_string())
        .bind(permission_id.to_string())
        .bind(granted)
        .bind(granted_by.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, user_id, module_id, permission_id, granted, granted_by, granted_at \
             FROM user_module_permissions WHERE user_id = ? AND module_id = ? AND permission_id = ?",
        )
        .bind(user_id.to_string())
        .bind(module_id.to_string())
        .bind(permission_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        row_parsers::user_permission_override_from_row(&row)
    }
}

#[async_trait]
impl AccessEvaluator for SqlAccessEvaluator {
    async fn can_access_module(&self, principal: &Principal, module_key: &str) -> Result<bool, AppError> {
        if principal.is_admin() {
            return Ok(true);
        }

        let has_access: i64 = sqlx::query_scalar(
            "SELECT EXISTS( \
               SELECT 1 FROM department_modules dm \
               JOIN modules m ON m.id = dm.module_id \
               WHERE dm.department_id = ? AND m.module_key = ? \
                 AND dm.has_access = 1 AND m.is_active = 1)",
        )
        .bind(principal.department_id.to_string())
        .bind(module_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(has_access != 0)
    }

    async fn has_permission(
        &self,
        principal: &Principal,
        module_key: &str,
        permission_key: &str,
    ) -> Result<bool, AppError> {
        if principal.is_admin() {
            return Ok(true);
        }

        let override_row: Option<i64> = sqlx::query_scalar(
            "SELECT ump.granted FROM user_module_permissions ump \
             JOIN modules m ON m.id = ump.module_id \
             JOIN module_permissions mp ON mp.id = ump.permission_id \
             WHERE ump.user_id = ? AND m.module_key = ? AND mp.permission_key = ?",
        )
        .bind(principal.user_id.to_string())
        .bind(module_key)
        .bind(permission_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(granted) = override_row {
            return Ok(granted != 0);
        }

        // No department-level per-permission table exists: department
        // membership in an accessible module implies every permission inside
        // it unless an override says otherwise.
        self.can_access_module(principal, module_key).await
    }
}
