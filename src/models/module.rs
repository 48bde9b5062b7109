use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A named functional area that can be granted or withheld per department.
/// Identity is `module_key`; it is never reused once grants reference it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Module {
    pub id: Uuid,
    pub module_key: String,
    pub module_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Module row plus usage counts for the admin overview.
#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleSummary {
    #[serde(flatten)]
    pub module: Module,
    pub permissions_count: i64,
    pub departments_count: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModuleCreateRequest {
    #[schema(example = "quality_defects")]
    pub module_key: String,
    #[schema(example = "Defect tracking")]
    pub module_name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepartmentSummary {
    #[serde(flatten)]
    pub department: Department,
    pub users_count: i64,
    pub modules_count: i64,
}

/// Department-level default access to a module. One row per pair.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DepartmentModuleGrant {
    pub department_id: Uuid,
    pub module_id: Uuid,
    pub has_access: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignModuleRequest {
    pub department_id: Uuid,
    pub module_id: Uuid,
}

/// Fine-grained capability scoped to one module.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModulePermission {
    pub id: Uuid,
    pub module_id: Uuid,
    pub permission_key: String,
    pub permission_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "stats")]
    pub permission_key: String,
    #[schema(example = "View defect statistics")]
    pub permission_name: String,
}

/// Per-user exception for one (module, permission) pair. Supersedes the
/// department default entirely; does not merge with it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserPermissionOverride {
    pub id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub permission_id: Uuid,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
}

fn default_granted() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetUserPermissionRequest {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub permission_id: Uuid,
    /// `false` writes a deny-override that blocks the department default.
    #[serde(default = "default_granted")]
    pub granted: bool,
}

/// One resolved (module, permission) line of a user's effective access.
#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermission {
    pub module_key: String,
    pub module_name: String,
    pub permission_key: String,
    pub permission_name: String,
    pub has_permission: bool,
    /// "override" when a per-user row decided, "department" otherwise.
    pub source: String,
}

/// Module listing entry for the current user, with the permission keys they
/// hold inside it.
#[derive(Debug, Serialize, ToSchema)]
pub struct AccessibleModule {
    pub module_key: String,
    pub module_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub permissions: Vec<String>,
}

/// Module with the grant state for one department.
#[derive(Debug, Serialize, ToSchema)]
pub struct DepartmentModuleView {
    #[serde(flatten)]
    pub module: Module,
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
}
