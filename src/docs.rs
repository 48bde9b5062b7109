use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes::auth::MessageResponse;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health,
        crate::routes::auth::login,
        crate::routes::auth::me,
        crate::routes::auth::change_password,
        crate::routes::auth::logout,
        crate::routes::users::list_users,
        crate::routes::users::create_user,
        crate::routes::users::update_user,
        crate::routes::users::delete_user,
        crate::routes::users::reset_password,
        crate::routes::modules::list_modules,
        crate::routes::modules::create_module,
        crate::routes::modules::list_departments,
        crate::routes::modules::department_modules,
        crate::routes::modules::assign_module_to_department,
        crate::routes::modules::revoke_module_from_department,
        crate::routes::modules::list_module_permissions,
        crate::routes::modules::create_module_permission,
        crate::routes::modules::set_user_permission,
        crate::routes::modules::user_permissions,
        crate::routes::modules::my_modules,
        crate::routes::shifts::list_shifts,
        crate::routes::shifts::current_shift_info,
        crate::routes::shifts::update_shift,
        crate::routes::defects::create_defect_record,
        crate::routes::defects::my_records,
        crate::routes::defects::all_records,
        crate::routes::defects::list_defect_types,
        crate::routes::defects::defect_stats,
        crate::routes::audit::list_audit_logs,
        crate::routes::audit::audit_logs_by_entity,
        crate::routes::audit::audit_stats,
    ),
    components(
        schemas(
            MessageResponse,
            models::user::User,
            models::user::Role,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::ChangePasswordRequest,
            models::user::CreateUserRequest,
            models::user::UpdateUserRequest,
            models::user::ResetPasswordRequest,
            models::module::Module,
            models::module::ModuleSummary,
            models::module::ModuleCreateRequest,
            models::module::Department,
            models::module::DepartmentSummary,
            models::module::DepartmentModuleGrant,
            models::module::DepartmentModuleView,
            models::module::AssignModuleRequest,
            models::module::ModulePermission,
            models::module::PermissionCreateRequest,
            models::module::SetUserPermissionRequest,
            models::module::UserPermissionOverride,
            models::module::EffectivePermission,
            models::module::AccessibleModule,
            models::shift::ShiftWindow,
            models::shift::ShiftUpdateRequest,
            models::shift::CurrentShiftResponse,
            models::defect::Area,
            models::defect::DefectRecord,
            models::defect::DefectRecordView,
            models::defect::CreateDefectRecordRequest,
            models::defect::DefectType,
            models::defect::DefectStat,
            models::audit::AuditLogEntry,
            models::audit::AuditLogView,
            models::audit::AuditStat,
        )
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Auth", description = "Authentication"),
        (name = "Users", description = "User administration"),
        (name = "Modules", description = "Module and permission matrix administration"),
        (name = "Shifts", description = "Shift window configuration"),
        (name = "Defects", description = "Defect records"),
        (name = "Audit", description = "Audit journal")
    )
)]
pub struct ApiDoc;

/// OpenAPI document with the bearer scheme and server entry injected.
pub fn build_openapi(port: u16) -> anyhow::Result<serde_json::Value> {
    let mut doc = serde_json::to_value(ApiDoc::openapi())?;

    doc["components"]["securitySchemes"]["bearerAuth"] = json!({
        "type": "http",
        "scheme": "bearer",
        "bearerFormat": "JWT",
    });

    if doc.get("servers").is_none() {
        doc["servers"] = json!([{ "url": format!("http://localhost:{}", port) }]);
    }

    Ok(doc)
}

/// Serves the raw document at /api-docs/openapi.json and the UI at /docs.
pub fn swagger_routes(doc: serde_json::Value) -> Router {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .persist_authorization(true);

    let doc = Arc::new(doc);
    let json_route = get(move || {
        let doc = Arc::clone(&doc);
        async move { Json(doc.as_ref().clone()) }
    });

    Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config))
}
