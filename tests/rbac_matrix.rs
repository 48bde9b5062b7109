//! Permission matrix end to end: admin bypass, department grants, per-user
//! overrides, upsert idempotence, and revocation.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use qualtrack::authz::{AccessEvaluator, Principal, SqlAccessEvaluator};
use qualtrack::models::user::Role;

mod common;
use common::{
    defects_module_id, defects_permission_id, login, quality_department_id, request, seed_user,
    setup,
};

async fn production_department_id(pool: &SqlitePool) -> Result<Uuid> {
    let id: String = sqlx::query_scalar("SELECT id FROM departments WHERE name = 'Production'")
        .fetch_one(pool)
        .await?;
    Ok(Uuid::parse_str(&id)?)
}

#[tokio::test]
async fn admin_bypasses_grants_entirely() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    let token = login(&t.app, "admin@plant.example", "password123").await?;

    // No department grant exists, yet every gated endpoint opens.
    let (status, _) = request(&t.app, "GET", "/defects/types", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &t.app,
        "POST",
        "/defects",
        Some(&token),
        Some(json!({ "area": "machine-packing", "defect_type_id": 1, "rejected_pairs": 3 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = request(&t.app, "GET", "/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn non_admin_without_grant_is_locked_out() -> Result<()> {
    let t = setup().await?;
    let dept = production_department_id(&t.pool).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", dept).await?;
    let token = login(&t.app, "op@plant.example", "password123").await?;

    let (status, _) = request(&t.app, "GET", "/defects/types", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &t.app,
        "POST",
        "/defects",
        Some(&token),
        Some(json!({ "area": "machine-packing", "defect_type_id": 1, "rejected_pairs": 1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin endpoints are off limits regardless of grants
    let (status, _) = request(&t.app, "GET", "/users", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = request(&t.app, "GET", "/audit", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn department_grant_opens_the_module_and_its_permissions() -> Result<()> {
    let t = setup().await?;
    let admin_dept = quality_department_id(&t.pool).await?;
    let op_dept = production_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;

    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", op_dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;
    let op_token = login(&t.app, "op@plant.example", "password123").await?;

    let (status, body) = request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": op_dept, "module_id": module_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["has_access"], true);

    // Module-level access plus the permission-level department default
    let (status, _) = request(&t.app, "GET", "/defects/types", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = request(
        &t.app,
        "POST",
        "/defects",
        Some(&op_token),
        Some(json!({ "area": "digital-printing", "defect_type_id": 1, "rejected_pairs": 2 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let (status, _) = request(&t.app, "GET", "/defects/my-records", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // Re-issuing the grant stays a single row
    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": op_dept, "module_id": module_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM department_modules WHERE department_id = ? AND module_id = ?",
    )
    .bind(op_dept.to_string())
    .bind(module_id.to_string())
    .fetch_one(&t.pool)
    .await?;
    assert_eq!(rows, 1);

    // Revoking closes the module again
    let (status, _) = request(
        &t.app,
        "DELETE",
        &format!("/modules/departments/{}/modules/{}", op_dept, module_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&t.app, "GET", "/defects/types", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn deny_override_beats_the_department_default() -> Result<()> {
    let t = setup().await?;
    let admin_dept = quality_department_id(&t.pool).await?;
    let op_dept = production_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;
    let create_perm = defects_permission_id(&t.pool, "create").await?;

    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    let op_id = seed_user(&t.pool, "op@plant.example", "password123", "operator", op_dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;
    let op_token = login(&t.app, "op@plant.example", "password123").await?;

    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": op_dept, "module_id": module_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // Deny-override on "create" only
    let (status, body) = request(
        &t.app,
        "POST",
        "/modules/users/permissions",
        Some(&admin_token),
        Some(json!({
            "user_id": op_id,
            "module_id": module_id,
            "permission_id": create_perm,
            "granted": false,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["granted"], false);

    let (status, _) = request(
        &t.app,
        "POST",
        "/defects",
        Some(&op_token),
        Some(json!({ "area": "machine-packing", "defect_type_id": 1, "rejected_pairs": 1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Other permissions still follow the department default
    let (status, _) = request(&t.app, "GET", "/defects/my-records", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::OK);

    // Flipping the override back on wins again, still as a single row
    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/users/permissions",
        Some(&admin_token),
        Some(json!({
            "user_id": op_id,
            "module_id": module_id,
            "permission_id": create_perm,
            "granted": true,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_module_permissions WHERE user_id = ? AND module_id = ? AND permission_id = ?",
    )
    .bind(op_id.to_string())
    .bind(module_id.to_string())
    .bind(create_perm.to_string())
    .fetch_one(&t.pool)
    .await?;
    assert_eq!(rows, 1);

    let (status, _) = request(
        &t.app,
        "POST",
        "/defects",
        Some(&op_token),
        Some(json!({ "area": "machine-packing", "defect_type_id": 1, "rejected_pairs": 1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn grant_override_works_without_any_department_grant() -> Result<()> {
    let t = setup().await?;
    let admin_dept = quality_department_id(&t.pool).await?;
    let op_dept = production_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;
    let read_perm = defects_permission_id(&t.pool, "read").await?;

    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    let op_id = seed_user(&t.pool, "op@plant.example", "password123", "operator", op_dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;

    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/users/permissions",
        Some(&admin_token),
        Some(json!({
            "user_id": op_id,
            "module_id": module_id,
            "permission_id": read_perm,
            "granted": true,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // The override grants the permission itself even though module-level
    // access (a department concern) stays closed.
    let evaluator = SqlAccessEvaluator::new(t.pool.clone());
    let principal = Principal::new(op_id, Role::Operator, op_dept);

    assert!(
        evaluator
            .has_permission(&principal, "quality_defects", "read")
            .await?
    );
    assert!(
        !evaluator
            .can_access_module(&principal, "quality_defects")
            .await?
    );

    Ok(())
}

#[tokio::test]
async fn deactivated_module_closes_department_access() -> Result<()> {
    let t = setup().await?;
    let op_dept = production_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;
    let admin_dept = quality_department_id(&t.pool).await?;

    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", op_dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;
    let op_token = login(&t.app, "op@plant.example", "password123").await?;

    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": op_dept, "module_id": module_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    sqlx::query("UPDATE modules SET is_active = 0 WHERE id = ?")
        .bind(module_id.to_string())
        .execute(&t.pool)
        .await?;

    let (status, _) = request(&t.app, "GET", "/defects/types", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn assignment_validates_referenced_rows() -> Result<()> {
    let t = setup().await?;
    let admin_dept = quality_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;

    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": Uuid::new_v4(), "module_id": module_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": admin_dept, "module_id": Uuid::new_v4() })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
