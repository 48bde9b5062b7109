//! Module catalog administration and the resolved permission views.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

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
async fn module_creation_enforces_unique_keys() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    let token = login(&t.app, "admin@plant.example", "password123").await?;

    let (status, body) = request(
        &t.app,
        "POST",
        "/modules",
        Some(&token),
        Some(json!({ "module_key": "reports", "module_name": "Reporting" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["module_key"], "reports");
    assert_eq!(body["is_active"], true);

    // Same key again conflicts
    let (status, _) = request(
        &t.app,
        "POST",
        "/modules",
        Some(&token),
        Some(json!({ "module_key": "reports", "module_name": "Reporting v2" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // Missing key fails validation before the store
    let (status, _) = request(
        &t.app,
        "POST",
        "/modules",
        Some(&token),
        Some(json!({ "module_key": "", "module_name": "Nameless" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The catalog lists both modules with counts
    let (status, body) = request(&t.app, "GET", "/modules", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let modules = body.as_array().expect("array of modules");
    assert_eq!(modules.len(), 2);
    let defects = modules
        .iter()
        .find(|m| m["module_key"] == "quality_defects")
        .expect("seeded module present");
    assert_eq!(defects["permissions_count"], 3);

    Ok(())
}

#[tokio::test]
async fn permissions_are_module_scoped() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    let token = login(&t.app, "admin@plant.example", "password123").await?;

    let (status, body) = request(
        &t.app,
        "POST",
        "/modules/quality_defects/permissions",
        Some(&token),
        Some(json!({ "permission_key": "export", "permission_name": "Export records" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // Duplicate key inside the same module conflicts
    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/quality_defects/permissions",
        Some(&token),
        Some(json!({ "permission_key": "export", "permission_name": "Export again" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // Unknown module is a 404
    let (status, _) = request(
        &t.app,
        "POST",
        "/modules/no_such_module/permissions",
        Some(&token),
        Some(json!({ "permission_key": "export", "permission_name": "Export" })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(
        &t.app,
        "GET",
        "/modules/quality_defects/permissions",
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|p| p["permission_key"].as_str())
        .collect();
    assert_eq!(keys, vec!["create", "export", "read", "stats"]);

    Ok(())
}

#[tokio::test]
async fn effective_permissions_show_override_and_department_sources() -> Result<()> {
    let t = setup().await?;
    let admin_dept = quality_department_id(&t.pool).await?;
    let op_dept = production_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;
    let create_perm = defects_permission_id(&t.pool, "create").await?;

    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    let op_id = seed_user(&t.pool, "op@plant.example", "password123", "operator", op_dept).await?;
    let token = login(&t.app, "admin@plant.example", "password123").await?;

    request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&token),
        Some(json!({ "department_id": op_dept, "module_id": module_id })),
    )
    .await?;
    request(
        &t.app,
        "POST",
        "/modules/users/permissions",
        Some(&token),
        Some(json!({
            "user_id": op_id,
            "module_id": module_id,
            "permission_id": create_perm,
            "granted": false,
        })),
    )
    .await?;

    let (status, body) = request(
        &t.app,
        "GET",
        &format!("/modules/users/{}/permissions", op_id),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let rows = body.as_array().expect("array");
    assert_eq!(rows.len(), 3);

    let create = rows.iter().find(|r| r["permission_key"] == "create").unwrap();
    assert_eq!(create["has_permission"], false);
    assert_eq!(create["source"], "override");

    let read = rows.iter().find(|r| r["permission_key"] == "read").unwrap();
    assert_eq!(read["has_permission"], true);
    assert_eq!(read["source"], "department");

    // Unknown user is a 404
    let (status, _) = request(
        &t.app,
        "GET",
        &format!("/modules/users/{}/permissions", Uuid::new_v4()),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn my_modules_lists_only_held_permissions() -> Result<()> {
    let t = setup().await?;
    let admin_dept = quality_department_id(&t.pool).await?;
    let op_dept = production_department_id(&t.pool).await?;
    let module_id = defects_module_id(&t.pool).await?;
    let create_perm = defects_permission_id(&t.pool, "create").await?;

    seed_user(&t.pool, "admin@plant.example", "password123", "admin", admin_dept).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", op_dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;
    let op_token = login(&t.app, "op@plant.example", "password123").await?;

    // Nothing granted yet
    let (status, body) = request(&t.app, "GET", "/modules/mine", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(0));

    request(
        &t.app,
        "POST",
        "/modules/departments/assign",
        Some(&admin_token),
        Some(json!({ "department_id": op_dept, "module_id": module_id })),
    )
    .await?;

    let op_id: String = sqlx::query_scalar("SELECT id FROM users WHERE email = 'op@plant.example'")
        .fetch_one(&t.pool)
        .await?;
    request(
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

    let (status, body) = request(&t.app, "GET", "/modules/mine", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let modules = body.as_array().expect("array");
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0]["module_key"], "quality_defects");
    let perms: Vec<&str> = modules[0]["permissions"]
        .as_array()
        .expect("permissions")
        .iter()
        .filter_map(|p| p.as_str())
        .collect();
    assert_eq!(perms, vec!["read", "stats"]);

    // Admin sees every active module with the full permission set
    let (status, body) = request(&t.app, "GET", "/modules/mine", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let modules = body.as_array().expect("array");
    assert_eq!(modules.len(), 1);
    assert_eq!(
        modules[0]["permissions"].as_array().map(Vec::len),
        Some(3)
    );

    Ok(())
}
