//! Audit journal behavior: entries appear after gated mutations, the hash
//! chain links consecutive entries, and a broken sink never fails the
//! triggering operation.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};
use sqlx::SqlitePool;

mod common;
use common::{login, quality_department_id, request, seed_user, setup};

/// The listener persists asynchronously; poll briefly instead of sleeping a
/// fixed amount.
async fn wait_for_audit_rows(pool: &SqlitePool, action: &str, at_least: i64) -> Result<i64> {
    for _ in 0..25 {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE action = ?")
            .bind(action)
            .fetch_one(pool)
            .await?;
        if count >= at_least {
            return Ok(count);
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    }
    anyhow::bail!("timed out waiting for {at_least} '{action}' audit rows");
}

#[tokio::test]
async fn gated_mutations_are_journaled_with_details() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    let token = login(&t.app, "admin@plant.example", "password123").await?;

    let (status, created) = request(
        &t.app,
        "POST",
        "/users",
        Some(&token),
        Some(json!({
            "email": "new@plant.example",
            "password": "password123",
            "full_name": "New Operator",
            "role": "operator",
            "department_id": dept,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");

    wait_for_audit_rows(&t.pool, "USER_CREATED", 1).await?;

    // The admin listing surfaces the entry with actor details joined in
    let (status, body) = request(&t.app, "GET", "/audit?action=USER_CREATED", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let entries = body.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["entity_type"], "USER");
    assert_eq!(entries[0]["entity_id"], created["id"]);
    assert_eq!(entries[0]["user_email"], "admin@plant.example");
    assert_eq!(entries[0]["details"]["email"], "new@plant.example");

    // Per-entity history includes the same event
    let uri = format!("/audit/USER/{}", created["id"].as_str().unwrap());
    let (status, body) = request(&t.app, "GET", &uri, Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    Ok(())
}

#[tokio::test]
async fn entries_chain_hashes_in_order() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;

    // Three logins -> three journal entries
    for _ in 0..3 {
        login(&t.app, "admin@plant.example", "password123").await?;
    }
    wait_for_audit_rows(&t.pool, "USER_LOGIN", 3).await?;

    let rows: Vec<(Option<String>, String)> =
        sqlx::query_as("SELECT prev_hash, hash FROM audit_logs ORDER BY created_at, id")
            .fetch_all(&t.pool)
            .await?;
    assert!(rows.len() >= 3);

    assert_eq!(rows[0].0, None, "first entry is unchained");
    for pair in rows.windows(2) {
        assert_eq!(
            pair[1].0.as_deref(),
            Some(pair[0].1.as_str()),
            "each entry must chain on its predecessor"
        );
    }

    Ok(())
}

#[tokio::test]
async fn broken_audit_sink_does_not_fail_the_mutation() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    let token = login(&t.app, "admin@plant.example", "password123").await?;

    // Break every future journal write.
    sqlx::query("DROP TABLE audit_logs").execute(&t.pool).await?;

    let (status, body) = request(
        &t.app,
        "POST",
        "/users",
        Some(&token),
        Some(json!({
            "email": "survivor@plant.example",
            "password": "password123",
            "full_name": "Survivor",
            "role": "quality",
            "department_id": dept,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["email"], "survivor@plant.example");

    // The user really exists despite the dead sink
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = 'survivor@plant.example'")
            .fetch_one(&t.pool)
            .await?;
    assert_eq!(count, 1);

    Ok(())
}

#[tokio::test]
async fn audit_queries_are_admin_only_and_validated() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;
    let op_token = login(&t.app, "op@plant.example", "password123").await?;

    let (status, _) = request(&t.app, "GET", "/audit", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = request(&t.app, "GET", "/audit/stats", Some(&op_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &t.app,
        "GET",
        "/audit?start_date=yesterday",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    wait_for_audit_rows(&t.pool, "USER_LOGIN", 2).await?;
    let (status, body) = request(&t.app, "GET", "/audit/stats", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let stats = body.as_array().expect("array");
    let login_stat = stats
        .iter()
        .find(|s| s["action"] == "USER_LOGIN")
        .expect("USER_LOGIN stat");
    assert_eq!(login_stat["count"], 2);
    assert_eq!(login_stat["unique_users"], 2);

    // Filtering by user narrows the listing
    let op_id: String = sqlx::query_scalar("SELECT id FROM users WHERE email = 'op@plant.example'")
        .fetch_one(&t.pool)
        .await?;
    let (status, body) = request(
        &t.app,
        "GET",
        &format!("/audit?user_id={}", op_id),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().expect("array");
    assert!(!entries.is_empty());
    assert!(entries
        .iter()
        .all(|e| e["user_id"] == Value::String(op_id.clone())));

    Ok(())
}
