//! Shift window configuration endpoints.

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

mod common;
use common::{login, quality_department_id, request, seed_user, setup};

#[tokio::test]
async fn windows_are_listed_and_current_shift_resolves() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", dept).await?;
    let token = login(&t.app, "op@plant.example", "password123").await?;

    // Any authenticated user may read the schedule
    let (status, body) = request(&t.app, "GET", "/shifts", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    let windows = body.as_array().expect("array");
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[0]["shift_number"], 1);
    assert_eq!(windows[0]["start_time"], "06:00");
    assert_eq!(windows[2]["end_time"], "06:00");

    // The seeded windows cover the whole day, so "current" always resolves
    let (status, body) = request(&t.app, "GET", "/shifts/current", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let current = body["current_shift"].as_i64().expect("current_shift");
    assert!((1..=3).contains(&current));
    assert_eq!(body["shift_info"]["shift_number"], current);

    Ok(())
}

#[tokio::test]
async fn update_validates_times_and_requires_admin() -> Result<()> {
    let t = setup().await?;
    let dept = quality_department_id(&t.pool).await?;
    seed_user(&t.pool, "admin@plant.example", "password123", "admin", dept).await?;
    seed_user(&t.pool, "op@plant.example", "password123", "operator", dept).await?;
    let admin_token = login(&t.app, "admin@plant.example", "password123").await?;
    let op_token = login(&t.app, "op@plant.example", "password123").await?;

    // Non-admin cannot edit the schedule
    let (status, _) = request(
        &t.app,
        "PUT",
        "/shifts/1",
        Some(&op_token),
        Some(json!({ "start_time": "05:00", "end_time": "13:00" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Malformed times never reach the store
    for bad in ["25:00", "12:60", "noon", "12.30"] {
        let (status, body) = request(
            &t.app,
            "PUT",
            "/shifts/1",
            Some(&admin_token),
            Some(json!({ "start_time": bad, "end_time": "13:00" })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad} accepted: {body}");
    }
    let (status, body) = request(&t.app, "GET", "/shifts", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["start_time"], "06:00", "window must be unchanged");

    // Unknown shift number
    let (status, _) = request(
        &t.app,
        "PUT",
        "/shifts/9",
        Some(&admin_token),
        Some(json!({ "start_time": "05:00", "end_time": "13:00" })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Valid edit persists, seconds accepted
    let (status, body) = request(
        &t.app,
        "PUT",
        "/shifts/1",
        Some(&admin_token),
        Some(json!({
            "start_time": "05:30",
            "end_time": "13:30:00",
            "description": "Early shift",
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["start_time"], "05:30");
    assert_eq!(body["description"], "Early shift");

    let (status, body) = request(&t.app, "GET", "/shifts", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["start_time"], "05:30");

    Ok(())
}
