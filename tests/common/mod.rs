//! Shared setup for the API tests: tempfile-backed SQLite, migrations, and
//! request helpers that drive the router in-process via `oneshot`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use qualtrack::create_app;
use qualtrack::utils::hash_password;

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    // Keeps the database file alive for the duration of the test.
    _dir: TempDir,
}

pub async fn setup() -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp {
        app,
        pool,
        _dir: dir,
    })
}

/// ID of the seeded "Quality" department.
pub async fn quality_department_id(pool: &SqlitePool) -> Result<Uuid> {
    let id: String = sqlx::query_scalar("SELECT id FROM departments WHERE name = 'Quality'")
        .fetch_one(pool)
        .await?;
    Ok(Uuid::parse_str(&id)?)
}

/// ID of the seeded "quality_defects" module.
pub async fn defects_module_id(pool: &SqlitePool) -> Result<Uuid> {
    let id: String =
        sqlx::query_scalar("SELECT id FROM modules WHERE module_key = 'quality_defects'")
            .fetch_one(pool)
            .await?;
    Ok(Uuid::parse_str(&id)?)
}

/// ID of one of the seeded permissions on the defects module.
pub async fn defects_permission_id(pool: &SqlitePool, permission_key: &str) -> Result<Uuid> {
    let module_id = defects_module_id(pool).await?;
    let id: String = sqlx::query_scalar(
        "SELECT id FROM module_permissions WHERE module_id = ? AND permission_key = ?",
    )
    .bind(module_id.to_string())
    .bind(permission_key)
    .fetch_one(pool)
    .await?;
    Ok(Uuid::parse_str(&id)?)
}

/// Insert a user directly; accounts are admin-managed, so tests seed them at
/// the store level and then log in through the API.
pub async fn seed_user(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    role: &str,
    department_id: Uuid,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, full_name, role, department_id, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(password_hash)
    .bind("Test User")
    .bind(role)
    .bind(department_id.to_string())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn login(app: &Router, email: &str, password: &str) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::OK, "login failed: {status} {body}");

    body.get("token")
        .and_then(|v| v.as_str())
        .map(String::from)
        .context("missing token in login response")
}

/// One request through the router; returns status plus parsed JSON body
/// (null when the response has no body).
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    payload: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let req = match payload {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    Ok((status, value))
}
