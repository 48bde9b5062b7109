//! Operational CLI: migrations plus admin-account bootstrap, for first-run
//! setup and lockout recovery.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use qualtrack::models::user::Role;
use qualtrack::utils::hash_password;

#[derive(Parser, Debug)]
#[command(author, version, about = "qualtrack admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Create an admin account (and its department if missing)
    CreateAdmin {
        email: String,
        password: String,
        #[arg(long, default_value = "Admin User")]
        full_name: String,
        #[arg(long, default_value = "Quality")]
        department: String,
    },
    /// Reset an existing admin's password
    ResetAdminPassword { email: String, password: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            get_migrator().await?.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::CreateAdmin {
            email,
            password,
            full_name,
            department,
        } => {
            let pool = get_pool().await?;
            create_admin(&pool, &email, &password, &full_name, &department).await?;
            println!("Admin account created: {}", email.to_lowercase());
        }
        Commands::ResetAdminPassword { email, password } => {
            let pool = get_pool().await?;
            reset_admin_password(&pool, &email, &password).await?;
            println!("Password reset for {}", email.to_lowercase());
        }
    }

    Ok(())
}

async fn create_admin(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    full_name: &str,
    department: &str,
) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    anyhow::ensure!(existing == 0, "a user with email {} already exists", email);

    let department_id = match sqlx::query_scalar::<_, String>("SELECT id FROM departments WHERE name = ?")
        .bind(department)
        .fetch_optional(pool)
        .await?
    {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query("INSERT INTO departments (id, name, created_at) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(department)
                .bind(Utc::now().to_rfc3339())
                .execute(pool)
                .await?;
            id
        }
    };

    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, full_name, role, department_id, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&email)
    .bind(password_hash)
    .bind(full_name)
    .bind(Role::Admin.as_str())
    .bind(department_id)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

async fn reset_admin_password(pool: &SqlitePool, email: &str, password: &str) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE email = ? AND role = 'admin'")
        .bind(password_hash)
        .bind(Utc::now().to_rfc3339())
        .bind(&email)
        .execute(pool)
        .await?;

    anyhow::ensure!(result.rows_affected() > 0, "no admin account with email {}", email);

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when running from the repo root; fall back to the
    // crate-local folder for container deployments with a different CWD.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", display))
}
