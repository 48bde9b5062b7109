//! Audit journal.
//!
//! Handlers publish events onto a broadcast bus and move on; a spawned
//! listener persists them into `audit_logs`, chaining each entry to its
//! predecessor with a SHA-256 hash. Neither a missing listener nor a failed
//! insert ever fails the operation that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Audit action names
pub mod actions {
    pub const USER_CREATED: &str = "USER_CREATED";
    pub const USER_UPDATED: &str = "USER_UPDATED";
    pub const USER_DELETED: &str = "USER_DELETED";
    pub const USER_LOGIN: &str = "USER_LOGIN";
    pub const USER_LOGOUT: &str = "USER_LOGOUT";
    pub const PASSWORD_CHANGED: &str = "PASSWORD_CHANGED";
    pub const PASSWORD_RESET_BY_ADMIN: &str = "PASSWORD_RESET_BY_ADMIN";

    pub const DEFECT_RECORD_CREATED: &str = "DEFECT_RECORD_CREATED";
    pub const SHIFT_CONFIG_UPDATED: &str = "SHIFT_CONFIG_UPDATED";

    pub const MODULE_CREATED: &str = "MODULE_CREATED";
    pub const PERMISSION_CREATED: &str = "PERMISSION_CREATED";
    pub const MODULE_ASSIGNED_TO_DEPARTMENT: &str = "MODULE_ASSIGNED_TO_DEPARTMENT";
    pub const MODULE_REVOKED_FROM_DEPARTMENT: &str = "MODULE_REVOKED_FROM_DEPARTMENT";
    pub const PERMISSION_GRANTED: &str = "PERMISSION_GRANTED";
}

/// Audit entity types
pub mod entities {
    pub const USER: &str = "USER";
    pub const DEFECT_RECORD: &str = "DEFECT_RECORD";
    pub const SHIFT_CONFIG: &str = "SHIFT_CONFIG";
    pub const MODULE: &str = "MODULE";
    pub const MODULE_PERMISSION: &str = "MODULE_PERMISSION";
    pub const DEPARTMENT_MODULE: &str = "DEPARTMENT_MODULE";
    pub const USER_PERMISSION: &str = "USER_PERMISSION";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

pub type AuditBus = broadcast::Sender<AuditEvent>;

pub fn init_audit_bus() -> (AuditBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Fire and forget. A send only fails when no listener is alive; the event
/// is dropped with a warning and the caller proceeds normally.
pub fn record(
    bus: &AuditBus,
    user_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<String>,
    details: Option<Value>,
) {
    let event = AuditEvent {
        id: Uuid::new_v4(),
        user_id,
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        details,
        occurred_at: Utc::now(),
    };

    if bus.send(event).is_err() {
        tracing::warn!(action = %action, "audit listener not running; event dropped");
    }
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");

    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = persist_event(&pool, &event).await {
                    tracing::error!(action = %event.action, "failed to save audit log: {}", e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "audit listener lagged; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    tracing::info!("audit listener stopped");
}

async fn persist_event(pool: &SqlitePool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    // Chain on the latest stored hash; a read failure degrades to an
    // unchained entry rather than losing the event.
    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM audit_logs ORDER BY created_at DESC, id DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .ok()
            .flatten();

    let payload = serde_json::to_string(event).unwrap_or_default();
    let mut hasher = Sha256::new();
    if let Some(ref prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let details = event
        .details
        .as_ref()
        .map(|d| serde_json::to_string(d).unwrap_or_default());

    sqlx::query(
        "INSERT INTO audit_logs (id, user_id, action, entity_type, entity_id, details, prev_hash, hash, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(event.user_id.map(|u| u.to_string()))
    .bind(&event.action)
    .bind(&event.entity_type)
    .bind(&event.entity_id)
    .bind(details)
    .bind(prev_hash)
    .bind(hash)
    .bind(event.occurred_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}
