//! Audit journal queries. Read-only and admin-only; the journal itself is
//! written exclusively by the event listener.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::app::AppState;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::audit::{AuditLogView, AuditQuery, AuditStat, AuditStatsQuery};

#[utoipa::path(
    get,
    path = "/audit",
    tag = "Audit",
    responses(
        (status = 200, description = "Audit entries matching the filters, newest first", body = Vec<AuditLogView>),
        (status = 403, description = "Admin role required")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditLogView>>> {
    auth.principal().require_admin()?;

    validate_date_bounds(query.start_date.as_deref(), query.end_date.as_deref())?;
    if query.limit < 0 || query.offset < 0 {
        return Err(AppError::validation("limit and offset must not be negative"));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT al.id, al.user_id, al.action, al.entity_type, al.entity_id, al.details, \
           al.prev_hash, al.hash, al.created_at, \
           u.full_name AS user_name, u.email AS user_email \
         FROM audit_logs al \
         LEFT JOIN users u ON al.user_id = u.id \
         WHERE 1=1",
    );

    if let Some(start) = &query.start_date {
        qb.push(" AND al.created_at >= ").push_bind(start);
    }
    if let Some(end) = &query.end_date {
        // Inclusive upper bound on a date means anything before the next day.
        qb.push(" AND al.created_at < date(").push_bind(end).push(", '+1 day')");
    }
    if let Some(action) = &query.action {
        qb.push(" AND al.action = ").push_bind(action);
    }
    if let Some(entity_type) = &query.entity_type {
        qb.push(" AND al.entity_type = ").push_bind(entity_type);
    }
    if let Some(user_id) = query.user_id {
        qb.push(" AND al.user_id = ").push_bind(user_id.to_string());
    }

    qb.push(" ORDER BY al.created_at DESC LIMIT ")
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset);

    let rows = qb.build().fetch_all(&state.pool).await?;
    let entries = rows
        .iter()
        .map(row_parsers::audit_view_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/audit/{entity_type}/{entity_id}",
    tag = "Audit",
    params(
        ("entity_type" = String, Path, description = "Entity type, e.g. USER"),
        ("entity_id" = String, Path, description = "Entity ID")
    ),
    responses(
        (status = 200, description = "History for one entity, newest first", body = Vec<AuditLogView>),
        (status = 403, description = "Admin role required")
    ),
    security(("bearerAuth" = []))
)]
pub async fn audit_logs_by_entity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> AppResult<Json<Vec<AuditLogView>>> {
    auth.principal().require_admin()?;

    let rows = sqlx::query(
        "SELECT al.id, al.user_id, al.action, al.entity_type, al.entity_id, al.details, \
           al.prev_hash, al.hash, al.created_at, \
           u.full_name AS user_name, u.email AS user_email \
         FROM audit_logs al \
         LEFT JOIN users u ON al.user_id = u.id \
         WHERE al.entity_type = ? AND al.entity_id = ? \
         ORDER BY al.created_at DESC",
    )
    .bind(&entity_type)
    .bind(&entity_id)
    .fetch_all(&state.pool)
    .await?;

    let entries = rows
        .iter()
        .map(row_parsers::audit_view_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/audit/stats",
    tag = "Audit",
    responses(
        (status = 200, description = "Event counts per action and entity type", body = Vec<AuditStat>),
        (status = 403, description = "Admin role required")
    ),
    security(("bearerAuth" = []))
)]
pub async fn audit_stats(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<AuditStatsQuery>,
) -> AppResult<Json<Vec<AuditStat>>> {
    auth.principal().require_admin()?;

    validate_date_bounds(query.start_date.as_deref(), query.end_date.as_deref())?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT al.action, al.entity_type, COUNT(*) AS count, \
           COUNT(DISTINCT al.user_id) AS unique_users \
         FROM audit_logs al WHERE 1=1",
    );

    if let Some(start) = &query.start_date {
        qb.push(" AND al.created_at >= ").push_bind(start);
    }
    if let Some(end) = &query.end_date {
        qb.push(" AND al.created_at < date(").push_bind(end).push(", '+1 day')");
    }

    qb.push(" GROUP BY al.action, al.entity_type ORDER BY count DESC");

    let rows = qb.build().fetch_all(&state.pool).await?;
    let stats = rows
        .iter()
        .map(|row| {
            Ok(AuditStat {
                action: row
                    .try_get("action")
                    .map_err(|e| AppError::internal(format!("missing action: {}", e)))?,
                entity_type: row
                    .try_get("entity_type")
                    .map_err(|e| AppError::internal(format!("missing entity_type: {}", e)))?,
                count: row
                    .try_get("count")
                    .map_err(|e| AppError::internal(format!("missing count: {}", e)))?,
                unique_users: row
                    .try_get("unique_users")
                    .map_err(|e| AppError::internal(format!("missing unique_users: {}", e)))?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(Json(stats))
}

fn validate_date_bounds(start: Option<&str>, end: Option<&str>) -> AppResult<()> {
    for date in [start, end].into_iter().flatten() {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| AppError::validation(format!("invalid date: {date} (expected YYYY-MM-DD)")))?;
    }
    Ok(())
}
