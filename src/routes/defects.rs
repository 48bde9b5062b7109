//! Defect record endpoints, gated through the authorization module: every
//! route needs `quality_defects` module access, and each operation its own
//! permission. Records are append-only.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Local, NaiveDate, Timelike};
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{module_keys, permission_keys, require_access};
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::events::{self, actions, entities};
use crate::jwt::AuthUser;
use crate::models::defect::{
    AllRecordsQuery, Area, CreateDefectRecordRequest, DefectRecord, DefectRecordView, DefectStat,
    DefectType, MyRecordsQuery, StatsQuery,
};
use crate::shifts;
use crate::utils::utc_now;

#[utoipa::path(
    post,
    path = "/defects",
    tag = "Defects",
    request_body = CreateDefectRecordRequest,
    responses(
        (status = 201, description = "Record created with its shift stamp", body = DefectRecord),
        (status = 400, description = "Invalid area or negative pairs"),
        (status = 403, description = "Missing module access or create permission"),
        (status = 404, description = "Defect type not found or inactive")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_defect_record(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateDefectRecordRequest>,
) -> AppResult<(StatusCode, Json<DefectRecord>)> {
    require_access(
        &state.access,
        Some(&auth.principal()),
        module_keys::QUALITY_DEFECTS,
        Some(permission_keys::CREATE),
    )
    .await?;

    let area: Area = payload.area.parse()?;
    if payload.rejected_pairs < 0 {
        return Err(AppError::validation("rejected pairs cannot be negative"));
    }

    let defect_type_active: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM defect_types WHERE id = ? AND is_active = 1",
    )
    .bind(payload.defect_type_id)
    .fetch_one(&state.pool)
    .await?;
    if defect_type_active == 0 {
        return Err(AppError::not_found("defect type not found or inactive"));
    }

    // Stamp from the wall clock; the shift number is derived once, here, and
    // never recomputed.
    let now = Local::now();
    let record_date = now.format("%Y-%m-%d").to_string();
    let record_time = now.format("%H:%M:%S").to_string();

    let windows = shifts::load_windows(&state.pool).await?;
    let shift_number = shifts::resolve_shift(now.hour() * 60 + now.minute(), &windows)?;

    let id = Uuid::new_v4();
    let created_at = utc_now();

    sqlx::query(
        "INSERT INTO defect_records (id, user_id, area, defect_type_id, rejected_pairs, shift_number, record_date, record_time, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(auth.user_id.to_string())
    .bind(area.as_str())
    .bind(payload.defect_type_id)
    .bind(payload.rejected_pairs)
    .bind(shift_number)
    .bind(&record_date)
    .bind(&record_time)
    .bind(&payload.notes)
    .bind(created_at.to_rfc3339())
    .execute(&state.pool)
    .await?;

    let record = DefectRecord {
        id,
        user_id: auth.user_id,
        area,
        defect_type_id: payload.defect_type_id,
        rejected_pairs: payload.rejected_pairs,
        shift_number,
        record_date,
        record_time,
        notes: payload.notes,
        created_at,
    };

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::DEFECT_RECORD_CREATED,
        entities::DEFECT_RECORD,
        Some(id.to_string()),
        Some(json!({
            "area": record.area,
            "defect_type_id": record.defect_type_id,
            "rejected_pairs": record.rejected_pairs,
            "shift_number": record.shift_number,
        })),
    );

    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/defects/my-records",
    tag = "Defects",
    responses(
        (status = 200, description = "The caller's records, newest first", body = Vec<DefectRecordView>),
        (status = 403, description = "Missing module access or read permission")
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_records(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<MyRecordsQuery>,
) -> AppResult<Json<Vec<DefectRecordView>>> {
    require_access(
        &state.access,
        Some(&auth.principal()),
        module_keys::QUALITY_DEFECTS,
        Some(permission_keys::READ),
    )
    .await?;

    validate_date_bounds(query.start_date.as_deref(), query.end_date.as_deref())?;
    validate_page(query.limit, query.offset)?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT dr.id, dr.user_id, dr.area, dr.defect_type_id, dr.rejected_pairs, dr.shift_number, \
           dr.record_date, dr.record_time, dr.notes, dr.created_at, \
           dt.defect_name, u.full_name AS recorded_by \
         FROM defect_records dr \
         JOIN defect_types dt ON dr.defect_type_id = dt.id \
         JOIN users u ON dr.user_id = u.id \
         WHERE dr.user_id = ",
    );
    qb.push_bind(auth.user_id.to_string());

    if let Some(start) = &query.start_date {
        qb.push(" AND dr.record_date >= ").push_bind(start);
    }
    if let Some(end) = &query.end_date {
        qb.push(" AND dr.record_date <= ").push_bind(end);
    }

    qb.push(" ORDER BY dr.record_date DESC, dr.record_time DESC LIMIT ")
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset);

    let rows = qb.build().fetch_all(&state.pool).await?;
    let records = rows
        .iter()
        .map(row_parsers::defect_record_view_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(records))
}

#[utoipa::path(
    get,
    path = "/defects/all",
    tag = "Defects",
    responses(
        (status = 200, description = "All records matching the filters", body = Vec<DefectRecordView>),
        (status = 403, description = "Missing module access or read permission")
    ),
    security(("bearerAuth" = []))
)]
pub async fn all_records(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<AllRecordsQuery>,
) -> AppResult<Json<Vec<DefectRecordView>>> {
    require_access(
        &state.access,
        Some(&auth.principal()),
        module_keys::QUALITY_DEFECTS,
        Some(permission_keys::READ),
    )
    .await?;

    validate_date_bounds(query.start_date.as_deref(), query.end_date.as_deref())?;
    validate_page(query.limit, query.offset)?;
    let area = query.area.as_deref().map(str::parse::<Area>).transpose()?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT dr.id, dr.user_id, dr.area, dr.defect_type_id, dr.rejected_pairs, dr.shift_number, \
           dr.record_date, dr.record_time, dr.notes, dr.created_at, \
           dt.defect_name, u.full_name AS recorded_by \
         FROM defect_records dr \
         JOIN defect_types dt ON dr.defect_type_id = dt.id \
         JOIN users u ON dr.user_id = u.id \
         WHERE 1=1",
    );

    if let Some(start) = &query.start_date {
        qb.push(" AND dr.record_date >= ").push_bind(start);
    }
    if let Some(end) = &query.end_date {
        qb.push(" AND dr.record_date <= ").push_bind(end);
    }
    if let Some(area) = area {
        qb.push(" AND dr.area = ").push_bind(area.as_str());
    }
    if let Some(shift) = query.shift {
        qb.push(" AND dr.shift_number = ").push_bind(shift);
    }

    qb.push(" ORDER BY dr.record_date DESC, dr.record_time DESC LIMIT ")
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset);

    let rows = qb.build().fetch_all(&state.pool).await?;
    let records = rows
        .iter()
        .map(row_parsers::defect_record_view_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(records))
}

#[utoipa::path(
    get,
    path = "/defects/types",
    tag = "Defects",
    responses(
        (status = 200, description = "Active defect catalog", body = Vec<DefectType>),
        (status = 403, description = "Missing module access")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_defect_types(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<DefectType>>> {
    require_access(
        &state.access,
        Some(&auth.principal()),
        module_keys::QUALITY_DEFECTS,
        None,
    )
    .await?;

    let rows = sqlx::query(
        "SELECT id, defect_name, is_active, created_at FROM defect_types \
         WHERE is_active = 1 ORDER BY defect_name",
    )
    .fetch_all(&state.pool)
    .await?;

    let types = rows
        .iter()
        .map(row_parsers::defect_type_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(types))
}

#[utoipa::path(
    get,
    path = "/defects/stats",
    tag = "Defects",
    responses(
        (status = 200, description = "Occurrences and rejected pairs per defect and area", body = Vec<DefectStat>),
        (status = 403, description = "Missing module access or stats permission")
    ),
    security(("bearerAuth" = []))
)]
pub async fn defect_stats(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<Vec<DefectStat>>> {
    require_access(
        &state.access,
        Some(&auth.principal()),
        module_keys::QUALITY_DEFECTS,
        Some(permission_keys::STATS),
    )
    .await?;

    validate_date_bounds(query.start_date.as_deref(), query.end_date.as_deref())?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT dt.defect_name, dr.area, COUNT(dr.id) AS occurrences, \
           SUM(dr.rejected_pairs) AS total_rejected_pairs \
         FROM defect_records dr \
         JOIN defect_types dt ON dr.defect_type_id = dt.id \
         WHERE 1=1",
    );

    if let Some(start) = &query.start_date {
        qb.push(" AND dr.record_date >= ").push_bind(start);
    }
    if let Some(end) = &query.end_date {
        qb.push(" AND dr.record_date <= ").push_bind(end);
    }

    qb.push(" GROUP BY dt.defect_name, dr.area ORDER BY total_rejected_pairs DESC");

    let rows = qb.build().fetch_all(&state.pool).await?;
    let stats = rows
        .iter()
        .map(|row| {
            use sqlx::Row;

            let area: Area = row
                .try_get::<String, _>("area")
                .map_err(|e| AppError::internal(format!("missing area: {}", e)))?
                .parse()
                .map_err(|_| AppError::internal("invalid area stored for defect record".to_string()))?;

            Ok(DefectStat {
                defect_name: row
                    .try_get("defect_name")
                    .map_err(|e| AppError::internal(format!("missing defect_name: {}", e)))?,
                area,
                occurrences: row
                    .try_get("occurrences")
                    .map_err(|e| AppError::internal(format!("missing occurrences: {}", e)))?,
                total_rejected_pairs: row
                    .try_get("total_rejected_pairs")
                    .map_err(|e| AppError::internal(format!("missing total_rejected_pairs: {}", e)))?,
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

fn validate_page(limit: i64, offset: i64) -> AppResult<()> {
    if limit < 0 || offset < 0 {
        return Err(AppError::validation("limit and offset must not be negative"));
    }
    Ok(())
}
