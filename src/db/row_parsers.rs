//! Manual SqliteRow -> model mapping.
//!
//! UUIDs are stored as canonical lowercase TEXT and timestamps as TEXT in
//! whatever format SQLite produced them (RFC3339 from bound values,
//! "YYYY-MM-DD HH:MM:SS" from `datetime('now')` seeds), so every read goes
//! through the tolerant parsers here.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::{AuditLogEntry, AuditLogView};
use crate::models::defect::{Area, DefectRecord, DefectRecordView, DefectType};
use crate::models::module::{
    Department, DepartmentModuleGrant, Module, ModulePermission, UserPermissionOverride,
};
use crate::models::shift::ShiftWindow;
use crate::models::user::{DbUser, Role};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn get_string(row: &SqliteRow, column: &str) -> Result<String, AppError> {
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn get_opt_string(row: &SqliteRow, column: &str) -> Result<Option<String>, AppError> {
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn get_i64(row: &SqliteRow, column: &str) -> Result<i64, AppError> {
    row.try_get(column)
        .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

fn get_bool(row: &SqliteRow, column: &str) -> Result<bool, AppError> {
    get_i64(row, column).map(|v| v != 0)
}

fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, AppError> {
    let raw = get_string(row, column)?;
    Uuid::parse_str(&raw).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", column, e)))
}

fn get_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, AppError> {
    match get_opt_string(row, column)? {
        Some(s) => Uuid::parse_str(&s)
            .map(Some)
            .map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", column, e))),
        None => Ok(None),
    }
}

fn get_datetime(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, AppError> {
    parse_datetime(&get_string(row, column)?)
}

fn get_opt_datetime(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    match get_opt_string(row, column)? {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    let role: Role = get_string(row, "role")?
        .parse()
        .map_err(|_| AppError::internal("invalid role stored for user".to_string()))?;

    Ok(DbUser {
        id: get_uuid(row, "id")?,
        email: get_string(row, "email")?,
        password_hash: get_string(row, "password_hash")?,
        full_name: get_string(row, "full_name")?,
        role,
        department_id: get_uuid(row, "department_id")?,
        is_active: get_bool(row, "is_active")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
        last_login: get_opt_datetime(row, "last_login")?,
    })
}

pub fn module_from_row(row: &SqliteRow) -> Result<Module, AppError> {
    Ok(Module {
        id: get_uuid(row, "id")?,
        module_key: get_string(row, "module_key")?,
        module_name: get_string(row, "module_name")?,
        description: get_opt_string(row, "description")?,
        icon: get_opt_string(row, "icon")?,
        is_active: get_bool(row, "is_active")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub fn department_from_row(row: &SqliteRow) -> Result<Department, AppError> {
    Ok(Department {
        id: get_uuid(row, "id")?,
        name: get_string(row, "name")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

pub fn module_permission_from_row(row: &SqliteRow) -> Result<ModulePermission, AppError> {
    Ok(ModulePermission {
        id: get_uuid(row, "id")?,
        module_id: get_uuid(row, "module_id")?,
        permission_key: get_string(row, "permission_key")?,
        permission_name: get_string(row, "permission_name")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

pub fn department_module_grant_from_row(row: &SqliteRow) -> Result<DepartmentModuleGrant, AppError> {
    Ok(DepartmentModuleGrant {
        department_id: get_uuid(row, "department_id")?,
        module_id: get_uuid(row, "module_id")?,
        has_access: get_bool(row, "has_access")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub fn user_permission_override_from_row(row: &SqliteRow) -> Result<UserPermissionOverride, AppError> {
    Ok(UserPermissionOverride {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        module_id: get_uuid(row, "module_id")?,
        permission_id: get_uuid(row, "permission_id")?,
        granted: get_bool(row, "granted")?,
        granted_by: get_opt_uuid(row, "granted_by")?,
        granted_at: get_datetime(row, "granted_at")?,
    })
}

pub fn shift_window_from_row(row: &SqliteRow) -> Result<ShiftWindow, AppError> {
    Ok(ShiftWindow {
        id: get_i64(row, "id")?,
        shift_number: get_i64(row, "shift_number")?,
        start_time: get_string(row, "start_time")?,
        end_time: get_string(row, "end_time")?,
        description: get_opt_string(row, "description")?,
        created_at: get_datetime(row, "created_at")?,
        updated_at: get_datetime(row, "updated_at")?,
    })
}

pub fn defect_type_from_row(row: &SqliteRow) -> Result<DefectType, AppError> {
    Ok(DefectType {
        id: get_i64(row, "id")?,
        defect_name: get_string(row, "defect_name")?,
        is_active: get_bool(row, "is_active")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

pub fn defect_record_from_row(row: &SqliteRow) -> Result<DefectRecord, AppError> {
    let area: Area = get_string(row, "area")?
        .parse()
        .map_err(|_| AppError::internal("invalid area stored for defect record".to_string()))?;

    Ok(DefectRecord {
        id: get_uuid(row, "id")?,
        user_id: get_uuid(row, "user_id")?,
        area,
        defect_type_id: get_i64(row, "defect_type_id")?,
        rejected_pairs: get_i64(row, "rejected_pairs")?,
        shift_number: get_i64(row, "shift_number")?,
        record_date: get_string(row, "record_date")?,
        record_time: get_string(row, "record_time")?,
        notes: get_opt_string(row, "notes")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

pub fn defect_record_view_from_row(row: &SqliteRow) -> Result<DefectRecordView, AppError> {
    Ok(DefectRecordView {
        record: defect_record_from_row(row)?,
        defect_name: get_string(row, "defect_name")?,
        recorded_by: get_string(row, "recorded_by")?,
    })
}

pub fn audit_entry_from_row(row: &SqliteRow) -> Result<AuditLogEntry, AppError> {
    let details = match get_opt_string(row, "details")? {
        Some(raw) => Some(
            serde_json::from_str::<Value>(&raw)
                .map_err(|e| AppError::internal(format!("invalid audit details json: {}", e)))?,
        ),
        None => None,
    };

    Ok(AuditLogEntry {
        id: get_uuid(row, "id")?,
        user_id: get_opt_uuid(row, "user_id")?,
        action: get_string(row, "action")?,
        entity_type: get_string(row, "entity_type")?,
        entity_id: get_opt_string(row, "entity_id")?,
        details,
        prev_hash: get_opt_string(row, "prev_hash")?,
        hash: get_string(row, "hash")?,
        created_at: get_datetime(row, "created_at")?,
    })
}

pub fn audit_view_from_row(row: &SqliteRow) -> Result<AuditLogView, AppError> {
    Ok(AuditLogView {
        entry: audit_entry_from_row(row)?,
        user_name: get_opt_string(row, "user_name")?,
        user_email: get_opt_string(row, "user_email")?,
    })
}
