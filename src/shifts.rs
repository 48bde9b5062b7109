//! Shift window resolution.
//!
//! Maps a clock time to a shift number over the configured window table.
//! Windows may wrap past midnight; the first matching window in
//! configuration order wins.

use chrono::{Local, Timelike, Utc};
use sqlx::SqlitePool;

use crate::db::row_parsers;
use crate::errors::AppError;
use crate::models::shift::{ShiftUpdateRequest, ShiftWindow};

/// Parse "HH:MM" or "HH:MM:SS" into minutes since midnight. Hours and
/// minutes are parsed independently; seconds never participate in
/// resolution.
pub fn minutes_since_midnight(time: &str) -> Result<u32, AppError> {
    let mut parts = time.trim().split(':');

    let hours: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| AppError::validation(format!("invalid time format: {time}")))?;
    let minutes: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| AppError::validation(format!("invalid time format: {time}")))?;

    if hours > 23 || minutes > 59 {
        return Err(AppError::validation(format!("invalid time format: {time}")));
    }

    Ok(hours * 60 + minutes)
}

/// Resolve a clock time (minutes since midnight) against the windows in
/// their configured order.
///
/// A window with `start < end` matches `start <= t < end`; one with
/// `start >= end` wraps midnight and matches `t >= start || t < end`. When
/// the table has gaps and nothing matches, the first window is returned as
/// a lenient default. Only an empty table is an error.
pub fn resolve_shift(clock: u32, windows: &[ShiftWindow]) -> Result<i64, AppError> {
    if windows.is_empty() {
        return Err(AppError::configuration("no shift windows configured"));
    }

    for window in windows {
        let start = window_minutes(&window.start_time, window.shift_number)?;
        let end = window_minutes(&window.end_time, window.shift_number)?;

        if start < end {
            if clock >= start && clock < end {
                return Ok(window.shift_number);
            }
        } else if clock >= start || clock < end {
            return Ok(window.shift_number);
        }
    }

    Ok(windows[0].shift_number)
}

fn window_minutes(time: &str, shift_number: i64) -> Result<u32, AppError> {
    minutes_since_midnight(time).map_err(|_| {
        AppError::configuration(format!("shift {shift_number} has a malformed time: {time}"))
    })
}

/// Windows in shift-number order, the configuration order for this domain.
pub async fn load_windows(pool: &SqlitePool) -> Result<Vec<ShiftWindow>, AppError> {
    let rows = sqlx::query(
        "SELECT id, shift_number, start_time, end_time, description, created_at, updated_at \
         FROM shift_config ORDER BY shift_number",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_parsers::shift_window_from_row).collect()
}

/// The shift covering the wall clock right now (server local time, the same
/// clock defect records are stamped with).
pub async fn current_shift(pool: &SqlitePool) -> Result<i64, AppError> {
    let windows = load_windows(pool).await?;
    let now = Local::now();
    resolve_shift(now.hour() * 60 + now.minute(), &windows)
}

/// Admin edit of one window. Times are validated before the store is
/// touched; an unknown shift number is a not-found, never an insert.
pub async fn update_window(
    pool: &SqlitePool,
    shift_number: i64,
    req: &ShiftUpdateRequest,
) -> Result<ShiftWindow, AppError> {
    minutes_since_midnight(&req.start_time)?;
    minutes_since_midnight(&req.end_time)?;

    let result = sqlx::query(
        "UPDATE shift_config SET start_time = ?, end_time = ?, description = ?, updated_at = ? \
         WHERE shift_number = ?",
    )
    .bind(&req.start_time)
    .bind(&req.end_time)
    .bind(&req.description)
    .bind(Utc::now().to_rfc3339())
    .bind(shift_number)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("shift {shift_number} not found")));
    }

    let row = sqlx::query(
        "SELECT id, shift_number, start_time, end_time, description, created_at, updated_at \
         FROM shift_config WHERE shift_number = ?",
    )
    .bind(shift_number)
    .fetch_one(pool)
    .await?;

    row_parsers::shift_window_from_row(&row)
}
