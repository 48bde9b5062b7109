use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::events::{self, actions, entities};
use crate::jwt::AuthUser;
use crate::models::shift::{CurrentShiftResponse, ShiftUpdateRequest, ShiftWindow};
use crate::shifts;

#[utoipa::path(
    get,
    path = "/shifts",
    tag = "Shifts",
    responses((status = 200, description = "Configured shift windows", body = Vec<ShiftWindow>)),
    security(("bearerAuth" = []))
)]
pub async fn list_shifts(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<ShiftWindow>>> {
    let windows = shifts::load_windows(&state.pool).await?;
    Ok(Json(windows))
}

#[utoipa::path(
    get,
    path = "/shifts/current",
    tag = "Shifts",
    responses((status = 200, description = "Shift covering the clock right now", body = CurrentShiftResponse)),
    security(("bearerAuth" = []))
)]
pub async fn current_shift_info(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<CurrentShiftResponse>> {
    let windows = shifts::load_windows(&state.pool).await?;
    let current = shifts::current_shift(&state.pool).await?;
    let shift_info = windows.into_iter().find(|w| w.shift_number == current);

    Ok(Json(CurrentShiftResponse {
        current_shift: current,
        shift_info,
    }))
}

#[utoipa::path(
    put,
    path = "/shifts/{shift_number}",
    tag = "Shifts",
    params(("shift_number" = i64, Path, description = "Shift number (1..3)")),
    request_body = ShiftUpdateRequest,
    responses(
        (status = 200, description = "Shift window updated", body = ShiftWindow),
        (status = 400, description = "Malformed start or end time"),
        (status = 404, description = "Shift not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_shift(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(shift_number): Path<i64>,
    Json(payload): Json<ShiftUpdateRequest>,
) -> AppResult<Json<ShiftWindow>> {
    auth.principal().require_admin()?;

    // Snapshot for the audit trail before the row changes.
    let old = shifts::load_windows(&state.pool)
        .await?
        .into_iter()
        .find(|w| w.shift_number == shift_number);

    let updated = shifts::update_window(&state.pool, shift_number, &payload).await?;

    events::record(
        &state.audit,
        Some(auth.user_id),
        actions::SHIFT_CONFIG_UPDATED,
        entities::SHIFT_CONFIG,
        Some(shift_number.to_string()),
        Some(json!({ "old": old, "new": updated })),
    );

    Ok(Json(updated))
}
