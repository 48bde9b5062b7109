use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One of the three configured daily time windows. Windows may wrap past
/// midnight (`start_time >= end_time`). Edited by admins, never created or
/// deleted at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShiftWindow {
    pub id: i64,
    pub shift_number: i64,
    #[schema(example = "06:00")]
    pub start_time: String,
    #[schema(example = "14:00")]
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ShiftUpdateRequest {
    #[schema(example = "22:00")]
    pub start_time: String,
    #[schema(example = "06:00")]
    pub end_time: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentShiftResponse {
    pub current_shift: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift_info: Option<ShiftWindow>,
}
