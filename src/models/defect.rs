use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

/// Production area a defect was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Area {
    #[serde(rename = "machine-packing")]
    MachinePacking,
    #[serde(rename = "digital-printing")]
    DigitalPrinting,
}

impl Area {
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::MachinePacking => "machine-packing",
            Area::DigitalPrinting => "digital-printing",
        }
    }
}

impl FromStr for Area {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "machine-packing" => Ok(Area::MachinePacking),
            "digital-printing" => Ok(Area::DigitalPrinting),
            other => Err(AppError::validation(format!("invalid area: {other}"))),
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of rejected pairs; the shift number is stamped from the
/// wall clock at creation and never recomputed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DefectRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub area: Area,
    pub defect_type_id: i64,
    pub rejected_pairs: i64,
    pub shift_number: i64,
    #[schema(example = "2026-08-07")]
    pub record_date: String,
    #[schema(example = "13:45:09")]
    pub record_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Record joined with catalog and reporter details for listings.
#[derive(Debug, Serialize, ToSchema)]
pub struct DefectRecordView {
    #[serde(flatten)]
    pub record: DefectRecord,
    pub defect_name: String,
    pub recorded_by: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDefectRecordRequest {
    #[schema(example = "machine-packing")]
    pub area: String,
    pub defect_type_id: i64,
    pub rejected_pairs: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DefectType {
    pub id: i64,
    pub defect_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_my_limit() -> i64 {
    50
}

fn default_all_limit() -> i64 {
    100
}

/// Filters for the caller's own records. Date bounds are inclusive.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MyRecordsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default = "default_my_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Filters for the plant-wide listing. Area and shift are exact matches.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AllRecordsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub area: Option<String>,
    pub shift: Option<i64>,
    #[serde(default = "default_all_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DefectStat {
    pub defect_name: String,
    pub area: Area,
    pub occurrences: i64,
    pub total_rejected_pairs: i64,
}
