use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::entities::glucose_reading_entity as readings;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogGlucoseRequest {
    #[schema(example = 112)]
    pub value_mg_dl: i32,
    pub measured_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReadingResponse {
    pub id: i64,
    pub value_mg_dl: i32,
    pub measured_at: DateTime<Utc>,
    pub source: String,
    pub note: Option<String>,
}

impl From<readings::Model> for GlucoseReadingResponse {
    fn from(m: readings::Model) -> Self {
        Self {
            id: m.id,
            value_mg_dl: m.value_mg_dl,
            measured_at: m.measured_at,
            source: m.source,
            note: m.note,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GlucoseQuery {
    /// Requested window in days; clamped to the plan's maximum.
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseListResponse {
    pub range_days: u32,
    pub max_range_days: u32,
    pub readings: Vec<GlucoseReadingResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsightsResponse {
    pub range_days: u32,
    pub count: usize,
    pub mean_mg_dl: Option<f64>,
    pub min_mg_dl: Option<i32>,
    pub max_mg_dl: Option<i32>,
    /// Present only when the plan includes full insights.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<FullInsights>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FullInsights {
    pub time_in_range_pct: f64,
    pub time_below_range_pct: f64,
    pub time_above_range_pct: f64,
    pub std_dev_mg_dl: f64,
    pub gmi_pct: f64,
}
