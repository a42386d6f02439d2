use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::borrow::Cow;

use crate::entities::glucose_reading_entity as readings;
use crate::error::{AppError, AppResult};
use crate::models::*;

pub const MIN_MG_DL: i32 = 20;
pub const MAX_MG_DL: i32 = 600;
pub const TARGET_LOW_MG_DL: i32 = 70;
pub const TARGET_HIGH_MG_DL: i32 = 180;
pub const MAX_IMPORT_ROWS: usize = 20_000;

#[derive(Clone)]
pub struct GlucoseService {
    pool: DatabaseConnection,
}

impl GlucoseService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn log_reading(
        &self,
        user_id: i64,
        req: LogGlucoseRequest,
    ) -> AppResult<GlucoseReadingResponse> {
        if !(MIN_MG_DL..=MAX_MG_DL).contains(&req.value_mg_dl) {
            return Err(AppError::ValidationError(format!(
                "Glucose value must be between {MIN_MG_DL} and {MAX_MG_DL} mg/dL"
            )));
        }
        let now = Utc::now();
        let measured_at = req.measured_at.unwrap_or(now);
        if measured_at > now + Duration::minutes(5) {
            return Err(AppError::ValidationError("Reading is in the future".into()));
        }

        let model = readings::ActiveModel {
            user_id: Set(user_id),
            value_mg_dl: Set(req.value_mg_dl),
            measured_at: Set(measured_at),
            source: Set("manual".to_string()),
            note: Set(req.note.filter(|n| !n.trim().is_empty())),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;

        Ok(GlucoseReadingResponse::from(model))
    }

    async fn readings_since(&self, user_id: i64, days: u32) -> AppResult<Vec<readings::Model>> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let rows = readings::Entity::find()
            .filter(readings::Column::UserId.eq(user_id))
            .filter(readings::Column::MeasuredAt.gte(since))
            .order_by_asc(readings::Column::MeasuredAt)
            .all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Lists readings in the requested window, clamped to `max_days`.
    pub async fn list_readings(
        &self,
        user_id: i64,
        requested_days: Option<u32>,
        max_days: u32,
    ) -> AppResult<GlucoseListResponse> {
        let range_days = clamp_range(requested_days, max_days);
        let rows = self.readings_since(user_id, range_days).await?;
        Ok(GlucoseListResponse {
            range_days,
            max_range_days: max_days,
            readings: rows.into_iter().map(GlucoseReadingResponse::from).collect(),
        })
    }

    pub async fn export_csv(&self, user_id: i64, days: u32) -> AppResult<String> {
        let rows = self.readings_since(user_id, days).await?;
        log::info!("Exporting {} glucose readings for user {user_id}", rows.len());
        Ok(render_csv(&rows))
    }

    pub async fn import_cgm(&self, user_id: i64, body: &str) -> AppResult<ImportSummary> {
        let (parsed, skipped) = parse_cgm_csv(body);
        if parsed.len() > MAX_IMPORT_ROWS {
            return Err(AppError::ValidationError(format!(
                "Import is limited to {MAX_IMPORT_ROWS} rows"
            )));
        }
        if parsed.is_empty() {
            return Ok(ImportSummary {
                imported: 0,
                skipped,
            });
        }

        let imported = parsed.len();
        let models = parsed.into_iter().map(|(measured_at, value)| readings::ActiveModel {
            user_id: Set(user_id),
            value_mg_dl: Set(value),
            measured_at: Set(measured_at),
            source: Set("cgm".to_string()),
            ..Default::default()
        });
        readings::Entity::insert_many(models).exec(&self.pool).await?;

        log::info!("Imported {imported} CGM readings for user {user_id} ({skipped} skipped)");
        Ok(ImportSummary { imported, skipped })
    }

    pub async fn insights(
        &self,
        user_id: i64,
        requested_days: Option<u32>,
        max_days: u32,
        full: bool,
    ) -> AppResult<InsightsResponse> {
        let range_days = clamp_range(requested_days, max_days);
        let values: Vec<i32> = self
            .readings_since(user_id, range_days)
            .await?
            .into_iter()
            .map(|r| r.value_mg_dl)
            .collect();
        Ok(summarize(&values, range_days, full))
    }
}

pub fn clamp_range(requested: Option<u32>, max_days: u32) -> u32 {
    requested.unwrap_or(max_days).clamp(1, max_days.max(1))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_row(line: &str) -> Option<(DateTime<Utc>, i32)> {
    let mut fields = line.split(',').map(|f| f.trim().trim_matches('"'));
    let ts = parse_timestamp(fields.next()?)?;
    let value = fields.next()?.parse::<f64>().ok()?.round();
    if !value.is_finite() || value < f64::from(MIN_MG_DL) || value > f64::from(MAX_MG_DL) {
        return None;
    }
    Some((ts, value as i32))
}

/// Parses `timestamp,value` rows. A non-parsable first line is taken as a
/// header; any other bad row is skipped and counted.
pub fn parse_cgm_csv(body: &str) -> (Vec<(DateTime<Utc>, i32)>, usize) {
    let mut rows = Vec::new();
    let mut skipped = 0;
    for (idx, line) in body.lines().map(str::trim).filter(|l| !l.is_empty()).enumerate() {
        match parse_row(line) {
            Some(row) => rows.push(row),
            None if idx == 0 => {}
            None => skipped += 1,
        }
    }
    (rows, skipped)
}

fn csv_field(raw: &str) -> Cow<'_, str> {
    if raw.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", raw.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(raw)
    }
}

pub fn render_csv(rows: &[readings::Model]) -> String {
    let mut out = String::from("measured_at,value_mg_dl,source,note\n");
    for r in rows {
        out.push_str(&format!(
            "{},{},{},{}\n",
            r.measured_at.to_rfc3339(),
            r.value_mg_dl,
            csv_field(&r.source),
            csv_field(r.note.as_deref().unwrap_or(""))
        ));
    }
    out
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn summarize(values: &[i32], range_days: u32, full: bool) -> InsightsResponse {
    let count = values.len();
    if count == 0 {
        return InsightsResponse {
            range_days,
            count,
            mean_mg_dl: None,
            min_mg_dl: None,
            max_mg_dl: None,
            full: None,
        };
    }

    let n = count as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let full = full.then(|| {
        let pct = |pred: fn(i32) -> bool| {
            round1(values.iter().filter(|&&v| pred(v)).count() as f64 / n * 100.0)
        };
        let variance = values
            .iter()
            .map(|&v| (f64::from(v) - mean).powi(2))
            .sum::<f64>()
            / n;
        FullInsights {
            time_in_range_pct: pct(|v| (TARGET_LOW_MG_DL..=TARGET_HIGH_MG_DL).contains(&v)),
            time_below_range_pct: pct(|v| v < TARGET_LOW_MG_DL),
            time_above_range_pct: pct(|v| v > TARGET_HIGH_MG_DL),
            std_dev_mg_dl: round1(variance.sqrt()),
            // Glucose Management Indicator (%)
            gmi_pct: round1(3.31 + 0.02392 * mean),
        }
    });

    InsightsResponse {
        range_days,
        count,
        mean_mg_dl: Some(round1(mean)),
        min_mg_dl: values.iter().copied().min(),
        max_mg_dl: values.iter().copied().max(),
        full,
    }
}
