use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

/// Attendance is kept per calendar day in the server's local time zone.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
}

/// Resolves the inclusive date range of a report. Explicit bounds win; a
/// missing bound falls back to the window implied by `report_type`, ending at
/// `today`.
pub fn report_range(
    report_type: ReportType,
    today: NaiveDate,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate), AppError> {
    let end = end.unwrap_or(today);
    let start = match start {
        Some(s) => s,
        None => match report_type {
            ReportType::Daily => end,
            ReportType::Weekly => end - Duration::days(6),
            ReportType::Monthly => end.with_day(1).unwrap_or(end),
        },
    };

    if start > end {
        return Err(AppError::bad_request("start_date cannot be after end_date"));
    }

    Ok((start, end))
}
