use crate::{
    error::AppError,
    model::{attendance::AttendanceRecord, student::Student},
    utils::{
        dates::{ReportType, report_range, today},
        excel_export::{
            XLSX_CONTENT_TYPE, attendance_report_filename, attendance_report_workbook,
            build_daily_summary, build_report_rows, daily_summary_filename,
            daily_summary_workbook,
        },
    },
};
use actix_web::{HttpResponse, http::header, web};
use chrono::NaiveDate;
use rust_xlsxwriter::XlsxError;
use serde::Deserialize;
use sqlx::MySqlPool;
use std::collections::HashMap;
use tracing::{error, info};
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    pub report_type: ReportType,
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SummaryQuery {
    /// Defaults to today
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
}

fn xlsx_response(filename: &str, bytes: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(XLSX_CONTENT_TYPE)
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ))
        .body(bytes)
}

fn workbook_failed(e: XlsxError) -> AppError {
    error!(error = %e, "Failed to build workbook");
    AppError::Internal
}

async fn all_students(pool: &MySqlPool) -> Result<Vec<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(
        r#"
        SELECT id, name, roll_number, room_number, floor_number, bed_number, email, phone, photo_url
        FROM students
        ORDER BY floor_number, room_number, bed_number
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Attendance export for a day, week or month
#[utoipa::path(
    get,
    path = "/api/reports/attendance",
    params(ReportQuery),
    responses(
        (status = 200, description = "XLSX workbook", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 400, description = "Invalid date range")
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn attendance_report(
    pool: web::Data<MySqlPool>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse, AppError> {
    let generated_on = today();
    let (start, end) = report_range(query.report_type, generated_on, query.start_date, query.end_date)?;

    let records = sqlx::query_as::<_, AttendanceRecord>(
        r#"
        SELECT id, student_id, date, status, marked_at, marked_by, notes, room_number, floor_number
        FROM attendance_records
        WHERE date BETWEEN ? AND ?
        ORDER BY date DESC, floor_number, room_number
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool.get_ref())
    .await?;

    let students: HashMap<u64, Student> = all_students(pool.get_ref())
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let rows = build_report_rows(&records, &students);
    let bytes = attendance_report_workbook(&rows).map_err(workbook_failed)?;

    info!(report_type = %query.report_type, %start, %end, rows = rows.len(), "Attendance report generated");
    Ok(xlsx_response(
        &attendance_report_filename(query.report_type, generated_on),
        bytes,
    ))
}

/// Head counts for one day plus the list of absentees
#[utoipa::path(
    get,
    path = "/api/reports/daily-summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "XLSX workbook", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn daily_summary(
    pool: web::Data<MySqlPool>,
    query: web::Query<SummaryQuery>,
) -> Result<HttpResponse, AppError> {
    let date = query.date.unwrap_or_else(today);

    let records = sqlx::query_as::<_, AttendanceRecord>(
        r#"
        SELECT id, student_id, date, status, marked_at, marked_by, notes, room_number, floor_number
        FROM attendance_records
        WHERE date = ?
        "#,
    )
    .bind(date)
    .fetch_all(pool.get_ref())
    .await?;
    let students = all_students(pool.get_ref()).await?;

    let summary = build_daily_summary(date, &records, &students);
    let bytes = daily_summary_workbook(&summary).map_err(workbook_failed)?;

    Ok(xlsx_response(&daily_summary_filename(date), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downloads_carry_the_report_filename() {
        let resp = xlsx_response("Daily_Summary_2026-05-04.xlsx", vec![1, 2, 3]);

        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            XLSX_CONTENT_TYPE
        );
        assert_eq!(
            resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"Daily_Summary_2026-05-04.xlsx\""
        );
    }

    #[test]
    fn report_query_parses_type_and_optional_dates() {
        let query: ReportQuery =
            serde_json::from_str(r#"{"report_type": "weekly", "end_date": "2026-05-04"}"#).unwrap();
        assert_eq!(query.report_type, ReportType::Weekly);
        assert!(query.start_date.is_none());
        assert_eq!(query.end_date, NaiveDate::from_ymd_opt(2026, 5, 4));
    }
}
