use crate::{
    auth::auth::AuthUser,
    error::{AppError, is_connectivity_error},
    model::attendance::{AttendanceEntry, AttendanceRecord, AttendanceStatus},
    sync::{
        offline_queue::{OfflineQueue, RoomSubmission, SinkError, SubmissionSink},
        realtime::{AttendanceEvent, EventKind, Realtime},
    },
    utils::{
        dates::today,
        query_cache::QueryCache,
        stats::{DashboardStats, dashboard_stats, matches_search},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{Local, NaiveDate};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

const RECORD_COLUMNS: &str =
    "id, student_id, date, status, marked_at, marked_by, notes, room_number, floor_number";

// -------------------- Room write --------------------

#[derive(Debug, Display)]
pub enum WriteError {
    #[display(fmt = "No students found in this room")]
    NoStudents,
    #[display(fmt = "Students {:?} are not in this room", _0)]
    ForeignAbsentees(Vec<u64>),
    #[display(fmt = "{}", _0)]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for WriteError {
    fn from(e: sqlx::Error) -> Self {
        WriteError::Db(e)
    }
}

impl From<WriteError> for AppError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::NoStudents => AppError::not_found(e.to_string()),
            WriteError::ForeignAbsentees(_) => AppError::bad_request(e.to_string()),
            WriteError::Db(db) => db.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub present: usize,
    pub absent: usize,
}

/// Absentees that do not belong to the room, in request order.
fn foreign_absentees(roster: &[u64], absent: &[u64]) -> Vec<u64> {
    let members: HashSet<u64> = roster.iter().copied().collect();
    absent.iter().copied().filter(|id| !members.contains(id)).collect()
}

/// Replaces the room's records for the submission date. Every student in the
/// room ends up with exactly one record for that day.
pub async fn write_room_attendance(
    pool: &MySqlPool,
    submission: &RoomSubmission,
) -> Result<WriteOutcome, WriteError> {
    let mut tx = pool.begin().await?;

    let roster = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM students WHERE floor_number = ? AND room_number = ? ORDER BY bed_number",
    )
    .bind(submission.floor_number)
    .bind(&submission.room_number)
    .fetch_all(&mut *tx)
    .await?;

    if roster.is_empty() {
        return Err(WriteError::NoStudents);
    }

    let foreign = foreign_absentees(&roster, &submission.absent_student_ids);
    if !foreign.is_empty() {
        return Err(WriteError::ForeignAbsentees(foreign));
    }

    // records left by students who moved rooms since the last submission
    sqlx::query("DELETE FROM attendance_records WHERE date = ? AND floor_number = ? AND room_number = ?")
        .bind(submission.date)
        .bind(submission.floor_number)
        .bind(&submission.room_number)
        .execute(&mut *tx)
        .await?;

    let mut delete: QueryBuilder<MySql> =
        QueryBuilder::new("DELETE FROM attendance_records WHERE date = ");
    delete.push_bind(submission.date);
    delete.push(" AND student_id IN (");
    let mut ids = delete.separated(", ");
    for id in &roster {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    delete.build().execute(&mut *tx).await?;

    let absent: HashSet<u64> = submission.absent_student_ids.iter().copied().collect();

    let mut insert: QueryBuilder<MySql> = QueryBuilder::new(
        "INSERT INTO attendance_records \
         (student_id, date, status, marked_at, marked_by, notes, room_number, floor_number) ",
    );
    insert.push_values(&roster, |mut row, id| {
        let status = if absent.contains(id) {
            AttendanceStatus::Absent
        } else {
            AttendanceStatus::Present
        };
        row.push_bind(*id)
            .push_bind(submission.date)
            .push_bind(status.to_string())
            .push_bind(submission.marked_at)
            .push_bind(submission.marked_by)
            .push_bind(submission.notes.as_deref())
            .push_bind(submission.room_number.as_str())
            .push_bind(submission.floor_number);
    });
    insert.build().execute(&mut *tx).await?;

    tx.commit().await?;

    Ok(WriteOutcome {
        present: roster.len() - absent.len(),
        absent: absent.len(),
    })
}

/// Replays queued submissions straight into MySQL.
#[derive(Clone)]
pub struct PoolSink {
    pub pool: MySqlPool,
    pub realtime: Realtime,
}

impl SubmissionSink for PoolSink {
    async fn apply(&self, submission: &RoomSubmission) -> Result<(), SinkError> {
        match write_room_attendance(&self.pool, submission).await {
            Ok(_) => {
                self.realtime.publish(AttendanceEvent::room(
                    EventKind::Synced,
                    submission.date,
                    submission.floor_number,
                    &submission.room_number,
                ));
                Ok(())
            }
            Err(WriteError::Db(e)) if is_connectivity_error(&e) => {
                Err(SinkError::Unavailable(e.to_string()))
            }
            Err(e) => Err(SinkError::Rejected(e.to_string())),
        }
    }
}

// -------------------- Handlers --------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAttendance {
    #[schema(example = 2)]
    pub floor_number: u8,
    #[schema(example = "204")]
    pub room_number: String,
    #[schema(example = json!([7, 9]))]
    #[serde(default)]
    pub absent_student_ids: Vec<u64>,
    pub notes: Option<String>,
}

/// Submit a room's attendance for today
#[utoipa::path(
    post,
    path = "/api/attendance/submit",
    request_body = SubmitAttendance,
    responses(
        (status = 200, description = "Attendance recorded", body = Object, example = json!({
            "message": "Attendance submitted",
            "date": "2026-05-04",
            "present": 2,
            "absent": 1
        })),
        (status = 202, description = "Database unreachable, queued for sync", body = Object, example = json!({
            "queued": true,
            "id": "6f1c2e9a-5d1b-4f55-a0b4-0f3a8f0d2c11"
        })),
        (status = 400, description = "Absent student outside the room"),
        (status = 404, description = "Room has no students")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(warden = auth.user_id))]
pub async fn submit_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
    realtime: web::Data<Realtime>,
    queue: web::Data<OfflineQueue>,
    payload: web::Json<SubmitAttendance>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let room_number = payload.room_number.trim().to_string();
    if room_number.is_empty() {
        return Err(AppError::bad_request("Room Number is required"));
    }

    let mut absent_student_ids = payload.absent_student_ids;
    absent_student_ids.sort_unstable();
    absent_student_ids.dedup();

    let submission = RoomSubmission {
        date: today(),
        floor_number: payload.floor_number,
        room_number,
        absent_student_ids,
        notes: payload
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        marked_by: auth.user_id,
        marked_at: Local::now().naive_local(),
    };

    match write_room_attendance(pool.get_ref(), &submission).await {
        Ok(outcome) => {
            cache.invalidate_date(submission.date);
            realtime.publish(AttendanceEvent::room(
                EventKind::Submitted,
                submission.date,
                submission.floor_number,
                &submission.room_number,
            ));
            info!(
                floor = submission.floor_number,
                room = %submission.room_number,
                present = outcome.present,
                absent = outcome.absent,
                "Attendance submitted"
            );
            Ok(HttpResponse::Ok().json(json!({
                "message": "Attendance submitted",
                "date": submission.date,
                "present": outcome.present,
                "absent": outcome.absent
            })))
        }
        Err(WriteError::Db(e)) if is_connectivity_error(&e) => {
            warn!(error = %e, "Database unreachable, queueing submission");
            let queued = queue.enqueue(submission).await;
            Ok(HttpResponse::Accepted().json(json!({
                "queued": true,
                "id": queued.id
            })))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecordQuery {
    #[param(value_type = Option<String>, format = "date")]
    pub start_date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub end_date: Option<NaiveDate>,
    pub status: Option<AttendanceStatus>,
    pub floor_number: Option<u8>,
    pub room_number: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/attendance",
    params(RecordQuery),
    responses(
        (status = 200, description = "Attendance records, newest first", body = [AttendanceRecord])
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn list_records(
    pool: web::Data<MySqlPool>,
    query: web::Query<RecordQuery>,
) -> Result<HttpResponse, AppError> {
    if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
        if start > end {
            return Err(AppError::bad_request("start_date must not be after end_date"));
        }
    }

    let status = query.status.map(|s| s.as_ref().to_string());
    let room = query
        .room_number
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let records = sqlx::query_as::<_, AttendanceRecord>(&format!(
        r#"
        SELECT {RECORD_COLUMNS}
        FROM attendance_records
        WHERE (? IS NULL OR date >= ?)
          AND (? IS NULL OR date <= ?)
          AND (? IS NULL OR status = ?)
          AND (? IS NULL OR floor_number = ?)
          AND (? IS NULL OR room_number = ?)
        ORDER BY date DESC, floor_number, room_number
        "#
    ))
    .bind(query.start_date)
    .bind(query.start_date)
    .bind(query.end_date)
    .bind(query.end_date)
    .bind(&status)
    .bind(&status)
    .bind(query.floor_number)
    .bind(query.floor_number)
    .bind(room)
    .bind(room)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(records))
}

pub(crate) async fn records_for(
    pool: &MySqlPool,
    date: NaiveDate,
) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
    sqlx::query_as::<_, AttendanceRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records WHERE date = ? ORDER BY floor_number, room_number"
    ))
    .bind(date)
    .fetch_all(pool)
    .await
}

#[utoipa::path(
    get,
    path = "/api/attendance/today",
    responses(
        (status = 200, description = "Today's attendance records", body = [AttendanceRecord])
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn today_records(
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
) -> Result<HttpResponse, AppError> {
    let today = today();
    if let Some(records) = cache.day_records(today).await {
        return Ok(HttpResponse::Ok().json(records.as_ref()));
    }

    let records = Arc::new(records_for(pool.get_ref(), today).await?);
    cache.put_day_records(today, records.clone()).await;

    Ok(HttpResponse::Ok().json(records.as_ref()))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Defaults to today
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct HistoryResponse {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub total_students: i64,
    pub absent: i64,
    pub present: i64,
    pub records: Vec<AttendanceEntry>,
}

#[utoipa::path(
    get,
    path = "/api/attendance/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Records for one day with student details", body = HistoryResponse)
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn history(
    pool: web::Data<MySqlPool>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let date = query.date.unwrap_or_else(today);

    // the inner join skips records whose student was deleted
    let entries = sqlx::query_as::<_, AttendanceEntry>(
        r#"
        SELECT a.id, a.student_id, s.name AS student_name, s.roll_number, a.date, a.status,
               a.marked_at, a.marked_by, a.notes, a.room_number, a.floor_number
        FROM attendance_records a
        JOIN students s ON s.id = a.student_id
        WHERE a.date = ?
        ORDER BY a.floor_number, a.room_number, s.bed_number
        "#,
    )
    .bind(date)
    .fetch_all(pool.get_ref())
    .await?;

    let total_students = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM students")
        .fetch_one(pool.get_ref())
        .await?;

    let absent = entries
        .iter()
        .filter(|e| e.status == AttendanceStatus::Absent.as_ref())
        .count() as i64;

    let records = match query.search.as_deref() {
        Some(search) => entries
            .into_iter()
            .filter(|e| matches_search(e, search))
            .collect(),
        None => entries,
    };

    Ok(HttpResponse::Ok().json(HistoryResponse {
        date,
        total_students,
        absent,
        present: (total_students - absent).max(0),
        records,
    }))
}

#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses(
        (status = 200, description = "Today's headline numbers", body = DashboardStats)
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn dashboard(
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
) -> Result<HttpResponse, AppError> {
    let today = today();
    if let Some(stats) = cache.dashboard(today).await {
        return Ok(HttpResponse::Ok().json(stats.as_ref()));
    }

    let (total_students, absent_today, total_rooms, completed_rooms) =
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM students),
                (SELECT COUNT(*) FROM attendance_records WHERE date = ? AND status = 'absent'),
                (SELECT COUNT(*) FROM rooms),
                (SELECT COUNT(*) FROM (
                    SELECT DISTINCT floor_number, room_number
                    FROM attendance_records WHERE date = ?
                ) done)
            "#,
        )
        .bind(today)
        .bind(today)
        .fetch_one(pool.get_ref())
        .await?;

    let count = |n: i64| u32::try_from(n).unwrap_or(u32::MAX);
    let stats = Arc::new(dashboard_stats(
        count(total_students),
        count(absent_today),
        count(total_rooms),
        count(completed_rooms),
    ));
    cache.put_dashboard(today, stats.clone()).await;

    Ok(HttpResponse::Ok().json(stats.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::jwt::generate_access_token, config::Config};
    use actix_web::{App, ResponseError, http::StatusCode, test as http};
    use sqlx::mysql::MySqlPoolOptions;
    use std::time::Duration;

    /// Submit endpoint wired to a database nobody listens on.
    fn offline_submit(cfg: &mut web::ServiceConfig, queue: Arc<OfflineQueue>) {
        let pool = MySqlPoolOptions::new()
            .acquire_timeout(Duration::from_millis(300))
            .connect_lazy("mysql://hosteltrack@127.0.0.1:1/hosteltrack")
            .unwrap();

        cfg.app_data(web::Data::new(pool))
            .app_data(web::Data::new(Config::for_tests()))
            .app_data(web::Data::new(QueryCache::new(16, Duration::from_secs(30))))
            .app_data(web::Data::new(Realtime::new(8)))
            .app_data(web::Data::from(queue))
            .route("/attendance/submit", web::post().to(submit_attendance));
    }

    fn warden_bearer() -> String {
        let token = generate_access_token(3, "warden.east".to_string(), 2, "test-secret", 60).unwrap();
        format!("Bearer {token}")
    }

    #[test]
    fn absentees_outside_the_roster_are_reported() {
        assert!(foreign_absentees(&[4, 5, 6], &[5]).is_empty());
        assert_eq!(foreign_absentees(&[4, 5, 6], &[9, 5, 1]), vec![9, 1]);
    }

    #[test]
    fn write_errors_map_to_http_statuses() {
        let empty: AppError = WriteError::NoStudents.into();
        assert_eq!(empty.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(empty.to_string(), "No students found in this room");

        let foreign: AppError = WriteError::ForeignAbsentees(vec![9]).into();
        assert_eq!(foreign.status_code(), StatusCode::BAD_REQUEST);

        let db: AppError = WriteError::Db(sqlx::Error::RowNotFound).into();
        assert_eq!(db.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn submit_payload_defaults_to_nobody_absent() {
        let body: SubmitAttendance =
            serde_json::from_str(r#"{"floor_number": 2, "room_number": "204"}"#).unwrap();
        assert!(body.absent_student_ids.is_empty());
        assert!(body.notes.is_none());
    }

    #[test]
    fn status_filter_accepts_lowercase_values() {
        let query: RecordQuery =
            serde_json::from_str(r#"{"status": "absent", "floor_number": 3}"#).unwrap();
        assert_eq!(query.status, Some(AttendanceStatus::Absent));
    }

    #[actix_web::test]
    async fn blank_room_number_is_rejected() {
        let queue = Arc::new(OfflineQueue::in_memory());
        let app =
            http::init_service(App::new().configure(|cfg| offline_submit(cfg, queue.clone()))).await;

        let req = http::TestRequest::post()
            .uri("/attendance/submit")
            .insert_header(("Authorization", warden_bearer()))
            .set_json(json!({ "floor_number": 2, "room_number": "   " }))
            .to_request();
        let resp = http::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = http::read_body_json(resp).await;
        assert_eq!(body["error"], "Room Number is required");
        assert_eq!(queue.len().await, 0);
    }

    #[actix_web::test]
    async fn submission_is_queued_while_the_database_is_down() {
        let queue = Arc::new(OfflineQueue::in_memory());
        let app =
            http::init_service(App::new().configure(|cfg| offline_submit(cfg, queue.clone()))).await;

        let req = http::TestRequest::post()
            .uri("/attendance/submit")
            .insert_header(("Authorization", warden_bearer()))
            .set_json(json!({
                "floor_number": 2,
                "room_number": "204",
                "absent_student_ids": [9, 7, 9]
            }))
            .to_request();
        let resp = http::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let body: serde_json::Value = http::read_body_json(resp).await;
        assert_eq!(body["queued"], true);
        assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(queue.len().await, 1);
    }
}
