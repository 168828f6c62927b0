use crate::{
    auth::auth::AuthUser,
    config::Config,
    error::{AppError, is_unique_violation},
    model::{
        attendance::AttendanceRecord,
        floor::FloorSummary,
        room::{BedType, Room, RoomSummary},
        student::Student,
    },
    utils::{
        dates::today,
        query_cache::QueryCache,
        stats::{RosterRow, summarize_floors, summarize_rooms},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

// -------------------- shared reads --------------------

pub(crate) async fn fetch_rooms(pool: &MySqlPool, floor: Option<u8>) -> Result<Vec<Room>, sqlx::Error> {
    sqlx::query_as::<_, Room>(
        r#"
        SELECT id, floor_number, room_number, bed_type, capacity
        FROM rooms
        WHERE (? IS NULL OR floor_number = ?)
        ORDER BY floor_number, room_number
        "#,
    )
    .bind(floor)
    .bind(floor)
    .fetch_all(pool)
    .await
}

pub(crate) async fn fetch_roster(pool: &MySqlPool, floor: Option<u8>) -> Result<Vec<RosterRow>, sqlx::Error> {
    sqlx::query_as::<_, RosterRow>(
        "SELECT id, floor_number, room_number FROM students WHERE (? IS NULL OR floor_number = ?)",
    )
    .bind(floor)
    .bind(floor)
    .fetch_all(pool)
    .await
}

pub(crate) async fn absent_ids(
    pool: &MySqlPool,
    date: NaiveDate,
    floor: Option<u8>,
) -> Result<HashSet<u64>, sqlx::Error> {
    let rows = sqlx::query_scalar::<_, u64>(
        r#"
        SELECT student_id FROM attendance_records
        WHERE date = ? AND status = 'absent' AND (? IS NULL OR floor_number = ?)
        "#,
    )
    .bind(date)
    .bind(floor)
    .bind(floor)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

fn checked_floor(config: &Config, floor: i64) -> Result<u8, AppError> {
    if !config.is_valid_floor(floor) {
        return Err(AppError::bad_request(format!(
            "Floor must be between 1 and {}",
            config.floor_count
        )));
    }
    Ok(floor as u8)
}

// -------------------- handlers --------------------

/// Lists floors with room counts and today's progress
#[utoipa::path(
    get,
    path = "/api/floors",
    responses(
        (status = 200, description = "Floors ordered by number", body = [FloorSummary]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Floors"
)]
pub async fn list_floors(
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
) -> Result<HttpResponse, AppError> {
    let today = today();
    if let Some(floors) = cache.floors(today).await {
        return Ok(HttpResponse::Ok().json(floors.as_ref()));
    }

    let rooms = fetch_rooms(pool.get_ref(), None).await?;
    let roster = fetch_roster(pool.get_ref(), None).await?;
    let completed: HashSet<(u8, String)> = sqlx::query_as::<_, (u8, String)>(
        "SELECT DISTINCT floor_number, room_number FROM attendance_records WHERE date = ?",
    )
    .bind(today)
    .fetch_all(pool.get_ref())
    .await?
    .into_iter()
    .collect();

    let floors = Arc::new(summarize_floors(&rooms, &roster, &completed));
    cache.put_floors(today, floors.clone()).await;

    Ok(HttpResponse::Ok().json(floors.as_ref()))
}

/// Lists rooms on a floor with today's head counts
#[utoipa::path(
    get,
    path = "/api/floors/{floor_number}/rooms",
    params(("floor_number" = u8, Path, description = "Floor number, starting at 1")),
    responses(
        (status = 200, description = "Rooms ordered by room number", body = [RoomSummary]),
        (status = 400, description = "Floor out of range"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Floors"
)]
pub async fn list_rooms(
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
    config: web::Data<Config>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let floor = checked_floor(&config, path.into_inner())?;
    let today = today();

    if let Some(rooms) = cache.rooms(floor, today).await {
        return Ok(HttpResponse::Ok().json(rooms.as_ref()));
    }

    let rooms = fetch_rooms(pool.get_ref(), Some(floor)).await?;
    let roster = fetch_roster(pool.get_ref(), Some(floor)).await?;
    let absent = absent_ids(pool.get_ref(), today, Some(floor)).await?;

    let summaries = Arc::new(summarize_rooms(&rooms, &roster, &absent));
    cache.put_rooms(floor, today, summaries.clone()).await;

    Ok(HttpResponse::Ok().json(summaries.as_ref()))
}

#[derive(Serialize, ToSchema)]
pub struct RoomStudent {
    #[serde(flatten)]
    pub student: Student,
    /// Today's marking, null until the room is submitted
    #[schema(example = "present", nullable = true)]
    pub status: Option<String>,
}

/// Lists the students of one room, ordered by bed
#[utoipa::path(
    get,
    path = "/api/floors/{floor_number}/rooms/{room_number}/students",
    params(
        ("floor_number" = u8, Path, description = "Floor number"),
        ("room_number" = String, Path, description = "Room number")
    ),
    responses(
        (status = 200, description = "Room roster", body = [RoomStudent]),
        (status = 400, description = "Floor out of range"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Floors"
)]
pub async fn room_students(
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<(i64, String)>,
) -> Result<HttpResponse, AppError> {
    let (floor, room_number) = path.into_inner();
    let floor = checked_floor(&config, floor)?;
    let today = today();

    let students = sqlx::query_as::<_, Student>(
        r#"
        SELECT id, name, roll_number, room_number, floor_number, bed_number, email, phone, photo_url
        FROM students
        WHERE floor_number = ? AND room_number = ?
        ORDER BY bed_number
        "#,
    )
    .bind(floor)
    .bind(&room_number)
    .fetch_all(pool.get_ref())
    .await?;

    let records = sqlx::query_as::<_, AttendanceRecord>(
        r#"
        SELECT id, student_id, date, status, marked_at, marked_by, notes, room_number, floor_number
        FROM attendance_records
        WHERE date = ? AND floor_number = ? AND room_number = ?
        "#,
    )
    .bind(today)
    .bind(floor)
    .bind(&room_number)
    .fetch_all(pool.get_ref())
    .await?;

    let mut status: HashMap<u64, String> =
        records.into_iter().map(|r| (r.student_id, r.status)).collect();

    let roster: Vec<RoomStudent> = students
        .into_iter()
        .map(|student| RoomStudent {
            status: status.remove(&student.id),
            student,
        })
        .collect();

    Ok(HttpResponse::Ok().json(roster))
}

#[derive(Deserialize, ToSchema)]
pub struct CreateRoom {
    #[schema(example = 2)]
    pub floor_number: i64,
    #[schema(example = "204")]
    pub room_number: String,
    pub bed_type: BedType,
    #[schema(example = 3)]
    pub capacity: u32,
}

/// Creates a room (admin only)
#[utoipa::path(
    post,
    path = "/api/rooms",
    request_body = CreateRoom,
    responses(
        (status = 201, description = "Room created", body = Object, example = json!({
            "message": "Room created",
            "id": 12
        })),
        (status = 400, description = "Invalid room"),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Room already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Floors"
)]
pub async fn create_room(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    cache: web::Data<QueryCache>,
    config: web::Data<Config>,
    payload: web::Json<CreateRoom>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let floor = checked_floor(&config, payload.floor_number)?;
    let room_number = payload.room_number.trim();
    if room_number.is_empty() {
        return Err(AppError::bad_request("Room Number is required"));
    }
    if payload.capacity == 0 {
        return Err(AppError::bad_request("Capacity must be at least 1"));
    }

    let result = sqlx::query(
        "INSERT INTO rooms (floor_number, room_number, bed_type, capacity) VALUES (?, ?, ?, ?)",
    )
    .bind(floor)
    .bind(room_number)
    .bind(payload.bed_type.as_ref())
    .bind(payload.capacity)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(done) => {
            info!(floor, room_number, "Room created");
            cache.invalidate_all();
            Ok(HttpResponse::Created().json(json!({
                "message": "Room created",
                "id": done.last_insert_id()
            })))
        }
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict(format!(
            "Room {room_number} already exists on floor {floor}"
        ))),
        Err(e) => {
            error!(error = %e, floor, room_number, "Failed to create room");
            Err(AppError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> Student {
        Student {
            id: 7,
            name: "Arif Hossain".to_string(),
            roll_number: "CSE-2101".to_string(),
            room_number: "204".to_string(),
            floor_number: 2,
            bed_number: 1,
            email: None,
            phone: None,
            photo_url: None,
        }
    }

    #[test]
    fn unsubmitted_room_shows_null_status() {
        let row = serde_json::to_value(RoomStudent { student: student(), status: None }).unwrap();
        assert!(row["status"].is_null());
        assert_eq!(row["roll_number"], "CSE-2101");

        let (_, schema) = <RoomStudent as ToSchema>::schema();
        let schema = serde_json::to_string(&schema).unwrap();
        assert!(schema.contains("null until the room is submitted"));
    }
}
