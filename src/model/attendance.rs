use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 42,
    "student_id": 7,
    "date": "2026-01-15",
    "status": "absent",
    "marked_at": "2026-01-15T21:30:00",
    "marked_by": 2,
    "notes": "Went home for the weekend",
    "room_number": "204",
    "floor_number": 2
}))]
pub struct AttendanceRecord {
    pub id: u64,
    pub student_id: u64,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    #[schema(value_type = String)]
    pub status: String,
    #[schema(value_type = String, format = "date-time")]
    pub marked_at: NaiveDateTime,
    pub marked_by: u64,
    pub notes: Option<String>,
    pub room_number: String,
    pub floor_number: u8,
}

impl AttendanceRecord {
    pub fn is_absent(&self) -> bool {
        self.status == AttendanceStatus::Absent.as_ref()
    }
}

/// An attendance record joined with the student it belongs to.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct AttendanceEntry {
    pub id: u64,
    pub student_id: u64,
    pub student_name: String,
    pub roll_number: String,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    #[schema(value_type = String)]
    pub status: String,
    #[schema(value_type = String, format = "date-time")]
    pub marked_at: NaiveDateTime,
    pub marked_by: u64,
    pub notes: Option<String>,
    pub room_number: String,
    pub floor_number: u8,
}
