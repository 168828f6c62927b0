use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BedType {
    Single,
    Double,
    Triple,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Room {
    pub id: u64,
    pub floor_number: u8,
    pub room_number: String,
    #[schema(value_type = String, example = "double")]
    pub bed_type: String,
    pub capacity: u32,
}

/// A room together with today's roster counts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 12,
    "floor_number": 2,
    "room_number": "204",
    "bed_type": "triple",
    "capacity": 3,
    "student_count": 3,
    "present_count": 2
}))]
pub struct RoomSummary {
    pub id: u64,
    pub floor_number: u8,
    pub room_number: String,
    pub bed_type: String,
    pub capacity: u32,
    pub student_count: u32,
    pub present_count: u32,
}
