use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "floor_number": 1,
    "total_rooms": 12,
    "total_students": 34,
    "completed_rooms": 5
}))]
pub struct FloorSummary {
    pub floor_number: u8,
    pub total_rooms: u32,
    pub total_students: u32,
    /// Rooms with attendance submitted today
    pub completed_rooms: u32,
}
