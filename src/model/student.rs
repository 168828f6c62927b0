use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 7,
    "name": "Arif Hossain",
    "roll_number": "CSE-2101",
    "room_number": "204",
    "floor_number": 2,
    "bed_number": 1,
    "email": "arif@example.edu",
    "phone": null,
    "photo_url": null
}))]
pub struct Student {
    pub id: u64,
    pub name: String,
    pub roll_number: String,
    pub room_number: String,
    pub floor_number: u8,
    pub bed_number: u32,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
}
