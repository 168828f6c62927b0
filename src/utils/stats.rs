//! Roster arithmetic behind the floor, room and dashboard views.
//!
//! Students without an `absent` record for the day count as present, so a room
//! nobody has submitted yet shows a full house.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use utoipa::ToSchema;

use crate::model::{attendance::AttendanceEntry, floor::FloorSummary, room::{Room, RoomSummary}};

/// Where a student sleeps; enough to place them in a room.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RosterRow {
    pub id: u64,
    pub floor_number: u8,
    pub room_number: String,
}

type RoomKey = (u8, String);

fn roster_by_room(roster: &[RosterRow]) -> HashMap<RoomKey, Vec<u64>> {
    let mut by_room: HashMap<RoomKey, Vec<u64>> = HashMap::new();
    for row in roster {
        by_room
            .entry((row.floor_number, row.room_number.clone()))
            .or_default()
            .push(row.id);
    }
    by_room
}

pub fn summarize_rooms(
    rooms: &[Room],
    roster: &[RosterRow],
    absent: &HashSet<u64>,
) -> Vec<RoomSummary> {
    let by_room = roster_by_room(roster);

    rooms
        .iter()
        .map(|room| {
            let ids = by_room
                .get(&(room.floor_number, room.room_number.clone()))
                .map(Vec::as_slice)
                .unwrap_or_default();
            let present = ids.iter().filter(|id| !absent.contains(id)).count();

            RoomSummary {
                id: room.id,
                floor_number: room.floor_number,
                room_number: room.room_number.clone(),
                bed_type: room.bed_type.clone(),
                capacity: room.capacity,
                student_count: ids.len() as u32,
                present_count: present as u32,
            }
        })
        .collect()
}

/// `completed` holds the rooms that already have records for the day.
pub fn summarize_floors(
    rooms: &[Room],
    roster: &[RosterRow],
    completed: &HashSet<RoomKey>,
) -> Vec<FloorSummary> {
    let mut floors: BTreeMap<u8, FloorSummary> = BTreeMap::new();

    for room in rooms {
        let entry = floors.entry(room.floor_number).or_insert(FloorSummary {
            floor_number: room.floor_number,
            total_rooms: 0,
            total_students: 0,
            completed_rooms: 0,
        });
        entry.total_rooms += 1;
        if completed.contains(&(room.floor_number, room.room_number.clone())) {
            entry.completed_rooms += 1;
        }
    }

    for row in roster {
        if let Some(floor) = floors.get_mut(&row.floor_number) {
            floor.total_students += 1;
        }
    }

    floors.into_values().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "total_students": 120,
    "present_today": 112,
    "absent_today": 8,
    "attendance_rate": 93.3,
    "completion_percentage": 62.5
}))]
pub struct DashboardStats {
    pub total_students: u32,
    pub present_today: u32,
    pub absent_today: u32,
    pub attendance_rate: f64,
    pub completion_percentage: f64,
}

fn percent(part: u32, whole: u32, decimals: i32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let scale = 10f64.powi(decimals);
    (f64::from(part) / f64::from(whole) * 100.0 * scale).round() / scale
}

pub fn dashboard_stats(
    total_students: u32,
    absent_today: u32,
    total_rooms: u32,
    completed_rooms: u32,
) -> DashboardStats {
    let absent_today = absent_today.min(total_students);
    let present_today = total_students - absent_today;

    DashboardStats {
        total_students,
        present_today,
        absent_today,
        attendance_rate: percent(present_today, total_students, 1),
        completion_percentage: percent(completed_rooms, total_rooms, 1),
    }
}

/// Case-insensitive match on student name, roll number or room number.
pub fn matches_search(entry: &AttendanceEntry, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    entry.student_name.to_lowercase().contains(&needle)
        || entry.roll_number.to_lowercase().contains(&needle)
        || entry.room_number.to_lowercase().contains(&needle)
}
