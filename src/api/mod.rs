pub mod attendance;
pub mod events;
pub mod floors;
pub mod reports;
pub mod students;
pub mod sync;
