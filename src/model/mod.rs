pub mod attendance;
pub mod floor;
pub mod role;
pub mod room;
pub mod student;
pub mod user;
