pub mod offline_queue;
pub mod realtime;
