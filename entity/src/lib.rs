pub mod activity_logs;
pub mod sessions;
pub mod users;
