use anyhow::Context;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use std::time::Duration;

use crate::config::Config;

pub async fn init_db(config: &Config) -> anyhow::Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")
}

pub async fn run_migrations(pool: &MySqlPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")
}

#[cfg(test)]
mod tests {
    const INIT: &str = include_str!("../migrations/20250101000000_init.sql");

    fn table(name: &str) -> &'static str {
        let start = INIT
            .find(&format!("CREATE TABLE IF NOT EXISTS {name} ("))
            .unwrap();
        let len = INIT[start..].find(");").unwrap();
        &INIT[start..start + len]
    }

    #[test]
    fn attendance_history_outlives_deleted_students() {
        let attendance = table("attendance_records");
        assert!(!attendance.contains("REFERENCES students"));
        assert!(!attendance.contains("ON DELETE CASCADE"));
        assert!(attendance.contains("UNIQUE KEY uq_attendance_student_date (student_id, date)"));
    }
}
