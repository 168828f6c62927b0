use derive_more::Display;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Display)]
pub enum ConfigError {
    #[display(fmt = "{} must be set", _0)]
    Missing(&'static str),
    #[display(fmt = "{} has an invalid value: {:?}", name, value)]
    Invalid { name: &'static str, value: String },
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_register_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // Hostel layout
    pub floor_count: u8,

    pub db_max_connections: u32,
    pub run_migrations: bool,

    pub log_dir: String,
    pub log_level: tracing::Level,

    // Read cache
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,

    // Offline queue + change feed
    pub sync_interval_secs: u64,
    pub offline_queue_path: PathBuf,
    pub realtime_capacity: usize,

    pub upload_limit_bytes: usize,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn var_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let floor_count: u8 = var_or("FLOOR_COUNT", 8)?;
        if floor_count == 0 {
            return Err(ConfigError::Invalid {
                name: "FLOOR_COUNT",
                value: "0".to_string(),
            });
        }

        let run_migrations = match env::var("RUN_MIGRATIONS") {
            Ok(raw) => parse_flag("RUN_MIGRATIONS", &raw)?,
            Err(_) => true,
        };

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            access_token_ttl: var_or("ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: var_or("REFRESH_TOKEN_TTL", 604_800)?, // 7 days

            rate_login_per_min: var_or("RATE_LOGIN_PER_MIN", 60)?,
            rate_register_per_min: var_or("RATE_REGISTER_PER_MIN", 30)?,
            rate_refresh_per_min: var_or("RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: var_or("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            floor_count,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 10)?,
            run_migrations,

            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            log_level: var_or("LOG_LEVEL", tracing::Level::DEBUG)?,

            cache_ttl_secs: var_or("CACHE_TTL_SECS", 30)?,
            cache_max_entries: var_or("CACHE_MAX_ENTRIES", 1000)?,

            sync_interval_secs: var_or("SYNC_INTERVAL_SECS", 15)?,
            offline_queue_path: env::var("OFFLINE_QUEUE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/offline-queue.json")),
            realtime_capacity: var_or("REALTIME_CAPACITY", 256)?,

            upload_limit_bytes: var_or("UPLOAD_LIMIT_BYTES", 5 * 1024 * 1024)?,
        })
    }

    /// Whether `floor` exists in this hostel.
    pub fn is_valid_floor(&self, floor: i64) -> bool {
        floor >= 1 && floor <= i64::from(self.floor_count)
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: "mysql://localhost/hosteltrack_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            access_token_ttl: 900,
            refresh_token_ttl: 604_800,
            rate_login_per_min: 60,
            rate_register_per_min: 30,
            rate_refresh_per_min: 30,
            rate_protected_per_min: 1000,
            api_prefix: "/api".to_string(),
            floor_count: 8,
            db_max_connections: 1,
            run_migrations: false,
            log_dir: "logs".to_string(),
            log_level: tracing::Level::DEBUG,
            cache_ttl_secs: 30,
            cache_max_entries: 100,
            sync_interval_secs: 15,
            offline_queue_path: PathBuf::from("offline-queue.json"),
            realtime_capacity: 16,
            upload_limit_bytes: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_reports_variable_name() {
        let err = parse_value::<u32>("RATE_LOGIN_PER_MIN", "lots").unwrap_err();
        assert_eq!(
            err.to_string(),
            "RATE_LOGIN_PER_MIN has an invalid value: \"lots\""
        );
        assert_eq!(parse_value::<u32>("X", " 42 ").unwrap(), 42);
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("RUN_MIGRATIONS", "TRUE").unwrap());
        assert!(parse_flag("RUN_MIGRATIONS", "1").unwrap());
        assert!(!parse_flag("RUN_MIGRATIONS", "off").unwrap());
        assert!(parse_flag("RUN_MIGRATIONS", "maybe").is_err());
    }

    #[test]
    fn floors_are_one_based_and_bounded() {
        let config = Config::for_tests();
        assert!(!config.is_valid_floor(0));
        assert!(config.is_valid_floor(1));
        assert!(config.is_valid_floor(8));
        assert!(!config.is_valid_floor(9));
    }
}
