pub mod dates;
pub mod db_utils;
pub mod excel_export;
pub mod query_cache;
pub mod roll_filter;
pub mod stats;
pub mod student_import;
