//! Shared helpers and constants.

use chrono::Utc;

pub const APP_NAME: &str = "checklist_backend";

/// `YYYY-MM-DD HH:MM:SS` in UTC, the layout stored in `created_at`.
pub fn now_utc_sql() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn print_banner() {
    println!("{APP_NAME} {}", env!("CARGO_PKG_VERSION"));
}
