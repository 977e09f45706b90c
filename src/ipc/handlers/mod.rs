pub mod announcements;
pub mod attendance;
pub mod auth;
pub mod core;
pub mod departments;
pub mod exports;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod timetable;

use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

/// Months arrive as separate year/month integers; collapse them into the
/// YYYY-MM prefix used by the attendance date column.
pub fn month_key(params: &serde_json::Value) -> Result<(i64, i64, String), HandlerErr> {
    let year = required_i64(params, "year")?;
    let month = required_i64(params, "month")?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params("month must be between 1 and 12"));
    }
    if !(1900..=9999).contains(&year) {
        return Err(HandlerErr::bad_params("year out of range"));
    }
    Ok((year, month, format!("{:04}-{:02}", year, month)))
}
