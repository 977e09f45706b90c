use super::subjects::department_exists;
use super::{db_conn, optional_str, required_str};
use crate::ipc::error::{db_err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const AUDIENCES: [&str; 3] = ["ALL", "STUDENTS", "TEACHERS"];

fn announcements_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let title = required_str(params, "title")?;
    let content = required_str(params, "content")?;
    let audience = optional_str(params, "audience").unwrap_or_else(|| "ALL".to_string());
    let department_id = optional_str(params, "departmentId");
    let semester = params.get("semester").and_then(|v| v.as_i64());

    if title.trim().is_empty() {
        return Err(HandlerErr::bad_params("title must not be empty"));
    }
    if content.trim().is_empty() {
        return Err(HandlerErr::bad_params("content must not be empty"));
    }
    if !AUDIENCES.contains(&audience.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "audience must be one of: {}",
            AUDIENCES.join(", ")
        )));
    }
    if let Some(dept) = &department_id {
        if !department_exists(conn, dept)? {
            return Err(HandlerErr::not_found("department not found"));
        }
    }

    // The sender is recorded as the teacher's user identity.
    let sender: Option<Option<String>> = conn
        .query_row(
            "SELECT user_id FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let Some(sender_user_id) = sender else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

    let announcement_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO announcements(id, title, content, sender_user_id, audience, department_id, semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &announcement_id,
            title.trim(),
            content.trim(),
            &sender_user_id,
            &audience,
            &department_id,
            semester,
            &created_at,
        ),
    )
    .map_err(db_err("announcements"))?;

    Ok(json!({ "announcementId": announcement_id, "createdAt": created_at }))
}

/// Newest first. Filters narrow the feed: an audience filter also returns
/// ALL-audience posts, and a department filter also returns campus-wide
/// posts with no department.
fn announcements_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT a.id, a.title, a.content, a.audience, a.department_id, a.semester,
                a.created_at, u.username
         FROM announcements a
         LEFT JOIN users u ON u.id = a.sender_user_id
         WHERE 1=1",
    );
    let mut args: Vec<Value> = Vec::new();
    if let Some(audience) = optional_str(params, "audience") {
        sql.push_str(" AND (a.audience = ? OR a.audience = 'ALL')");
        args.push(Value::Text(audience));
    }
    if let Some(dept) = optional_str(params, "departmentId") {
        sql.push_str(" AND (a.department_id = ? OR a.department_id IS NULL)");
        args.push(Value::Text(dept));
    }
    if let Some(sem) = params.get("semester").and_then(|v| v.as_i64()) {
        sql.push_str(" AND (a.semester = ? OR a.semester IS NULL)");
        args.push(Value::Integer(sem));
    }
    sql.push_str(" ORDER BY a.created_at DESC");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|_| HandlerErr::internal("announcements"))?;
    let announcements = stmt
        .query_map(rusqlite::params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "content": r.get::<_, String>(2)?,
                "audience": r.get::<_, String>(3)?,
                "departmentId": r.get::<_, Option<String>>(4)?,
                "semester": r.get::<_, Option<i64>>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "sender": r.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("announcements"))?;

    Ok(json!({ "announcements": announcements }))
}

fn dispatch(
    state: &AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.create" => Some(dispatch(state, req, announcements_create)),
        "announcements.list" => Some(dispatch(state, req, announcements_list)),
        _ => None,
    }
}
