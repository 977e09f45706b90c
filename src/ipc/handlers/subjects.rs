use super::{db_conn, required_i64, required_str};
use crate::ipc::error::{db_err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SUBJECT_TYPES: [&str; 6] = ["CORE", "SEC", "VAC", "DSE", "MDC", "AEC"];

pub fn department_exists(conn: &Connection, department_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM departments WHERE id = ?",
        [department_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|_| HandlerErr::internal("departments"))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let code = required_str(params, "code")?;
    let semester = required_i64(params, "semester")?;
    let credit = required_i64(params, "credit")?;
    let subject_type = required_str(params, "subjectType")?;
    let department_id = required_str(params, "departmentId")?;

    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if semester < 1 {
        return Err(HandlerErr::bad_params("semester must be >= 1"));
    }
    if credit < 0 {
        return Err(HandlerErr::bad_params("credit must be >= 0"));
    }
    if !SUBJECT_TYPES.contains(&subject_type.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "subjectType must be one of: {}",
            SUBJECT_TYPES.join(", ")
        )));
    }
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, semester, credit, subject_type, department_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            name.trim(),
            &code,
            semester,
            credit,
            &subject_type,
            &department_id,
        ),
    )
    .map_err(db_err("subjects"))?;

    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_for_semester(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = required_str(params, "departmentId")?;
    let semester = required_i64(params, "semester")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, code, semester, credit, subject_type
             FROM subjects
             WHERE department_id = ? AND semester = ?
             ORDER BY code",
        )
        .map_err(|_| HandlerErr::internal("subjects"))?;
    let subjects = stmt
        .query_map((&department_id, semester), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "semester": r.get::<_, i64>(3)?,
                "credit": r.get::<_, i64>(4)?,
                "subjectType": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("subjects"))?;

    Ok(json!({ "subjects": subjects }))
}

fn subjects_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = required_str(params, "subjectId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("subjects"))?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.register_number
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.subject_id = ?
             ORDER BY s.register_number",
        )
        .map_err(|_| HandlerErr::internal("enrollments"))?;
    let students = stmt
        .query_map([&subject_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "registerNumber": r.get::<_, String>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("enrollments"))?;

    Ok(json!({ "students": students }))
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
        "subjects.create" => Some(dispatch(state, req, subjects_create)),
        "subjects.listForSemester" => Some(dispatch(state, req, subjects_for_semester)),
        "subjects.students" => Some(dispatch(state, req, subjects_students)),
        _ => None,
    }
}
