use super::{db_conn, required_str};
use crate::ipc::error::{db_err, is_unique_violation, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn validate_date(date: &str) -> Result<(), HandlerErr> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn validate_status(status: &str) -> Result<(), HandlerErr> {
    if status == "P" || status == "A" {
        Ok(())
    } else {
        Err(HandlerErr::bad_params("status must be 'P' or 'A'"))
    }
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|_| HandlerErr::internal("teachers"))
}

fn period_exists(conn: &Connection, period_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM periods WHERE id = ?", [period_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|_| HandlerErr::internal("periods"))
}

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|_| HandlerErr::internal("subjects"))
}

/// Bulk ledger write for one (subject, period, date) sheet. A row that already
/// exists for a student is skipped, never overwritten, so re-submitting the
/// same sheet is harmless. The caller gets saved/skipped counts back.
fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let subject_id = required_str(params, "subjectId")?;
    let period_id = required_str(params, "periodId")?;
    let date = required_str(params, "date")?;
    validate_date(&date)?;

    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?;
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }

    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if !period_exists(conn, &period_id)? {
        return Err(HandlerErr::not_found("period not found"));
    }

    // Validate the whole sheet before writing any of it.
    let mut sheet = Vec::with_capacity(entries.len());
    for entry in entries {
        let student_id = entry
            .get("studentId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("entry missing studentId"))?;
        let status = entry
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("entry missing status"))?;
        validate_status(status)?;
        sheet.push((student_id.to_string(), status.to_string()));
    }

    let mut saved = 0i64;
    let mut skipped = 0i64;

    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("attendance"))?;
    for (student_id, status) in &sheet {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM attendance
                 WHERE student_id = ? AND subject_id = ? AND date = ? AND period_id = ?",
                (student_id, &subject_id, &date, &period_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(|_| HandlerErr::internal("attendance"))?;
        if existing.is_some() {
            skipped += 1;
            continue;
        }

        let insert = tx.execute(
            "INSERT INTO attendance(id, student_id, subject_id, teacher_id, period_id, date, status)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &subject_id,
                &teacher_id,
                &period_id,
                &date,
                status,
            ),
        );
        match insert {
            Ok(_) => saved += 1,
            // Lost the race against a concurrent writer; the constraint holds.
            Err(e) if is_unique_violation(&e) => skipped += 1,
            Err(_) => return Err(HandlerErr::internal("attendance")),
        }
    }
    tx.commit().map_err(|_| HandlerErr::internal("attendance"))?;

    Ok(json!({ "saved": saved, "skipped": skipped }))
}

/// Single-row correction: overwrites the status if the row exists, creates it
/// otherwise.
fn attendance_set_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let student_id = required_str(params, "studentId")?;
    let subject_id = required_str(params, "subjectId")?;
    let period_id = required_str(params, "periodId")?;
    let date = required_str(params, "date")?;
    let status = required_str(params, "status")?;
    validate_date(&date)?;
    validate_status(&status)?;

    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    if !subject_exists(conn, &subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if !period_exists(conn, &period_id)? {
        return Err(HandlerErr::not_found("period not found"));
    }
    let student: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    if student.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO attendance(id, student_id, subject_id, teacher_id, period_id, date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, date, period_id)
         DO UPDATE SET status = excluded.status, teacher_id = excluded.teacher_id",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &subject_id,
            &teacher_id,
            &period_id,
            &date,
            &status,
        ),
    )
    .map_err(db_err("attendance"))?;

    Ok(json!({ "status": status }))
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
        "attendance.mark" => Some(dispatch(state, req, attendance_mark)),
        "attendance.setRecord" => Some(dispatch(state, req, attendance_set_record)),
        _ => None,
    }
}
