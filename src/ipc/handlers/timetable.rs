use super::reports::{date_or_today, day_code, teacher_exists};
use super::subjects::department_exists;
use super::teachers::require_hod;
use super::{db_conn, optional_str, required_i64, required_str};
use crate::ipc::error::{db_err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub const DAYS: [&str; 6] = ["MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn periods_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, number, start_time, end_time FROM periods ORDER BY number")
        .map_err(|_| HandlerErr::internal("periods"))?;
    let periods = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "number": r.get::<_, i64>(1)?,
                "startTime": r.get::<_, String>(2)?,
                "endTime": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("periods"))?;
    Ok(json!({ "periods": periods }))
}

/// Full weekly grid for one (department, semester): one bucket per weekday,
/// slots ordered by period number. Days without slots come back as empty
/// arrays so clients can render the grid without special cases.
fn grid_for(
    conn: &Connection,
    department_id: &str,
    semester: i64,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT tt.day, p.id, p.number, p.start_time, p.end_time,
                    s.id, s.name, s.code, te.id, te.name
             FROM timetable tt
             JOIN periods p ON p.id = tt.period_id
             JOIN subjects s ON s.id = tt.subject_id
             JOIN teachers te ON te.id = tt.teacher_id
             WHERE tt.department_id = ? AND tt.semester = ?
             ORDER BY p.number",
        )
        .map_err(|_| HandlerErr::internal("timetable"))?;
    let slots = stmt
        .query_map((department_id, semester), |r| {
            Ok((
                r.get::<_, String>(0)?,
                json!({
                    "periodId": r.get::<_, String>(1)?,
                    "period": r.get::<_, i64>(2)?,
                    "startTime": r.get::<_, String>(3)?,
                    "endTime": r.get::<_, String>(4)?,
                    "subjectId": r.get::<_, String>(5)?,
                    "subject": r.get::<_, String>(6)?,
                    "subjectCode": r.get::<_, String>(7)?,
                    "teacherId": r.get::<_, String>(8)?,
                    "teacher": r.get::<_, String>(9)?
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("timetable"))?;

    let mut grid = serde_json::Map::new();
    for day in DAYS {
        grid.insert(day.to_string(), json!([]));
    }
    for (day, slot) in slots {
        if let Some(bucket) = grid.get_mut(&day).and_then(|v| v.as_array_mut()) {
            bucket.push(slot);
        }
    }
    Ok(serde_json::Value::Object(grid))
}

fn timetable_for_department(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = required_str(params, "departmentId")?;
    let semester = required_i64(params, "semester")?;
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }
    let grid = grid_for(conn, &department_id, semester)?;
    Ok(json!({
        "departmentId": department_id,
        "semester": semester,
        "days": grid
    }))
}

/// Same grid, resolved from the student's own cohort.
fn timetable_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let row = conn
        .query_row(
            "SELECT department_id, semester FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    let Some((department_id, semester)) = row else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let grid = grid_for(conn, &department_id, semester)?;
    Ok(json!({
        "departmentId": department_id,
        "semester": semester,
        "days": grid
    }))
}

fn timetable_teacher_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    teacher_exists(conn, &teacher_id)?;
    let date = date_or_today(params)?;
    let Some(day) = day_code(date) else {
        return Ok(json!({ "day": "SUN", "slots": [] }));
    };

    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.number, p.start_time, p.end_time,
                    s.id, s.name, s.code, tt.department_id, d.name, tt.semester
             FROM timetable tt
             JOIN periods p ON p.id = tt.period_id
             JOIN subjects s ON s.id = tt.subject_id
             JOIN departments d ON d.id = tt.department_id
             WHERE tt.teacher_id = ? AND tt.day = ?
             ORDER BY p.number",
        )
        .map_err(|_| HandlerErr::internal("timetable"))?;
    let slots = stmt
        .query_map((&teacher_id, day), |r| {
            Ok(json!({
                "periodId": r.get::<_, String>(0)?,
                "period": r.get::<_, i64>(1)?,
                "startTime": r.get::<_, String>(2)?,
                "endTime": r.get::<_, String>(3)?,
                "subjectId": r.get::<_, String>(4)?,
                "subject": r.get::<_, String>(5)?,
                "subjectCode": r.get::<_, String>(6)?,
                "departmentId": r.get::<_, String>(7)?,
                "department": r.get::<_, String>(8)?,
                "semester": r.get::<_, i64>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("timetable"))?;

    Ok(json!({ "day": day, "slots": slots }))
}

/// HOD-only slot assignment. One row per (department, semester, day, period);
/// assigning an occupied slot replaces its subject and teacher.
fn timetable_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let hod_id = required_str(params, "hodId")?;
    let semester = required_i64(params, "semester")?;
    let day = required_str(params, "day")?;
    let period_id = required_str(params, "periodId")?;
    let subject_id = required_str(params, "subjectId")?;
    let teacher_id = required_str(params, "teacherId")?;

    let hod = require_hod(conn, &hod_id)?;
    let department_id = optional_str(params, "departmentId").unwrap_or(hod.department_id);

    if !DAYS.contains(&day.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "day must be one of: {}",
            DAYS.join(", ")
        )));
    }
    if semester < 1 {
        return Err(HandlerErr::bad_params("semester must be >= 1"));
    }

    let period: Option<i64> = conn
        .query_row("SELECT 1 FROM periods WHERE id = ?", [&period_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("periods"))?;
    if period.is_none() {
        return Err(HandlerErr::not_found("period not found"));
    }
    let subject: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("subjects"))?;
    if subject.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }
    let teacher: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    if teacher.is_none() {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    conn.execute(
        "INSERT INTO timetable(id, department_id, semester, day, period_id, subject_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(department_id, semester, day, period_id)
         DO UPDATE SET subject_id = excluded.subject_id, teacher_id = excluded.teacher_id",
        (
            Uuid::new_v4().to_string(),
            &department_id,
            semester,
            &day,
            &period_id,
            &subject_id,
            &teacher_id,
        ),
    )
    .map_err(db_err("timetable"))?;

    Ok(json!({
        "departmentId": department_id,
        "semester": semester,
        "day": day
    }))
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
        "periods.list" => Some(dispatch(state, req, periods_list)),
        "timetable.forStudent" => Some(dispatch(state, req, timetable_for_student)),
        "timetable.forDepartment" => Some(dispatch(state, req, timetable_for_department)),
        "timetable.teacherDay" => Some(dispatch(state, req, timetable_teacher_day)),
        "timetable.upsert" => Some(dispatch(state, req, timetable_upsert)),
        _ => None,
    }
}
