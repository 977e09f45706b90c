//! Read-side report methods. These are thin shims over `calc`: parse the
//! params, run the aggregation, shape the envelope.

use super::teachers::require_hod;
use super::{db_conn, month_key, optional_str, required_str};
use crate::calc;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, Local, NaiveDate, Weekday};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Timetable day codes. Sunday has no slot in the grid.
pub fn day_code(date: NaiveDate) -> Option<&'static str> {
    match date.weekday() {
        Weekday::Mon => Some("MON"),
        Weekday::Tue => Some("TUE"),
        Weekday::Wed => Some("WED"),
        Weekday::Thu => Some("THU"),
        Weekday::Fri => Some("FRI"),
        Weekday::Sat => Some("SAT"),
        Weekday::Sun => None,
    }
}

/// `date` param when present, today otherwise.
pub fn date_or_today(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match optional_str(params, "date") {
        Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD")),
        None => Ok(Local::now().date_naive()),
    }
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    row.map(|_| ())
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

pub fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<(), HandlerErr> {
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    row.map(|_| ())
        .ok_or_else(|| HandlerErr::not_found("teacher not found"))
}

fn student_daily(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_exists(conn, &student_id)?;
    let date = date_or_today(params)?.format("%Y-%m-%d").to_string();
    let summary = calc::daily_summary(conn, &student_id, &date)?;
    Ok(serde_json::to_value(summary).map_err(|_| HandlerErr::internal("attendance"))?)
}

fn student_monthly(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_exists(conn, &student_id)?;
    let (year, month, key) = month_key(params)?;
    let summary = calc::monthly_summary(conn, &student_id, &key)?;
    let mut value =
        serde_json::to_value(summary).map_err(|_| HandlerErr::internal("attendance"))?;
    value["year"] = json!(year);
    value["month"] = json!(month);
    Ok(value)
}

/// Month totals plus every ledger row of that month, for the calendar view.
fn student_overview(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_exists(conn, &student_id)?;
    let (year, month, key) = month_key(params)?;

    let summary = calc::monthly_summary(conn, &student_id, &key)?;
    let from = format!("{}-01", key);
    let to = format!("{}-31", key);
    let records = calc::day_records(conn, &student_id, &from, &to)?;

    Ok(json!({
        "year": year,
        "month": month,
        "present": summary.present,
        "total": summary.total,
        "percentage": summary.percentage,
        "subjects": summary.subjects,
        "records": records
    }))
}

fn semester_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = required_str(params, "departmentId")?;
    let semester = super::required_i64(params, "semester")?;
    let (_, _, key) = month_key(params)?;
    let ranking = calc::semester_ranking(conn, &department_id, semester, &key)?;
    Ok(serde_json::to_value(ranking).map_err(|_| HandlerErr::internal("attendance"))?)
}

fn teacher_monthly(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    teacher_exists(conn, &teacher_id)?;
    let (_, _, key) = month_key(params)?;
    let summary = calc::teacher_monthly(conn, &teacher_id, &key)?;
    Ok(serde_json::to_value(summary).map_err(|_| HandlerErr::internal("attendance"))?)
}

/// The teacher's timetable slots for the day, each flagged completed when a
/// matching ledger row already exists.
fn teacher_today_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    teacher_exists(conn, &teacher_id)?;
    let date = date_or_today(params)?;
    let date_str = date.format("%Y-%m-%d").to_string();

    let Some(day) = day_code(date) else {
        return Ok(json!({ "date": date_str, "day": "SUN", "slots": [] }));
    };

    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.number, p.start_time, p.end_time,
                    s.id, s.name, s.code, t.department_id, t.semester
             FROM timetable t
             JOIN periods p ON p.id = t.period_id
             JOIN subjects s ON s.id = t.subject_id
             WHERE t.teacher_id = ? AND t.day = ?
             ORDER BY p.number",
        )
        .map_err(|_| HandlerErr::internal("timetable"))?;
    let slots = stmt
        .query_map((&teacher_id, day), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, i64>(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("timetable"))?;

    let mut out = Vec::with_capacity(slots.len());
    for (period_id, number, start, end, subject_id, subject, code, dept_id, semester) in slots {
        let marked: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM attendance
                 WHERE subject_id = ? AND period_id = ? AND date = ?
                 LIMIT 1",
                (&subject_id, &period_id, &date_str),
                |r| r.get(0),
            )
            .optional()
            .map_err(|_| HandlerErr::internal("attendance"))?;
        out.push(json!({
            "periodId": period_id,
            "period": number,
            "startTime": start,
            "endTime": end,
            "subjectId": subject_id,
            "subject": subject,
            "subjectCode": code,
            "departmentId": dept_id,
            "semester": semester,
            "status": if marked.is_some() { "completed" } else { "pending" }
        }));
    }

    Ok(json!({ "date": date_str, "day": day, "slots": out }))
}

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0))
        .map_err(|_| HandlerErr::internal("counts"))
}

fn admin_dashboard(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "departments": count(conn, "SELECT COUNT(*) FROM departments")?,
        "subjects": count(conn, "SELECT COUNT(*) FROM subjects")?,
        "students": count(conn, "SELECT COUNT(*) FROM students")?,
        "teachers": count(conn, "SELECT COUNT(*) FROM teachers")?
    }))
}

fn hod_dashboard(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let hod_id = required_str(params, "hodId")?;
    let hod = require_hod(conn, &hod_id)?;
    let date = date_or_today(params)?.format("%Y-%m-%d").to_string();

    let students: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE department_id = ?",
            [&hod.department_id],
            |r| r.get(0),
        )
        .map_err(|_| HandlerErr::internal("students"))?;
    let teachers: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teachers WHERE department_id = ?",
            [&hod.department_id],
            |r| r.get(0),
        )
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let subjects: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subjects WHERE department_id = ?",
            [&hod.department_id],
            |r| r.get(0),
        )
        .map_err(|_| HandlerErr::internal("subjects"))?;

    let (present, total): (i64, i64) = conn
        .query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN a.status = 'P' THEN 1 ELSE 0 END), 0),
               COUNT(*)
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE s.department_id = ? AND a.date = ?",
            (&hod.department_id, &date),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| HandlerErr::internal("attendance"))?;

    Ok(json!({
        "hodId": hod.teacher_id,
        "departmentId": hod.department_id,
        "students": students,
        "teachers": teachers,
        "subjects": subjects,
        "todayPresentPercentage": calc::percentage(present, total)
    }))
}

/// Per-subject all-time percentages for the student home screen.
fn student_dashboard(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    student_exists(conn, &student_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.code, s.credit, s.subject_type
             FROM enrollments e
             JOIN subjects s ON s.id = e.subject_id
             WHERE e.student_id = ?
             ORDER BY s.code",
        )
        .map_err(|_| HandlerErr::internal("enrollments"))?;
    let enrolled = stmt
        .query_map([&student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("enrollments"))?;

    let mut subjects = Vec::with_capacity(enrolled.len());
    let mut total_credits = 0i64;
    let mut pct_sum = 0f64;
    for (subject_id, name, code, credit, subject_type) in &enrolled {
        let pct = calc::subject_percentage(conn, &student_id, subject_id)?;
        total_credits += credit;
        pct_sum += pct;
        subjects.push(json!({
            "subjectId": subject_id,
            "name": name,
            "code": code,
            "credit": credit,
            "subjectType": subject_type,
            "percentage": pct
        }));
    }
    let average = if subjects.is_empty() {
        0.0
    } else {
        calc::round2(pct_sum / subjects.len() as f64)
    };

    Ok(json!({
        "subjects": subjects,
        "totalCredits": total_credits,
        "averagePercentage": average
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
        "attendance.studentDaily" => Some(dispatch(state, req, student_daily)),
        "attendance.studentMonthly" => Some(dispatch(state, req, student_monthly)),
        "attendance.studentOverview" => Some(dispatch(state, req, student_overview)),
        "attendance.semesterSummary" => Some(dispatch(state, req, semester_summary)),
        "attendance.teacherMonthly" => Some(dispatch(state, req, teacher_monthly)),
        "teacher.todayStatus" => Some(dispatch(state, req, teacher_today_status)),
        "admin.dashboardStats" => Some(dispatch(state, req, admin_dashboard)),
        "hod.dashboardStats" => Some(dispatch(state, req, hod_dashboard)),
        "student.dashboard" => Some(dispatch(state, req, student_dashboard)),
        _ => None,
    }
}
