use super::subjects::department_exists;
use super::teachers::require_hod;
use super::{db_conn, optional_str, required_i64, required_str};
use crate::ipc::error::{db_err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::provision;
use chrono::{NaiveDate, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn validate_dob(dob: &Option<String>) -> Result<(), HandlerErr> {
    if let Some(d) = dob {
        NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("dob must be YYYY-MM-DD"))?;
    }
    Ok(())
}

/// Drops every enrollment the student has and re-enrolls them into the
/// subjects of the given (department, semester). Promotion, manual semester
/// edits and provisioning all funnel through here so the policy cannot drift.
fn replace_enrollments(
    tx: &rusqlite::Transaction,
    student_id: &str,
    department_id: &str,
    semester: i64,
) -> Result<i64, HandlerErr> {
    tx.execute("DELETE FROM enrollments WHERE student_id = ?", [student_id])
        .map_err(db_err("enrollments"))?;

    let mut stmt = tx
        .prepare(
            "SELECT id FROM subjects WHERE department_id = ? AND semester = ? ORDER BY code",
        )
        .map_err(|_| HandlerErr::internal("subjects"))?;
    let subject_ids = stmt
        .query_map((department_id, semester), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("subjects"))?;

    let enrolled_at = Utc::now().to_rfc3339();
    for subject_id in &subject_ids {
        tx.execute(
            "INSERT INTO enrollments(id, student_id, subject_id, enrolled_at)
             VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                subject_id,
                &enrolled_at,
            ),
        )
        .map_err(db_err("enrollments"))?;
    }
    Ok(subject_ids.len() as i64)
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let register_number = required_str(params, "registerNumber")?;
    let email = required_str(params, "email")?;
    let department_id = required_str(params, "departmentId")?;
    let semester = required_i64(params, "semester")?;
    let dob = optional_str(params, "dob");
    let phone = optional_str(params, "phone");
    let address = optional_str(params, "address");

    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email is not valid"));
    }
    if semester < 1 {
        return Err(HandlerErr::bad_params("semester must be >= 1"));
    }
    validate_dob(&dob)?;
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    // Fast-path duplicate checks; the UNIQUE constraints remain the backstop.
    let dup: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE register_number = ? OR email = ?",
            (&register_number, &email),
            |r| r.get(0),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    if dup.is_some() {
        return Err(HandlerErr::conflict(
            "register number or email already in use",
        ));
    }
    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("users"))?;
    if taken.is_some() {
        return Err(HandlerErr::conflict("email already in use"));
    }

    let password = provision::student_password(&name, dob.as_deref());
    let user_id = Uuid::new_v4().to_string();
    let student_id = Uuid::new_v4().to_string();

    // Identity, profile and auto-enrollment commit together; a failure in any
    // step leaves no orphan identity row behind.
    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("students"))?;
    tx.execute(
        "INSERT INTO users(id, username, email, password, is_staff, is_superuser)
         VALUES(?, ?, ?, ?, 0, 0)",
        (&user_id, &email, &email, &password),
    )
    .map_err(db_err("users"))?;
    tx.execute(
        "INSERT INTO students(id, user_id, name, register_number, email, department_id, semester, dob, phone, address)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &user_id,
            name.trim(),
            &register_number,
            &email,
            &department_id,
            semester,
            &dob,
            &phone,
            &address,
        ),
    )
    .map_err(db_err("students"))?;
    let enrolled = replace_enrollments(&tx, &student_id, &department_id, semester)?;
    tx.commit().map_err(|_| HandlerErr::internal("students"))?;

    Ok(json!({
        "studentId": student_id,
        "generatedPassword": password,
        "enrolledSubjects": enrolled
    }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT s.id, s.name, s.register_number, s.email, s.semester, s.dob, s.phone,
                d.id, d.name
         FROM students s
         JOIN departments d ON d.id = s.department_id
         WHERE 1=1",
    );
    let mut args: Vec<Value> = Vec::new();
    if let Some(dept) = optional_str(params, "departmentId") {
        sql.push_str(" AND s.department_id = ?");
        args.push(Value::Text(dept));
    }
    if let Some(sem) = params.get("semester").and_then(|v| v.as_i64()) {
        sql.push_str(" AND s.semester = ?");
        args.push(Value::Integer(sem));
    }
    if let Some(q) = optional_str(params, "search") {
        sql.push_str(
            " AND (s.name LIKE ? OR s.register_number LIKE ? OR s.email LIKE ?)",
        );
        let needle = format!("%{}%", q);
        args.push(Value::Text(needle.clone()));
        args.push(Value::Text(needle.clone()));
        args.push(Value::Text(needle));
    }
    sql.push_str(" ORDER BY s.semester, s.register_number");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|_| HandlerErr::internal("students"))?;
    let students = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "registerNumber": r.get::<_, String>(2)?,
                "email": r.get::<_, String>(3)?,
                "semester": r.get::<_, i64>(4)?,
                "dob": r.get::<_, Option<String>>(5)?,
                "phone": r.get::<_, Option<String>>(6)?,
                "departmentId": r.get::<_, String>(7)?,
                "departmentName": r.get::<_, String>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("students"))?;

    Ok(json!({ "students": students }))
}

fn students_search(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let q = required_str(params, "q")?;
    if q.trim().is_empty() {
        return Ok(json!({ "students": [] }));
    }
    let needle = format!("%{}%", q.trim());

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.register_number, s.semester, d.name
             FROM students s
             JOIN departments d ON d.id = s.department_id
             WHERE s.name LIKE ? OR s.register_number LIKE ?
             ORDER BY s.register_number
             LIMIT 20",
        )
        .map_err(|_| HandlerErr::internal("students"))?;
    let students = stmt
        .query_map((&needle, &needle), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "registerNumber": r.get::<_, String>(2)?,
                "semester": r.get::<_, i64>(3)?,
                "department": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("students"))?;

    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let row = conn
        .query_row(
            "SELECT s.id, s.name, s.register_number, s.email, s.semester, s.dob,
                    s.phone, s.address, d.id, d.name
             FROM students s
             JOIN departments d ON d.id = s.department_id
             WHERE s.id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "registerNumber": r.get::<_, String>(2)?,
                    "email": r.get::<_, String>(3)?,
                    "semester": r.get::<_, i64>(4)?,
                    "dob": r.get::<_, Option<String>>(5)?,
                    "phone": r.get::<_, Option<String>>(6)?,
                    "address": r.get::<_, Option<String>>(7)?,
                    "departmentId": r.get::<_, String>(8)?,
                    "departmentName": r.get::<_, String>(9)?
                }))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    row.ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;

    let existing = conn
        .query_row(
            "SELECT user_id, name, register_number, email, department_id, semester, phone, address
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    let Some((user_id, cur_name, cur_reg, cur_email, cur_dept, cur_sem, cur_phone, cur_address)) =
        existing
    else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let name = optional_str(params, "name").unwrap_or(cur_name);
    let register_number = optional_str(params, "registerNumber").unwrap_or(cur_reg);
    let email = optional_str(params, "email").unwrap_or_else(|| cur_email.clone());
    let department_id = optional_str(params, "departmentId").unwrap_or_else(|| cur_dept.clone());
    let semester = params
        .get("semester")
        .and_then(|v| v.as_i64())
        .unwrap_or(cur_sem);
    // Contact fields are nullable: an absent key keeps the stored value,
    // an explicit null (or blank string) clears it.
    let phone = match params.get("phone") {
        None => cur_phone,
        Some(_) => optional_str(params, "phone"),
    };
    let address = match params.get("address") {
        None => cur_address,
        Some(_) => optional_str(params, "address"),
    };

    if semester < 1 {
        return Err(HandlerErr::bad_params("semester must be >= 1"));
    }
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let cohort_changed = semester != cur_sem || department_id != cur_dept;

    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("students"))?;
    tx.execute(
        "UPDATE students
         SET name = ?, register_number = ?, email = ?, department_id = ?, semester = ?,
             phone = ?, address = ?
         WHERE id = ?",
        (
            &name,
            &register_number,
            &email,
            &department_id,
            semester,
            &phone,
            &address,
            &student_id,
        ),
    )
    .map_err(db_err("students"))?;

    let mut enrolled = None;
    if cohort_changed {
        enrolled = Some(replace_enrollments(&tx, &student_id, &department_id, semester)?);
    }
    if email != cur_email {
        if let Some(uid) = &user_id {
            tx.execute(
                "UPDATE users SET username = ?, email = ? WHERE id = ?",
                (&email, &email, uid),
            )
            .map_err(db_err("users"))?;
        }
    }
    tx.commit().map_err(|_| HandlerErr::internal("students"))?;

    Ok(json!({ "studentId": student_id, "enrolledSubjects": enrolled }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let user_id: Option<Option<String>> = conn
        .query_row(
            "SELECT user_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    let Some(user_id) = user_id else {
        return Err(HandlerErr::not_found("student not found"));
    };

    // Ledger rows first, then the profile, then the identity.
    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("students"))?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(db_err("attendance"))?;
    tx.execute("DELETE FROM enrollments WHERE student_id = ?", [&student_id])
        .map_err(db_err("enrollments"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_err("students"))?;
    if let Some(uid) = &user_id {
        tx.execute("DELETE FROM users WHERE id = ?", [uid])
            .map_err(db_err("users"))?;
    }
    tx.commit().map_err(|_| HandlerErr::internal("students"))?;

    Ok(json!({ "deleted": true }))
}

fn students_reset_password(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let row = conn
        .query_row(
            "SELECT user_id, name, dob FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;
    let Some((user_id, name, dob)) = row else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let Some(user_id) = user_id else {
        return Err(HandlerErr::bad_params("student has no linked user account"));
    };

    let password = provision::student_password(&name, dob.as_deref());
    conn.execute(
        "UPDATE users SET password = ? WHERE id = ?",
        (&password, &user_id),
    )
    .map_err(db_err("users"))?;

    Ok(json!({ "newPassword": password }))
}

/// Promotion: bump every student of the cohort by one semester and rebuild
/// their enrollments against the new semester's subject list.
fn promote_cohort(
    conn: &Connection,
    department_id: &str,
    current_semester: i64,
) -> Result<serde_json::Value, HandlerErr> {
    if current_semester < 1 {
        return Err(HandlerErr::bad_params("currentSemester must be >= 1"));
    }
    if !department_exists(conn, department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE department_id = ? AND semester = ?")
        .map_err(|_| HandlerErr::internal("students"))?;
    let cohort = stmt
        .query_map((department_id, current_semester), |r| {
            r.get::<_, String>(0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("students"))?;

    if cohort.is_empty() {
        return Err(HandlerErr::not_found("no students found in this semester"));
    }

    let target_semester = current_semester + 1;
    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("students"))?;
    for student_id in &cohort {
        tx.execute(
            "UPDATE students SET semester = ? WHERE id = ?",
            (target_semester, student_id),
        )
        .map_err(db_err("students"))?;
        replace_enrollments(&tx, student_id, department_id, target_semester)?;
    }
    tx.commit().map_err(|_| HandlerErr::internal("students"))?;

    Ok(json!({
        "studentsPromoted": cohort.len(),
        "targetSemester": target_semester
    }))
}

fn students_promote(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let department_id = required_str(params, "departmentId")?;
    let current_semester = required_i64(params, "currentSemester")?;
    promote_cohort(conn, &department_id, current_semester)
}

fn hod_promote(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let hod_id = required_str(params, "hodId")?;
    let current_semester = required_i64(params, "currentSemester")?;
    let hod = require_hod(conn, &hod_id)?;
    promote_cohort(conn, &hod.department_id, current_semester)
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
        "students.create" => Some(dispatch(state, req, students_create)),
        "students.list" => Some(dispatch(state, req, students_list)),
        "students.search" => Some(dispatch(state, req, students_search)),
        "students.get" => Some(dispatch(state, req, students_get)),
        "students.update" => Some(dispatch(state, req, students_update)),
        "students.delete" => Some(dispatch(state, req, students_delete)),
        "students.resetPassword" => Some(dispatch(state, req, students_reset_password)),
        "students.promote" => Some(dispatch(state, req, students_promote)),
        "hod.promote" => Some(dispatch(state, req, hod_promote)),
        _ => None,
    }
}
