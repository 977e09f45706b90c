use super::subjects::department_exists;
use super::{db_conn, optional_str, required_str};
use crate::ipc::error::{db_err, is_unique_violation, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::provision;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub struct Hod {
    pub teacher_id: String,
    pub department_id: String,
}

/// HOD-only methods pass the acting teacher's id; anyone without the HOD
/// role is refused.
pub fn require_hod(conn: &Connection, hod_id: &str) -> Result<Hod, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, department_id, is_hod FROM teachers WHERE id = ?",
            [hod_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    match row {
        None => Err(HandlerErr::not_found("teacher not found")),
        Some((_, _, 0)) => Err(HandlerErr::forbidden("access denied: not an HOD")),
        Some((teacher_id, department_id, _)) => Ok(Hod {
            teacher_id,
            department_id,
        }),
    }
}

fn role_for(is_hod: bool) -> &'static str {
    if is_hod {
        "HOD"
    } else {
        "TEACHER"
    }
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let email = required_str(params, "email")?;
    let department_id = required_str(params, "departmentId")?;
    let is_hod = params.get("isHod").and_then(|v| v.as_bool()).unwrap_or(false);
    let dob = optional_str(params, "dob");

    if name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email is not valid"));
    }
    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [&email],
            |r| r.get(0),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("users"))?;
    if taken.is_some() {
        return Err(HandlerErr::conflict("email already in use"));
    }

    let password = provision::teacher_password(&name, dob.as_deref());
    let user_id = Uuid::new_v4().to_string();
    let teacher_id = Uuid::new_v4().to_string();

    // Identity and profile land together or not at all.
    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    tx.execute(
        "INSERT INTO users(id, username, email, password, is_staff, is_superuser)
         VALUES(?, ?, ?, ?, 0, 0)",
        (&user_id, &email, &email, &password),
    )
    .map_err(db_err("users"))?;
    tx.execute(
        "INSERT INTO teachers(id, user_id, name, email, department_id, role, is_hod)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &user_id,
            name.trim(),
            &email,
            &department_id,
            role_for(is_hod),
            is_hod as i64,
        ),
    )
    .map_err(db_err("teachers"))?;
    tx.commit().map_err(|_| HandlerErr::internal("teachers"))?;

    Ok(json!({
        "teacherId": teacher_id,
        "role": role_for(is_hod),
        "generatedPassword": password
    }))
}

fn teachers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let department_id = optional_str(params, "departmentId");

    let sql = "SELECT t.id, t.name, t.email, t.role, t.is_hod, d.id, d.name
               FROM teachers t
               JOIN departments d ON d.id = t.department_id
               WHERE (?1 IS NULL OR t.department_id = ?1)
               ORDER BY t.name";
    let mut stmt = conn
        .prepare(sql)
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let teachers = stmt
        .query_map([&department_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "isHod": r.get::<_, i64>(4)? != 0,
                "departmentId": r.get::<_, String>(5)?,
                "departmentName": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("teachers"))?;

    Ok(json!({ "teachers": teachers }))
}

fn teachers_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let row = conn
        .query_row(
            "SELECT t.id, t.name, t.email, t.role, t.is_hod, d.id, d.name
             FROM teachers t
             JOIN departments d ON d.id = t.department_id
             WHERE t.id = ?",
            [&teacher_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "email": r.get::<_, String>(2)?,
                    "role": r.get::<_, String>(3)?,
                    "isHod": r.get::<_, i64>(4)? != 0,
                    "departmentId": r.get::<_, String>(5)?,
                    "departmentName": r.get::<_, String>(6)?
                }))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    row.ok_or_else(|| HandlerErr::not_found("teacher not found"))
}

fn teachers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;

    let existing = conn
        .query_row(
            "SELECT user_id, name, email, department_id, is_hod FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let Some((user_id, cur_name, cur_email, cur_dept, cur_is_hod)) = existing else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

    let name = optional_str(params, "name").unwrap_or(cur_name);
    let email = optional_str(params, "email").unwrap_or_else(|| cur_email.clone());
    let department_id = optional_str(params, "departmentId").unwrap_or(cur_dept);
    let is_hod = params
        .get("isHod")
        .and_then(|v| v.as_bool())
        .unwrap_or(cur_is_hod != 0);

    if !department_exists(conn, &department_id)? {
        return Err(HandlerErr::not_found("department not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    tx.execute(
        "UPDATE teachers SET name = ?, email = ?, department_id = ?, role = ?, is_hod = ?
         WHERE id = ?",
        (
            &name,
            &email,
            &department_id,
            role_for(is_hod),
            is_hod as i64,
            &teacher_id,
        ),
    )
    .map_err(db_err("teachers"))?;
    if email != cur_email {
        if let Some(uid) = &user_id {
            tx.execute(
                "UPDATE users SET username = ?, email = ? WHERE id = ?",
                (&email, &email, uid),
            )
            .map_err(db_err("users"))?;
        }
    }
    tx.commit().map_err(|_| HandlerErr::internal("teachers"))?;

    Ok(json!({ "teacherId": teacher_id, "role": role_for(is_hod) }))
}

fn teachers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let user_id: Option<Option<String>> = conn
        .query_row(
            "SELECT user_id FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let Some(user_id) = user_id else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

    // Explicit delete in dependency order; the identity row goes last.
    let tx = conn
        .unchecked_transaction()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    tx.execute("DELETE FROM attendance WHERE teacher_id = ?", [&teacher_id])
        .map_err(db_err("attendance"))?;
    tx.execute("DELETE FROM timetable WHERE teacher_id = ?", [&teacher_id])
        .map_err(db_err("timetable"))?;
    tx.execute(
        "DELETE FROM teacher_subjects WHERE teacher_id = ?",
        [&teacher_id],
    )
    .map_err(db_err("teacher_subjects"))?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(db_err("teachers"))?;
    if let Some(uid) = &user_id {
        tx.execute("DELETE FROM users WHERE id = ?", [uid])
            .map_err(db_err("users"))?;
    }
    tx.commit().map_err(|_| HandlerErr::internal("teachers"))?;

    Ok(json!({ "deleted": true }))
}

fn teachers_reset_password(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let row = conn
        .query_row(
            "SELECT user_id, name FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let Some((user_id, name)) = row else {
        return Err(HandlerErr::not_found("teacher not found"));
    };
    let Some(user_id) = user_id else {
        return Err(HandlerErr::bad_params("teacher has no linked user account"));
    };

    let dob = optional_str(params, "dob");
    let password = provision::teacher_password(&name, dob.as_deref());
    conn.execute(
        "UPDATE users SET password = ? WHERE id = ?",
        (&password, &user_id),
    )
    .map_err(db_err("users"))?;

    Ok(json!({ "newPassword": password }))
}

fn teachers_subjects(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(params, "teacherId")?;
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    let Some(teacher_name) = name else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.code, s.semester
             FROM teacher_subjects ts
             JOIN subjects s ON s.id = ts.subject_id
             WHERE ts.teacher_id = ?
             ORDER BY s.semester, s.code",
        )
        .map_err(|_| HandlerErr::internal("teacher_subjects"))?;
    let subjects = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "semester": r.get::<_, i64>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| HandlerErr::internal("teacher_subjects"))?;

    Ok(json!({ "teacher": teacher_name, "subjects": subjects }))
}

fn hod_assign_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let hod_id = required_str(params, "hodId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let subject_id = required_str(params, "subjectId")?;
    require_hod(conn, &hod_id)?;

    let teacher_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;
    if teacher_ok.is_none() {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    let subject_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("subjects"))?;
    if subject_ok.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO teacher_subjects(id, teacher_id, subject_id) VALUES(?, ?, ?)",
        (&id, &teacher_id, &subject_id),
    ) {
        Ok(_) => Ok(json!({ "assigned": true })),
        Err(e) if is_unique_violation(&e) => {
            Err(HandlerErr::conflict("teacher already assigned to subject"))
        }
        Err(_) => Err(HandlerErr::internal("teacher_subjects")),
    }
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
        "teachers.create" => Some(dispatch(state, req, teachers_create)),
        "teachers.list" => Some(dispatch(state, req, teachers_list)),
        "teachers.get" => Some(dispatch(state, req, teachers_get)),
        "teachers.update" => Some(dispatch(state, req, teachers_update)),
        "teachers.delete" => Some(dispatch(state, req, teachers_delete)),
        "teachers.resetPassword" => Some(dispatch(state, req, teachers_reset_password)),
        "teachers.subjects" => Some(dispatch(state, req, teachers_subjects)),
        "hod.assignTeacher" => Some(dispatch(state, req, hod_assign_teacher)),
        _ => None,
    }
}
