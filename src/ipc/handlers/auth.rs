//! Stateless credential checks. Each login verifies the pair against the
//! identity store and resolves the caller's profile; no session or token is
//! issued, and no later method re-authenticates. The process only talks to a
//! local client, which is trusted to remember who it is.

use super::{db_conn, required_str};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct Identity {
    id: String,
    username: String,
    is_staff: bool,
    is_superuser: bool,
}

fn verify_credentials(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<Identity, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, username, password, is_staff, is_superuser
             FROM users WHERE username = ?",
            [username],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("users"))?;

    match row {
        Some((id, uname, stored, is_staff, is_superuser)) if stored == password => Ok(Identity {
            id,
            username: uname,
            is_staff: is_staff != 0,
            is_superuser: is_superuser != 0,
        }),
        _ => Err(HandlerErr::new("invalid_credentials", "invalid credentials")),
    }
}

/// Bootstrap method for a fresh workspace: creates a staff account so the
/// admin screens have someone to log in as. The process only talks to a
/// local client, so this is not gated behind an existing login.
fn admin_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;
    let email = super::optional_str(params, "email").unwrap_or_else(|| username.clone());

    if username.trim().is_empty() {
        return Err(HandlerErr::bad_params("username must not be empty"));
    }
    if password.len() < 4 {
        return Err(HandlerErr::bad_params("password too short"));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|_| HandlerErr::internal("users"))?;
    if taken.is_some() {
        return Err(HandlerErr::conflict("username already in use"));
    }

    let user_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, email, password, is_staff, is_superuser)
         VALUES(?, ?, ?, ?, 1, 1)",
        (&user_id, &username, &email, &password),
    )
    .map_err(crate::ipc::error::db_err("users"))?;

    Ok(json!({ "userId": user_id, "username": username }))
}

fn admin_login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;
    let identity = verify_credentials(conn, &username, &password)?;
    if !identity.is_staff {
        return Err(HandlerErr::forbidden("access denied: not an admin"));
    }
    Ok(json!({
        "userId": identity.id,
        "username": identity.username,
        "isSuperuser": identity.is_superuser
    }))
}

fn teacher_login(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = required_str(params, "email")?;
    let password = required_str(params, "password")?;
    let identity = verify_credentials(conn, &email, &password)?;

    let row = conn
        .query_row(
            "SELECT t.id, t.name, t.email, t.is_hod, d.id, d.name
             FROM teachers t
             JOIN departments d ON d.id = t.department_id
             WHERE t.user_id = ?",
            [&identity.id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("teachers"))?;

    let Some((teacher_id, name, email, is_hod, dept_id, dept_name)) = row else {
        return Err(HandlerErr::bad_params(
            "no teacher profile found for this user",
        ));
    };
    Ok(json!({
        "teacherId": teacher_id,
        "name": name,
        "email": email,
        "role": if is_hod != 0 { "HOD" } else { "TEACHER" },
        "departmentId": dept_id,
        "department": dept_name
    }))
}

fn student_login(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = required_str(params, "email")?;
    let password = required_str(params, "password")?;
    let identity = verify_credentials(conn, &email, &password)?;

    let row = conn
        .query_row(
            "SELECT s.id, s.name, s.email, s.semester, d.name
             FROM students s
             JOIN departments d ON d.id = s.department_id
             WHERE s.user_id = ?",
            [&identity.id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|_| HandlerErr::internal("students"))?;

    let Some((student_id, name, email, semester, dept_name)) = row else {
        return Err(HandlerErr::bad_params("not a student account"));
    };
    Ok(json!({
        "studentId": student_id,
        "name": name,
        "email": email,
        "department": dept_name,
        "semester": semester
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
        "admin.create" => Some(dispatch(state, req, admin_create)),
        "auth.adminLogin" => Some(dispatch(state, req, admin_login)),
        "auth.teacherLogin" => Some(dispatch(state, req, teacher_login)),
        "auth.studentLogin" => Some(dispatch(state, req, student_login)),
        _ => None,
    }
}
