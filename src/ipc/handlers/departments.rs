use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Include basic counts so the admin dashboard can show useful cards.
    let mut stmt = match conn.prepare(
        "SELECT
           d.id,
           d.name,
           d.code,
           (SELECT COUNT(*) FROM students s WHERE s.department_id = d.id) AS student_count,
           (SELECT COUNT(*) FROM teachers t WHERE t.department_id = d.id) AS teacher_count
         FROM departments d
         ORDER BY d.name",
    ) {
        Ok(s) => s,
        Err(_) => return err(&req.id, "internal", "database operation failed", None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let teacher_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "studentCount": student_count,
                "teacherCount": teacher_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(departments) => ok(&req.id, json!({ "departments": departments })),
        Err(_) => err(&req.id, "internal", "database operation failed", None),
    }
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };

    let department_id = Uuid::new_v4().to_string();
    if conn
        .execute(
            "INSERT INTO departments(id, name, code) VALUES(?, ?, ?)",
            (&department_id, &name, &code),
        )
        .is_err()
    {
        return err(
            &req.id,
            "internal",
            "database operation failed",
            Some(json!({ "table": "departments" })),
        );
    }

    ok(
        &req.id,
        json!({ "departmentId": department_id, "name": name, "code": code }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(handle_departments_list(state, req)),
        "departments.create" => Some(handle_departments_create(state, req)),
        _ => None,
    }
}
