use super::subjects::department_exists;
use super::{db_conn, month_key, required_i64, required_str};
use crate::backup;
use crate::calc;
use crate::export;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::db;
use serde_json::json;
use std::path::PathBuf;

/// Builds the month's attendance sheet for a cohort and writes it under
/// `<workspace>/exports/`. Rows are in register-number order, one per student.
fn handle_export_semester(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let conn = match db_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };

    let parsed = (|| -> Result<(String, i64, i64, i64, String), HandlerErr> {
        let department_id = required_str(&req.params, "departmentId")?;
        let semester = required_i64(&req.params, "semester")?;
        let (year, month, key) = month_key(&req.params)?;
        Ok((department_id, semester, year, month, key))
    })();
    let (department_id, semester, year, month, key) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match department_exists(conn, &department_id) {
        Ok(true) => {}
        Ok(false) => return HandlerErr::not_found("department not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    }

    let cohort = {
        let mut stmt = match conn.prepare(
            "SELECT id, name FROM students
             WHERE department_id = ? AND semester = ?
             ORDER BY register_number",
        ) {
            Ok(s) => s,
            Err(_) => return HandlerErr::internal("students").response(&req.id),
        };
        match stmt
            .query_map((&department_id, semester), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(c) => c,
            Err(_) => return HandlerErr::internal("students").response(&req.id),
        }
    };

    let mut rows = Vec::with_capacity(cohort.len());
    for (student_id, name) in cohort {
        let summary = match calc::monthly_summary(conn, &student_id, &key) {
            Ok(s) => s,
            Err(e) => return HandlerErr::from(e).response(&req.id),
        };
        rows.push(export::ExportRow {
            student: name,
            present: summary.present,
            total: summary.total,
            percentage: summary.percentage,
        });
    }

    let filename = export::export_filename(&department_id, semester, year, month);
    match export::write_semester_sheet(&workspace, &filename, &rows) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "filename": summary.filename,
                "path": summary.path.to_string_lossy(),
                "rows": summary.rows
            }),
        ),
        Err(_) => err(&req.id, "internal", "failed to write export file", None),
    }
}

fn handle_backup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) => PathBuf::from(p),
        None => return err(&req.id, "bad_params", "missing outPath", None),
    };

    match backup::backup_workspace(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "outPath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "sha256": summary.sha256
            }),
        ),
        Err(_) => err(&req.id, "internal", "failed to write backup bundle", None),
    }
}

fn handle_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(p) => PathBuf::from(p),
        None => return err(&req.id, "bad_params", "missing inPath", None),
    };

    // The live connection must be closed before the database file is swapped.
    state.db = None;
    let restored = backup::restore_workspace(&in_path, &workspace);
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(_) => return err(&req.id, "internal", "failed to reopen workspace", None),
    }

    match restored {
        Ok(summary) => ok(
            &req.id,
            json!({ "bundleFormat": summary.bundle_format_detected }),
        ),
        Err(_) => err(&req.id, "internal", "failed to restore backup bundle", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.semesterAttendance" => Some(handle_export_semester(state, req)),
        "workspace.backup" => Some(handle_backup(state, req)),
        "workspace.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}
