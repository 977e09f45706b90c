use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let resp: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        resp
    );
    resp.get("result").cloned().expect("result")
}

#[test]
fn semester_summary_ranks_descending_and_flags_below_75() {
    let workspace = temp_dir("campusd-ranking");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let dept = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "departments.create",
        json!({ "name": "Zoology", "code": "ZOO" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({
            "name": "Vertebrates",
            "code": "ZOO101",
            "semester": 1,
            "credit": 4,
            "subjectType": "CORE",
            "departmentId": dept_id
        }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({
            "name": "Zoo Teacher",
            "email": "zoo@campus.test",
            "departmentId": dept_id
        }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    let periods = request_ok(&mut stdin, &mut reader, "5", "periods.list", json!({}));
    let period_id = periods["periods"][0]["id"]
        .as_str()
        .expect("first period")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Topper", "Middler", "Absentee"].iter().enumerate() {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            &format!("6-{}", i),
            "students.create",
            json!({
                "name": name,
                "registerNumber": format!("ZOO2025-{:03}", i + 1),
                "email": format!("zoo{}@campus.test", i),
                "departmentId": dept_id,
                "semester": 1
            }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    // Ten class days in July. Topper attends 8, Middler 7, Absentee 3.
    let present_days = [8usize, 7, 3];
    for day in 1..=10usize {
        let entries: Vec<serde_json::Value> = student_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                json!({
                    "studentId": id,
                    "status": if day <= present_days[i] { "P" } else { "A" }
                })
            })
            .collect();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("7-{}", day),
            "attendance.mark",
            json!({
                "teacherId": teacher_id,
                "subjectId": subject_id,
                "periodId": period_id,
                "date": format!("2025-07-{:02}", day),
                "entries": entries
            }),
        );
    }

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.semesterSummary",
        json!({ "departmentId": dept_id, "semester": 1, "year": 2025, "month": 7 }),
    );

    assert_eq!(summary["totalClassesConducted"].as_i64(), Some(10));

    let ranked = summary["students"].as_array().expect("students");
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0]["name"].as_str(), Some("Topper"));
    assert_eq!(ranked[0]["percentage"].as_f64(), Some(80.0));
    assert_eq!(ranked[1]["name"].as_str(), Some("Middler"));
    assert_eq!(ranked[1]["percentage"].as_f64(), Some(70.0));
    assert_eq!(ranked[2]["name"].as_str(), Some("Absentee"));
    assert_eq!(ranked[2]["percentage"].as_f64(), Some(30.0));

    // Strictly-below-75 students land in the low attendance list.
    let low = summary["lowAttendance"].as_array().expect("lowAttendance");
    let low_names: Vec<&str> = low.iter().filter_map(|s| s["name"].as_str()).collect();
    assert_eq!(low_names, vec!["Middler", "Absentee"]);

    // A month with no ledger rows ranks everyone at zero.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.semesterSummary",
        json!({ "departmentId": dept_id, "semester": 1, "year": 2025, "month": 1 }),
    );
    assert_eq!(empty["totalClassesConducted"].as_i64(), Some(0));
    for student in empty["students"].as_array().expect("students") {
        assert_eq!(student["percentage"].as_f64(), Some(0.0));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
