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

fn request(
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
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(stdin, reader, id, method, params);
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
fn update_moves_cohort_and_rebuilds_enrollments() {
    let workspace = temp_dir("campusd-students-update");
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
        json!({ "name": "Microbiology", "code": "MIC" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();

    for (i, (code, sem)) in [("MIC101", 1), ("MIC201", 2), ("MIC202", 2)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "subjects.create",
            json!({
                "name": format!("Subject {}", code),
                "code": code,
                "semester": sem,
                "credit": 3,
                "subjectType": "CORE",
                "departmentId": dept_id
            }),
        );
    }

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "name": "Mic Student",
            "registerNumber": "MIC2025-001",
            "email": "mic@campus.test",
            "departmentId": dept_id,
            "semester": 1
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    assert_eq!(student["enrolledSubjects"].as_i64(), Some(1));

    // Contact edits leave enrollments alone.
    let touched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({
            "studentId": student_id,
            "phone": "9876543210",
            "address": "12 Hostel Road"
        }),
    );
    assert!(touched["enrolledSubjects"].is_null());

    // A semester change rebuilds them for the new cohort.
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": student_id, "semester": 2 }),
    );
    assert_eq!(moved["enrolledSubjects"].as_i64(), Some(2));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(detail["semester"].as_i64(), Some(2));
    assert_eq!(detail["phone"].as_str(), Some("9876543210"));
    assert_eq!(detail["address"].as_str(), Some("12 Hostel Road"));

    // An explicit null clears a contact field; an absent key keeps it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentId": student_id, "phone": null }),
    );
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert!(cleared["phone"].is_null());
    assert_eq!(cleared["address"].as_str(), Some("12 Hostel Road"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_removes_the_profile_and_its_login() {
    let workspace = temp_dir("campusd-students-delete");
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
        json!({ "name": "Genetics", "code": "GEN" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "name": "Gene Student",
            "registerNumber": "GEN2025-001",
            "email": "gene@campus.test",
            "departmentId": dept_id,
            "semester": 1,
            "dob": "2004-02-02"
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let password = student["generatedPassword"].as_str().expect("password").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.delete",
        json!({ "studentId": student_id }),
    );

    let gone = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(gone["error"]["code"].as_str(), Some("not_found"));

    let dead_login = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.studentLogin",
        json!({ "email": "gene@campus.test", "password": password }),
    );
    assert_eq!(
        dead_login["error"]["code"].as_str(),
        Some("invalid_credentials")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn search_matches_name_and_register_number() {
    let workspace = temp_dir("campusd-students-search");
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
        json!({ "name": "Astronomy", "code": "AST" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();

    for (i, name) in ["Kiran Rao", "Kiran Das", "Vimal Roy"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({
                "name": name,
                "registerNumber": format!("AST2025-{:03}", i + 1),
                "email": format!("ast{}@campus.test", i),
                "departmentId": dept_id,
                "semester": 1
            }),
        );
    }

    let by_name = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.search",
        json!({ "q": "Kiran" }),
    );
    assert_eq!(by_name["students"].as_array().expect("students").len(), 2);

    let by_register = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.search",
        json!({ "q": "AST2025-003" }),
    );
    let matched = by_register["students"].as_array().expect("students");
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0]["name"].as_str(), Some("Vimal Roy"));

    let none = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.search",
        json!({ "q": "zzz" }),
    );
    assert_eq!(none["students"].as_array().expect("students").len(), 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
