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

fn error_code(resp: &serde_json::Value) -> &str {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn generated_passwords_follow_name_and_dob_rule() {
    let workspace = temp_dir("campusd-provision");
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
        json!({ "name": "Physics", "code": "PHY" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId");

    // Two subjects in the cohort so provisioning has something to enroll into.
    for (i, code) in ["PHY101", "PHY102"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "subjects.create",
            json!({
                "name": format!("Subject {}", code),
                "code": code,
                "semester": 1,
                "credit": 4,
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
            "name": "Anita Kumari",
            "registerNumber": "PHY2025-001",
            "email": "anita@campus.test",
            "departmentId": dept_id,
            "semester": 1,
            "dob": "2004-06-12"
        }),
    );
    assert_eq!(student["generatedPassword"].as_str(), Some("ANITA2004"));
    assert_eq!(student["enrolledSubjects"].as_i64(), Some(2));

    // No dob: year falls back to 2000.
    let student2 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({
            "name": "Jo",
            "registerNumber": "PHY2025-002",
            "email": "jo@campus.test",
            "departmentId": dept_id,
            "semester": 1
        }),
    );
    assert_eq!(student2["generatedPassword"].as_str(), Some("JO2000"));

    // Teachers without a dob get the fixed 1234 suffix.
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({
            "name": "Ravi Menon",
            "email": "ravi@campus.test",
            "departmentId": dept_id
        }),
    );
    assert_eq!(teacher["generatedPassword"].as_str(), Some("RAVIM1234"));
    assert_eq!(teacher["role"].as_str(), Some("TEACHER"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn logins_resolve_profiles_and_reject_bad_credentials() {
    let workspace = temp_dir("campusd-logins");
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
        json!({ "name": "Chemistry", "code": "CHE" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId").to_string();

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "name": "Meera Nair",
            "registerNumber": "CHE2025-001",
            "email": "meera@campus.test",
            "departmentId": dept_id,
            "semester": 2,
            "dob": "2005-01-20"
        }),
    );
    let student_password = student["generatedPassword"].as_str().expect("password");

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.studentLogin",
        json!({ "email": "meera@campus.test", "password": student_password }),
    );
    assert_eq!(login["name"].as_str(), Some("Meera Nair"));
    assert_eq!(login["semester"].as_i64(), Some(2));
    assert_eq!(login["department"].as_str(), Some("Chemistry"));

    let bad = request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.studentLogin",
        json!({ "email": "meera@campus.test", "password": "wrong" }),
    );
    assert_eq!(error_code(&bad), "invalid_credentials");

    let hod = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({
            "name": "Suresh Pillai",
            "email": "suresh@campus.test",
            "departmentId": dept_id,
            "isHod": true,
            "dob": "1980-03-04"
        }),
    );
    let hod_password = hod["generatedPassword"].as_str().expect("password");
    let teacher_login = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "auth.teacherLogin",
        json!({ "email": "suresh@campus.test", "password": hod_password }),
    );
    assert_eq!(teacher_login["role"].as_str(), Some("HOD"));

    // A student credential is not an admin credential.
    let not_admin = request(
        &mut stdin,
        &mut reader,
        "8",
        "auth.adminLogin",
        json!({ "username": "meera@campus.test", "password": student_password }),
    );
    assert_eq!(error_code(&not_admin), "forbidden");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "admin.create",
        json!({ "username": "registrar", "password": "open-sesame" }),
    );
    let admin_login = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "auth.adminLogin",
        json!({ "username": "registrar", "password": "open-sesame" }),
    );
    assert_eq!(admin_login["isSuperuser"].as_bool(), Some(true));

    // Duplicate provisioning is refused, not silently overwritten.
    let dup = request(
        &mut stdin,
        &mut reader,
        "11",
        "students.create",
        json!({
            "name": "Meera Clone",
            "registerNumber": "CHE2025-001",
            "email": "clone@campus.test",
            "departmentId": dept_id,
            "semester": 2
        }),
    );
    assert_eq!(error_code(&dup), "conflict");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reset_password_reapplies_the_rule() {
    let workspace = temp_dir("campusd-reset");
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
        json!({ "name": "Botany", "code": "BOT" }),
    );
    let dept_id = dept["departmentId"].as_str().expect("departmentId");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "name": "Arun Das",
            "registerNumber": "BOT2025-001",
            "email": "arun@campus.test",
            "departmentId": dept_id,
            "semester": 1,
            "dob": "2003-11-02"
        }),
    );
    let student_id = student["studentId"].as_str().expect("studentId");

    let reset = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.resetPassword",
        json!({ "studentId": student_id }),
    );
    assert_eq!(reset["newPassword"].as_str(), Some("ARUND2003"));

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.studentLogin",
        json!({ "email": "arun@campus.test", "password": "ARUND2003" }),
    );
    assert_eq!(login["name"].as_str(), Some("Arun Das"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
