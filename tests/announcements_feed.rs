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
fn feed_filters_widen_to_campus_wide_posts() {
    let workspace = temp_dir("campusd-announcements");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let dept_a = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "departments.create",
        json!({ "name": "Philosophy", "code": "PHI" }),
    );
    let dept_a_id = dept_a["departmentId"].as_str().expect("departmentId").to_string();
    let dept_b = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "departments.create",
        json!({ "name": "Sociology", "code": "SOC" }),
    );
    let dept_b_id = dept_b["departmentId"].as_str().expect("departmentId").to_string();

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({
            "name": "Phil Teacher",
            "email": "phil@campus.test",
            "departmentId": dept_a_id
        }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "announcements.create",
        json!({
            "teacherId": teacher_id,
            "title": "Campus wide",
            "content": "applies to everyone",
            "audience": "ALL"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "announcements.create",
        json!({
            "teacherId": teacher_id,
            "title": "Philosophy only",
            "content": "department post",
            "audience": "STUDENTS",
            "departmentId": dept_a_id,
            "semester": 1
        }),
    );

    let all = request_ok(&mut stdin, &mut reader, "7", "announcements.list", json!({}));
    assert_eq!(all["announcements"].as_array().expect("list").len(), 2);

    // Department A students see both; department B students only the
    // campus-wide post.
    let dept_a_feed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "announcements.list",
        json!({ "departmentId": dept_a_id, "audience": "STUDENTS" }),
    );
    assert_eq!(
        dept_a_feed["announcements"].as_array().expect("list").len(),
        2
    );
    let dept_b_feed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "announcements.list",
        json!({ "departmentId": dept_b_id, "audience": "STUDENTS" }),
    );
    let b_list = dept_b_feed["announcements"].as_array().expect("list");
    assert_eq!(b_list.len(), 1);
    assert_eq!(b_list[0]["title"].as_str(), Some("Campus wide"));

    let bad_audience = request(
        &mut stdin,
        &mut reader,
        "10",
        "announcements.create",
        json!({
            "teacherId": teacher_id,
            "title": "Bad",
            "content": "bad audience",
            "audience": "ROBOTS"
        }),
    );
    assert_eq!(
        bad_audience["error"]["code"].as_str(),
        Some("bad_params"),
        "{}",
        bad_audience
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
