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
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn assert_forbidden(resp: &serde_json::Value, role: &str) {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = resp.get("error").expect("error");
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("forbidden"));
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("role"))
            .and_then(|v| v.as_str()),
        Some(role)
    );
}

#[test]
fn first_staff_record_bootstraps_then_the_gate_closes() {
    let workspace = temp_dir("resultsd-bootstrap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // No staff exist yet, so nobody holds any role. The one ungated path in
    // is creating the first record, and it has to be an admin.
    let non_admin = request(
        &mut stdin,
        &mut reader,
        "2",
        "staff.upsert",
        json!({ "email": "t@school.ac.tz", "name": "T", "role": "class_teacher" }),
    );
    assert_forbidden(&non_admin, "none");
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2b",
        "staff.upsert",
        json!({ "email": "admin@school.ac.tz", "name": "Admin", "role": "admin" }),
    );
    assert_eq!(first.get("role").and_then(|v| v.as_str()), Some("admin"));

    let second = request(
        &mut stdin,
        &mut reader,
        "3",
        "staff.upsert",
        json!({ "email": "other@school.ac.tz", "name": "Other", "role": "academic" }),
    );
    assert_forbidden(&second, "none");

    // Still closed for non-admin sessions.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "staff.upsert",
        json!({
            "email": "teacher@school.ac.tz",
            "name": "Teacher",
            "role": "class_teacher"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.open",
        json!({ "email": "teacher@school.ac.tz" }),
    );
    let as_teacher = request(
        &mut stdin,
        &mut reader,
        "7",
        "staff.upsert",
        json!({ "email": "x@school.ac.tz", "name": "X", "role": "academic" }),
    );
    assert_forbidden(&as_teacher, "class_teacher");
}

#[test]
fn denied_edits_never_reach_the_store() {
    let workspace = temp_dir("resultsd-denied-write");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.upsert",
        json!({ "email": "admin@school.ac.tz", "name": "Admin", "role": "admin" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "Form Four A" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.save",
        json!({
            "classId": class_id,
            "subjects": [{ "code": "MATH", "name": "Mathematics" }]
        }),
    );
    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.create",
        json!({ "name": "Test One", "examType": "TEST" }),
    );
    let exam_id = exam
        .get("id")
        .and_then(|v| v.as_str())
        .expect("exam id")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({
            "classId": class_id,
            "admissionNo": "G001",
            "firstName": "Asha",
            "lastName": "Omari",
            "sex": "F"
        }),
    );
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();
    let cell = json!({
        "classId": class_id,
        "examId": exam_id,
        "studentId": student_id,
        "subject": "MATH",
        "value": 50
    });
    let _ = request_ok(&mut stdin, &mut reader, "8", "marks.updateCell", cell.clone());

    // Signed out: reads still work, writes bounce before touching anything.
    let _ = request_ok(&mut stdin, &mut reader, "9", "session.close", json!({}));
    let denied_cell = request(&mut stdin, &mut reader, "10", "marks.updateCell", {
        let mut p = cell.clone();
        p["value"] = json!(99);
        p
    });
    assert_forbidden(&denied_cell, "none");
    let denied_edit = request(&mut stdin, &mut reader, "11", "marks.edit", {
        let mut p = cell.clone();
        p["value"] = json!(99);
        p["nowMs"] = json!(1000);
        p
    });
    assert_forbidden(&denied_edit, "none");
    let denied_class = request(
        &mut stdin,
        &mut reader,
        "12",
        "classes.create",
        json!({ "name": "Rogue Class" }),
    );
    assert_forbidden(&denied_class, "none");

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "marks.grid",
        json!({ "classId": class_id, "examId": exam_id }),
    );
    let stored = grid
        .get("cells")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.as_array())
        .and_then(|row| row.first())
        .and_then(|v| v.as_u64());
    assert_eq!(stored, Some(50));

    // The denied edit was never staged either.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );
    let flushed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "marks.flush",
        json!({ "nowMs": 10000 }),
    );
    assert_eq!(
        flushed
            .get("results")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn inactive_staff_resolve_to_no_role() {
    let workspace = temp_dir("resultsd-inactive-staff");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.upsert",
        json!({ "email": "admin@school.ac.tz", "name": "Admin", "role": "admin" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "staff.upsert",
        json!({
            "email": "teacher@school.ac.tz",
            "name": "Teacher",
            "role": "class_teacher",
            "active": false
        }),
    );

    let inactive = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.open",
        json!({ "email": "teacher@school.ac.tz" }),
    );
    assert_eq!(inactive.get("role").and_then(|v| v.as_str()), Some("none"));
    let denied = request(
        &mut stdin,
        &mut reader,
        "6",
        "classes.create",
        json!({ "name": "Nope" }),
    );
    assert_eq!(
        denied
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("forbidden")
    );

    // Reactivated, the same email signs in with its role back.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "staff.upsert",
        json!({
            "email": "teacher@school.ac.tz",
            "name": "Teacher",
            "role": "class_teacher",
            "active": true
        }),
    );
    let active = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "session.open",
        json!({ "email": "teacher@school.ac.tz" }),
    );
    assert_eq!(
        active.get("role").and_then(|v| v.as_str()),
        Some("class_teacher")
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "classes.create",
        json!({ "name": "Form One C" }),
    );
}

#[test]
fn page_authorization_follows_the_role_table() {
    let workspace = temp_dir("resultsd-page-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2a",
        "staff.upsert",
        json!({ "email": "admin@school.ac.tz", "name": "Admin", "role": "admin" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2b",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2c",
        "staff.upsert",
        json!({
            "email": "teacher@school.ac.tz",
            "name": "Teacher",
            "role": "class teacher"
        }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.open",
        json!({ "email": "teacher@school.ac.tz" }),
    );
    // "class teacher" normalizes to the canonical spelling on the way in.
    assert_eq!(
        opened.get("role").and_then(|v| v.as_str()),
        Some("class_teacher")
    );

    for (id, page, allowed) in [
        ("4", "marks_entry", true),
        ("5", "ranking", true),
        ("6", "report_cards", true),
        ("7", "class_teacher", true),
        ("8", "admin", false),
        ("9", "academic", false),
        ("10", "sms_logs", false),
    ] {
        let resp = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "session.authorize",
            json!({ "page": page }),
        );
        assert_eq!(
            resp.get("allowed").and_then(|v| v.as_bool()),
            Some(allowed),
            "page {}",
            page
        );
    }

    let unknown = request(
        &mut stdin,
        &mut reader,
        "11",
        "session.authorize",
        json!({ "page": "timetable" }),
    );
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("unknown_page")
    );
}
