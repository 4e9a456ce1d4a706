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

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn error_message(resp: &serde_json::Value) -> &str {
    resp.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn open_admin_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    let _ = request_ok(
        stdin,
        reader,
        "w1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "w2",
        "staff.upsert",
        json!({ "email": "admin@school.ac.tz", "name": "Admin", "role": "admin" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "w3",
        "session.open",
        json!({ "email": "admin@school.ac.tz" }),
    );
}

#[test]
fn sections_start_at_defaults_and_patches_validate_per_field() {
    let workspace = temp_dir("resultsd-settings");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_admin_workspace(&mut stdin, &mut reader, &workspace);

    let settings = request_ok(&mut stdin, &mut reader, "1", "settings.get", json!({}));
    assert_eq!(
        settings.get("school"),
        Some(&json!({ "name": "", "centreNumber": "", "motto": "", "phone": "" }))
    );
    assert_eq!(
        settings.get("exams"),
        Some(&json!({ "currentExamId": null, "defaultExamType": "TEST" }))
    );
    assert_eq!(
        settings.get("reports"),
        Some(&json!({ "showPositions": true, "showCentreSummary": true, "footerNote": "" }))
    );

    // Centre numbers are stored uppercase however they arrive.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.update",
        json!({
            "section": "school",
            "patch": { "name": "Mwenge Secondary School", "centreNumber": "s0123" }
        }),
    );
    let school = updated.get("settings").expect("school settings");
    assert_eq!(
        school.get("name").and_then(|v| v.as_str()),
        Some("Mwenge Secondary School")
    );
    assert_eq!(
        school.get("centreNumber").and_then(|v| v.as_str()),
        Some("S0123")
    );
    // Untouched fields keep their defaults through a partial patch.
    assert_eq!(school.get("motto").and_then(|v| v.as_str()), Some(""));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "settings.update",
        json!({ "section": "exams", "patch": { "defaultExamType": "annual" } }),
    );
    assert_eq!(
        updated
            .get("settings")
            .and_then(|s| s.get("defaultExamType"))
            .and_then(|v| v.as_str()),
        Some("ANNUAL")
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "settings.update",
        json!({ "section": "exams", "patch": { "currentExamId": "exam-1" } }),
    );
    assert_eq!(
        updated
            .get("settings")
            .and_then(|s| s.get("currentExamId"))
            .and_then(|v| v.as_str()),
        Some("exam-1")
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "settings.update",
        json!({ "section": "exams", "patch": { "currentExamId": null } }),
    );
    assert!(updated
        .get("settings")
        .and_then(|s| s.get("currentExamId"))
        .map(|v| v.is_null())
        .unwrap_or(false));

    let bad_type = request(
        &mut stdin,
        &mut reader,
        "6",
        "settings.update",
        json!({ "section": "exams", "patch": { "defaultExamType": "FINALS" } }),
    );
    assert_eq!(error_code(&bad_type), "bad_params");

    let bad_bool = request(
        &mut stdin,
        &mut reader,
        "7",
        "settings.update",
        json!({ "section": "reports", "patch": { "showPositions": "yes" } }),
    );
    assert_eq!(error_code(&bad_bool), "bad_params");
    assert!(error_message(&bad_bool).contains("boolean"));

    let long_note = request(
        &mut stdin,
        &mut reader,
        "8",
        "settings.update",
        json!({ "section": "reports", "patch": { "footerNote": "x".repeat(201) } }),
    );
    assert_eq!(error_code(&long_note), "bad_params");
    assert!(error_message(&long_note).contains("200"));

    let unknown_field = request(
        &mut stdin,
        &mut reader,
        "9",
        "settings.update",
        json!({ "section": "reports", "patch": { "headerNote": "hi" } }),
    );
    assert_eq!(error_code(&unknown_field), "bad_params");
    assert!(error_message(&unknown_field).contains("headerNote"));

    let unknown_section = request(
        &mut stdin,
        &mut reader,
        "10",
        "settings.update",
        json!({ "section": "grading", "patch": {} }),
    );
    assert_eq!(error_code(&unknown_section), "bad_params");

    let non_object = request(
        &mut stdin,
        &mut reader,
        "11",
        "settings.update",
        json!({ "section": "school", "patch": 42 }),
    );
    assert_eq!(error_code(&non_object), "bad_params");

    // A rejected patch leaves the section as it was.
    let settings = request_ok(&mut stdin, &mut reader, "12", "settings.get", json!({}));
    assert_eq!(
        settings.get("reports"),
        Some(&json!({ "showPositions": true, "showCentreSummary": true, "footerNote": "" }))
    );
}

#[test]
fn saved_sections_survive_reopening_the_workspace() {
    let workspace = temp_dir("resultsd-settings-reopen");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_admin_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "settings.update",
        json!({ "section": "school", "patch": { "name": "Kilakala Girls" } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.update",
        json!({
            "section": "reports",
            "patch": { "showCentreSummary": false, "footerNote": "Issued without erasure." }
        }),
    );
    drop(stdin);

    // Fresh process, same workspace. Reads need no session.
    let (_child2, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let settings = request_ok(&mut stdin, &mut reader, "4", "settings.get", json!({}));
    assert_eq!(
        settings
            .get("school")
            .and_then(|s| s.get("name"))
            .and_then(|v| v.as_str()),
        Some("Kilakala Girls")
    );
    assert_eq!(
        settings.get("reports"),
        Some(&json!({
            "showPositions": true,
            "showCentreSummary": false,
            "footerNote": "Issued without erasure."
        }))
    );
    assert_eq!(
        settings.get("exams"),
        Some(&json!({ "currentExamId": null, "defaultExamType": "TEST" }))
    );
}
