mod backup;
mod editor;
mod grading;
mod ipc;
mod policy;
mod store;

use serde_json::json;
use std::io::{self, BufRead, Write};

/// A line that fails to parse as a request still gets a reply the shell can
/// correlate: if the raw JSON carries an id field, echo it back.
fn bad_json_response(line: &str, parse_err: &serde_json::Error) -> serde_json::Value {
    let id = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(serde_json::Value::Null);
    json!({
        "id": id,
        "ok": false,
        "error": { "code": "bad_json", "message": parse_err.to_string() },
    })
}

fn main() {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => bad_json_response(&line, &e),
        };
        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }
}
