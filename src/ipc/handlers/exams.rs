use crate::ipc::error::{err, ok};
use crate::ipc::helpers::store_conn;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

pub const EXAM_TYPES: &[&str] = &["TEST", "MIDTERM", "ANNUAL"];

fn exam_json(id: &str, doc: &Value) -> serde_json::Value {
    json!({
        "id": id,
        "name": doc.get("name").cloned().unwrap_or(Value::Null),
        "examType": doc.get("examType").cloned().unwrap_or(Value::Null),
        "createdAt": doc.get("createdAt").cloned().unwrap_or(Value::Null),
    })
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return ok(&req.id, json!({ "exams": [] }));
    };
    let mut rows = match store::get_all(conn, collections::EXAMS) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    // Newest first. RFC 3339 strings in UTC order chronologically.
    rows.sort_by(|(aid, a), (bid, b)| {
        let ka = a.get("createdAt").and_then(|v| v.as_str()).unwrap_or("");
        let kb = b.get("createdAt").and_then(|v| v.as_str()).unwrap_or("");
        kb.cmp(ka).then_with(|| bid.cmp(aid))
    });
    let exams: Vec<serde_json::Value> = rows.iter().map(|(id, doc)| exam_json(id, doc)).collect();
    ok(&req.id, json!({ "exams": exams }))
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let exam_type = req
        .params
        .get("examType")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default();
    if !EXAM_TYPES.contains(&exam_type.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "examType must be one of: TEST, MIDTERM, ANNUAL",
            Some(json!({ "examType": exam_type })),
        );
    }

    let exam_id = Uuid::new_v4().to_string();
    let doc = json!({
        "name": name,
        "examType": exam_type,
        "createdAt": Utc::now().to_rfc3339(),
    });
    if let Err(e) = store::set(conn, collections::EXAMS, &exam_id, &doc, false) {
        return err(&req.id, "store_write_failed", format!("{e:?}"), None);
    }

    ok(&req.id, exam_json(&exam_id, &doc))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.create" => Some(handle_exams_create(state, req)),
        _ => None,
    }
}
