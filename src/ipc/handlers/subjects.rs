use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, store_conn};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Subjects taught to a class, in the order the school entered them.
pub fn class_subjects(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<(String, Value)>> {
    let mut rows: Vec<(String, Value)> = store::get_all(conn, collections::SUBJECTS)?
        .into_iter()
        .filter(|(_, doc)| doc.get("classId").and_then(|v| v.as_str()) == Some(class_id))
        .collect();
    rows.sort_by_key(|(_, doc)| {
        (
            doc.get("sortOrder").and_then(|v| v.as_i64()).unwrap_or(0),
            doc.get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        )
    });
    Ok(rows)
}

fn subject_json(id: &str, doc: &Value) -> serde_json::Value {
    json!({
        "id": id,
        "classId": doc.get("classId").cloned().unwrap_or(Value::Null),
        "code": doc.get("code").cloned().unwrap_or(Value::Null),
        "name": doc.get("name").cloned().unwrap_or(Value::Null),
        "sortOrder": doc.get("sortOrder").cloned().unwrap_or(Value::Null),
    })
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match class_subjects(conn, &class_id) {
        Ok(rows) => {
            let subjects: Vec<serde_json::Value> = rows
                .iter()
                .map(|(id, doc)| subject_json(id, doc))
                .collect();
            ok(&req.id, json!({ "subjects": subjects }))
        }
        Err(e) => err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }
}

/// Replace the whole subject list for a class in one call. The page edits
/// the list as a unit, so partial saves would only invite drift between
/// what the teacher sees and what is stored.
fn handle_subjects_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_by_id(conn, collections::CLASSES, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }

    let Some(items) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing subjects array", None);
    };

    let mut cleaned: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        let code = item
            .get("code")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_ascii_uppercase())
            .unwrap_or_default();
        if code.is_empty() {
            return err(
                &req.id,
                "bad_params",
                "subject code must not be empty",
                Some(json!({ "index": i })),
            );
        }
        if code.len() > 16 {
            return err(
                &req.id,
                "bad_params",
                "subject code too long (max 16)",
                Some(json!({ "index": i, "code": code })),
            );
        }
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return err(
                &req.id,
                "bad_params",
                "subject name must not be empty",
                Some(json!({ "index": i, "code": code })),
            );
        }
        if !seen.insert(code.clone()) {
            return err(
                &req.id,
                "duplicate_subject_code",
                format!("subject code {} listed twice", code),
                Some(json!({ "code": code })),
            );
        }
        cleaned.push((code, name));
    }

    // Drop subjects that fell off the list, then upsert the survivors with
    // their new positions.
    let existing = match class_subjects(conn, &class_id) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    for (id, doc) in &existing {
        let code = doc.get("code").and_then(|v| v.as_str()).unwrap_or("");
        if !seen.contains(code) {
            if let Err(e) = store::delete(conn, collections::SUBJECTS, id) {
                return err(&req.id, "store_write_failed", format!("{e:?}"), None);
            }
        }
    }
    let mut saved: Vec<serde_json::Value> = Vec::new();
    for (i, (code, name)) in cleaned.iter().enumerate() {
        let id = format!("{}:{}", class_id, code);
        let doc = json!({
            "classId": class_id,
            "code": code,
            "name": name,
            "sortOrder": i as i64,
        });
        if let Err(e) = store::set(conn, collections::SUBJECTS, &id, &doc, false) {
            return err(&req.id, "store_write_failed", format!("{e:?}"), None);
        }
        saved.push(subject_json(&id, &doc));
    }

    ok(&req.id, json!({ "subjects": saved }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.save" => Some(handle_subjects_save(state, req)),
        _ => None,
    }
}
