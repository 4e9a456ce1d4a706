use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    let classes = match store::get_all(conn, collections::CLASSES) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let students = match store::get_all(conn, collections::STUDENTS) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    // Counts so the dashboard cards are useful without a second round trip.
    let mut counts: HashMap<String, i64> = HashMap::new();
    for (_, doc) in &students {
        if let Some(class_id) = doc.get("classId").and_then(|v| v.as_str()) {
            *counts.entry(class_id.to_string()).or_insert(0) += 1;
        }
    }

    let mut out: Vec<serde_json::Value> = classes
        .into_iter()
        .map(|(id, doc)| {
            let name = doc
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let student_count = counts.get(&id).copied().unwrap_or(0);
            json!({ "id": id, "name": name, "studentCount": student_count })
        })
        .collect();
    out.sort_by(|a, b| {
        let an = a["name"].as_str().unwrap_or("");
        let bn = b["name"].as_str().unwrap_or("");
        an.cmp(bn)
    });

    ok(&req.id, json!({ "classes": out }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = store::set(
        conn,
        collections::CLASSES,
        &class_id,
        &json!({ "name": name }),
        false,
    ) {
        return err(&req.id, "store_write_failed", format!("{e:?}"), None);
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        _ => None,
    }
}
