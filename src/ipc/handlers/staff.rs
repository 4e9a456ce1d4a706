use crate::ipc::error::{err, ok};
use crate::ipc::helpers::store_conn;
use crate::ipc::types::{AppState, Request};
use crate::policy::Role;
use crate::store::{self, collections};
use serde_json::{json, Value};
use uuid::Uuid;

fn staff_json(id: &str, doc: &Value) -> serde_json::Value {
    json!({
        "id": id,
        "name": doc.get("name").cloned().unwrap_or(Value::Null),
        "email": doc.get("email").cloned().unwrap_or(Value::Null),
        "role": doc.get("role").cloned().unwrap_or(Value::Null),
        "active": doc.get("active").and_then(|v| v.as_bool()).unwrap_or(false),
        "classId": doc.get("classId").cloned().unwrap_or(Value::Null),
    })
}

fn handle_staff_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut rows = match store::get_all(conn, collections::STAFF) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    rows.sort_by(|(_, a), (_, b)| {
        let an = a.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let bn = b.get("name").and_then(|v| v.as_str()).unwrap_or("");
        an.cmp(bn)
    });
    let staff: Vec<serde_json::Value> = rows.iter().map(|(id, doc)| staff_json(id, doc)).collect();
    ok(&req.id, json!({ "staff": staff }))
}

/// Create-or-update keyed by email, since email is what sessions resolve
/// against. Role spellings are normalized before they hit the store so the
/// resolver never has to guess twice.
fn handle_staff_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if email.is_empty() || !email.contains('@') {
        return err(&req.id, "bad_params", "email must be a valid address", None);
    }
    let name = req
        .params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let role_raw = req.params.get("role").and_then(|v| v.as_str()).unwrap_or("");
    let role = Role::parse(role_raw);
    if role == Role::None {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: admin, headmaster, academic, class_teacher",
            Some(json!({ "role": role_raw })),
        );
    }
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let mut doc = json!({
        "name": name,
        "email": email,
        "role": role.canonical(),
        "active": active,
    });
    if let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) {
        let class_id = class_id.trim();
        if !class_id.is_empty() {
            match store::get_by_id(conn, collections::CLASSES, class_id) {
                Ok(Some(_)) => doc["classId"] = json!(class_id),
                Ok(None) => return err(&req.id, "not_found", "class not found", None),
                Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
            }
        }
    }

    let existing = match store::get_all(conn, collections::STAFF) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let staff_id = existing
        .into_iter()
        .find(|(_, d)| {
            d.get("email")
                .and_then(|v| v.as_str())
                .map(|e| e.eq_ignore_ascii_case(&email))
                .unwrap_or(false)
        })
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(e) = store::set(conn, collections::STAFF, &staff_id, &doc, false) {
        return err(&req.id, "store_write_failed", format!("{e:?}"), None);
    }

    ok(&req.id, staff_json(&staff_id, &doc))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.list" => Some(handle_staff_list(state, req)),
        "staff.upsert" => Some(handle_staff_upsert(state, req)),
        _ => None,
    }
}
