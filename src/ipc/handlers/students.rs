use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, store_conn};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

/// Class roster in display order: admission number first, then name. Every
/// surface that walks a class (grid rows, report cards, CSV export) goes
/// through this so they all agree on row order.
pub fn roster(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<(String, Value)>> {
    let mut rows: Vec<(String, Value)> = store::get_all(conn, collections::STUDENTS)?
        .into_iter()
        .filter(|(_, doc)| doc.get("classId").and_then(|v| v.as_str()) == Some(class_id))
        .collect();
    rows.sort_by(|(_, a), (_, b)| {
        let ka = (
            a.get("admissionNo").and_then(|v| v.as_str()).unwrap_or(""),
            a.get("firstName").and_then(|v| v.as_str()).unwrap_or(""),
            a.get("lastName").and_then(|v| v.as_str()).unwrap_or(""),
        );
        let kb = (
            b.get("admissionNo").and_then(|v| v.as_str()).unwrap_or(""),
            b.get("firstName").and_then(|v| v.as_str()).unwrap_or(""),
            b.get("lastName").and_then(|v| v.as_str()).unwrap_or(""),
        );
        ka.cmp(&kb)
    });
    Ok(rows)
}

pub fn full_name(doc: &Value) -> String {
    let first = doc.get("firstName").and_then(|v| v.as_str()).unwrap_or("");
    let last = doc.get("lastName").and_then(|v| v.as_str()).unwrap_or("");
    format!("{} {}", first, last).trim().to_string()
}

fn class_exists(conn: &Connection, class_id: &str) -> anyhow::Result<bool> {
    Ok(store::get_by_id(conn, collections::CLASSES, class_id)?.is_some())
}

fn admission_no_taken(
    conn: &Connection,
    class_id: &str,
    admission_no: &str,
    except_student: Option<&str>,
) -> anyhow::Result<bool> {
    for (id, doc) in store::get_all(conn, collections::STUDENTS)? {
        if Some(id.as_str()) == except_student {
            continue;
        }
        let same_class = doc.get("classId").and_then(|v| v.as_str()) == Some(class_id);
        let same_no = doc.get("admissionNo").and_then(|v| v.as_str()) == Some(admission_no);
        if same_class && same_no {
            return Ok(true);
        }
    }
    Ok(false)
}

fn trimmed_field(
    req: &Request,
    raw: &Value,
    key: &str,
    max: usize,
) -> Result<String, serde_json::Value> {
    let Some(s) = raw.as_str() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            None,
        ));
    };
    let s = s.trim();
    if s.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    if s.len() > max {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} too long (max {})", key, max),
            None,
        ));
    }
    Ok(s.to_string())
}

fn parse_sex(req: &Request, raw: &Value) -> Result<String, serde_json::Value> {
    let s = raw
        .as_str()
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default();
    if s == "M" || s == "F" {
        Ok(s)
    } else {
        Err(err(&req.id, "bad_params", "sex must be M or F", None))
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rows = match roster(conn, &class_id) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, doc)| {
            json!({
                "id": id,
                "classId": doc.get("classId").cloned().unwrap_or(Value::Null),
                "admissionNo": doc.get("admissionNo").cloned().unwrap_or(Value::Null),
                "firstName": doc.get("firstName").cloned().unwrap_or(Value::Null),
                "lastName": doc.get("lastName").cloned().unwrap_or(Value::Null),
                "name": full_name(&doc),
                "sex": doc.get("sex").cloned().unwrap_or(Value::Null),
                "guardianPhone": doc.get("guardianPhone").cloned().unwrap_or(Value::Null),
                "active": doc.get("active").and_then(|v| v.as_bool()).unwrap_or(true),
            })
        })
        .collect();
    ok(&req.id, json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }

    let admission_no = match trimmed_field(
        req,
        req.params.get("admissionNo").unwrap_or(&Value::Null),
        "admissionNo",
        40,
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match trimmed_field(
        req,
        req.params.get("firstName").unwrap_or(&Value::Null),
        "firstName",
        80,
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match trimmed_field(
        req,
        req.params.get("lastName").unwrap_or(&Value::Null),
        "lastName",
        80,
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let sex = match parse_sex(req, req.params.get("sex").unwrap_or(&Value::Null)) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match admission_no_taken(conn, &class_id, &admission_no, None) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "duplicate_admission_no",
                format!("admission number {} already in this class", admission_no),
                Some(json!({ "admissionNo": admission_no })),
            )
        }
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }

    let mut doc = json!({
        "classId": class_id,
        "admissionNo": admission_no,
        "firstName": first_name,
        "lastName": last_name,
        "sex": sex,
        "active": req.params.get("active").and_then(|v| v.as_bool()).unwrap_or(true),
        "marks": {},
    });
    if let Some(phone) = req.params.get("guardianPhone").and_then(|v| v.as_str()) {
        let phone = phone.trim();
        if !phone.is_empty() {
            doc["guardianPhone"] = json!(phone);
        }
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = store::set(conn, collections::STUDENTS, &student_id, &doc, false) {
        return err(&req.id, "store_write_failed", format!("{e:?}"), None);
    }

    doc["id"] = json!(student_id);
    ok(&req.id, doc)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let existing = match store::get_by_id(conn, collections::STUDENTS, &student_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    // Marks flow through their own methods with their own validation and
    // debouncing; a profile patch must not smuggle them in.
    if patch.contains_key("marks") {
        return err(
            &req.id,
            "bad_params",
            "marks may not be edited through students.update",
            None,
        );
    }

    let mut validated = serde_json::Map::new();
    for (key, value) in patch {
        match key.as_str() {
            "admissionNo" => {
                let v = match trimmed_field(req, value, "admissionNo", 40) {
                    Ok(v) => v,
                    Err(resp) => return resp,
                };
                validated.insert(key.clone(), json!(v));
            }
            "firstName" => {
                let v = match trimmed_field(req, value, "firstName", 80) {
                    Ok(v) => v,
                    Err(resp) => return resp,
                };
                validated.insert(key.clone(), json!(v));
            }
            "lastName" => {
                let v = match trimmed_field(req, value, "lastName", 80) {
                    Ok(v) => v,
                    Err(resp) => return resp,
                };
                validated.insert(key.clone(), json!(v));
            }
            "sex" => {
                let v = match parse_sex(req, value) {
                    Ok(v) => v,
                    Err(resp) => return resp,
                };
                validated.insert(key.clone(), json!(v));
            }
            "guardianPhone" => {
                // Clearing the number is a legitimate edit.
                if value.is_null() {
                    validated.insert(key.clone(), Value::Null);
                } else {
                    let v = match trimmed_field(req, value, "guardianPhone", 32) {
                        Ok(v) => v,
                        Err(resp) => return resp,
                    };
                    validated.insert(key.clone(), json!(v));
                }
            }
            "active" => {
                let Some(v) = value.as_bool() else {
                    return err(&req.id, "bad_params", "active must be a boolean", None);
                };
                validated.insert(key.clone(), json!(v));
            }
            "classId" => {
                let v = match trimmed_field(req, value, "classId", 80) {
                    Ok(v) => v,
                    Err(resp) => return resp,
                };
                match class_exists(conn, &v) {
                    Ok(true) => {}
                    Ok(false) => return err(&req.id, "not_found", "class not found", None),
                    Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
                }
                validated.insert(key.clone(), json!(v));
            }
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown field: {}", other),
                    None,
                )
            }
        }
    }

    // Uniqueness holds in the class the student ends up in.
    let target_class = validated
        .get("classId")
        .and_then(|v| v.as_str())
        .or_else(|| existing.get("classId").and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string();
    let target_no = validated
        .get("admissionNo")
        .and_then(|v| v.as_str())
        .or_else(|| existing.get("admissionNo").and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string();
    if !target_no.is_empty() {
        match admission_no_taken(conn, &target_class, &target_no, Some(&student_id)) {
            Ok(false) => {}
            Ok(true) => {
                return err(
                    &req.id,
                    "duplicate_admission_no",
                    format!("admission number {} already in this class", target_no),
                    Some(json!({ "admissionNo": target_no })),
                )
            }
            Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
        }
    }

    if let Err(e) = store::set(
        conn,
        collections::STUDENTS,
        &student_id,
        &Value::Object(validated),
        true,
    ) {
        return err(&req.id, "store_write_failed", format!("{e:?}"), None);
    }

    match store::get_by_id(conn, collections::STUDENTS, &student_id) {
        Ok(Some(mut doc)) => {
            doc["id"] = json!(student_id);
            ok(&req.id, doc)
        }
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        _ => None,
    }
}
