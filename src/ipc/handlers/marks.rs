use crate::editor::{parse_mark_value, CellKey, CommitOutcome};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_now_ms, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use rusqlite::Connection;
use serde_json::{json, Value};

use super::students::{full_name, roster};
use super::subjects::class_subjects;

/// Stored mark for one cell; `None` covers both an explicit null and a cell
/// never written. Either way the student is absent for that paper.
pub fn read_mark(doc: &Value, exam_id: &str, code: &str) -> Option<u32> {
    doc.get("marks")?
        .get(exam_id)?
        .get(code)?
        .as_u64()
        .map(|v| v as u32)
}

fn resolve_cell(
    conn: &Connection,
    req: &Request,
) -> Result<(CellKey, Option<u32>), serde_json::Value> {
    let class_id = required_str(req, "classId")?;
    let exam_id = required_str(req, "examId")?;
    let student_id = required_str(req, "studentId")?;
    let code = required_str(req, "subject")?.trim().to_ascii_uppercase();

    match store::get_by_id(conn, collections::EXAMS, &exam_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(err(&req.id, "not_found", "exam not found", None)),
        Err(e) => return Err(err(&req.id, "store_read_failed", format!("{e:?}"), None)),
    }
    let student = match store::get_by_id(conn, collections::STUDENTS, &student_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return Err(err(&req.id, "not_found", "student not found", None)),
        Err(e) => return Err(err(&req.id, "store_read_failed", format!("{e:?}"), None)),
    };
    if student.get("classId").and_then(|v| v.as_str()) != Some(class_id.as_str()) {
        return Err(err(&req.id, "not_found", "student not in this class", None));
    }
    let subject_id = format!("{}:{}", class_id, code);
    match store::get_by_id(conn, collections::SUBJECTS, &subject_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(err(&req.id, "not_found", "subject not found", None)),
        Err(e) => return Err(err(&req.id, "store_read_failed", format!("{e:?}"), None)),
    }

    let prior = read_mark(&student, &exam_id, &code);
    Ok((
        CellKey {
            class_id,
            exam_id,
            student_id,
            subject: code,
        },
        prior,
    ))
}

fn write_mark(
    conn: &Connection,
    key: &CellKey,
    value: Option<u32>,
) -> Result<(), (&'static str, String)> {
    // Merge through a missing student would conjure an orphan document.
    match store::get_by_id(conn, collections::STUDENTS, &key.student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(("not_found", "student not found".to_string())),
        Err(e) => return Err(("store_read_failed", format!("{e:?}"))),
    }
    let patch = json!({
        "marks": { key.exam_id.as_str(): { key.subject.as_str(): value } }
    });
    store::set(conn, collections::STUDENTS, &key.student_id, &patch, true)
        .map_err(|e| ("store_write_failed", format!("{e:?}")))
}

fn handle_marks_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::get_by_id(conn, collections::CLASSES, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }
    match store::get_by_id(conn, collections::EXAMS, &exam_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "exam not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    }

    let subjects = match class_subjects(conn, &class_id) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let students = match roster(conn, &class_id) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    let codes: Vec<String> = subjects
        .iter()
        .map(|(_, doc)| {
            doc.get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        })
        .collect();

    let mut cells: Vec<Vec<Option<u32>>> = Vec::with_capacity(students.len());
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    for (id, doc) in &students {
        let row: Vec<Option<u32>> = codes
            .iter()
            .map(|code| read_mark(doc, &exam_id, code))
            .collect();
        cells.push(row);
        rows.push(json!({
            "id": id,
            "admissionNo": doc.get("admissionNo").cloned().unwrap_or(Value::Null),
            "name": full_name(doc),
        }));
    }

    let subject_list: Vec<serde_json::Value> = subjects
        .iter()
        .map(|(_, doc)| {
            json!({
                "code": doc.get("code").cloned().unwrap_or(Value::Null),
                "name": doc.get("name").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "examId": exam_id,
            "subjects": subject_list,
            "students": rows,
            "cells": cells,
        }),
    )
}

/// Immediate write path used by bulk entry and imports. Validation happens
/// before anything is stored; a rejection carries the value the cell should
/// show again.
fn handle_marks_update_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };
    let (key, prior) = match resolve_cell(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let value = match parse_mark_value(raw) {
        Ok(v) => v,
        Err(reason) => {
            return err(
                &req.id,
                "invalid_mark",
                reason,
                Some(json!({ "restored": prior })),
            )
        }
    };

    if let Err((code, message)) = write_mark(conn, &key, value) {
        return err(
            &req.id,
            code,
            message,
            Some(json!({ "restored": prior })),
        );
    }

    ok(&req.id, json!({ "saved": true, "value": value }))
}

/// Debounced entry path: the shell reports each committed keystroke burst
/// here with its clock reading, and flushes on a timer. The staged value is
/// not in the store until the flush writes it.
fn handle_marks_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { store, edits, .. } = state;
    let Some(conn) = store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };
    let now_ms = match required_now_ms(req, "nowMs") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (key, prior) = match resolve_cell(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match edits.commit(key, prior, raw, now_ms) {
        CommitOutcome::Staged { value, deadline_ms } => ok(
            &req.id,
            json!({
                "staged": true,
                "value": value,
                "flushAfterMs": deadline_ms,
                "pending": edits.pending_count(),
            }),
        ),
        CommitOutcome::Rejected { reason, restored } => err(
            &req.id,
            "invalid_mark",
            reason,
            Some(json!({ "restored": restored })),
        ),
    }
}

fn handle_marks_flush(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { store, edits, .. } = state;
    let Some(conn) = store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let now_ms = match required_now_ms(req, "nowMs") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut results: Vec<serde_json::Value> = Vec::new();
    for key in edits.due(now_ms) {
        let Some(value) = edits.begin_save(&key) else {
            continue;
        };
        match write_mark(conn, &key, value) {
            Ok(()) => {
                edits.finish_save(&key, true);
                results.push(json!({
                    "studentId": key.student_id,
                    "subject": key.subject,
                    "saved": true,
                    "value": value,
                }));
            }
            Err((code, message)) => {
                let restored = edits.finish_save(&key, false);
                results.push(json!({
                    "studentId": key.student_id,
                    "subject": key.subject,
                    "saved": false,
                    "restored": restored,
                    "code": code,
                    "message": message,
                }));
            }
        }
    }

    ok(
        &req.id,
        json!({ "results": results, "pending": edits.pending_count() }),
    )
}

fn handle_marks_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "pending": state.edits.pending_count() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.grid" => Some(handle_marks_grid(state, req)),
        "marks.updateCell" => Some(handle_marks_update_cell(state, req)),
        "marks.edit" => Some(handle_marks_edit(state, req)),
        "marks.flush" => Some(handle_marks_flush(state, req)),
        "marks.pending" => Some(handle_marks_pending(state, req)),
        _ => None,
    }
}
