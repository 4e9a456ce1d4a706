use crate::grading::{
    self, aggregate_student, grade_from_mark, rank_students, MarkState, StudentAggregate,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, store_conn};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::marks::read_mark;
use super::students::{full_name, roster};
use super::subjects::class_subjects;

pub struct StudentRow {
    pub student_id: String,
    pub doc: Value,
    /// Subject code with the stored mark, in subject display order.
    pub marks: Vec<(String, Option<u32>)>,
    pub agg: StudentAggregate,
}

/// Everything the ranking and report surfaces need for one class and exam,
/// computed fresh from the store on every call.
pub fn class_rows(
    conn: &Connection,
    class_id: &str,
    exam_id: &str,
) -> anyhow::Result<(Vec<(String, Value)>, Vec<StudentRow>)> {
    let subjects = class_subjects(conn, class_id)?;
    let codes: Vec<String> = subjects
        .iter()
        .map(|(_, doc)| {
            doc.get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        })
        .collect();

    let mut rows = Vec::new();
    for (student_id, doc) in roster(conn, class_id)? {
        let marks: Vec<(String, Option<u32>)> = codes
            .iter()
            .map(|code| (code.clone(), read_mark(&doc, exam_id, code)))
            .collect();
        let agg = aggregate_student(marks.iter().map(|(_, m)| match m {
            Some(v) => MarkState::Scored(*v),
            None => MarkState::Absent,
        }));
        rows.push(StudentRow {
            student_id,
            doc,
            marks,
            agg,
        });
    }
    Ok((subjects, rows))
}

/// Positions keyed by student, 1-based. Rows must already be in roster
/// order so tied totals resolve the same way everywhere.
pub fn position_map(rows: &[StudentRow]) -> HashMap<String, usize> {
    let totals: Vec<(String, u32)> = rows
        .iter()
        .map(|r| (r.student_id.clone(), r.agg.total))
        .collect();
    rank_students(&totals)
        .into_iter()
        .map(|r| (r.student_id, r.position))
        .collect()
}

fn check_class_and_exam(
    conn: &Connection,
    req: &Request,
    class_id: &str,
    exam_id: &str,
) -> Result<(), serde_json::Value> {
    match store::get_by_id(conn, collections::CLASSES, class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(err(&req.id, "not_found", "class not found", None)),
        Err(e) => return Err(err(&req.id, "store_read_failed", format!("{e:?}"), None)),
    }
    match store::get_by_id(conn, collections::EXAMS, exam_id) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(err(&req.id, "not_found", "exam not found", None)),
        Err(e) => Err(err(&req.id, "store_read_failed", format!("{e:?}"), None)),
    }
}

fn mean_json(agg: &StudentAggregate) -> Value {
    match agg.mean {
        Some(m) => json!(grading::round_off_1_decimal(m)),
        None => Value::Null,
    }
}

fn handle_reports_class_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_class_and_exam(conn, req, &class_id, &exam_id) {
        return resp;
    }

    let (subjects, rows) = match class_rows(conn, &class_id, &exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let positions = position_map(&rows);

    let subject_list: Vec<serde_json::Value> = subjects
        .iter()
        .map(|(_, doc)| {
            json!({
                "code": doc.get("code").cloned().unwrap_or(Value::Null),
                "name": doc.get("name").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    let out_rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            let marks: serde_json::Map<String, Value> = r
                .marks
                .iter()
                .map(|(code, m)| (code.clone(), json!(m)))
                .collect();
            json!({
                "studentId": r.student_id,
                "admissionNo": r.doc.get("admissionNo").cloned().unwrap_or(Value::Null),
                "name": full_name(&r.doc),
                "sex": r.doc.get("sex").cloned().unwrap_or(Value::Null),
                "marks": marks,
                "satCount": r.agg.count,
                "total": r.agg.total,
                "mean": mean_json(&r.agg),
                "grade": r.agg.grade.map(|g| g.letter()),
                "division": r.agg.division.numeral(),
                "points": r.agg.points,
                "position": positions.get(&r.student_id).copied(),
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "examId": exam_id,
            "subjects": subject_list,
            "rows": out_rows,
        }),
    )
}

fn handle_reports_student_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student = match store::get_by_id(conn, collections::STUDENTS, &student_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let Some(class_id) = student
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
    else {
        return err(&req.id, "not_found", "student has no class", None);
    };
    let exam = match store::get_by_id(conn, collections::EXAMS, &exam_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return err(&req.id, "not_found", "exam not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let class = match store::get_by_id(conn, collections::CLASSES, &class_id) {
        Ok(Some(doc)) => doc,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    let (subjects, rows) = match class_rows(conn, &class_id, &exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let positions = position_map(&rows);
    let Some(row) = rows.iter().find(|r| r.student_id == student_id) else {
        return err(&req.id, "not_found", "student not in roster", None);
    };

    let subject_names: HashMap<&str, &str> = subjects
        .iter()
        .filter_map(|(_, doc)| {
            Some((
                doc.get("code").and_then(|v| v.as_str())?,
                doc.get("name").and_then(|v| v.as_str())?,
            ))
        })
        .collect();

    let card_rows: Vec<serde_json::Value> = row
        .marks
        .iter()
        .map(|(code, mark)| match mark {
            Some(m) => {
                let grade = grade_from_mark(*m as f64);
                json!({
                    "code": code,
                    "name": subject_names.get(code.as_str()).copied().unwrap_or(""),
                    "mark": m,
                    "grade": grade.letter(),
                    "comment": grade.comment(),
                    "absent": false,
                })
            }
            None => json!({
                "code": code,
                "name": subject_names.get(code.as_str()).copied().unwrap_or(""),
                "mark": Value::Null,
                "grade": Value::Null,
                "comment": Value::Null,
                "absent": true,
            }),
        })
        .collect();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "admissionNo": row.doc.get("admissionNo").cloned().unwrap_or(Value::Null),
            "name": full_name(&row.doc),
            "sex": row.doc.get("sex").cloned().unwrap_or(Value::Null),
            "classId": class_id,
            "className": class.get("name").cloned().unwrap_or(Value::Null),
            "examId": exam_id,
            "examName": exam.get("name").cloned().unwrap_or(Value::Null),
            "rows": card_rows,
            "satCount": row.agg.count,
            "totalMarks": row.agg.total,
            "meanScore": mean_json(&row.agg),
            "grade": row.agg.grade.map(|g| g.letter()),
            "comment": row.agg.grade.map(|g| g.comment()),
            "division": row.agg.division.numeral(),
            "points": row.agg.points,
            "position": positions.get(&student_id).copied(),
            "outOf": rows.len(),
        }),
    )
}

/// Persist one report record per student. Records are rewritten whole, not
/// merged: a student who was graded last run and is absent this run must
/// lose the stale grade key, and a breakdown must not keep subjects that
/// were since removed.
fn handle_reports_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = check_class_and_exam(conn, req, &class_id, &exam_id) {
        return resp;
    }

    let (_, rows) = match class_rows(conn, &class_id, &exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    let mut generated = 0usize;
    for row in &rows {
        let mut breakdown = serde_json::Map::new();
        for (code, mark) in &row.marks {
            let entry = match mark {
                Some(m) => json!({ "grade": grade_from_mark(*m as f64).letter() }),
                None => json!({ "absent": true }),
            };
            breakdown.insert(code.clone(), entry);
        }

        let mut record = json!({
            "examId": exam_id,
            "classId": class_id,
            "studentId": row.student_id,
            "totalMarks": row.agg.total,
            "meanScore": mean_json(&row.agg),
            "subjectBreakdown": breakdown,
        });
        if let Some(grade) = row.agg.grade {
            record["grade"] = json!(grade.letter());
        }

        let report_id = format!("{}_{}", exam_id, row.student_id);
        if let Err(e) = store::set(conn, collections::REPORTS, &report_id, &record, false) {
            return err(&req.id, "store_write_failed", format!("{e:?}"), None);
        }
        generated += 1;
    }

    ok(
        &req.id,
        json!({ "examId": exam_id, "classId": class_id, "generated": generated }),
    )
}

fn handle_reports_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_filter = optional_str(req, "classId");

    let rows = match store::get_all(conn, collections::REPORTS) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let reports: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(_, doc)| {
            let exam_match = doc.get("examId").and_then(|v| v.as_str()) == Some(exam_id.as_str());
            let class_match = match &class_filter {
                Some(c) => doc.get("classId").and_then(|v| v.as_str()) == Some(c.as_str()),
                None => true,
            };
            exam_match && class_match
        })
        .map(|(id, mut doc)| {
            doc["id"] = json!(id);
            doc
        })
        .collect();

    ok(&req.id, json!({ "reports": reports }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classModel" => Some(handle_reports_class_model(state, req)),
        "reports.studentCard" => Some(handle_reports_student_card(state, req)),
        "reports.generate" => Some(handle_reports_generate(state, req)),
        "reports.list" => Some(handle_reports_list(state, req)),
        _ => None,
    }
}
