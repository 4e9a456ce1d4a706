use crate::grading::{centre_summary, gpa_display, subject_badge, subject_statistics, SubjectOutcome};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, store_conn};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use rusqlite::Connection;
use serde_json::{json, Value};

fn load_reports(
    conn: &Connection,
    exam_id: &str,
    class_filter: Option<&str>,
) -> anyhow::Result<Vec<Value>> {
    Ok(store::get_all(conn, collections::REPORTS)?
        .into_iter()
        .filter(|(_, doc)| {
            let exam_match = doc.get("examId").and_then(|v| v.as_str()) == Some(exam_id);
            let class_match = match class_filter {
                Some(c) => doc.get("classId").and_then(|v| v.as_str()) == Some(c),
                None => true,
            };
            exam_match && class_match
        })
        .map(|(_, doc)| doc)
        .collect())
}

fn exam_exists(conn: &Connection, req: &Request, exam_id: &str) -> Result<(), serde_json::Value> {
    match store::get_by_id(conn, collections::EXAMS, exam_id) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(err(&req.id, "not_found", "exam not found", None)),
        Err(e) => Err(err(&req.id, "store_read_failed", format!("{e:?}"), None)),
    }
}

/// Per-subject performance table. Entries come from the generated report
/// records, so the table reflects whatever the last generation run saw.
fn handle_stats_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_filter = optional_str(req, "classId");
    if let Err(resp) = exam_exists(conn, req, &exam_id) {
        return resp;
    }

    let reports = match load_reports(conn, &exam_id, class_filter.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    let mut entries: Vec<(String, SubjectOutcome)> = Vec::new();
    for doc in &reports {
        let Some(breakdown) = doc.get("subjectBreakdown").and_then(|v| v.as_object()) else {
            continue;
        };
        for (code, entry) in breakdown {
            let outcome = if entry.get("absent").and_then(|v| v.as_bool()) == Some(true) {
                SubjectOutcome::Absent
            } else if let Some(letter) = entry.get("grade").and_then(|v| v.as_str()) {
                SubjectOutcome::Graded(letter.to_string())
            } else {
                SubjectOutcome::Sat
            };
            entries.push((code.clone(), outcome));
        }
    }

    let stats = subject_statistics(entries);
    let subjects: Vec<serde_json::Value> = stats
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut v = json!(s);
            v["rank"] = json!(i + 1);
            v["gpaDisplay"] = json!(gpa_display(s.gpa));
            v["badge"] = json!(subject_badge(s.gpa));
            v
        })
        .collect();

    ok(
        &req.id,
        json!({
            "examId": exam_id,
            "classId": class_filter,
            "subjects": subjects,
        }),
    )
}

/// Centre-wide pass rate and competency for one exam, over every class.
fn handle_stats_centre(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = exam_exists(conn, req, &exam_id) {
        return resp;
    }

    let reports = match load_reports(conn, &exam_id, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };

    let summary = centre_summary(
        reports
            .iter()
            .map(|doc| doc.get("grade").and_then(|v| v.as_str())),
    );
    let mut v = json!(summary);
    v["percentDisplay"] = json!(summary.percent_display());
    v["gpaDisplay"] = json!(gpa_display(summary.gpa));
    v["examId"] = json!(exam_id);

    ok(&req.id, v)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.subjects" => Some(handle_stats_subjects(state, req)),
        "stats.centre" => Some(handle_stats_centre(state, req)),
        _ => None,
    }
}
