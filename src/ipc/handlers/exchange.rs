use crate::grading::mean_display;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, store_conn};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

use super::reports::{class_rows, position_map};
use super::students::full_name;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Result sheet for one class and exam, one row per student in roster
/// order. Absences export as the literal ABS so they cannot be mistaken
/// for zeros downstream.
fn handle_exchange_export_results_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };

    let (subjects, rows) = match class_rows(conn, &class_id, &exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let positions = position_map(&rows);

    let codes: Vec<String> = subjects
        .iter()
        .map(|(_, doc)| {
            doc.get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        })
        .collect();

    let mut csv = String::from("admission_no,name,sex");
    for code in &codes {
        csv.push(',');
        csv.push_str(&csv_quote(code));
    }
    csv.push_str(",total,mean,grade,division,points,position\n");

    let rows_exported = rows.len();
    for row in &rows {
        let admission_no = row
            .doc
            .get("admissionNo")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let sex = row.doc.get("sex").and_then(|v| v.as_str()).unwrap_or("");
        csv.push_str(&csv_quote(admission_no));
        csv.push(',');
        csv.push_str(&csv_quote(&full_name(&row.doc)));
        csv.push(',');
        csv.push_str(sex);
        for (_, mark) in &row.marks {
            csv.push(',');
            match mark {
                Some(m) => csv.push_str(&m.to_string()),
                None => csv.push_str("ABS"),
            }
        }
        let position = positions
            .get(&row.student_id)
            .map(|p| p.to_string())
            .unwrap_or_default();
        csv.push_str(&format!(
            ",{},{},{},{},{},{}\n",
            row.agg.total,
            mean_display(row.agg.mean),
            row.agg.grade.map(|g| g.letter()).unwrap_or("-"),
            row.agg.division.numeral(),
            row.agg.points,
            position,
        ));
    }

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, csv) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": rows_exported, "path": out_path }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportResultsCsv" => Some(handle_exchange_export_results_csv(state, req)),
        _ => None,
    }
}
