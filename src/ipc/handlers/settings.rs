use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, collections};
use serde_json::{json, Map, Value};

use super::exams::EXAM_TYPES;

#[derive(Clone, Copy)]
enum SettingsSection {
    School,
    Exams,
    Reports,
}

const ALL_SECTIONS: [SettingsSection; 3] = [
    SettingsSection::School,
    SettingsSection::Exams,
    SettingsSection::Reports,
];

impl SettingsSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "exams" => Some(Self::Exams),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Exams => "exams",
            Self::Reports => "reports",
        }
    }
}

fn default_section(section: SettingsSection) -> Value {
    match section {
        SettingsSection::School => json!({
            "name": "",
            "centreNumber": "",
            "motto": "",
            "phone": ""
        }),
        SettingsSection::Exams => json!({
            "currentExamId": null,
            "defaultExamType": "TEST"
        }),
        SettingsSection::Reports => json!({
            "showPositions": true,
            "showCentreSummary": true,
            "footerNote": ""
        }),
    }
}

fn field_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn field_string(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim();
    if s.len() > max_len {
        return Err(format!("{} must be at most {} characters", key, max_len));
    }
    Ok(s.to_string())
}

fn field_nullable_string(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        Ok(Value::Null)
    } else {
        field_string(v, key, max_len).map(Value::String)
    }
}

fn merge_section_patch(
    section: SettingsSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let Some(obj) = current.as_object_mut() else {
        return Err("internal settings object must be a JSON object".into());
    };
    for (k, v) in patch {
        match section {
            SettingsSection::School => match k.as_str() {
                "name" => {
                    obj.insert(k.clone(), Value::String(field_string(v, k, 120)?));
                }
                "centreNumber" => {
                    // Centre numbers read like "S0123"; stored uppercase.
                    let s = field_string(v, k, 20)?.to_ascii_uppercase();
                    obj.insert(k.clone(), Value::String(s));
                }
                "motto" => {
                    obj.insert(k.clone(), Value::String(field_string(v, k, 160)?));
                }
                "phone" => {
                    obj.insert(k.clone(), Value::String(field_string(v, k, 32)?));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SettingsSection::Exams => match k.as_str() {
                "currentExamId" => {
                    obj.insert(k.clone(), field_nullable_string(v, k, 80)?);
                }
                "defaultExamType" => {
                    let t = field_string(v, k, 16)?.to_ascii_uppercase();
                    if !EXAM_TYPES.contains(&t.as_str()) {
                        return Err("defaultExamType must be one of: TEST, MIDTERM, ANNUAL".into());
                    }
                    obj.insert(k.clone(), Value::String(t));
                }
                _ => return Err(format!("unknown exams field: {}", k)),
            },
            SettingsSection::Reports => match k.as_str() {
                "showPositions" | "showCentreSummary" => {
                    obj.insert(k.clone(), Value::Bool(field_bool(v, k)?));
                }
                "footerNote" => {
                    obj.insert(k.clone(), Value::String(field_string(v, k, 200)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SettingsSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = store::get_by_id(conn, collections::SETTINGS, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not
            // block the settings page.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in ALL_SECTIONS {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.key().to_string(), v);
            }
            Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SettingsSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = store::set(conn, collections::SETTINGS, section.key(), &current, false) {
        return err(&req.id, "store_write_failed", format!("{e:?}"), None);
    }
    ok(
        &req.id,
        json!({ "section": section.key(), "settings": current }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
