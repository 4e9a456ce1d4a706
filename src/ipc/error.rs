use serde_json::{json, Map, Value};

/// Success envelope: `{id, ok: true, result}`.
pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Failure envelope: `{id, ok: false, error: {code, message, details?}}`.
/// `details` carries machine-readable context the shell acts on (restored
/// values, offending fields); the message feeds the notification toast.
pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = Map::new();
    error.insert("code".into(), Value::String(code.to_string()));
    error.insert("message".into(), Value::String(message.into()));
    if let Some(d) = details {
        error.insert("details".into(), d);
    }
    json!({
        "id": id,
        "ok": false,
        "error": Value::Object(error),
    })
}

/// Denied-write envelope shared by every gated method.
pub fn forbidden(id: &str, role: &str, verb: &str) -> Value {
    err(
        id,
        "forbidden",
        format!("role '{}' may not {}", role, verb),
        Some(json!({ "role": role })),
    )
}

pub fn unknown_method(id: &str, method: &str) -> Value {
    err(
        id,
        "not_implemented",
        format!("unknown method: {}", method),
        None,
    )
}
