use super::error::err;
use super::types::{AppState, Request};
use rusqlite::Connection;

/// Required string param, or a ready-to-return `bad_params` envelope.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn store_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Milliseconds clock value injected by the shell for the debounced edit
/// path. Kept out of the daemon so replays and tests are deterministic.
pub fn required_now_ms(req: &Request, key: &str) -> Result<u64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("missing or negative {}", key),
                None,
            )
        })
}
