use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use crate::store;
use serde_json::json;
use std::path::PathBuf;

/// Daemon status for the shell's boot sequence: version, which workspace is
/// open, and who is signed in against it.
fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "role": state.session.role.canonical(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let path = PathBuf::from(raw);

    match store::open_store(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.store = Some(conn);
            // A workspace switch invalidates whoever was signed in against
            // the old one, along with any staged edits.
            state.session = Session::signed_out();
            state.edits.clear();
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "store_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
