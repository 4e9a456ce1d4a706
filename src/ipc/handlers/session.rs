use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, store_conn};
use crate::ipc::types::{AppState, Request, Session};
use crate::policy::{page_allows, resolve_role};
use crate::store::{self, collections};
use serde_json::json;

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "email": session.email,
        "staffId": session.staff_id,
        "name": session.display_name,
        "role": session.role.canonical(),
    })
}

/// The shell hands us a verified email; we decide what it may do. An email
/// with no active staff record still gets a session, just one with no role,
/// so the dashboard can render its signed-in-but-powerless view.
fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let email = match required_str(req, "email") {
        Ok(v) => v.trim().to_ascii_lowercase(),
        Err(resp) => return resp,
    };
    if email.is_empty() {
        return err(&req.id, "bad_params", "email must not be empty", None);
    }
    let conn = match store_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let staff = match store::get_all(conn, collections::STAFF) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "store_read_failed", format!("{e:?}"), None),
    };
    let found = staff.into_iter().find(|(_, doc)| {
        doc.get("email")
            .and_then(|v| v.as_str())
            .map(|e| e.trim().eq_ignore_ascii_case(&email))
            .unwrap_or(false)
    });

    let session = match found {
        Some((id, doc)) => Session {
            email: Some(email),
            staff_id: Some(id),
            display_name: doc
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            role: resolve_role(Some(&doc)),
        },
        None => Session {
            email: Some(email),
            staff_id: None,
            display_name: None,
            role: resolve_role(None),
        },
    };
    state.session = session;
    ok(&req.id, session_json(&state.session))
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, session_json(&state.session))
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session = Session::signed_out();
    ok(&req.id, json!({ "signedOut": true }))
}

fn handle_session_authorize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let page = match required_str(req, "page") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match page_allows(state.session.role, &page) {
        Some(allowed) => ok(
            &req.id,
            json!({
                "page": page,
                "role": state.session.role.canonical(),
                "allowed": allowed,
            }),
        ),
        None => err(
            &req.id,
            "unknown_page",
            format!("no such page: {}", page),
            None,
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_session_open(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        "session.close" => Some(handle_session_close(state, req)),
        "session.authorize" => Some(handle_session_authorize(state, req)),
        _ => None,
    }
}
