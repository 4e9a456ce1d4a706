use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::{forbidden, unknown_method};
use crate::policy::{permits, Action, Role};
use crate::store::{self, collections};

/// Which gate a mutating method sits behind. Read methods carry no action
/// and pass straight through.
fn required_action(method: &str) -> Option<Action> {
    match method {
        "classes.create" | "students.create" | "students.update" | "subjects.save"
        | "exams.create" | "settings.update" => Some(Action::EditSettings),
        "marks.updateCell" | "marks.edit" | "marks.flush" | "reports.generate" => {
            Some(Action::EditMarks)
        }
        "staff.upsert" => Some(Action::ManageStaff),
        _ => None,
    }
}

fn action_name(action: Action) -> &'static str {
    match action {
        Action::EditMarks => "edit marks",
        Action::EditSettings => "edit settings",
        Action::ManageStaff => "manage staff",
    }
}

/// A new workspace has no staff records, so no session could ever hold
/// ManageStaff. The first staff write goes through ungated, and it must
/// create an admin; any other first record would leave staff management
/// unreachable for good.
fn first_staff_bootstrap(state: &AppState, req: &Request) -> bool {
    if req.method != "staff.upsert" {
        return false;
    }
    let wants_admin = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .map(|r| Role::parse(r) == Role::Admin)
        .unwrap_or(false);
    if !wants_admin {
        return false;
    }
    let Some(conn) = state.store.as_ref() else {
        return false;
    };
    store::get_all(conn, collections::STAFF)
        .map(|rows| rows.is_empty())
        .unwrap_or(false)
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    // One checkpoint for every write. A denied request never reaches its
    // handler, so nothing can touch the store.
    if let Some(action) = required_action(&req.method) {
        let role = state.session.role;
        if !permits(role, action) && !first_staff_bootstrap(state, &req) {
            return forbidden(&req.id, role.canonical(), action_name(action));
        }
    }

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exams::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::staff::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::marks::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::statistics::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::settings::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exchange::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &req) {
        return resp;
    }

    unknown_method(&req.id, &req.method)
}
