use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::editor::EditQueue;
use crate::policy::Role;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Who is driving this sidecar. The shell verifies identity before it talks
/// to us; we only resolve what that identity is allowed to do.
#[derive(Debug, Clone)]
pub struct Session {
    pub email: Option<String>,
    pub staff_id: Option<String>,
    pub display_name: Option<String>,
    pub role: Role,
}

impl Session {
    pub fn signed_out() -> Self {
        Session {
            email: None,
            staff_id: None,
            display_name: None,
            role: Role::None,
        }
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Connection>,
    pub session: Session,
    pub edits: EditQueue,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            store: None,
            session: Session::signed_out(),
            edits: EditQueue::new(),
        }
    }
}
