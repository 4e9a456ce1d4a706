use serde::Serialize;

/// Dashboard roles. `Role::None` is a real state (signed in but not on the
/// active staff list), not an error; such sessions can read but never write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Headmaster,
    Academic,
    ClassTeacher,
    None,
}

impl Role {
    /// Accepts the spellings seen in staff records over the years:
    /// `class_teacher`, `class teacher` and plain `teacher` all mean the
    /// class-teacher role. Anything unrecognized resolves to `None`.
    pub fn parse(raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "headmaster" => Role::Headmaster,
            "academic" => Role::Academic,
            "class_teacher" | "class teacher" | "teacher" => Role::ClassTeacher,
            _ => Role::None,
        }
    }

    /// Canonical spelling used when writing staff records.
    pub fn canonical(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Headmaster => "headmaster",
            Role::Academic => "academic",
            Role::ClassTeacher => "class_teacher",
            Role::None => "none",
        }
    }
}

/// One shared resolution for every guard: a session only carries a role when
/// its staff record exists, is active, and names a known role.
pub fn resolve_role(staff: Option<&serde_json::Value>) -> Role {
    let Some(doc) = staff else {
        return Role::None;
    };
    let active = doc.get("active").and_then(|v| v.as_bool()).unwrap_or(false);
    if !active {
        return Role::None;
    }
    let raw = doc.get("role").and_then(|v| v.as_str()).unwrap_or("");
    Role::parse(raw)
}

/// Mutations gated by the router before any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EditMarks,
    EditSettings,
    ManageStaff,
}

const EDITOR_ROLES: &[Role] = &[
    Role::Admin,
    Role::Headmaster,
    Role::Academic,
    Role::ClassTeacher,
];

pub fn permits(role: Role, action: Action) -> bool {
    match action {
        Action::EditMarks | Action::EditSettings => EDITOR_ROLES.contains(&role),
        Action::ManageStaff => role == Role::Admin,
    }
}

/// True when the role holds any edit action at all.
pub fn is_allowed_to_edit(role: Role) -> bool {
    permits(role, Action::EditMarks) || permits(role, Action::EditSettings)
}

/// Which roles may open each dashboard page. Unknown pages get `None` so the
/// caller can distinguish "denied" from "no such page".
pub fn page_access(page: &str) -> Option<&'static [Role]> {
    match page {
        "admin" => Some(&[Role::Admin]),
        "academic" => Some(&[Role::Admin, Role::Academic]),
        "class_teacher" => Some(&[Role::Admin, Role::ClassTeacher]),
        "marks_entry" | "ranking" | "report_cards" => Some(EDITOR_ROLES),
        "sms_logs" => Some(&[Role::Admin, Role::Headmaster, Role::Academic]),
        _ => None,
    }
}

pub fn page_allows(role: Role, page: &str) -> Option<bool> {
    page_access(page).map(|roles| roles.contains(&role))
}
