//! SQL command and role-class taxonomies.

use serde::{Deserialize, Serialize};

/// Command a policy applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

impl Command {
    /// The four concrete commands, in canonical order.
    ///
    /// `All` is a policy shorthand, not a command of its own, so it is
    /// excluded here.
    pub const CONCRETE: [Command; 4] = [
        Command::Select,
        Command::Insert,
        Command::Update,
        Command::Delete,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            Command::Select => "SELECT",
            Command::Insert => "INSERT",
            Command::Update => "UPDATE",
            Command::Delete => "DELETE",
            Command::All => "ALL",
        }
    }

    /// Lowercase token used in deterministic policy names.
    pub fn as_token(&self) -> &'static str {
        match self {
            Command::Select => "select",
            Command::Insert => "insert",
            Command::Update => "update",
            Command::Delete => "delete",
            Command::All => "all",
        }
    }

    /// Whether a policy for this command covers `other`.
    pub fn covers(&self, other: Command) -> bool {
        *self == Command::All || *self == other
    }

    /// Write commands carry a `WITH CHECK` clause; `SELECT` does not.
    pub fn is_write(&self) -> bool {
        !matches!(self, Command::Select)
    }
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Class of database role a policy targets.
///
/// These map onto the Supabase role convention: `anon`, `authenticated`, and
/// `service_role`. The framework reasons about classes, not concrete role
/// names, so other deployments can remap them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    Anonymous,
    Authenticated,
    Service,
}

impl RoleClass {
    pub fn role_name(&self) -> &'static str {
        match self {
            RoleClass::Anonymous => "anon",
            RoleClass::Authenticated => "authenticated",
            RoleClass::Service => "service_role",
        }
    }

    pub fn from_role_name(name: &str) -> Option<Self> {
        match name {
            "anon" => Some(RoleClass::Anonymous),
            "authenticated" => Some(RoleClass::Authenticated),
            "service_role" => Some(RoleClass::Service),
            _ => None,
        }
    }
}

impl core::fmt::Display for RoleClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.role_name())
    }
}
